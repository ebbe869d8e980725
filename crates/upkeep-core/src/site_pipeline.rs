//! Per-site update pipeline.
//!
//! Sites share one working tree and are processed in fixed-size groups.
//! Every site in a group runs concurrently; the next group only starts once
//! the whole group has finished, and the first failure of a group ends the
//! pipeline. Applied per-site changes are not rolled back.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, Instrument};

use crate::collaborators::SiteTool;
use crate::context::RunContext;
use crate::error::{Result, UpkeepError};
use crate::events::{Event, EventDispatcher, EventPayload};
use crate::model::{SiteUpdateResult, UpdateHooksPerSite};
use crate::telemetry;
use crate::worktree::SharedWorktree;

/// Available parallelism minus one unit for a concurrent package-manager
/// process, never below one.
pub fn default_group_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

/// Runs the per-site update procedure over every site.
#[derive(Clone)]
pub struct SitePipeline {
    sites: Arc<dyn SiteTool>,
    dispatcher: Arc<EventDispatcher>,
    group_size: usize,
}

impl SitePipeline {
    pub fn new(sites: Arc<dyn SiteTool>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            sites,
            dispatcher,
            group_size: default_group_size(),
        }
    }

    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size.max(1);
        self
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Update all `site_list` entries. Returns hooks for sites that had any.
    #[tracing::instrument(skip_all, fields(sites = site_list.len(), group_size = self.group_size))]
    pub async fn run(
        &self,
        ctx: &RunContext,
        dir: &Path,
        worktree: &SharedWorktree,
        site_list: &[String],
    ) -> Result<UpdateHooksPerSite> {
        let mut hooks = UpdateHooksPerSite::new();

        for group in site_list.chunks(self.group_size) {
            ctx.check()?;
            debug!(group = ?group, "updating site group");
            let (tx, mut rx) = mpsc::channel::<SiteUpdateResult>(group.len());

            let tasks: Vec<_> = group
                .iter()
                .map(|site| {
                    let worker = self.clone();
                    let ctx = ctx.clone();
                    let dir = dir.to_path_buf();
                    let worktree = worktree.clone();
                    let site = site.clone();
                    let tx = tx.clone();
                    let span = tracing::info_span!("site", site = %site);
                    tokio::spawn(
                        async move {
                            let result = worker.update_site(&ctx, &dir, &worktree, &site).await;
                            // capacity equals group size, so this never waits
                            let _ = tx.send(result).await;
                        }
                        .instrument(span),
                    )
                })
                .collect();
            drop(tx);

            for joined in futures::future::join_all(tasks).await {
                joined?;
            }

            let mut first_error = None;
            while let Some(result) = rx.recv().await {
                match result.error {
                    Some(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                    None => {
                        telemetry::emit_site_updated(&result.site, result.discovered_hooks.len());
                        if !result.discovered_hooks.is_empty() {
                            hooks.insert(result.site, result.discovered_hooks);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        Ok(hooks)
    }

    async fn update_site(
        &self,
        ctx: &RunContext,
        dir: &Path,
        worktree: &SharedWorktree,
        site: &str,
    ) -> SiteUpdateResult {
        let mut discovered = Default::default();
        let error = self
            .update_site_inner(ctx, dir, worktree, site, &mut discovered)
            .await
            .err()
            .map(|err| {
                if err.is_cancelled() {
                    err
                } else {
                    UpkeepError::SiteUpdate {
                        site: site.to_string(),
                        reason: err.to_string(),
                    }
                }
            });
        SiteUpdateResult {
            site: site.to_string(),
            discovered_hooks: discovered,
            error,
        }
    }

    async fn update_site_inner(
        &self,
        ctx: &RunContext,
        dir: &Path,
        worktree: &SharedWorktree,
        site: &str,
        discovered: &mut crate::model::SiteHooks,
    ) -> Result<()> {
        info!("updating site");
        self.sites.configure_database(ctx, dir, site).await?;
        *discovered = self.sites.discover_upgrade_hooks(ctx, dir, site).await?;
        debug!(hooks = discovered.len(), "discovered upgrade hooks");

        let mut pre = Event::new(
            ctx.clone(),
            dir,
            worktree.clone(),
            EventPayload::PreSiteUpdate {
                site: site.to_string(),
            },
        );
        self.dispatcher.dispatch(&mut pre).await?;

        self.sites.update_site(ctx, dir, site).await?;
        self.sites.config_resave(ctx, dir, site).await?;

        let mut post = Event::new(
            ctx.clone(),
            dir,
            worktree.clone(),
            EventPayload::PostSiteUpdate {
                site: site.to_string(),
            },
        );
        self.dispatcher.dispatch(&mut post).await?;

        info!("exporting configuration");
        self.sites.export_configuration(ctx, dir, site).await?;
        let sync_dir = self.sites.config_sync_dir(ctx, dir, site, true).await?;
        worktree
            .commit_if_staged(&[sync_dir.as_str()], &format!("Update configuration {site}"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_group_size_is_at_least_one() {
        assert!(default_group_size() >= 1);
    }

    #[test]
    fn test_group_size_override_clamps_to_one() {
        let pipeline = SitePipeline::new(
            Arc::new(crate::fakes::FakeSiteTool::new()),
            Arc::new(EventDispatcher::default()),
        )
        .with_group_size(0);
        assert_eq!(pipeline.group_size(), 1);
    }
}
