//! Dependency update step: pre-update event, patch reconciliation, the real
//! package-manager update and the resulting commits.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::{PackageManager, UpdateRequest};
use crate::context::RunContext;
use crate::error::{Result, UpkeepError};
use crate::events::{Event, EventDispatcher, EventPayload};
use crate::model::{PackageChange, PatchSet};
use crate::patches::{PatchReconciler, PatchUpdates};
use crate::worktree::SharedWorktree;

const PATCHES_KEY: &str = "extra.patches";

/// What the dependency update changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyUpdateReport {
    pub changes: Vec<PackageChange>,
    pub patch_updates: PatchUpdates,
}

impl DependencyUpdateReport {
    /// Whether the run produced anything worth a merge request.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty() || self.patch_updates.changes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyUpdateOutcome {
    /// A pre-update listener asked to stop.
    Aborted,
    Updated(DependencyUpdateReport),
}

fn update_failed(err: UpkeepError) -> UpkeepError {
    if err.is_cancelled() {
        err
    } else {
        UpkeepError::DependencyUpdate(err.to_string())
    }
}

pub struct DependencyUpdater {
    packages: Arc<dyn PackageManager>,
    reconciler: PatchReconciler,
    dispatcher: Arc<EventDispatcher>,
}

impl DependencyUpdater {
    pub fn new(
        packages: Arc<dyn PackageManager>,
        reconciler: PatchReconciler,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            packages,
            reconciler,
            dispatcher,
        }
    }

    #[tracing::instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn run(
        &self,
        ctx: &RunContext,
        dir: &Path,
        worktree: &SharedWorktree,
        packages_to_update: Vec<String>,
        minimal_changes: bool,
    ) -> Result<DependencyUpdateOutcome> {
        let mut event = Event::new(
            ctx.clone(),
            dir,
            worktree.clone(),
            EventPayload::PreDependencyUpdate {
                packages_to_update,
                packages_to_keep: Vec::new(),
                minimal_changes,
                abort: false,
            },
        );
        self.dispatcher.dispatch(&mut event).await?;
        let EventPayload::PreDependencyUpdate {
            packages_to_update,
            packages_to_keep,
            minimal_changes,
            abort,
        } = event.payload
        else {
            return Err(UpkeepError::DependencyUpdate(
                "pre-dependency-update payload replaced by a listener".to_string(),
            ));
        };
        if abort {
            info!("dependency update aborted by listener");
            return Ok(DependencyUpdateOutcome::Aborted);
        }

        let patches = self.read_patches(ctx, dir).await?;
        let pending = self
            .packages
            .update(
                ctx,
                dir,
                &UpdateRequest {
                    packages: packages_to_update.clone(),
                    keep: packages_to_keep.clone(),
                    minimal_changes,
                    dry_run: true,
                },
            )
            .await
            .map_err(update_failed)?;
        debug!(pending = pending.len(), "pending package changes");

        let (patch_updates, patches) = self
            .reconciler
            .reconcile(ctx, dir, worktree, &pending, patches)
            .await?;

        if patch_updates.changes() {
            self.packages
                .set_config(ctx, dir, PATCHES_KEY, &serde_json::to_value(&patches)?)
                .await?;
            self.packages.update_lock_hash(ctx, dir).await?;
            worktree
                .commit_glob_if_staged("composer.*", "Update patches")
                .await?;
        }

        let mut keep = packages_to_keep;
        keep.extend(patch_updates.packages_to_keep());
        let changes = self
            .packages
            .update(
                ctx,
                dir,
                &UpdateRequest {
                    packages: packages_to_update,
                    keep,
                    minimal_changes,
                    dry_run: false,
                },
            )
            .await
            .map_err(update_failed)?;
        info!(changes = changes.len(), removed_patches = patch_updates.removed.len(), updated_patches = patch_updates.updated.len(), conflicts = patch_updates.conflicts.len(), "dependencies updated");

        let mut post = Event::new(
            ctx.clone(),
            dir,
            worktree.clone(),
            EventPayload::PostDependencyUpdate,
        );
        self.dispatcher.dispatch(&mut post).await?;

        worktree
            .commit_glob_if_staged("composer.*", "Update composer.json and composer.lock")
            .await?;

        Ok(DependencyUpdateOutcome::Updated(DependencyUpdateReport {
            changes,
            patch_updates,
        }))
    }

    async fn read_patches(&self, ctx: &RunContext, dir: &Path) -> Result<PatchSet> {
        match self.packages.get_config(ctx, dir, PATCHES_KEY).await {
            Ok(Some(value)) => Ok(serde_json::from_value(value)?),
            Ok(None) => {
                debug!("{PATCHES_KEY} not defined");
                Ok(PatchSet::new())
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!(error = %e, "{PATCHES_KEY} not readable, assuming no patches");
                Ok(PatchSet::new())
            }
        }
    }
}
