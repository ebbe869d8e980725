//! Run sequencing.
//!
//! Clone, pre-update, dependency update (with patch reconciliation), branch
//! selection, site install join, per-site update, post-update, description,
//! push and merge request. States run strictly in this order and are never
//! re-entered. Fatal errors return before anything is pushed.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn, Instrument};

use crate::collaborators::{
    CodeHost, DeprecationRewriter, IssueTracker, PackageManager, Repository, SiteTool, StyleFixer,
    UpstreamForge,
};
use crate::config::Config;
use crate::context::RunContext;
use crate::dependency::{DependencyUpdateOutcome, DependencyUpdater};
use crate::error::{Result, UpkeepError};
use crate::events::{Addon, Event, EventDispatcher, EventPayload};
use crate::install::{InstallHandle, SiteInstaller};
use crate::model::MergeRequest;
use crate::patches::PatchReconciler;
use crate::report::{diff_table_too_long, render_description, WorkflowUpdateResult};
use crate::site_pipeline::{default_group_size, SitePipeline};
use crate::strategy::WorkflowStrategy;
use crate::telemetry::{self, RunSpan};
use crate::worktree::SharedWorktree;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing to do; no repository writes were pushed.
    NoOp(String),
    /// The target branch already exists remotely.
    BranchExists(String),
    DryRun { branch: String, title: String, description: String },
    MergeRequestCreated { branch: String, merge_request: MergeRequest },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::NoOp(_) => "no-op",
            RunOutcome::BranchExists(_) => "branch-exists",
            RunOutcome::DryRun { .. } => "dry-run",
            RunOutcome::MergeRequestCreated { .. } => "merge-request-created",
        }
    }
}

/// Every external collaborator of a run.
#[derive(Clone)]
pub struct Services {
    pub repository: Arc<dyn Repository>,
    pub packages: Arc<dyn PackageManager>,
    pub sites: Arc<dyn SiteTool>,
    pub tracker: Arc<dyn IssueTracker>,
    /// `None` when no upstream forge credential is configured.
    pub upstream: Option<Arc<dyn UpstreamForge>>,
    pub code_host: Arc<dyn CodeHost>,
    pub style: Arc<dyn StyleFixer>,
    pub rewriter: Arc<dyn DeprecationRewriter>,
}

pub struct Orchestrator {
    config: Config,
    services: Services,
    strategy: Box<dyn WorkflowStrategy>,
    dispatcher: Arc<EventDispatcher>,
    group_size: usize,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        services: Services,
        strategy: Box<dyn WorkflowStrategy>,
        addons: Vec<Box<dyn Addon>>,
    ) -> Self {
        let group_size = config.site_parallelism.unwrap_or_else(default_group_size);
        Self {
            config,
            services,
            strategy,
            dispatcher: Arc::new(EventDispatcher::new(addons)),
            group_size,
        }
    }

    /// Execute one update run.
    pub async fn run(&mut self, ctx: &RunContext) -> Result<RunOutcome> {
        self.config.validate()?;
        let started = Instant::now();
        let span = RunSpan::span(ctx.run_id());
        telemetry::emit_run_started(ctx.run_id(), &self.config.repository_url, self.strategy.name());

        let outcome = self.run_inner(ctx).instrument(span).await;

        let label = match &outcome {
            Ok(outcome) => outcome.label(),
            Err(_) => "failed",
        };
        telemetry::emit_run_finished(ctx.run_id(), started.elapsed().as_millis() as u64, label);
        outcome
    }

    async fn run_inner(&mut self, ctx: &RunContext) -> Result<RunOutcome> {
        // Dropping the handle on any early return aborts the installation.
        let mut install = SiteInstaller::new(
            Arc::clone(&self.services.repository),
            Arc::clone(&self.services.packages),
            Arc::clone(&self.services.sites),
            self.group_size,
        )
        .spawn(
            ctx,
            &self.config.repository_url,
            &self.config.branch,
            self.config.sites.clone(),
        );

        match self.update(ctx, &mut install).await {
            // A failed install cancels the run; report why.
            Err(err) if err.is_cancelled() => match install.failure().await {
                Some(install_err) => Err(install_err),
                None => Err(err),
            },
            outcome => outcome,
        }
    }

    async fn update(&mut self, ctx: &RunContext, install: &mut InstallHandle) -> Result<RunOutcome> {
        let url = self.config.repository_url.clone();
        let branch = self.config.branch.clone();

        info!(repository = %url, branch = %branch, "cloning repository for update");
        let checkout = self
            .services
            .repository
            .clone_repository(ctx, &url, &branch)
            .await
            .map_err(|err| {
                if err.is_cancelled() {
                    err
                } else {
                    UpkeepError::Clone {
                        url: url.clone(),
                        reason: err.to_string(),
                    }
                }
            })?;
        let dir = checkout.path;
        let worktree = SharedWorktree::new(checkout.worktree);
        let base_commit = self.services.repository.head_commit(ctx, &dir).await?;

        let pre = self.strategy.pre_update(ctx, &dir).await?;
        if !self.strategy.should_continue(&pre.packages_to_update) {
            return Ok(RunOutcome::NoOp("nothing to update".to_string()));
        }

        let updater = DependencyUpdater::new(
            Arc::clone(&self.services.packages),
            PatchReconciler::new(
                Arc::clone(&self.services.packages),
                Arc::clone(&self.services.tracker),
                self.services.upstream.clone(),
            ),
            Arc::clone(&self.dispatcher),
        );
        let report = match updater
            .run(ctx, &dir, &worktree, pre.packages_to_update, pre.minimal_changes)
            .await?
        {
            DependencyUpdateOutcome::Aborted => {
                return Ok(RunOutcome::NoOp("aborted by addon".to_string()))
            }
            DependencyUpdateOutcome::Updated(report) => report,
        };
        if !report.has_changes() {
            info!("no package or patch changes");
            return Ok(RunOutcome::NoOp("no package or patch changes".to_string()));
        }

        let lock_hash = self.services.packages.lock_hash(ctx, &dir).await?;
        let update_branch = self.strategy.branch_name(&lock_hash);
        if self
            .services
            .repository
            .remote_branch_exists(ctx, &dir, &update_branch)
            .await?
        {
            warn!(branch = %update_branch, "branch already exists, skipping");
            return Ok(RunOutcome::BranchExists(update_branch));
        }
        worktree.checkout(&update_branch, true).await?;

        let diff_table = self.diff_table(ctx, &dir, &base_commit).await?;

        let install_path = install.join().await?;
        info!(path = %install_path.display(), "sites installed");

        let update_hooks = SitePipeline::new(
            Arc::clone(&self.services.sites),
            Arc::clone(&self.dispatcher),
        )
        .with_group_size(self.group_size)
        .run(ctx, &dir, &worktree, &self.config.sites)
        .await?;

        self.strategy.post_update(ctx, &dir).await?;

        let mut pre_report = Event::new(
            ctx.clone(),
            &dir,
            worktree.clone(),
            EventPayload::PreReportCreate {
                title: self.strategy.title(),
            },
        );
        self.dispatcher.dispatch(&mut pre_report).await?;
        let title = match pre_report.payload {
            EventPayload::PreReportCreate { title } => title,
            _ => self.strategy.title(),
        };

        let description = render_description(&WorkflowUpdateResult {
            diff_table,
            dependency_report: report,
            security: self.strategy.security_report(),
            update_hooks,
            addon_fragments: self.dispatcher.reports().await,
        });

        if self.config.dry_run {
            info!(branch = %update_branch, "dry run, not pushing");
            return Ok(RunOutcome::DryRun {
                branch: update_branch,
                title,
                description,
            });
        }

        self.services
            .repository
            .push(ctx, &dir, &update_branch)
            .await?;
        let merge_request = self
            .services
            .code_host
            .create_merge_request(ctx, &title, &description, &update_branch, &branch)
            .await?;
        info!(url = %merge_request.url, "merge request created");

        Ok(RunOutcome::MergeRequestCreated {
            branch: update_branch,
            merge_request,
        })
    }

    async fn diff_table(&self, ctx: &RunContext, dir: &Path, base: &str) -> Result<String> {
        let linked = self.services.packages.diff(ctx, dir, base, true).await?;
        if diff_table_too_long(&linked) {
            info!("diff table too long, using the link-less variant");
            return self.services.packages.diff(ctx, dir, base, false).await;
        }
        Ok(linked)
    }
}
