//! Upkeep core: automated dependency maintenance for Drupal projects
//!
//! One run clones a project, updates its Composer dependencies, reconciles
//! the patches applied on top of them, runs every site's update procedure
//! and opens a merge request describing the result.
//!
//! ## Key Components
//!
//! - `Orchestrator`: sequences one run end to end
//! - `WorkflowStrategy`: maintenance vs. security-only policy
//! - `PatchReconciler`: keeps, replaces, removes or pins each patch
//! - `SitePipeline`: grouped, parallel per-site updates on a shared worktree
//! - `EventDispatcher` / `Addon`: prioritized hooks around the run
//!
//! External systems are reached through the traits in [`collaborators`];
//! concrete adapters live in `upkeep-tools`.

pub mod addons;
pub mod changes;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod dependency;
pub mod error;
pub mod events;
pub mod fakes;
pub mod install;
pub mod model;
pub mod orchestrator;
pub mod patches;
pub mod report;
pub mod site_pipeline;
pub mod strategy;
pub mod telemetry;
pub mod worktree;

pub use collaborators::{
    Checkout, CodeHost, DeprecationRewriter, IssueTracker, PackageManager, Repository,
    RewriteReport, SiteTool, StyleFixer, StyleReport, UpdateRequest, UpstreamForge, Worktree,
    WorktreeStatus,
};
pub use config::Config;
pub use context::RunContext;
pub use error::{Result, UpkeepError};
pub use events::{Addon, Event, EventDispatcher, EventName, EventPayload, Priority};
pub use model::{
    Advisory, ChangeAction, HookId, HookInfo, Issue, MergeRequest, PackageChange, PatchSet,
};
pub use orchestrator::{Orchestrator, RunOutcome, Services};
pub use patches::{PatchReconciler, PatchUpdates};
pub use strategy::{MaintenanceStrategy, SecurityStrategy, WorkflowStrategy};
pub use telemetry::init_tracing;
pub use worktree::SharedWorktree;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
