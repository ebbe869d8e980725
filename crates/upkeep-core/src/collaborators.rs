//! Collaborator contracts consumed by the engine.
//!
//! These traits define every external system the engine talks to:
//! - `PackageManager`: dependency updates, patch checks, audits, config
//! - `SiteTool`: per-site install, update and configuration export
//! - `IssueTracker`: issue lookup by number
//! - `UpstreamForge`: upstream commit search and merge-request diffs
//! - `CodeHost`: merge requests on the project's own code host
//! - `Repository` / `Worktree`: clone, stage, commit, push
//! - `StyleFixer` / `DeprecationRewriter`: code-quality tools
//!
//! Concrete subprocess and HTTP adapters live in `upkeep-tools`; in-memory
//! fakes live in [`crate::fakes`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::Result;
use crate::model::{
    Advisory, CommitRef, Issue, MergeRequest, PackageChange, SiteHooks, UpstreamMergeRequest,
};

// ---------------------------------------------------------------------------
// PackageManager
// ---------------------------------------------------------------------------

/// Options for one package-manager update invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Packages to update; empty means everything.
    pub packages: Vec<String>,
    /// `package:version` constraints to hold back.
    pub keep: Vec<String>,
    pub minimal_changes: bool,
    pub dry_run: bool,
}

/// Package manager operating on a project directory.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install(&self, ctx: &RunContext, dir: &Path) -> Result<()>;

    /// Run an update and return the package operations it performed (or
    /// would perform, for a dry run).
    async fn update(
        &self,
        ctx: &RunContext,
        dir: &Path,
        request: &UpdateRequest,
    ) -> Result<Vec<PackageChange>>;

    /// Whether `patch` (absolute path or URL) applies to `package` at `version`.
    async fn check_patch_applies(
        &self,
        ctx: &RunContext,
        package: &str,
        version: &str,
        patch: &str,
    ) -> Result<bool>;

    async fn installed_plugins(&self, ctx: &RunContext, dir: &Path) -> Result<BTreeSet<String>>;

    async fn audit(&self, ctx: &RunContext, dir: &Path) -> Result<Vec<Advisory>>;

    /// Content hash of the lock file.
    async fn lock_hash(&self, ctx: &RunContext, dir: &Path) -> Result<String>;

    /// Recompute the lock file's content hash after a manual config edit.
    async fn update_lock_hash(&self, ctx: &RunContext, dir: &Path) -> Result<()>;

    /// Read a config key as JSON. `None` when the key is not defined.
    async fn get_config(
        &self,
        ctx: &RunContext,
        dir: &Path,
        key: &str,
    ) -> Result<Option<serde_json::Value>>;

    async fn set_config(
        &self,
        ctx: &RunContext,
        dir: &Path,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<()>;

    async fn is_installed(&self, ctx: &RunContext, dir: &Path, package: &str) -> Result<bool>;

    /// Markdown table of lock-file differences against `base_ref`.
    async fn diff(
        &self,
        ctx: &RunContext,
        dir: &Path,
        base_ref: &str,
        with_links: bool,
    ) -> Result<String>;

    async fn normalize(&self, ctx: &RunContext, dir: &Path) -> Result<()>;

    async fn require(&self, ctx: &RunContext, dir: &Path, package: &str, dev: bool)
        -> Result<()>;

    async fn remove(&self, ctx: &RunContext, dir: &Path, package: &str, dev: bool) -> Result<()>;

    /// Custom module, theme and profile directories, relative to `dir`.
    async fn custom_code_directories(&self, ctx: &RunContext, dir: &Path) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// SiteTool
// ---------------------------------------------------------------------------

/// Site automation tool, addressed per site.
#[async_trait]
pub trait SiteTool: Send + Sync {
    async fn install_site(&self, ctx: &RunContext, dir: &Path, site: &str) -> Result<()>;

    /// Point the site at a throwaway local database.
    async fn configure_database(&self, ctx: &RunContext, dir: &Path, site: &str) -> Result<()>;

    async fn update_site(&self, ctx: &RunContext, dir: &Path, site: &str) -> Result<()>;

    async fn config_resave(&self, ctx: &RunContext, dir: &Path, site: &str) -> Result<()>;

    async fn export_configuration(&self, ctx: &RunContext, dir: &Path, site: &str) -> Result<()>;

    /// Config sync directory, relative to `dir` when `relative` is set.
    async fn config_sync_dir(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        relative: bool,
    ) -> Result<String>;

    async fn is_module_enabled(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        module: &str,
    ) -> Result<bool>;

    async fn discover_upgrade_hooks(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
    ) -> Result<SiteHooks>;

    async fn localize_translations(&self, ctx: &RunContext, dir: &Path, site: &str) -> Result<()>;

    async fn translation_path(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        relative: bool,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// IssueTracker
// ---------------------------------------------------------------------------

fn issue_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d{6,}").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Remote issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_issue(&self, ctx: &RunContext, id: &str) -> Result<Issue>;

    /// First run of six or more digits in `text`.
    fn find_issue_number(&self, text: &str) -> Option<String> {
        issue_number_pattern()
            .find(text)
            .map(|m| m.as_str().to_string())
    }
}

// ---------------------------------------------------------------------------
// UpstreamForge
// ---------------------------------------------------------------------------

/// Code host of the upstream packages (where issue forks and fixes live).
#[async_trait]
pub trait UpstreamForge: Send + Sync {
    /// Commits in `project` on `git_ref` whose message matches `query`.
    async fn search_commits(
        &self,
        ctx: &RunContext,
        project: &str,
        query: &str,
        git_ref: &str,
    ) -> Result<Vec<CommitRef>>;

    /// Merge requests on `target_project` opened from `source_project`.
    async fn find_merge_requests_by_source_project(
        &self,
        ctx: &RunContext,
        target_project: &str,
        source_project: &str,
    ) -> Result<Vec<UpstreamMergeRequest>>;

    async fn download(&self, ctx: &RunContext, url: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// CodeHost
// ---------------------------------------------------------------------------

/// The code host of the repository being updated.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn create_merge_request(
        &self,
        ctx: &RunContext,
        title: &str,
        body: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<MergeRequest>;

    async fn download_file(&self, ctx: &RunContext, branch: &str, path: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Repository / Worktree
// ---------------------------------------------------------------------------

/// Working-tree state as reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeStatus {
    /// Paths with changes in the index.
    pub staged: Vec<String>,
    /// Paths modified or untracked but not staged.
    pub unstaged: Vec<String>,
}

impl WorktreeStatus {
    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty()
    }
}

/// Mutable view of a checked-out repository. Not safe for concurrent index
/// mutation; share it through [`crate::worktree::SharedWorktree`].
#[async_trait]
pub trait Worktree: Send + Sync {
    async fn add(&mut self, path: &str) -> Result<()>;

    async fn add_glob(&mut self, pattern: &str) -> Result<()>;

    /// Remove `path` from the index and the working tree.
    async fn remove(&mut self, path: &str) -> Result<()>;

    async fn commit(&mut self, message: &str) -> Result<()>;

    async fn status(&self) -> Result<WorktreeStatus>;

    async fn checkout(&mut self, branch: &str, create: bool) -> Result<()>;
}

/// A fresh clone.
pub struct Checkout {
    pub path: PathBuf,
    pub worktree: Box<dyn Worktree>,
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout").field("path", &self.path).finish()
    }
}

/// Remote repository access.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn clone_repository(&self, ctx: &RunContext, url: &str, branch: &str)
        -> Result<Checkout>;

    async fn remote_branch_exists(&self, ctx: &RunContext, dir: &Path, branch: &str)
        -> Result<bool>;

    async fn push(&self, ctx: &RunContext, dir: &Path, branch: &str) -> Result<()>;

    async fn head_commit(&self, ctx: &RunContext, dir: &Path) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Code quality tools
// ---------------------------------------------------------------------------

/// Summary of a style check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleReport {
    pub errors: u64,
    pub warnings: u64,
    /// `file -> messages`
    pub files: Vec<(String, Vec<String>)>,
}

#[async_trait]
pub trait StyleFixer: Send + Sync {
    async fn fix(&self, ctx: &RunContext, dir: &Path, paths: &[String]) -> Result<()>;

    async fn check(&self, ctx: &RunContext, dir: &Path, paths: &[String]) -> Result<StyleReport>;
}

/// Result of a deprecation rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteReport {
    pub changed_files: Vec<String>,
    pub errors: u64,
}

#[async_trait]
pub trait DeprecationRewriter: Send + Sync {
    /// Package that must be required for the rewriter to run.
    fn package(&self) -> &str;

    async fn run(&self, ctx: &RunContext, dir: &Path, paths: &[String]) -> Result<RewriteReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTracker;

    #[async_trait]
    impl IssueTracker for NoTracker {
        async fn get_issue(&self, _ctx: &RunContext, id: &str) -> Result<Issue> {
            Err(crate::error::UpkeepError::collaborator("tracker", id))
        }
    }

    #[test]
    fn test_find_issue_number_takes_first_long_run() {
        let t = NoTracker;
        assert_eq!(
            t.find_issue_number("patches/12345-3412345-fix-67890123.patch").as_deref(),
            Some("3412345")
        );
        assert_eq!(
            t.find_issue_number("https://www.drupal.org/project/token/issues/2950315"),
            Some("2950315".to_string())
        );
        assert_eq!(t.find_issue_number("Fix the 12345 thing"), None);
    }

    #[test]
    fn test_worktree_status_flags() {
        let mut s = WorktreeStatus::default();
        assert!(s.is_clean());
        s.unstaged.push("web/modules/custom/foo/foo.module".to_string());
        assert!(!s.is_clean());
        assert!(!s.has_staged());
        s.staged.push("composer.json".to_string());
        assert!(s.has_staged());
    }
}
