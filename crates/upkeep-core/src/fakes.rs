//! In-memory fakes for the collaborator traits (testing only)
//!
//! Every fake records what it was asked to do and can be scripted with
//! canned answers or failures. None of them touch a network or spawn a
//! process; `FakeRepository` only creates empty clone directories.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::collaborators::*;
use crate::context::RunContext;
use crate::error::{Result, UpkeepError};
use crate::model::{
    Advisory, CommitRef, Issue, MergeRequest, PackageChange, SiteHooks, UpstreamMergeRequest,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// FakeWorktree
// ---------------------------------------------------------------------------

/// One recorded commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub message: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Default)]
struct WorktreeState {
    unstaged: BTreeSet<String>,
    staged: BTreeSet<String>,
    removed: Vec<String>,
    commits: Vec<CommitRecord>,
    branch: Option<String>,
    active: usize,
    max_active: usize,
}

/// Observation handle shared by a `FakeWorktree` and the test.
#[derive(Debug, Clone, Default)]
pub struct WorktreeLog {
    state: Arc<Mutex<WorktreeState>>,
}

impl WorktreeLog {
    /// Mark `path` as modified in the working tree.
    pub fn touch(&self, path: &str) {
        lock(&self.state).unstaged.insert(path.to_string());
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        lock(&self.state).commits.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        lock(&self.state).removed.clone()
    }

    pub fn staged(&self) -> Vec<String> {
        lock(&self.state).staged.iter().cloned().collect()
    }

    /// Branch of the last checkout, if any.
    pub fn branch(&self) -> Option<String> {
        lock(&self.state).branch.clone()
    }

    /// Highest number of index mutations observed in flight at once.
    pub fn max_concurrent_mutations(&self) -> usize {
        lock(&self.state).max_active
    }

    fn begin(&self) {
        let mut state = lock(&self.state);
        state.active += 1;
        state.max_active = state.max_active.max(state.active);
    }

    fn end(&self) {
        lock(&self.state).active -= 1;
    }
}

/// Worktree that stages touched paths by prefix and records commits.
#[derive(Debug, Default)]
pub struct FakeWorktree {
    log: WorktreeLog,
}

impl FakeWorktree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: WorktreeLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> WorktreeLog {
        self.log.clone()
    }

    async fn mutate<F: FnOnce(&mut WorktreeState)>(&self, f: F) {
        self.log.begin();
        tokio::task::yield_now().await;
        f(&mut *lock(&self.log.state));
        self.log.end();
    }
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    match pattern.split_once('*') {
        Some((head, tail)) => {
            path.len() >= head.len() + tail.len() && path.starts_with(head) && path.ends_with(tail)
        }
        None => path == pattern,
    }
}

fn stage_matching(state: &mut WorktreeState, matches: impl Fn(&str) -> bool) {
    let hits: Vec<String> = state
        .unstaged
        .iter()
        .filter(|p| matches(p))
        .cloned()
        .collect();
    for hit in hits {
        state.unstaged.remove(&hit);
        state.staged.insert(hit);
    }
}

#[async_trait]
impl Worktree for FakeWorktree {
    async fn add(&mut self, path: &str) -> Result<()> {
        let prefix = path.to_string();
        self.mutate(|state| stage_matching(state, |p| p.starts_with(&prefix)))
            .await;
        Ok(())
    }

    async fn add_glob(&mut self, pattern: &str) -> Result<()> {
        let pattern = pattern.to_string();
        self.mutate(|state| stage_matching(state, |p| glob_matches(&pattern, p)))
            .await;
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.mutate(|state| {
            state.unstaged.remove(&path);
            state.staged.insert(path.clone());
            state.removed.push(path);
        })
        .await;
        Ok(())
    }

    async fn commit(&mut self, message: &str) -> Result<()> {
        let message = message.to_string();
        self.mutate(|state| {
            let paths = std::mem::take(&mut state.staged).into_iter().collect();
            state.commits.push(CommitRecord { message, paths });
        })
        .await;
        Ok(())
    }

    async fn status(&self) -> Result<WorktreeStatus> {
        let state = lock(&self.log.state);
        Ok(WorktreeStatus {
            staged: state.staged.iter().cloned().collect(),
            unstaged: state.unstaged.iter().cloned().collect(),
        })
    }

    async fn checkout(&mut self, branch: &str, _create: bool) -> Result<()> {
        lock(&self.log.state).branch = Some(branch.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakePackageManager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PackageState {
    config: BTreeMap<String, serde_json::Value>,
    plugins: BTreeSet<String>,
    installed: BTreeSet<String>,
    custom_dirs: Vec<String>,
    changes: Vec<PackageChange>,
    requests: Vec<UpdateRequest>,
    locked: Vec<String>,
    rejected_patches: Vec<(String, String)>,
    patch_checks: Vec<(String, String, String)>,
    audits: VecDeque<Vec<Advisory>>,
    diff_linked: String,
    diff_plain: String,
    diff_calls: Vec<bool>,
    required: Vec<String>,
    removed: Vec<String>,
    installs: usize,
    lock_hash_updates: usize,
    normalize_calls: usize,
    fail_normalize: bool,
    fail_update: bool,
}

/// Scriptable package manager.
///
/// Patches apply unless rejected with [`reject_patch`](Self::reject_patch).
/// A real update skips changes for packages held back with `keep`.
#[derive(Debug, Default)]
pub struct FakePackageManager {
    state: Mutex<PackageState>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config_value(&self, key: &str, value: serde_json::Value) {
        lock(&self.state).config.insert(key.to_string(), value);
    }

    pub fn config_value(&self, key: &str) -> Option<serde_json::Value> {
        lock(&self.state).config.get(key).cloned()
    }

    pub fn set_plugins(&self, plugins: &[&str]) {
        lock(&self.state).plugins = plugins.iter().map(|p| p.to_string()).collect();
    }

    pub fn set_installed(&self, packages: &[&str]) {
        lock(&self.state)
            .installed
            .extend(packages.iter().map(|p| p.to_string()));
    }

    pub fn set_custom_dirs(&self, dirs: &[&str]) {
        lock(&self.state).custom_dirs = dirs.iter().map(|d| d.to_string()).collect();
    }

    /// Changes every update (dry or real) reports.
    pub fn set_changes(&self, changes: Vec<PackageChange>) {
        lock(&self.state).changes = changes;
    }

    /// Make patches whose path ends with `suffix` fail to apply at `version`.
    pub fn reject_patch(&self, suffix: &str, version: &str) {
        lock(&self.state)
            .rejected_patches
            .push((suffix.to_string(), version.to_string()));
    }

    /// Queue one audit answer. The last queued answer repeats.
    pub fn push_audit(&self, advisories: Vec<Advisory>) {
        lock(&self.state).audits.push_back(advisories);
    }

    pub fn set_diff(&self, linked: &str, plain: &str) {
        let mut state = lock(&self.state);
        state.diff_linked = linked.to_string();
        state.diff_plain = plain.to_string();
    }

    pub fn fail_normalize(&self) {
        lock(&self.state).fail_normalize = true;
    }

    pub fn fail_update(&self) {
        lock(&self.state).fail_update = true;
    }

    pub fn normalize_calls(&self) -> usize {
        lock(&self.state).normalize_calls
    }

    pub fn install_calls(&self) -> usize {
        lock(&self.state).installs
    }

    pub fn update_requests(&self) -> Vec<UpdateRequest> {
        lock(&self.state).requests.clone()
    }

    /// `(package, version, patch)` of every applicability check.
    pub fn patch_checks(&self) -> Vec<(String, String, String)> {
        lock(&self.state).patch_checks.clone()
    }

    pub fn diff_calls(&self) -> Vec<bool> {
        lock(&self.state).diff_calls.clone()
    }

    pub fn required(&self) -> Vec<String> {
        lock(&self.state).required.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        lock(&self.state).removed.clone()
    }

    pub fn lock_hash_updates(&self) -> usize {
        lock(&self.state).lock_hash_updates
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    async fn install(&self, _ctx: &RunContext, _dir: &Path) -> Result<()> {
        lock(&self.state).installs += 1;
        Ok(())
    }

    async fn update(
        &self,
        ctx: &RunContext,
        _dir: &Path,
        request: &UpdateRequest,
    ) -> Result<Vec<PackageChange>> {
        ctx.check()?;
        let mut state = lock(&self.state);
        state.requests.push(request.clone());
        if state.fail_update {
            return Err(UpkeepError::collaborator("composer", "update failed"));
        }
        if request.dry_run {
            return Ok(state.changes.clone());
        }
        let held: BTreeSet<&str> = request
            .keep
            .iter()
            .filter_map(|k| k.split(':').next())
            .collect();
        let applied: Vec<PackageChange> = state
            .changes
            .iter()
            .filter(|c| !held.contains(c.package.as_str()))
            .cloned()
            .collect();
        state.locked = applied
            .iter()
            .map(|c| format!("{}:{}", c.package, c.to))
            .collect();
        Ok(applied)
    }

    async fn check_patch_applies(
        &self,
        _ctx: &RunContext,
        package: &str,
        version: &str,
        patch: &str,
    ) -> Result<bool> {
        let mut state = lock(&self.state);
        state
            .patch_checks
            .push((package.to_string(), version.to_string(), patch.to_string()));
        Ok(!state
            .rejected_patches
            .iter()
            .any(|(suffix, v)| v == version && patch.ends_with(suffix.as_str())))
    }

    async fn installed_plugins(&self, _ctx: &RunContext, _dir: &Path) -> Result<BTreeSet<String>> {
        Ok(lock(&self.state).plugins.clone())
    }

    async fn audit(&self, _ctx: &RunContext, _dir: &Path) -> Result<Vec<Advisory>> {
        let mut state = lock(&self.state);
        if state.audits.len() > 1 {
            return Ok(state.audits.pop_front().unwrap_or_default());
        }
        Ok(state.audits.front().cloned().unwrap_or_default())
    }

    async fn lock_hash(&self, _ctx: &RunContext, _dir: &Path) -> Result<String> {
        let state = lock(&self.state);
        let digest = Sha256::digest(state.locked.join("\n").as_bytes());
        Ok(hex::encode(digest)[..32].to_string())
    }

    async fn update_lock_hash(&self, _ctx: &RunContext, _dir: &Path) -> Result<()> {
        lock(&self.state).lock_hash_updates += 1;
        Ok(())
    }

    async fn get_config(
        &self,
        _ctx: &RunContext,
        _dir: &Path,
        key: &str,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self.config_value(key))
    }

    async fn set_config(
        &self,
        _ctx: &RunContext,
        _dir: &Path,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<()> {
        self.set_config_value(key, value.clone());
        Ok(())
    }

    async fn is_installed(&self, _ctx: &RunContext, _dir: &Path, package: &str) -> Result<bool> {
        Ok(lock(&self.state).installed.contains(package))
    }

    async fn diff(
        &self,
        _ctx: &RunContext,
        _dir: &Path,
        _base_ref: &str,
        with_links: bool,
    ) -> Result<String> {
        let mut state = lock(&self.state);
        state.diff_calls.push(with_links);
        Ok(if with_links {
            state.diff_linked.clone()
        } else {
            state.diff_plain.clone()
        })
    }

    async fn normalize(&self, _ctx: &RunContext, _dir: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        state.normalize_calls += 1;
        if state.fail_normalize {
            return Err(UpkeepError::collaborator("composer", "normalize failed"));
        }
        Ok(())
    }

    async fn require(&self, _ctx: &RunContext, _dir: &Path, package: &str, _dev: bool) -> Result<()> {
        let mut state = lock(&self.state);
        state.required.push(package.to_string());
        state.installed.insert(package.to_string());
        Ok(())
    }

    async fn remove(&self, _ctx: &RunContext, _dir: &Path, package: &str, _dev: bool) -> Result<()> {
        let mut state = lock(&self.state);
        state.removed.push(package.to_string());
        state.installed.remove(package);
        Ok(())
    }

    async fn custom_code_directories(&self, _ctx: &RunContext, _dir: &Path) -> Result<Vec<String>> {
        Ok(lock(&self.state).custom_dirs.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeSiteTool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SiteState {
    hooks: BTreeMap<String, SiteHooks>,
    enabled: BTreeSet<(String, String)>,
    failing: BTreeSet<String>,
    failing_installs: BTreeSet<String>,
    calls: Vec<(String, String)>,
    log: Option<WorktreeLog>,
}

/// Site tool recording every state-changing call per site.
///
/// `config_sync_dir` is `config/<site>` and `translation_path` is
/// `translations/<site>`, both relative to the project directory.
#[derive(Debug, Default)]
pub struct FakeSiteTool {
    state: Mutex<SiteState>,
}

impl FakeSiteTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hooks(&self, site: &str, hooks: SiteHooks) {
        lock(&self.state).hooks.insert(site.to_string(), hooks);
    }

    pub fn enable_module(&self, site: &str, module: &str) {
        lock(&self.state)
            .enabled
            .insert((site.to_string(), module.to_string()));
    }

    /// Make `update_site` fail for `site`.
    pub fn fail_update(&self, site: &str) {
        lock(&self.state).failing.insert(site.to_string());
    }

    /// Make `install_site` fail for `site`.
    pub fn fail_install(&self, site: &str) {
        lock(&self.state).failing_installs.insert(site.to_string());
    }

    /// Touch the exported configuration in `log` on every export.
    pub fn export_into(&self, log: WorktreeLog) {
        lock(&self.state).log = Some(log);
    }

    pub fn calls_for(&self, site: &str) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(s, _)| s == site)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn installed_sites(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(_, call)| call == "install_site")
            .map(|(site, _)| site.clone())
            .collect()
    }

    fn record(&self, site: &str, call: &str) {
        lock(&self.state)
            .calls
            .push((site.to_string(), call.to_string()));
    }
}

fn maybe_relative(dir: &Path, path: String, relative: bool) -> String {
    if relative {
        path
    } else {
        dir.join(path).to_string_lossy().into_owned()
    }
}

#[async_trait]
impl SiteTool for FakeSiteTool {
    async fn install_site(&self, ctx: &RunContext, _dir: &Path, site: &str) -> Result<()> {
        ctx.check()?;
        self.record(site, "install_site");
        if lock(&self.state).failing_installs.contains(site) {
            return Err(UpkeepError::collaborator("drush", format!("site-install failed for {site}")));
        }
        Ok(())
    }

    async fn configure_database(&self, _ctx: &RunContext, _dir: &Path, site: &str) -> Result<()> {
        self.record(site, "configure_database");
        Ok(())
    }

    async fn update_site(&self, ctx: &RunContext, _dir: &Path, site: &str) -> Result<()> {
        ctx.check()?;
        self.record(site, "update_site");
        tokio::task::yield_now().await;
        if lock(&self.state).failing.contains(site) {
            return Err(UpkeepError::collaborator("drush", format!("updatedb failed for {site}")));
        }
        Ok(())
    }

    async fn config_resave(&self, _ctx: &RunContext, _dir: &Path, site: &str) -> Result<()> {
        self.record(site, "config_resave");
        Ok(())
    }

    async fn export_configuration(&self, _ctx: &RunContext, _dir: &Path, site: &str) -> Result<()> {
        self.record(site, "export_configuration");
        if let Some(log) = &lock(&self.state).log {
            log.touch(&format!("config/{site}/system.site.yml"));
        }
        Ok(())
    }

    async fn config_sync_dir(
        &self,
        _ctx: &RunContext,
        dir: &Path,
        site: &str,
        relative: bool,
    ) -> Result<String> {
        Ok(maybe_relative(dir, format!("config/{site}"), relative))
    }

    async fn is_module_enabled(
        &self,
        _ctx: &RunContext,
        _dir: &Path,
        site: &str,
        module: &str,
    ) -> Result<bool> {
        Ok(lock(&self.state)
            .enabled
            .contains(&(site.to_string(), module.to_string())))
    }

    async fn discover_upgrade_hooks(
        &self,
        _ctx: &RunContext,
        _dir: &Path,
        site: &str,
    ) -> Result<SiteHooks> {
        Ok(lock(&self.state).hooks.get(site).cloned().unwrap_or_default())
    }

    async fn localize_translations(&self, _ctx: &RunContext, _dir: &Path, site: &str) -> Result<()> {
        self.record(site, "localize_translations");
        Ok(())
    }

    async fn translation_path(
        &self,
        _ctx: &RunContext,
        dir: &Path,
        site: &str,
        relative: bool,
    ) -> Result<String> {
        Ok(maybe_relative(dir, format!("translations/{site}"), relative))
    }
}

// ---------------------------------------------------------------------------
// FakeIssueTracker / FakeUpstreamForge
// ---------------------------------------------------------------------------

/// Issue tracker answering from a fixed set of issues.
#[derive(Debug, Default)]
pub struct FakeIssueTracker {
    issues: Mutex<BTreeMap<String, Issue>>,
}

impl FakeIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_issue(&self, issue: Issue) {
        lock(&self.issues).insert(issue.id.clone(), issue);
    }
}

#[async_trait]
impl IssueTracker for FakeIssueTracker {
    async fn get_issue(&self, _ctx: &RunContext, id: &str) -> Result<Issue> {
        lock(&self.issues)
            .get(id)
            .cloned()
            .ok_or_else(|| UpkeepError::collaborator("drupal.org", format!("issue {id} not found")))
    }
}

#[derive(Debug, Default)]
struct ForgeState {
    commits: BTreeMap<(String, String, String), Vec<CommitRef>>,
    merge_requests: BTreeMap<(String, String), Vec<UpstreamMergeRequest>>,
    downloads: BTreeMap<String, Vec<u8>>,
}

/// Upstream forge with canned commits, merge requests and downloads.
#[derive(Debug, Default)]
pub struct FakeUpstreamForge {
    state: Mutex<ForgeState>,
}

impl FakeUpstreamForge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit mentioning `query` in `project` on `git_ref`.
    pub fn add_commit(&self, project: &str, query: &str, git_ref: &str, commit: CommitRef) {
        lock(&self.state)
            .commits
            .entry((project.to_string(), query.to_string(), git_ref.to_string()))
            .or_default()
            .push(commit);
    }

    pub fn add_merge_request(&self, target: &str, source: &str, mr: UpstreamMergeRequest) {
        lock(&self.state)
            .merge_requests
            .entry((target.to_string(), source.to_string()))
            .or_default()
            .push(mr);
    }

    pub fn add_download(&self, url: &str, body: &[u8]) {
        lock(&self.state)
            .downloads
            .insert(url.to_string(), body.to_vec());
    }
}

#[async_trait]
impl UpstreamForge for FakeUpstreamForge {
    async fn search_commits(
        &self,
        _ctx: &RunContext,
        project: &str,
        query: &str,
        git_ref: &str,
    ) -> Result<Vec<CommitRef>> {
        let key = (project.to_string(), query.to_string(), git_ref.to_string());
        Ok(lock(&self.state).commits.get(&key).cloned().unwrap_or_default())
    }

    async fn find_merge_requests_by_source_project(
        &self,
        _ctx: &RunContext,
        target_project: &str,
        source_project: &str,
    ) -> Result<Vec<UpstreamMergeRequest>> {
        let key = (target_project.to_string(), source_project.to_string());
        Ok(lock(&self.state)
            .merge_requests
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn download(&self, _ctx: &RunContext, url: &str) -> Result<Vec<u8>> {
        lock(&self.state)
            .downloads
            .get(url)
            .cloned()
            .ok_or_else(|| UpkeepError::collaborator("gitlab", format!("404 for {url}")))
    }
}

// ---------------------------------------------------------------------------
// FakeCodeHost / FakeRepository
// ---------------------------------------------------------------------------

/// A merge request as submitted to [`FakeCodeHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedMergeRequest {
    pub title: String,
    pub body: String,
    pub source_branch: String,
    pub target_branch: String,
}

#[derive(Debug, Default)]
pub struct FakeCodeHost {
    submitted: Mutex<Vec<SubmittedMergeRequest>>,
    files: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl FakeCodeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, branch: &str, path: &str, body: &[u8]) {
        lock(&self.files).insert((branch.to_string(), path.to_string()), body.to_vec());
    }

    pub fn submitted(&self) -> Vec<SubmittedMergeRequest> {
        lock(&self.submitted).clone()
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn create_merge_request(
        &self,
        _ctx: &RunContext,
        title: &str,
        body: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<MergeRequest> {
        let mut submitted = lock(&self.submitted);
        submitted.push(SubmittedMergeRequest {
            title: title.to_string(),
            body: body.to_string(),
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
        });
        let id = submitted.len() as u64;
        Ok(MergeRequest {
            id,
            url: format!("https://code.example.com/merge_requests/{id}"),
        })
    }

    async fn download_file(&self, _ctx: &RunContext, branch: &str, path: &str) -> Result<Vec<u8>> {
        lock(&self.files)
            .get(&(branch.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| UpkeepError::collaborator("code host", format!("{path} not found on {branch}")))
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    clones: usize,
    remote_branches: BTreeSet<String>,
    pushed: Vec<String>,
    fail_clone: bool,
}

/// Repository whose clones are empty directories under `root`.
///
/// All clones share one [`WorktreeLog`].
#[derive(Debug)]
pub struct FakeRepository {
    root: PathBuf,
    log: WorktreeLog,
    state: Mutex<RepositoryState>,
}

impl FakeRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            log: WorktreeLog::default(),
            state: Mutex::new(RepositoryState::default()),
        }
    }

    pub fn log(&self) -> WorktreeLog {
        self.log.clone()
    }

    pub fn add_remote_branch(&self, branch: &str) {
        lock(&self.state).remote_branches.insert(branch.to_string());
    }

    pub fn fail_clone(&self) {
        lock(&self.state).fail_clone = true;
    }

    pub fn clones(&self) -> usize {
        lock(&self.state).clones
    }

    pub fn pushed(&self) -> Vec<String> {
        lock(&self.state).pushed.clone()
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn clone_repository(&self, ctx: &RunContext, url: &str, _branch: &str) -> Result<Checkout> {
        ctx.check()?;
        let n = {
            let mut state = lock(&self.state);
            if state.fail_clone {
                return Err(UpkeepError::Git(format!("could not read from {url}")));
            }
            state.clones += 1;
            state.clones
        };
        let path = self.root.join(format!("repo-{n}"));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Checkout {
            path,
            worktree: Box::new(FakeWorktree::with_log(self.log.clone())),
        })
    }

    async fn remote_branch_exists(&self, _ctx: &RunContext, _dir: &Path, branch: &str) -> Result<bool> {
        Ok(lock(&self.state).remote_branches.contains(branch))
    }

    async fn push(&self, _ctx: &RunContext, _dir: &Path, branch: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.pushed.push(branch.to_string());
        state.remote_branches.insert(branch.to_string());
        Ok(())
    }

    async fn head_commit(&self, _ctx: &RunContext, _dir: &Path) -> Result<String> {
        Ok("4f1c2e0d9b8a7c6e5f4d3c2b1a0f9e8d7c6b5a49".to_string())
    }
}

// ---------------------------------------------------------------------------
// Code quality fakes
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StyleState {
    remaining: StyleReport,
    fix_calls: usize,
    touch: Option<(WorktreeLog, String)>,
}

#[derive(Debug, Default)]
pub struct FakeStyleFixer {
    state: Mutex<StyleState>,
}

impl FakeStyleFixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report returned by every `check`.
    pub fn set_remaining(&self, report: StyleReport) {
        lock(&self.state).remaining = report;
    }

    /// Touch `path` in `log` whenever `fix` runs.
    pub fn touch_on_fix(&self, log: WorktreeLog, path: &str) {
        lock(&self.state).touch = Some((log, path.to_string()));
    }

    pub fn fix_calls(&self) -> usize {
        lock(&self.state).fix_calls
    }
}

#[async_trait]
impl StyleFixer for FakeStyleFixer {
    async fn fix(&self, _ctx: &RunContext, _dir: &Path, _paths: &[String]) -> Result<()> {
        let mut state = lock(&self.state);
        state.fix_calls += 1;
        if let Some((log, path)) = &state.touch {
            log.touch(path);
        }
        Ok(())
    }

    async fn check(&self, _ctx: &RunContext, _dir: &Path, _paths: &[String]) -> Result<StyleReport> {
        Ok(lock(&self.state).remaining.clone())
    }
}

/// Rewriter returning a fixed report.
#[derive(Debug, Default)]
pub struct FakeDeprecationRewriter {
    report: RewriteReport,
}

impl FakeDeprecationRewriter {
    pub fn new(report: RewriteReport) -> Self {
        Self { report }
    }
}

#[async_trait]
impl DeprecationRewriter for FakeDeprecationRewriter {
    fn package(&self) -> &str {
        "palantirnet/drupal-rector"
    }

    async fn run(&self, _ctx: &RunContext, _dir: &Path, _paths: &[String]) -> Result<RewriteReport> {
        Ok(self.report.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("composer.*", "composer.json"));
        assert!(glob_matches("composer.*", "composer.lock"));
        assert!(!glob_matches("composer.*", "web/composer.json"));
        assert!(glob_matches("composer.json", "composer.json"));
    }

    #[tokio::test]
    async fn test_add_stages_by_prefix_only() {
        let mut wt = FakeWorktree::new();
        let log = wt.log();
        log.touch("config/default/a.yml");
        log.touch("config/other/b.yml");
        wt.add("config/default").await.unwrap();
        let status = wt.status().await.unwrap();
        assert_eq!(status.staged, vec!["config/default/a.yml"]);
        assert_eq!(status.unstaged, vec!["config/other/b.yml"]);
    }
}
