//! Patch reconciliation across a package upgrade.
//!
//! Given the committed `package -> description -> locator` patch map and the
//! package changes of this run, decide for each patch whether it is dropped,
//! kept, replaced by a newer upstream diff, or in conflict (which pins the
//! package back to its current version).
//!
//! Lookups against the issue tracker and the upstream forge are soft: a
//! failure degrades that one patch to "no issue known" and never blocks the
//! others. Only cancellation aborts reconciliation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::{IssueTracker, PackageManager, UpstreamForge};
use crate::context::RunContext;
use crate::error::Result;
use crate::model::{ChangeAction, Issue, PackageChange, PatchLocator, PatchSet};
use crate::worktree::SharedWorktree;

/// A patch dropped from the patch map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedPatch {
    pub package: String,
    pub description: String,
    pub path: String,
    pub reason: String,
}

/// A patch swapped for a newer upstream diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedPatch {
    pub package: String,
    pub description: String,
    pub previous_path: String,
    pub new_path: String,
}

/// A patch that no longer applies and has no working replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPatch {
    pub package: String,
    pub description: String,
    pub path: String,
    /// Version the package stays on.
    pub fixed_version: String,
    /// Version the update wanted.
    pub new_version: String,
}

/// What reconciliation did. Each `(package, description)` lands in at most
/// one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchUpdates {
    pub removed: Vec<RemovedPatch>,
    pub updated: Vec<UpdatedPatch>,
    pub conflicts: Vec<ConflictPatch>,
}

impl PatchUpdates {
    pub fn changes(&self) -> bool {
        !self.removed.is_empty() || !self.updated.is_empty() || !self.conflicts.is_empty()
    }

    /// `package:version` constraints that hold conflicting packages back.
    pub fn packages_to_keep(&self) -> Vec<String> {
        let mut keep: Vec<String> = self
            .conflicts
            .iter()
            .map(|c| format!("{}:{}", c.package, c.fixed_version))
            .collect();
        keep.sort();
        keep.dedup();
        keep
    }
}

/// Lowercase, underscores for spaces, and only URL-safe characters.
/// Slashes are dropped as well so a title can never introduce directories.
pub fn clean_title(title: &str) -> String {
    const ALLOWED: &str = "-._~:?#[]@!$&'()*+,;=";
    title
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || ALLOWED.contains(*c))
        .collect()
}

/// Swallow a soft failure, keeping cancellation fatal.
fn soft<T>(res: Result<T>, what: &str) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            debug!(error = %e, "{what} failed, continuing");
            Ok(None)
        }
    }
}

/// Decides the fate of every patch across one run's package changes.
pub struct PatchReconciler {
    packages: Arc<dyn PackageManager>,
    tracker: Arc<dyn IssueTracker>,
    upstream: Option<Arc<dyn UpstreamForge>>,
}

impl PatchReconciler {
    /// `upstream` is `None` when no forge credential is configured; fixed-issue
    /// detection and replacement downloads are then skipped.
    pub fn new(
        packages: Arc<dyn PackageManager>,
        tracker: Arc<dyn IssueTracker>,
        upstream: Option<Arc<dyn UpstreamForge>>,
    ) -> Self {
        Self {
            packages,
            tracker,
            upstream,
        }
    }

    /// Reconcile `patches` against `changes`, returning the report and the
    /// new patch map. Local patch files are removed from and added to
    /// `worktree` as needed; nothing is committed here.
    #[tracing::instrument(skip_all, fields(packages = patches.len(), changes = changes.len()))]
    pub async fn reconcile(
        &self,
        ctx: &RunContext,
        dir: &Path,
        worktree: &SharedWorktree,
        changes: &[PackageChange],
        mut patches: PatchSet,
    ) -> Result<(PatchUpdates, PatchSet)> {
        let mut updates = PatchUpdates::default();

        self.remove_orphans(ctx, dir, worktree, &mut patches, &mut updates)
            .await?;

        for change in changes {
            ctx.check()?;
            match change.action {
                ChangeAction::Upgrade | ChangeAction::Downgrade => {
                    if patches.contains_key(&change.package) {
                        self.reconcile_package(ctx, dir, worktree, change, &mut patches, &mut updates)
                            .await?;
                    }
                }
                ChangeAction::Remove => {
                    if let Some(entries) = patches.remove(&change.package) {
                        for (description, path) in entries {
                            debug!(package = %change.package, patch = %path, "removing patch of removed package");
                            remove_local(worktree, &path).await;
                            updates.removed.push(RemovedPatch {
                                package: change.package.clone(),
                                description,
                                path,
                                reason: format!("{} is no longer installed", change.package),
                            });
                        }
                    }
                }
                ChangeAction::Install => {}
            }
        }

        Ok((updates, patches))
    }

    async fn remove_orphans(
        &self,
        ctx: &RunContext,
        dir: &Path,
        worktree: &SharedWorktree,
        patches: &mut PatchSet,
        updates: &mut PatchUpdates,
    ) -> Result<()> {
        let packages: Vec<String> = patches.keys().cloned().collect();
        for package in packages {
            let installed = match self.packages.is_installed(ctx, dir, &package).await {
                Ok(installed) => installed,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(package = %package, error = %e, "could not determine whether package is installed, keeping its patches");
                    true
                }
            };
            if installed {
                continue;
            }
            if let Some(entries) = patches.remove(&package) {
                for (description, path) in entries {
                    info!(package = %package, patch = %path, "removing patch, package is not installed");
                    remove_local(worktree, &path).await;
                    updates.removed.push(RemovedPatch {
                        package: package.clone(),
                        description,
                        path,
                        reason: format!("{package} is not installed in the project"),
                    });
                }
            }
        }
        Ok(())
    }

    async fn reconcile_package(
        &self,
        ctx: &RunContext,
        dir: &Path,
        worktree: &SharedWorktree,
        change: &PackageChange,
        patches: &mut PatchSet,
        updates: &mut PatchUpdates,
    ) -> Result<()> {
        let package = change.package.as_str();
        let entries: Vec<(String, String)> = patches
            .get(package)
            .map(|m| m.iter().map(|(d, p)| (d.clone(), p.clone())).collect())
            .unwrap_or_default();

        for (original_description, path) in entries {
            ctx.check()?;
            let mut description = original_description.clone();

            let issue = match self
                .tracker
                .find_issue_number(&description)
                .or_else(|| self.tracker.find_issue_number(&path))
            {
                Some(number) => soft(self.tracker.get_issue(ctx, &number).await, "issue lookup")?,
                None => None,
            };

            if let Some(issue) = &issue {
                if self.is_fixed_upstream(ctx, issue, change).await? {
                    info!(package = %package, patch = %path, issue = %issue.id, "removing patch, issue is fixed upstream");
                    remove_local(worktree, &path).await;
                    remove_entry(patches, package, &original_description);
                    updates.removed.push(RemovedPatch {
                        package: package.to_string(),
                        description: original_description,
                        path,
                        reason: format!(
                            "Issue [#{}]({}) is fixed in {} {}",
                            issue.id, issue.url, package, change.to
                        ),
                    });
                    continue;
                }

                if let Some(entries) = patches.get_mut(package) {
                    description =
                        normalized_description(entries, issue, &original_description, &path);
                    if description != original_description {
                        entries.remove(&original_description);
                        entries.insert(description.clone(), path.clone());
                    }
                }
            }

            let locator = PatchLocator::parse(&path);
            if self.applies(ctx, dir, package, &change.to, &locator).await? {
                debug!(package = %package, version = %change.to, patch = %path, "patch applies");
                continue;
            }
            debug!(package = %package, version = %change.to, patch = %path, "patch does not apply");

            let replacement = match &issue {
                Some(issue) => self.fetch_replacement(ctx, dir, issue, change).await?,
                None => None,
            };

            match replacement {
                Some(new_path) => {
                    if locator.is_local() {
                        remove_local(worktree, &path).await;
                    }
                    if let Err(e) = worktree.add(&new_path).await {
                        warn!(patch = %new_path, error = %e, "failed to stage replacement patch");
                    }
                    if let Some(entries) = patches.get_mut(package) {
                        entries.insert(description.clone(), new_path.clone());
                    }
                    info!(package = %package, previous = %path, new = %new_path, "replacing patch");
                    updates.updated.push(UpdatedPatch {
                        package: package.to_string(),
                        description,
                        previous_path: path,
                        new_path,
                    });
                }
                None => {
                    info!(package = %package, version = %change.from, patch = %path, "patch does not apply, keeping current package version");
                    updates.conflicts.push(ConflictPatch {
                        package: package.to_string(),
                        description,
                        path,
                        fixed_version: change.from.clone(),
                        new_version: change.to.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn is_fixed_upstream(
        &self,
        ctx: &RunContext,
        issue: &Issue,
        change: &PackageChange,
    ) -> Result<bool> {
        if !issue.is_fixed() {
            return Ok(false);
        }
        let Some(upstream) = &self.upstream else {
            debug!(issue = %issue.id, "skipping fixed-issue check, no upstream forge configured");
            return Ok(false);
        };
        let project = format!("project/{}", issue.project_machine_name);
        let commits = soft(
            upstream
                .search_commits(ctx, &project, &issue.id, &change.to)
                .await,
            "commit search",
        )?;
        Ok(commits.is_some_and(|c| !c.is_empty()))
    }

    async fn applies(
        &self,
        ctx: &RunContext,
        dir: &Path,
        package: &str,
        version: &str,
        locator: &PatchLocator,
    ) -> Result<bool> {
        let target = match locator {
            PatchLocator::Local(path) => dir.join(path).to_string_lossy().into_owned(),
            PatchLocator::Remote(url) => url.clone(),
        };
        let applies = soft(
            self.packages
                .check_patch_applies(ctx, package, version, &target)
                .await,
            "patch applicability check",
        )?;
        Ok(applies.unwrap_or(false))
    }

    /// Download the newest merge-request diff for `issue` and keep it if it
    /// applies. Returns the new patch path relative to `dir`.
    async fn fetch_replacement(
        &self,
        ctx: &RunContext,
        dir: &Path,
        issue: &Issue,
        change: &PackageChange,
    ) -> Result<Option<String>> {
        let Some(upstream) = &self.upstream else {
            debug!(issue = %issue.id, "no upstream forge configured, cannot look for a newer patch");
            return Ok(None);
        };
        let machine = &issue.project_machine_name;
        let target = format!("project/{machine}");
        let source = format!("issue/{machine}-{}", issue.id);

        let merge_requests = soft(
            upstream
                .find_merge_requests_by_source_project(ctx, &target, &source)
                .await,
            "merge request lookup",
        )?
        .unwrap_or_default();
        let Some(mr) = merge_requests.first() else {
            debug!(issue = %issue.id, "no merge requests found");
            return Ok(None);
        };

        let Some(body) = soft(upstream.download(ctx, &mr.diff_url()).await, "patch download")?
        else {
            return Ok(None);
        };

        let relative = format!(
            "patches/{machine}/{}-{}-{}.diff",
            issue.id,
            mr.sha,
            clean_title(&issue.title)
        );
        let absolute = dir.join(&relative);
        debug!(url = %mr.diff_url(), path = %relative, "downloading patch");
        if let Some(parent) = absolute.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                debug!(error = %e, "failed to create patch directory");
                return Ok(None);
            }
        }
        if let Err(e) = tokio::fs::write(&absolute, &body).await {
            debug!(error = %e, "failed to write patch");
            return Ok(None);
        }

        let applies = soft(
            self.packages
                .check_patch_applies(ctx, &change.package, &change.to, &absolute.to_string_lossy())
                .await,
            "replacement applicability check",
        )?
        .unwrap_or(false);

        if applies {
            Ok(Some(relative))
        } else {
            info!(package = %change.package, version = %change.to, patch = %relative, "merge request does not apply");
            let _ = tokio::fs::remove_file(&absolute).await;
            Ok(None)
        }
    }
}

/// Issue-based description for the patch at `path`. Another patch of the
/// same package may already hold that key (two patches for one issue), in
/// which case the patch file name is appended, and failing that the
/// description is left alone.
fn normalized_description(
    entries: &BTreeMap<String, String>,
    issue: &Issue,
    current: &str,
    path: &str,
) -> String {
    let wanted = issue.patch_description();
    if wanted == current || !entries.contains_key(&wanted) {
        return wanted;
    }
    let file = path.rsplit('/').next().unwrap_or(path);
    let qualified = format!("{wanted} ({file})");
    if qualified == current || !entries.contains_key(&qualified) {
        qualified
    } else {
        current.to_string()
    }
}

fn remove_entry(patches: &mut PatchSet, package: &str, description: &str) {
    if let Some(entries) = patches.get_mut(package) {
        entries.remove(description);
        if entries.is_empty() {
            patches.remove(package);
        }
    }
}

/// Delete a local patch file from the worktree; remote locators are left alone.
async fn remove_local(worktree: &SharedWorktree, path: &str) {
    if !PatchLocator::parse(path).is_local() {
        return;
    }
    if let Err(e) = worktree.remove(path).await {
        warn!(patch = %path, error = %e, "failed to remove patch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title() {
        assert_eq!(
            clean_title("Allow Views/Blocks to use \"context\" (2.x)"),
            "allow_viewsblocks_to_use_context_(2.x)"
        );
        assert_eq!(clean_title("Ümlaut fix"), "mlaut_fix");
    }

    #[test]
    fn test_packages_to_keep_from_conflicts() {
        let mut updates = PatchUpdates::default();
        assert!(!updates.changes());
        updates.conflicts.push(ConflictPatch {
            package: "drupal/token".to_string(),
            description: "d".to_string(),
            path: "patches/token.patch".to_string(),
            fixed_version: "1.13.0".to_string(),
            new_version: "1.14.0".to_string(),
        });
        assert!(updates.changes());
        assert_eq!(updates.packages_to_keep(), vec!["drupal/token:1.13.0"]);
    }

    fn conflict(package: &str, path: &str, fixed_version: &str) -> ConflictPatch {
        ConflictPatch {
            package: package.to_string(),
            description: path.to_string(),
            path: path.to_string(),
            fixed_version: fixed_version.to_string(),
            new_version: "9.9.9".to_string(),
        }
    }

    #[test]
    fn test_packages_to_keep_dedups_interleaved_conflicts() {
        let updates = PatchUpdates {
            conflicts: vec![
                conflict("drupal/token", "patches/a.patch", "1.13.0"),
                conflict("drupal/ctools", "patches/b.patch", "4.0.3"),
                conflict("drupal/token", "patches/c.patch", "1.13.0"),
            ],
            ..Default::default()
        };
        assert_eq!(
            updates.packages_to_keep(),
            vec!["drupal/ctools:4.0.3", "drupal/token:1.13.0"]
        );
    }

    #[test]
    fn test_normalized_description_avoids_taken_keys() {
        let issue = Issue {
            id: "3300001".to_string(),
            title: "Fix".to_string(),
            status: "8".to_string(),
            url: "https://www.drupal.org/node/3300001".to_string(),
            project_machine_name: "token".to_string(),
        };
        let wanted = issue.patch_description();
        let mut entries = BTreeMap::new();
        entries.insert("Part 2".to_string(), "patches/part2.patch".to_string());
        assert_eq!(
            normalized_description(&entries, &issue, "Part 2", "patches/part2.patch"),
            wanted
        );

        entries.insert(wanted.clone(), "patches/part1.patch".to_string());
        let qualified = format!("{wanted} (part2.patch)");
        assert_eq!(
            normalized_description(&entries, &issue, "Part 2", "patches/part2.patch"),
            qualified
        );

        entries.insert(qualified, "patches/other/part2.patch".to_string());
        assert_eq!(
            normalized_description(&entries, &issue, "Part 2", "patches/part2.patch"),
            "Part 2"
        );
    }
}
