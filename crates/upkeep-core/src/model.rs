//! Per-run domain records shared by the engine and its collaborators.
//!
//! Everything here is created fresh for one run and dropped when the run
//! ends; only git commits, the remote merge request and downloaded patch
//! files outlive it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Package changes
// ---------------------------------------------------------------------------

/// What the package manager intends to do with one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeAction {
    Install,
    Upgrade,
    Downgrade,
    Remove,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeAction::Install => "Install",
            ChangeAction::Upgrade => "Upgrade",
            ChangeAction::Downgrade => "Downgrade",
            ChangeAction::Remove => "Remove",
        };
        f.write_str(s)
    }
}

/// One package operation from a dry-run update.
///
/// `from` is empty for installs, `to` is empty for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageChange {
    pub action: ChangeAction,
    pub package: String,
    pub from: String,
    pub to: String,
}

impl PackageChange {
    pub fn new(
        action: ChangeAction,
        package: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            action,
            package: package.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Upgrades and downgrades move an installed package to a new version.
    pub fn is_version_move(&self) -> bool {
        matches!(self.action, ChangeAction::Upgrade | ChangeAction::Downgrade)
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// `package -> description -> locator`, the shape of `extra.patches`.
pub type PatchSet = BTreeMap<String, BTreeMap<String, String>>;

/// Where a patch lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLocator {
    /// Relative path inside the working tree, tracked by git.
    Local(String),
    /// External URL with no working-tree lifecycle.
    Remote(String),
}

impl PatchLocator {
    pub fn parse(locator: &str) -> Self {
        match locator.split_once("://") {
            Some((scheme, rest))
                if !scheme.is_empty()
                    && !rest.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
            {
                PatchLocator::Remote(locator.to_string())
            }
            _ => PatchLocator::Local(locator.to_string()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, PatchLocator::Local(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            PatchLocator::Local(s) | PatchLocator::Remote(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Issue tracker / forge records
// ---------------------------------------------------------------------------

/// Remote issue tracker record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub status: String,
    pub url: String,
    pub project_machine_name: String,
}

/// Issue statuses meaning the fix landed upstream:
/// 2 = fixed, 7 = closed (fixed), 15 = patch (to be ported).
pub const FIXED_ISSUE_STATUSES: [&str; 3] = ["2", "7", "15"];

impl Issue {
    pub fn is_fixed(&self) -> bool {
        FIXED_ISSUE_STATUSES.contains(&self.status.as_str())
    }

    /// Normalised patch description embedding the issue title and link.
    pub fn patch_description(&self) -> String {
        format!("Issue #{}: [{}]({})", self.id, self.title, self.url)
    }
}

/// A commit found on an upstream ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub id: String,
    pub title: String,
}

/// Merge request on the upstream forge, used as a replacement patch source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMergeRequest {
    pub web_url: String,
    pub sha: String,
}

impl UpstreamMergeRequest {
    pub fn diff_url(&self) -> String {
        format!("{}.diff", self.web_url)
    }
}

/// Merge/pull request opened on the project's own code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: u64,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Site update hooks
// ---------------------------------------------------------------------------

/// Identifier of a pending upgrade hook; the site tool reports either a
/// number or a string depending on the hook kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookId {
    Int(i64),
    Str(String),
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookId::Int(n) => write!(f, "{n}"),
            HookId::Str(s) => f.write_str(s),
        }
    }
}

/// A pending upgrade hook discovered on a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookInfo {
    pub module: String,
    pub update_id: HookId,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// `hook key -> info` for one site.
pub type SiteHooks = BTreeMap<String, HookInfo>;

/// `site -> hooks`, only populated for sites with at least one hook.
pub type UpdateHooksPerSite = BTreeMap<String, SiteHooks>;

/// Outcome of updating one site.
#[derive(Debug)]
pub struct SiteUpdateResult {
    pub site: String,
    pub discovered_hooks: SiteHooks,
    pub error: Option<crate::error::UpkeepError>,
}

// ---------------------------------------------------------------------------
// Security advisories
// ---------------------------------------------------------------------------

/// Security advisory reported by the package manager's audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advisory {
    #[serde(default)]
    pub advisory_id: String,
    #[serde(default)]
    pub cve: String,
    #[serde(default)]
    pub severity: String,
    pub package_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub reported_at: String,
    #[serde(default)]
    pub affected_versions: String,
}

/// Advisories present in `before` whose CVE no longer appears in `after`.
pub fn fixed_advisories(before: &[Advisory], after: &[Advisory]) -> Vec<Advisory> {
    before
        .iter()
        .filter(|b| !after.iter().any(|a| a.cve == b.cve))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_classification() {
        assert!(PatchLocator::parse("patches/core-123456.patch").is_local());
        assert!(!PatchLocator::parse("https://www.drupal.org/files/issues/fix.patch").is_local());
        assert!(PatchLocator::parse("://broken").is_local());
        assert_eq!(PatchLocator::parse("a/b.patch").as_str(), "a/b.patch");
    }

    #[test]
    fn test_hook_id_decodes_number_or_string() {
        let hooks: SiteHooks = serde_json::from_str(
            r#"{
                "system_update_10100": {"module": "system", "update_id": 10100, "description": "Int hook", "type": "hook_update_n"},
                "node-post-fix": {"module": "node", "update_id": "fix_titles", "description": "Post update", "type": "post-update"}
            }"#,
        )
        .unwrap();
        assert_eq!(hooks["system_update_10100"].update_id, HookId::Int(10100));
        assert_eq!(
            hooks["node-post-fix"].update_id,
            HookId::Str("fix_titles".to_string())
        );
        assert_eq!(hooks["node-post-fix"].kind, "post-update");
    }

    #[test]
    fn test_issue_fixed_status_codes() {
        let mut issue = Issue {
            id: "3412345".to_string(),
            title: "Fix it".to_string(),
            status: "7".to_string(),
            url: "https://www.drupal.org/node/3412345".to_string(),
            project_machine_name: "token".to_string(),
        };
        assert!(issue.is_fixed());
        issue.status = "1".to_string();
        assert!(!issue.is_fixed());
        assert_eq!(
            issue.patch_description(),
            "Issue #3412345: [Fix it](https://www.drupal.org/node/3412345)"
        );
    }

    #[test]
    fn test_fixed_advisories_is_set_difference_by_cve() {
        let adv = |cve: &str, pkg: &str| Advisory {
            advisory_id: String::new(),
            cve: cve.to_string(),
            severity: "high".to_string(),
            package_name: pkg.to_string(),
            title: String::new(),
            link: String::new(),
            reported_at: String::new(),
            affected_versions: String::new(),
        };
        let before = vec![adv("CVE-1", "a/a"), adv("CVE-2", "b/b")];
        let after = vec![adv("CVE-2", "b/b")];
        let fixed = fixed_advisories(&before, &after);
        assert_eq!(fixed.len(), 1);
        assert_eq!(fixed[0].cve, "CVE-1");
    }
}
