//! Workflow strategies: full maintenance update vs. security-only update.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::collaborators::PackageManager;
use crate::context::RunContext;
use crate::error::Result;
use crate::model::{fixed_advisories, Advisory};
use crate::report::SecurityReport;

/// Companions that must move together with the core package.
pub const CORE_PACKAGE: &str = "drupal/core";
pub const CORE_COMPANIONS: [&str; 2] = ["drupal/core-recommended", "drupal/core-composer-scaffold"];

/// What to update, decided before the dependency update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreUpdate {
    /// Empty means "update everything".
    pub packages_to_update: Vec<String>,
    pub minimal_changes: bool,
}

/// Policy parameterizing one update run.
#[async_trait]
pub trait WorkflowStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn pre_update(&mut self, ctx: &RunContext, dir: &Path) -> Result<PreUpdate>;

    fn should_continue(&self, packages_to_update: &[String]) -> bool;

    /// Runs after all sites were updated.
    async fn post_update(&mut self, ctx: &RunContext, dir: &Path) -> Result<()>;

    fn branch_name(&self, lock_hash: &str) -> String;

    fn title(&self) -> String;

    fn security_report(&self) -> Option<SecurityReport> {
        None
    }
}

/// Update everything; one timestamped branch per run.
#[derive(Debug, Clone)]
pub struct MaintenanceStrategy {
    now: DateTime<Utc>,
}

impl MaintenanceStrategy {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

#[async_trait]
impl WorkflowStrategy for MaintenanceStrategy {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    async fn pre_update(&mut self, _ctx: &RunContext, _dir: &Path) -> Result<PreUpdate> {
        Ok(PreUpdate::default())
    }

    fn should_continue(&self, _packages_to_update: &[String]) -> bool {
        true
    }

    async fn post_update(&mut self, _ctx: &RunContext, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn branch_name(&self, _lock_hash: &str) -> String {
        format!("update-{}", self.now.format("%Y%m%d%H%M%S"))
    }

    fn title(&self) -> String {
        format!("{}: Drupal Maintenance Updates", self.now.format("%B %Y"))
    }
}

/// Update only advised packages; branch named after the resulting lock hash.
pub struct SecurityStrategy {
    packages: Arc<dyn PackageManager>,
    now: DateTime<Utc>,
    before: Vec<Advisory>,
    after: Option<Vec<Advisory>>,
}

impl SecurityStrategy {
    pub fn new(packages: Arc<dyn PackageManager>, now: DateTime<Utc>) -> Self {
        Self {
            packages,
            now,
            before: Vec::new(),
            after: None,
        }
    }
}

/// Distinct advised package names, plus the core companions when core is advised.
pub fn packages_from_advisories(advisories: &[Advisory]) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();
    for advisory in advisories {
        if !packages.contains(&advisory.package_name) {
            packages.push(advisory.package_name.clone());
        }
    }
    if packages.iter().any(|p| p == CORE_PACKAGE) {
        for companion in CORE_COMPANIONS {
            if !packages.iter().any(|p| p == companion) {
                packages.push(companion.to_string());
            }
        }
    }
    packages
}

#[async_trait]
impl WorkflowStrategy for SecurityStrategy {
    fn name(&self) -> &'static str {
        "security"
    }

    async fn pre_update(&mut self, ctx: &RunContext, dir: &Path) -> Result<PreUpdate> {
        self.before = self.packages.audit(ctx, dir).await?;
        info!(advisories = self.before.len(), "found security advisories");
        Ok(PreUpdate {
            packages_to_update: packages_from_advisories(&self.before),
            minimal_changes: true,
        })
    }

    fn should_continue(&self, packages_to_update: &[String]) -> bool {
        if packages_to_update.is_empty() {
            info!("no security advisories found, skipping security update");
            return false;
        }
        true
    }

    async fn post_update(&mut self, ctx: &RunContext, dir: &Path) -> Result<()> {
        self.after = Some(self.packages.audit(ctx, dir).await?);
        Ok(())
    }

    fn branch_name(&self, lock_hash: &str) -> String {
        format!("security-update-{lock_hash}")
    }

    fn title(&self) -> String {
        format!("{}: Drupal Security Updates", self.now.format("%Y-%m-%d"))
    }

    fn security_report(&self) -> Option<SecurityReport> {
        let after = self.after.clone().unwrap_or_default();
        Some(SecurityReport {
            fixed_advisories: fixed_advisories(&self.before, &after),
            unresolved: after.len(),
            after_update_advisories: after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn advisory(pkg: &str, cve: &str) -> Advisory {
        Advisory {
            advisory_id: format!("SA-{cve}"),
            cve: cve.to_string(),
            severity: "critical".to_string(),
            package_name: pkg.to_string(),
            title: String::new(),
            link: String::new(),
            reported_at: String::new(),
            affected_versions: String::new(),
        }
    }

    #[test]
    fn test_maintenance_names_from_clock() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let s = MaintenanceStrategy::new(now);
        assert_eq!(s.branch_name("ignored"), "update-20260304050607");
        assert_eq!(s.title(), "March 2026: Drupal Maintenance Updates");
        assert!(s.should_continue(&[]));
        assert!(s.security_report().is_none());
    }

    #[test]
    fn test_core_advisory_pulls_in_companions_once() {
        let packages = packages_from_advisories(&[
            advisory("drupal/core", "CVE-1"),
            advisory("drupal/core", "CVE-2"),
            advisory("drupal/token", "CVE-3"),
        ]);
        assert_eq!(
            packages,
            vec![
                "drupal/core",
                "drupal/token",
                "drupal/core-recommended",
                "drupal/core-composer-scaffold"
            ]
        );
    }

    #[test]
    fn test_non_core_advisory_has_no_companions() {
        let packages = packages_from_advisories(&[advisory("drupal/token", "CVE-3")]);
        assert_eq!(packages, vec!["drupal/token"]);
    }
}
