//! Structured package changes recovered from the package manager's log.
//!
//! This is the only place that understands the textual update log. Four
//! line shapes are recognised; anything else is ignored.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{ChangeAction, PackageChange};

struct Grammar {
    upgrade: Regex,
    downgrade: Regex,
    remove: Regex,
    install: Regex,
}

fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
    GRAMMAR.get_or_init(|| Grammar {
        upgrade: Regex::new(r"- Upgrading ([\w\-/]+) \(([\w\.\-]+) => ([\w\.\-]+)\)")
            .unwrap_or_else(|e| unreachable!("static regex: {e}")),
        downgrade: Regex::new(r"- Downgrading ([\w\-/]+) \(([\w\.\-]+) => ([\w\.\-]+)\)")
            .unwrap_or_else(|e| unreachable!("static regex: {e}")),
        remove: Regex::new(r"- Removing ([\w\-/]+) \(([\w\.\-]+)\)")
            .unwrap_or_else(|e| unreachable!("static regex: {e}")),
        install: Regex::new(r"- Installing ([\w\-/]+) \(([\w\.\-]+)\)")
            .unwrap_or_else(|e| unreachable!("static regex: {e}")),
    })
}

/// Parse an update log into package changes.
///
/// Output order is upgrades, downgrades, removals, installs; within each
/// group the log order is kept.
pub fn parse_package_changes(log: &str) -> Vec<PackageChange> {
    let g = grammar();
    let mut changes = Vec::new();

    for caps in g.upgrade.captures_iter(log) {
        changes.push(PackageChange::new(
            ChangeAction::Upgrade,
            &caps[1],
            &caps[2],
            &caps[3],
        ));
    }
    for caps in g.downgrade.captures_iter(log) {
        changes.push(PackageChange::new(
            ChangeAction::Downgrade,
            &caps[1],
            &caps[2],
            &caps[3],
        ));
    }
    for caps in g.remove.captures_iter(log) {
        changes.push(PackageChange::new(ChangeAction::Remove, &caps[1], &caps[2], ""));
    }
    for caps in g.install.captures_iter(log) {
        changes.push(PackageChange::new(ChangeAction::Install, &caps[1], "", &caps[2]));
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "Loading composer repositories with package information
Updating dependencies
Lock file operations: 1 install, 2 updates, 1 removal
  - Removing drupal/old_module (1.2.0)
  - Upgrading drupal/core (10.2.1 => 10.2.3)
  - Downgrading symfony/console (v6.4.2 => v6.4.1)
  - Installing psr/clock (1.0.0)
  - Upgrading drupal/token (1.13.0 => 1.14.0)
Writing lock file";

    #[test]
    fn test_parses_all_four_shapes_in_group_order() {
        let changes = parse_package_changes(LOG);
        let actions: Vec<_> = changes.iter().map(|c| c.action).collect();
        assert_eq!(
            actions,
            vec![
                ChangeAction::Upgrade,
                ChangeAction::Upgrade,
                ChangeAction::Downgrade,
                ChangeAction::Remove,
                ChangeAction::Install,
            ]
        );
        assert_eq!(
            changes[0],
            PackageChange::new(ChangeAction::Upgrade, "drupal/core", "10.2.1", "10.2.3")
        );
        assert_eq!(changes[1].package, "drupal/token");
        assert_eq!(changes[2].from, "v6.4.2");
        assert_eq!(changes[3].to, "");
        assert_eq!(changes[4].from, "");
        assert_eq!(changes[4].to, "1.0.0");
    }

    #[test]
    fn test_unrelated_output_yields_nothing() {
        assert!(parse_package_changes("Nothing to modify in lock file\n").is_empty());
        assert!(parse_package_changes("").is_empty());
    }
}
