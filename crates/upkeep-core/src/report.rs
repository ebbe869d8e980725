use serde::{Deserialize, Serialize};

use crate::dependency::DependencyUpdateReport;
use crate::model::{Advisory, UpdateHooksPerSite};
use crate::patches::PatchUpdates;

/// Code hosts reject descriptions above roughly 64k characters.
pub const MAX_DIFF_TABLE_LEN: usize = 63_000;

/// Security section of a security-only run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub fixed_advisories: Vec<Advisory>,
    pub after_update_advisories: Vec<Advisory>,
    /// Advisories still open after the update.
    pub unresolved: usize,
}

/// Everything that goes into the merge request description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowUpdateResult {
    pub diff_table: String,
    pub dependency_report: DependencyUpdateReport,
    pub security: Option<SecurityReport>,
    pub update_hooks: UpdateHooksPerSite,
    pub addon_fragments: Vec<String>,
}

/// Whether a linked diff table must be swapped for the link-less variant.
pub fn diff_table_too_long(table: &str) -> bool {
    table.chars().count() > MAX_DIFF_TABLE_LEN
}

/// Render the description: diff summary, security report, patch updates,
/// update hooks per site, then addon fragments.
pub fn render_description(result: &WorkflowUpdateResult) -> String {
    let mut out = String::new();

    if !result.diff_table.trim().is_empty() {
        out.push_str("## Dependency changes\n\n");
        out.push_str(result.diff_table.trim_end());
        out.push_str("\n\n");
    }

    if let Some(security) = &result.security {
        render_security(&mut out, security);
    }

    render_patch_updates(&mut out, &result.dependency_report.patch_updates);
    render_update_hooks(&mut out, &result.update_hooks);

    for fragment in &result.addon_fragments {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        out.push_str(fragment);
        out.push_str("\n\n");
    }

    out.trim_end().to_string() + "\n"
}

fn render_security(out: &mut String, report: &SecurityReport) {
    out.push_str("## Security advisories\n\n");
    if report.fixed_advisories.is_empty() {
        out.push_str("No advisories were fixed by this update.\n\n");
    } else {
        out.push_str("### Fixed\n\n");
        advisory_table(out, &report.fixed_advisories);
    }
    if report.unresolved > 0 {
        out.push_str(&format!("### Unresolved ({})\n\n", report.unresolved));
        advisory_table(out, &report.after_update_advisories);
    }
}

fn advisory_table(out: &mut String, advisories: &[Advisory]) {
    out.push_str("| Package | Severity | CVE | Title |\n");
    out.push_str("|---------|----------|-----|-------|\n");
    for a in advisories {
        let title = if a.link.is_empty() {
            a.title.clone()
        } else {
            format!("[{}]({})", a.title, a.link)
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            a.package_name, a.severity, a.cve, title
        ));
    }
    out.push('\n');
}

fn render_patch_updates(out: &mut String, updates: &PatchUpdates) {
    if !updates.changes() {
        return;
    }
    out.push_str("## Patches\n\n");

    if !updates.removed.is_empty() {
        out.push_str("### Removed\n\n");
        out.push_str("| Package | Patch | Reason |\n");
        out.push_str("|---------|-------|--------|\n");
        for p in &updates.removed {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                p.package, p.description, p.reason
            ));
        }
        out.push('\n');
    }

    if !updates.updated.is_empty() {
        out.push_str("### Updated\n\n");
        out.push_str("| Package | Patch | Previous | New |\n");
        out.push_str("|---------|-------|----------|-----|\n");
        for p in &updates.updated {
            out.push_str(&format!(
                "| {} | {} | `{}` | `{}` |\n",
                p.package, p.description, p.previous_path, p.new_path
            ));
        }
        out.push('\n');
    }

    if !updates.conflicts.is_empty() {
        out.push_str("### Conflicts\n\n");
        out.push_str(
            "These patches no longer apply. The packages stay on their current version.\n\n",
        );
        out.push_str("| Package | Patch | Kept at | Available |\n");
        out.push_str("|---------|-------|---------|-----------|\n");
        for p in &updates.conflicts {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                p.package, p.description, p.fixed_version, p.new_version
            ));
        }
        out.push('\n');
    }
}

fn render_update_hooks(out: &mut String, hooks: &UpdateHooksPerSite) {
    if hooks.is_empty() {
        return;
    }
    out.push_str("## Update hooks\n\n");
    for (site, site_hooks) in hooks {
        out.push_str(&format!("### {site}\n\n"));
        out.push_str("| Module | Hook | Description |\n");
        out.push_str("|--------|------|-------------|\n");
        for info in site_hooks.values() {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                info.module,
                info.update_id,
                info.description.replace('\n', " ")
            ));
        }
        out.push('\n');
    }
}
