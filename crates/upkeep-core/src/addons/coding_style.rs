use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::collaborators::{PackageManager, StyleFixer, StyleReport};
use crate::error::Result;
use crate::events::{Addon, Event, EventName, Priority, PRIORITY_LOW};

/// Fixes coding style in custom code and reports what is left.
pub struct CodingStyle {
    packages: Arc<dyn PackageManager>,
    fixer: Arc<dyn StyleFixer>,
    remaining: Option<StyleReport>,
}

impl CodingStyle {
    pub fn new(packages: Arc<dyn PackageManager>, fixer: Arc<dyn StyleFixer>) -> Self {
        Self {
            packages,
            fixer,
            remaining: None,
        }
    }
}

#[async_trait]
impl Addon for CodingStyle {
    fn name(&self) -> &str {
        "coding-style"
    }

    fn subscriptions(&self) -> Vec<(EventName, Priority)> {
        vec![(EventName::PostDependencyUpdate, PRIORITY_LOW)]
    }

    async fn handle(&mut self, event: &mut Event) -> Result<()> {
        let (ctx, dir) = (&event.ctx, &event.working_dir);
        let custom = self.packages.custom_code_directories(ctx, dir).await?;
        if custom.is_empty() {
            debug!("no custom code, skipping coding style fixes");
            return Ok(());
        }

        info!(directories = custom.len(), "fixing coding styles");
        self.fixer.fix(ctx, dir, &custom).await?;
        let paths: Vec<&str> = custom.iter().map(String::as_str).collect();
        event
            .worktree
            .commit_if_staged(&paths, "Update coding styles")
            .await?;

        self.remaining = Some(self.fixer.check(ctx, dir, &custom).await?);
        Ok(())
    }

    fn render_report(&self) -> Option<String> {
        let report = self.remaining.as_ref()?;
        if report.errors == 0 && report.warnings == 0 {
            return None;
        }
        let mut out = String::from("## Coding style\n\n");
        out.push_str(&format!(
            "{} errors and {} warnings remain after automatic fixes.\n\n",
            report.errors, report.warnings
        ));
        for (file, messages) in &report.files {
            if messages.is_empty() {
                continue;
            }
            out.push_str(&format!("<details><summary>{file}</summary>\n\n"));
            for m in messages {
                out.push_str(&format!("- {m}\n"));
            }
            out.push_str("\n</details>\n\n");
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::events::EventPayload;
    use crate::fakes::{FakePackageManager, FakeStyleFixer, FakeWorktree};
    use crate::worktree::SharedWorktree;

    #[tokio::test]
    async fn test_fixes_commit_and_report_remaining() {
        let pm = Arc::new(FakePackageManager::new());
        pm.set_custom_dirs(&["web/modules/custom"]);
        let fixer = Arc::new(FakeStyleFixer::new());
        fixer.set_remaining(StyleReport {
            errors: 1,
            warnings: 2,
            files: vec![(
                "web/modules/custom/foo/foo.module".to_string(),
                vec!["Line 3: Missing doc comment".to_string()],
            )],
        });

        let worktree = FakeWorktree::new();
        let log = worktree.log();
        fixer.touch_on_fix(log.clone(), "web/modules/custom/foo/foo.module");
        let mut event = Event::new(
            RunContext::new(),
            "/tmp/project",
            SharedWorktree::new(Box::new(worktree)),
            EventPayload::PostDependencyUpdate,
        );

        let mut addon = CodingStyle::new(pm, fixer);
        addon.handle(&mut event).await.unwrap();

        let commits = log.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "Update coding styles");
        let report = addon.render_report().unwrap();
        assert!(report.contains("1 errors and 2 warnings"));
        assert!(report.contains("Missing doc comment"));
    }

    #[tokio::test]
    async fn test_no_custom_code_is_a_no_op() {
        let pm = Arc::new(FakePackageManager::new());
        let fixer = Arc::new(FakeStyleFixer::new());
        let mut event = Event::new(
            RunContext::new(),
            "/tmp/project",
            SharedWorktree::new(Box::new(FakeWorktree::new())),
            EventPayload::PostDependencyUpdate,
        );
        let mut addon = CodingStyle::new(pm, fixer.clone());
        addon.handle(&mut event).await.unwrap();
        assert_eq!(fixer.fix_calls(), 0);
        assert!(addon.render_report().is_none());
    }
}
