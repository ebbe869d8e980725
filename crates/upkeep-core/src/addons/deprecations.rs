use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::collaborators::{DeprecationRewriter, PackageManager};
use crate::error::Result;
use crate::events::{Addon, Event, EventName, Priority, PRIORITY_NORMAL};

/// Rewrites deprecated API usage in custom code.
///
/// The rewriter package is required for the duration of the run only when
/// the project does not already depend on it.
pub struct DeprecationRemover {
    packages: Arc<dyn PackageManager>,
    rewriter: Arc<dyn DeprecationRewriter>,
    changed_files: Vec<String>,
}

impl DeprecationRemover {
    pub fn new(packages: Arc<dyn PackageManager>, rewriter: Arc<dyn DeprecationRewriter>) -> Self {
        Self {
            packages,
            rewriter,
            changed_files: Vec::new(),
        }
    }
}

#[async_trait]
impl Addon for DeprecationRemover {
    fn name(&self) -> &str {
        "deprecation-remover"
    }

    fn subscriptions(&self) -> Vec<(EventName, Priority)> {
        vec![(EventName::PostDependencyUpdate, PRIORITY_NORMAL)]
    }

    async fn handle(&mut self, event: &mut Event) -> Result<()> {
        let (ctx, dir) = (&event.ctx, &event.working_dir);
        let package = self.rewriter.package().to_string();

        let custom = self.packages.custom_code_directories(ctx, dir).await?;
        if custom.is_empty() {
            debug!("no custom code, skipping deprecation removal");
            return Ok(());
        }

        let installed = self
            .packages
            .is_installed(ctx, dir, &package)
            .await
            .unwrap_or(false);
        if !installed {
            debug!(package = %package, "requiring rewriter temporarily");
            self.packages.require(ctx, dir, &package, true).await?;
        }

        info!("removing deprecations");
        let result = self.rewriter.run(ctx, dir, &custom).await;

        if !installed {
            debug!(package = %package, "removing rewriter");
            self.packages.remove(ctx, dir, &package, true).await?;
        }
        let result = result?;

        if result.changed_files.is_empty() {
            debug!("no deprecations to remove");
            return Ok(());
        }
        let paths: Vec<&str> = result.changed_files.iter().map(String::as_str).collect();
        event
            .worktree
            .commit_if_staged(&paths, "Remove deprecations")
            .await?;
        self.changed_files = result.changed_files;
        Ok(())
    }

    fn render_report(&self) -> Option<String> {
        if self.changed_files.is_empty() {
            return None;
        }
        let mut out = String::from("## Deprecations\n\n");
        out.push_str("Deprecated code was rewritten in:\n\n");
        for file in &self.changed_files {
            out.push_str(&format!("- `{file}`\n"));
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::RewriteReport;
    use crate::context::RunContext;
    use crate::events::EventPayload;
    use crate::fakes::{FakeDeprecationRewriter, FakePackageManager, FakeWorktree};
    use crate::worktree::SharedWorktree;

    #[tokio::test]
    async fn test_temporary_require_and_commit() {
        let pm = Arc::new(FakePackageManager::new());
        pm.set_custom_dirs(&["web/modules/custom"]);
        let rewriter = Arc::new(FakeDeprecationRewriter::new(RewriteReport {
            changed_files: vec!["web/modules/custom/foo/src/Foo.php".to_string()],
            errors: 0,
        }));

        let worktree = FakeWorktree::new();
        let log = worktree.log();
        log.touch("web/modules/custom/foo/src/Foo.php");
        let mut event = Event::new(
            RunContext::new(),
            "/tmp/project",
            SharedWorktree::new(Box::new(worktree)),
            EventPayload::PostDependencyUpdate,
        );

        let mut addon = DeprecationRemover::new(pm.clone(), rewriter);
        addon.handle(&mut event).await.unwrap();

        assert_eq!(pm.required(), vec!["palantirnet/drupal-rector".to_string()]);
        assert_eq!(pm.removed(), vec!["palantirnet/drupal-rector".to_string()]);
        assert_eq!(log.commits()[0].message, "Remove deprecations");
        assert!(addon.render_report().unwrap().contains("Foo.php"));
    }

    #[tokio::test]
    async fn test_existing_rewriter_is_left_installed() {
        let pm = Arc::new(FakePackageManager::new());
        pm.set_custom_dirs(&["web/modules/custom"]);
        pm.set_installed(&["palantirnet/drupal-rector"]);
        let rewriter = Arc::new(FakeDeprecationRewriter::new(RewriteReport::default()));
        let mut event = Event::new(
            RunContext::new(),
            "/tmp/project",
            SharedWorktree::new(Box::new(FakeWorktree::new())),
            EventPayload::PostDependencyUpdate,
        );

        let mut addon = DeprecationRemover::new(pm.clone(), rewriter);
        addon.handle(&mut event).await.unwrap();
        assert!(pm.required().is_empty());
        assert!(pm.removed().is_empty());
        assert!(addon.render_report().is_none());
    }
}
