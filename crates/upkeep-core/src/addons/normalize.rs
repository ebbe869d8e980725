use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::collaborators::PackageManager;
use crate::error::Result;
use crate::events::{Addon, Event, EventName, Priority, PRIORITY_MAX};

const NORMALIZER_PACKAGE: &str = "ergebnis/composer-normalize";

/// Normalizes `composer.json` after the update when the project uses the
/// normalizer plugin. Best effort.
pub struct Normalizer {
    packages: Arc<dyn PackageManager>,
}

impl Normalizer {
    pub fn new(packages: Arc<dyn PackageManager>) -> Self {
        Self { packages }
    }
}

#[async_trait]
impl Addon for Normalizer {
    fn name(&self) -> &str {
        "composer-normalize"
    }

    fn subscriptions(&self) -> Vec<(EventName, Priority)> {
        vec![(EventName::PostDependencyUpdate, PRIORITY_MAX)]
    }

    async fn handle(&mut self, event: &mut Event) -> Result<()> {
        let (ctx, dir) = (&event.ctx, &event.working_dir);
        match self.packages.is_installed(ctx, dir, NORMALIZER_PACKAGE).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("{NORMALIZER_PACKAGE} not installed, skipping");
                return Ok(());
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "could not check for {NORMALIZER_PACKAGE}, skipping");
                return Ok(());
            }
        }
        if let Err(e) = self.packages.normalize(ctx, dir).await {
            if e.is_cancelled() {
                return Err(e);
            }
            warn!(error = %e, "composer normalize failed, ignoring");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::events::EventPayload;
    use crate::fakes::{FakePackageManager, FakeWorktree};
    use crate::worktree::SharedWorktree;

    fn post_event() -> Event {
        Event::new(
            RunContext::new(),
            "/tmp/project",
            SharedWorktree::new(Box::new(FakeWorktree::new())),
            EventPayload::PostDependencyUpdate,
        )
    }

    #[tokio::test]
    async fn test_runs_only_when_plugin_installed() {
        let pm = Arc::new(FakePackageManager::new());
        let mut addon = Normalizer::new(pm.clone());
        addon.handle(&mut post_event()).await.unwrap();
        assert_eq!(pm.normalize_calls(), 0);

        pm.set_installed(&[NORMALIZER_PACKAGE]);
        addon.handle(&mut post_event()).await.unwrap();
        assert_eq!(pm.normalize_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_ignored() {
        let pm = Arc::new(FakePackageManager::new());
        pm.set_installed(&[NORMALIZER_PACKAGE]);
        pm.fail_normalize();
        let mut addon = Normalizer::new(pm.clone());
        assert!(addon.handle(&mut post_event()).await.is_ok());
    }
}
