use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::collaborators::SiteTool;
use crate::error::Result;
use crate::events::{Addon, Event, EventName, Priority, PRIORITY_NORMAL};

const TRANSLATION_MODULE: &str = "locale_deploy";

/// Refreshes committed translations of sites that deploy them.
pub struct Translations {
    sites: Arc<dyn SiteTool>,
}

impl Translations {
    pub fn new(sites: Arc<dyn SiteTool>) -> Self {
        Self { sites }
    }
}

#[async_trait]
impl Addon for Translations {
    fn name(&self) -> &str {
        "translations"
    }

    fn subscriptions(&self) -> Vec<(EventName, Priority)> {
        vec![(EventName::PostSiteUpdate, PRIORITY_NORMAL)]
    }

    async fn handle(&mut self, event: &mut Event) -> Result<()> {
        let Some(site) = event.site().map(str::to_string) else {
            return Ok(());
        };
        let (ctx, dir) = (&event.ctx, &event.working_dir);

        if !self
            .sites
            .is_module_enabled(ctx, dir, &site, TRANSLATION_MODULE)
            .await?
        {
            debug!(site = %site, "{TRANSLATION_MODULE} not enabled, skipping translations");
            return Ok(());
        }

        info!(site = %site, "updating translations");
        self.sites.localize_translations(ctx, dir, &site).await?;
        let path = self.sites.translation_path(ctx, dir, &site, true).await?;
        event
            .worktree
            .commit_if_staged(&[path.as_str()], "Update translations")
            .await?;
        Ok(())
    }
}
