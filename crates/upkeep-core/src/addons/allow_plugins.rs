use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::collaborators::PackageManager;
use crate::error::Result;
use crate::events::{Addon, Event, EventName, EventPayload, Priority, PRIORITY_NORMAL};

const KEY: &str = "allow-plugins";

/// State of `allow-plugins` before the update.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Allowed {
    /// A blanket `true`/`false`.
    All(bool),
    Listed(BTreeMap<String, bool>),
}

/// Lets the update run every plugin, then restores `allow-plugins` with
/// newly installed plugins explicitly disallowed.
pub struct AllowPlugins {
    packages: Arc<dyn PackageManager>,
    previous: Option<Allowed>,
    newly_added: Vec<String>,
}

impl AllowPlugins {
    pub fn new(packages: Arc<dyn PackageManager>) -> Self {
        Self {
            packages,
            previous: None,
            newly_added: Vec::new(),
        }
    }

    async fn before_update(&mut self, event: &Event) -> Result<()> {
        let current = self
            .packages
            .get_config(&event.ctx, &event.working_dir, KEY)
            .await?;
        let previous = match current {
            Some(Value::Bool(all)) => Allowed::All(all),
            Some(value @ Value::Object(_)) => Allowed::Listed(serde_json::from_value(value)?),
            _ => Allowed::Listed(BTreeMap::new()),
        };
        debug!(previous = ?previous, "remembering allow-plugins");
        self.previous = Some(previous);
        self.packages
            .set_config(&event.ctx, &event.working_dir, KEY, &Value::Bool(true))
            .await
    }

    async fn after_update(&mut self, event: &Event) -> Result<()> {
        let restored = match self.previous.take() {
            Some(Allowed::All(all)) => Value::Bool(all),
            Some(Allowed::Listed(mut allowed)) => {
                let installed = self
                    .packages
                    .installed_plugins(&event.ctx, &event.working_dir)
                    .await?;
                for plugin in installed {
                    if !allowed.contains_key(&plugin) {
                        info!(plugin = %plugin, "new plugin, adding it as not allowed");
                        allowed.insert(plugin.clone(), false);
                        self.newly_added.push(plugin);
                    }
                }
                serde_json::to_value(allowed)?
            }
            None => return Ok(()),
        };
        self.packages
            .set_config(&event.ctx, &event.working_dir, KEY, &restored)
            .await
    }
}

#[async_trait]
impl Addon for AllowPlugins {
    fn name(&self) -> &str {
        "allow-plugins"
    }

    fn subscriptions(&self) -> Vec<(EventName, Priority)> {
        vec![
            (EventName::PreDependencyUpdate, PRIORITY_NORMAL),
            (EventName::PostDependencyUpdate, PRIORITY_NORMAL),
        ]
    }

    async fn handle(&mut self, event: &mut Event) -> Result<()> {
        match event.payload {
            EventPayload::PreDependencyUpdate { .. } => self.before_update(event).await,
            EventPayload::PostDependencyUpdate => self.after_update(event).await,
            _ => Ok(()),
        }
    }

    fn render_report(&self) -> Option<String> {
        if self.newly_added.is_empty() {
            return None;
        }
        let mut out = String::from("## Composer plugins\n\n");
        out.push_str("These new plugins were added to `allow-plugins` as not allowed. Review and allow them if needed:\n\n");
        for plugin in &self.newly_added {
            out.push_str(&format!("- `{plugin}`\n"));
        }
        Some(out)
    }
}
