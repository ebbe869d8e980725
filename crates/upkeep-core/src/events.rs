//! Lifecycle events and the addon dispatcher.
//!
//! The orchestrator owns an explicit list of addons. Each addon declares
//! which events it listens to and at what priority. Dispatch is strictly
//! sequential: listeners for one event run one after another, highest
//! priority first (registration order breaks ties), and no two listeners
//! ever run at the same time, even when per-site events are raised from
//! concurrent site workers.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::RunContext;
use crate::error::{Result, UpkeepError};
use crate::worktree::SharedWorktree;

/// Listener ordering within one event; higher runs first.
pub type Priority = i32;

pub const PRIORITY_MAX: Priority = 1000;
pub const PRIORITY_HIGH: Priority = 100;
pub const PRIORITY_NORMAL: Priority = 0;
pub const PRIORITY_LOW: Priority = -100;
pub const PRIORITY_MIN: Priority = -1000;

/// Names of the lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    PreDependencyUpdate,
    PostDependencyUpdate,
    PreSiteUpdate,
    PostSiteUpdate,
    PreReportCreate,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PreDependencyUpdate => "pre-dependency-update",
            EventName::PostDependencyUpdate => "post-dependency-update",
            EventName::PreSiteUpdate => "pre-site-update",
            EventName::PostSiteUpdate => "post-site-update",
            EventName::PreReportCreate => "pre-report-create",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-specific fields. Listeners may mutate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    PreDependencyUpdate {
        packages_to_update: Vec<String>,
        packages_to_keep: Vec<String>,
        minimal_changes: bool,
        abort: bool,
    },
    PostDependencyUpdate,
    PreSiteUpdate {
        site: String,
    },
    PostSiteUpdate {
        site: String,
    },
    PreReportCreate {
        title: String,
    },
}

/// One raised event.
#[derive(Debug, Clone)]
pub struct Event {
    pub ctx: RunContext,
    pub working_dir: PathBuf,
    pub worktree: SharedWorktree,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        ctx: RunContext,
        working_dir: impl Into<PathBuf>,
        worktree: SharedWorktree,
        payload: EventPayload,
    ) -> Self {
        Self {
            ctx,
            working_dir: working_dir.into(),
            worktree,
            payload,
        }
    }

    pub fn name(&self) -> EventName {
        match self.payload {
            EventPayload::PreDependencyUpdate { .. } => EventName::PreDependencyUpdate,
            EventPayload::PostDependencyUpdate => EventName::PostDependencyUpdate,
            EventPayload::PreSiteUpdate { .. } => EventName::PreSiteUpdate,
            EventPayload::PostSiteUpdate { .. } => EventName::PostSiteUpdate,
            EventPayload::PreReportCreate { .. } => EventName::PreReportCreate,
        }
    }

    /// Site of a per-site event.
    pub fn site(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::PreSiteUpdate { site } | EventPayload::PostSiteUpdate { site } => {
                Some(site)
            }
            _ => None,
        }
    }

    /// Whether a listener asked to end the run without further work.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::PreDependencyUpdate { abort: true, .. }
        )
    }
}

/// A pluggable feature reacting to lifecycle events.
#[async_trait]
pub trait Addon: Send + Sync {
    /// Stable identifier used in logs and errors.
    fn name(&self) -> &str;

    fn subscriptions(&self) -> Vec<(EventName, Priority)>;

    async fn handle(&mut self, event: &mut Event) -> Result<()>;

    /// Markdown fragment for the merge request description.
    fn render_report(&self) -> Option<String> {
        None
    }
}

/// Ordered, single-threaded dispatcher over an owned addon list.
pub struct EventDispatcher {
    addons: Mutex<Vec<Box<dyn Addon>>>,
}

impl EventDispatcher {
    pub fn new(addons: Vec<Box<dyn Addon>>) -> Self {
        Self {
            addons: Mutex::new(addons),
        }
    }

    /// Run every listener of `event`. The first failure stops dispatch.
    pub async fn dispatch(&self, event: &mut Event) -> Result<()> {
        let name = event.name();
        let mut addons = self.addons.lock().await;

        let mut order: Vec<(usize, Priority)> = addons
            .iter()
            .enumerate()
            .filter_map(|(idx, addon)| {
                addon
                    .subscriptions()
                    .into_iter()
                    .find(|(event, _)| *event == name)
                    .map(|(_, priority)| (idx, priority))
            })
            .collect();
        // stable: equal priorities keep registration order
        order.sort_by(|a, b| b.1.cmp(&a.1));

        for (idx, _) in order {
            event.ctx.check()?;
            let addon = &mut addons[idx];
            debug!(addon = %addon.name(), event = %name, "dispatching");
            if let Err(err) = addon.handle(event).await {
                if err.is_cancelled() {
                    return Err(err);
                }
                return Err(UpkeepError::Listener {
                    addon: addon.name().to_string(),
                    event: name.to_string(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Non-empty report fragments in registration order.
    pub async fn reports(&self) -> Vec<String> {
        self.addons
            .lock()
            .await
            .iter()
            .filter_map(|addon| addon.render_report())
            .filter(|fragment| !fragment.trim().is_empty())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.addons.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.addons.lock().await.is_empty()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeWorktree;
    use std::sync::{Arc, Mutex as StdMutex};

    struct Recorder {
        name: String,
        priority: Priority,
        seen: Arc<StdMutex<Vec<String>>>,
        fail: bool,
        abort: bool,
    }

    impl Recorder {
        fn new(name: &str, priority: Priority, seen: &Arc<StdMutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                priority,
                seen: Arc::clone(seen),
                fail: false,
                abort: false,
            }
        }
    }

    #[async_trait]
    impl Addon for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn subscriptions(&self) -> Vec<(EventName, Priority)> {
            vec![(EventName::PreDependencyUpdate, self.priority)]
        }

        async fn handle(&mut self, event: &mut Event) -> Result<()> {
            self.seen.lock().unwrap().push(self.name.clone());
            if self.fail {
                return Err(UpkeepError::collaborator("composer", "boom"));
            }
            if let EventPayload::PreDependencyUpdate { abort, .. } = &mut event.payload {
                *abort = self.abort;
            }
            Ok(())
        }

        fn render_report(&self) -> Option<String> {
            Some(format!("report from {}", self.name))
        }
    }

    fn pre_update_event() -> Event {
        Event::new(
            RunContext::new(),
            "/tmp/project",
            SharedWorktree::new(Box::new(FakeWorktree::new())),
            EventPayload::PreDependencyUpdate {
                packages_to_update: vec![],
                packages_to_keep: vec![],
                minimal_changes: false,
                abort: false,
            },
        )
    }

    #[tokio::test]
    async fn test_priority_order_then_registration_order() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new(vec![
            Box::new(Recorder::new("low", PRIORITY_LOW, &seen)),
            Box::new(Recorder::new("normal-a", PRIORITY_NORMAL, &seen)),
            Box::new(Recorder::new("high", PRIORITY_HIGH, &seen)),
            Box::new(Recorder::new("normal-b", PRIORITY_NORMAL, &seen)),
        ]);

        let mut event = pre_update_event();
        dispatcher.dispatch(&mut event).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["high", "normal-a", "normal-b", "low"]
        );
    }

    #[tokio::test]
    async fn test_first_error_stops_dispatch() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let mut failing = Recorder::new("failing", PRIORITY_HIGH, &seen);
        failing.fail = true;
        let dispatcher = EventDispatcher::new(vec![
            Box::new(failing),
            Box::new(Recorder::new("after", PRIORITY_LOW, &seen)),
        ]);

        let mut event = pre_update_event();
        let err = dispatcher.dispatch(&mut event).await.unwrap_err();
        match err {
            UpkeepError::Listener { addon, event, .. } => {
                assert_eq!(addon, "failing");
                assert_eq!(event, "pre-dependency-update");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["failing"]);
    }

    #[tokio::test]
    async fn test_listener_can_abort() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let mut aborting = Recorder::new("audit", PRIORITY_NORMAL, &seen);
        aborting.abort = true;
        let dispatcher = EventDispatcher::new(vec![Box::new(aborting)]);

        let mut event = pre_update_event();
        dispatcher.dispatch(&mut event).await.unwrap();
        assert!(event.is_aborted());
    }

    #[tokio::test]
    async fn test_unsubscribed_event_is_ignored_and_reports_collected() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new(vec![Box::new(Recorder::new("a", 0, &seen))]);

        let mut event = pre_update_event();
        event.payload = EventPayload::PostDependencyUpdate;
        dispatcher.dispatch(&mut event).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.reports().await, vec!["report from a".to_string()]);
        assert_eq!(dispatcher.len().await, 1);
    }
}
