//! Tracing setup for the `upkeep` binary and run-scoped spans.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! since the global subscriber can only be set once per process.

use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. `json` switches to
/// newline-delimited JSON output.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// RAII guard tagging every log line of one update run with its `run_id`.
///
/// Only hold this in synchronous scopes; async code should use
/// [`RunSpan::span`] with `Instrument`.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: Self::span(run_id).entered(),
        }
    }

    /// The un-entered span, for `.instrument(..)` on futures.
    pub fn span(run_id: &str) -> tracing::Span {
        tracing::info_span!("upkeep.run", run_id = %run_id)
    }
}

pub fn emit_run_started(run_id: &str, repository: &str, strategy: &str) {
    info!(event = "run.started", run_id = %run_id, repository = %repository, strategy = %strategy);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, outcome: &str) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        outcome = %outcome,
    );
}

pub fn emit_site_updated(site: &str, hooks: usize) {
    info!(event = "site.updated", site = %site, hooks = hooks);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
    }

    #[test]
    fn test_run_span_enter() {
        let _span = RunSpan::enter("test-run-id");
        emit_site_updated("default", 0);
    }
}
