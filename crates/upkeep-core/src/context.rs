//! Run-scoped execution context with cooperative cancellation.
//!
//! One [`RunContext`] is created per run and cloned into every remote call,
//! subprocess invocation and spawned task. Cancelling any clone cancels all
//! of them.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, UpkeepError};

/// Cancellable context threaded through a whole update run.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl RunContext {
    /// Create a fresh, non-cancelled context with a random run id.
    pub fn new() -> Self {
        Self::with_run_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create a context with an explicit run id.
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            run_id: run_id.into(),
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Signal cancellation to every clone of this context.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Return `Err(Cancelled)` if the context has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(UpkeepError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // The sender lives as long as any clone of the context, so
        // `wait_for` only errors once every clone is gone.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` to completion unless the context is cancelled first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(UpkeepError::Cancelled),
            out = fut => out,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
