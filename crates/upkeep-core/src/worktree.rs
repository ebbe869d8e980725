//! Serialized access to the one working tree of a run.
//!
//! Site workers prepare files in parallel, but every index mutation and
//! commit goes through a single async mutex.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::collaborators::{Worktree, WorktreeStatus};
use crate::error::Result;

/// Cloneable handle to the run's worktree.
#[derive(Clone)]
pub struct SharedWorktree {
    inner: Arc<Mutex<Box<dyn Worktree>>>,
}

impl SharedWorktree {
    pub fn new(worktree: Box<dyn Worktree>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(worktree)),
        }
    }

    pub async fn add(&self, path: &str) -> Result<()> {
        self.inner.lock().await.add(path).await
    }

    pub async fn add_glob(&self, pattern: &str) -> Result<()> {
        self.inner.lock().await.add_glob(pattern).await
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.inner.lock().await.remove(path).await
    }

    pub async fn commit(&self, message: &str) -> Result<()> {
        self.inner.lock().await.commit(message).await
    }

    pub async fn status(&self) -> Result<WorktreeStatus> {
        self.inner.lock().await.status().await
    }

    pub async fn checkout(&self, branch: &str, create: bool) -> Result<()> {
        self.inner.lock().await.checkout(branch, create).await
    }

    /// Stage `paths`, then commit with `message` if anything ended up staged.
    ///
    /// The whole sequence holds the lock, so a concurrent caller can never
    /// sweep these paths into its own commit. Returns whether a commit was made.
    pub async fn commit_if_staged(&self, paths: &[&str], message: &str) -> Result<bool> {
        let mut wt = self.inner.lock().await;
        for path in paths {
            wt.add(path).await?;
        }
        if !wt.status().await?.has_staged() {
            debug!(message = %message, "nothing staged, skipping commit");
            return Ok(false);
        }
        wt.commit(message).await?;
        Ok(true)
    }

    /// Like [`commit_if_staged`](Self::commit_if_staged) but stages a glob.
    pub async fn commit_glob_if_staged(&self, pattern: &str, message: &str) -> Result<bool> {
        let mut wt = self.inner.lock().await;
        wt.add_glob(pattern).await?;
        if !wt.status().await?.has_staged() {
            debug!(message = %message, "nothing staged, skipping commit");
            return Ok(false);
        }
        wt.commit(message).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for SharedWorktree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWorktree").finish_non_exhaustive()
    }
}
