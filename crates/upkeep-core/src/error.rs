//! Error taxonomy for the update engine.
//!
//! Fatal errors propagate out of [`crate::orchestrator::Orchestrator::run`]
//! and end the run before any push. Soft failures inside patch reconciliation
//! never surface here; they become report entries instead.

/// Upkeep engine errors.
#[derive(Debug, thiserror::Error)]
pub enum UpkeepError {
    #[error("failed to clone repository {url}: {reason}")]
    Clone { url: String, reason: String },

    #[error("dependency update failed: {0}")]
    DependencyUpdate(String),

    #[error("addon {addon} failed on {event}: {reason}")]
    Listener {
        addon: String,
        event: String,
        reason: String,
    },

    #[error("site {site} update failed: {reason}")]
    SiteUpdate { site: String, reason: String },

    #[error("site {site} install failed: {reason}")]
    SiteInstall { site: String, reason: String },

    #[error("{tool} failed: {message}")]
    Collaborator { tool: String, message: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("branch {0} already exists on the remote")]
    BranchExists(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpkeepError {
    /// Shorthand for a failure reported by an external collaborator.
    pub fn collaborator(tool: impl Into<String>, message: impl std::fmt::Display) -> Self {
        UpkeepError::Collaborator {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error came from a cancelled run context.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpkeepError::Cancelled)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, UpkeepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_error_names_addon_and_event() {
        let err = UpkeepError::Listener {
            addon: "allow-plugins".to_string(),
            event: "post-dependency-update".to_string(),
            reason: "config write failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("allow-plugins"));
        assert!(msg.contains("post-dependency-update"));
        assert!(msg.contains("config write failed"));
    }

    #[test]
    fn test_collaborator_helper() {
        let err = UpkeepError::collaborator("composer", "exit status 2");
        assert_eq!(err.to_string(), "composer failed: exit status 2");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_is_detected() {
        assert!(UpkeepError::Cancelled.is_cancelled());
    }
}
