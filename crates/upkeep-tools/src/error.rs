//! Error types for upkeep-tools

use thiserror::Error;
use upkeep_core::UpkeepError;

/// Errors raised by the subprocess and HTTP adapters
#[derive(Error, Debug)]
pub enum ToolError {
    /// The program ran and exited unsuccessfully
    #[error("{program} exited with {code:?}: {output}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    /// The program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// HTTP error (issue tracker, code hosts)
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Output that could not be interpreted
    #[error("unexpected output: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        ToolError::Http(err.to_string())
    }
}

impl From<UpkeepError> for ToolError {
    fn from(err: UpkeepError) -> Self {
        if err.is_cancelled() {
            ToolError::Cancelled
        } else {
            ToolError::Parse(err.to_string())
        }
    }
}

impl From<ToolError> for UpkeepError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Cancelled => UpkeepError::Cancelled,
            ToolError::CommandFailed { ref program, .. } | ToolError::Spawn { ref program, .. } => {
                UpkeepError::collaborator(program.clone(), &err)
            }
            ToolError::Http(_) => UpkeepError::collaborator("http", &err),
            ToolError::Io(e) => UpkeepError::Io(e),
            ToolError::Json(e) => UpkeepError::Serialization(e),
            ToolError::Parse(_) => UpkeepError::collaborator("tool", err),
        }
    }
}

/// Result type for tool adapters
pub type Result<T> = std::result::Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_survives_conversion() {
        let err: UpkeepError = ToolError::Cancelled.into();
        assert!(err.is_cancelled());
        let back: ToolError = UpkeepError::Cancelled.into();
        assert!(matches!(back, ToolError::Cancelled));
    }

    #[test]
    fn test_command_failure_names_the_program() {
        let err: UpkeepError = ToolError::CommandFailed {
            program: "composer".to_string(),
            code: Some(2),
            output: "Your requirements could not be resolved".to_string(),
        }
        .into();
        let message = err.to_string();
        assert!(message.starts_with("composer failed"));
        assert!(message.contains("could not be resolved"));
    }
}
