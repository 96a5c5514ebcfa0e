// Error types for the agent loop

use thiserror::Error;

use crate::tools::ToolExecutionError;

/// Result type alias for agent loop operations
pub type Result<T> = std::result::Result<T, AgentLoopError>;

/// Errors that can occur during agent loop execution
#[derive(Debug, Error)]
pub enum AgentLoopError {
    /// Language model unreachable or returned a malformed decision
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model requested a tool that is not registered
    #[error("Unknown tool '{tool_name}' requested by call {call_id}")]
    UnknownTool { tool_name: String, call_id: String },

    /// Tool execution error (only surfaced by direct registry use; the loop
    /// folds these into tool messages)
    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    /// Checkpoint store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Thread id cannot be used as a storage key
    #[error("Invalid thread id: {0}")]
    InvalidThreadId(String),

    /// Another run currently owns the thread
    #[error("Thread {0} is busy with another run")]
    ThreadBusy(String),

    /// Resume was requested for a thread without history
    #[error("Nothing to resume for thread {0}")]
    NothingToResume(String),

    /// Loop terminated due to max iterations
    #[error("Max iterations ({0}) reached")]
    MaxIterationsReached(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentLoopError {
    /// Create a model unavailable error
    pub fn model(msg: impl Into<String>) -> Self {
        AgentLoopError::ModelUnavailable(msg.into())
    }

    /// Create an unknown tool error
    pub fn unknown_tool(tool_name: impl Into<String>, call_id: impl Into<String>) -> Self {
        AgentLoopError::UnknownTool {
            tool_name: tool_name.into(),
            call_id: call_id.into(),
        }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        AgentLoopError::Storage(msg.into())
    }

    /// Create an invalid thread id error
    pub fn invalid_thread(msg: impl Into<String>) -> Self {
        AgentLoopError::InvalidThreadId(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentLoopError::Configuration(msg.into())
    }

    /// Whether a retry of the same step could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentLoopError::ModelUnavailable(_))
    }
}

impl From<std::io::Error> for AgentLoopError {
    fn from(err: std::io::Error) -> Self {
        AgentLoopError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AgentLoopError {
    fn from(err: serde_json::Error) -> Self {
        AgentLoopError::Storage(format!("serialization: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_display() {
        let err = AgentLoopError::unknown_tool("search", "c1");
        assert_eq!(
            err.to_string(),
            "Unknown tool 'search' requested by call c1"
        );
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AgentLoopError = io.into();
        assert!(matches!(err, AgentLoopError::Storage(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_model_error_is_transient() {
        assert!(AgentLoopError::model("timeout").is_transient());
    }
}
