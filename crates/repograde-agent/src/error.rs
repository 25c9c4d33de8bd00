//! Error types for the agent SDK.

use thiserror::Error;

/// Errors that can occur while running the agent CLI.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Agent CLI executable not found.
    #[error("Agent CLI not found at '{0}'. Ensure it is installed and on PATH.")]
    NotFound(String),

    /// Failed to spawn the agent process.
    #[error("Failed to spawn agent process: {0}")]
    SpawnError(#[from] std::io::Error),

    /// Agent process exited with a non-zero status.
    #[error("Agent process exited with code {code}: {stderr}")]
    ProcessError { code: i32, stderr: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Protocol error during communication.
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}
