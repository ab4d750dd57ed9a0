//! Error types for turn-runner

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while running a turn.
///
/// None of these reach the caller of [`crate::RunController::execute`]; the
/// controller folds them into `RunResult::error`.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Failed to spawn agent process
    #[error("Failed to spawn agent process: {message}")]
    SpawnFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// No executor was injected for a remote or hosted provider
    #[error("{provider} executor is not configured")]
    ExecutorMissing { provider: String },

    /// The lane stopped emitting events without reporting completion
    #[error("{provider} lane closed without completing")]
    LaneClosed { provider: String },

    /// Execution timeout
    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Log file could not be created
    #[error("Failed to open log file {path}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Process tree could not be terminated
    #[error("Failed to kill process tree {pid}: {message}")]
    KillFailed { pid: u32, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Execution failed
    #[error("{message}")]
    ExecutionFailed { message: String },
}

impl RunnerError {
    /// Create a SpawnFailed error
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a SpawnFailed error with source
    pub fn spawn_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an ExecutionFailed error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }
}
