//! Event types emitted by execution lanes

use serde::{Deserialize, Serialize};

/// Output stream type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Events a lane delivers to the controller, in emission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaneEvent {
    /// A chunk of output
    Data { stream: OutputStream, chunk: String },

    /// The lane failed; no further events follow
    Error { message: String },

    /// The lane finished; no further events follow
    Completed { exit_code: i32 },
}

impl LaneEvent {
    pub fn stdout(chunk: impl Into<String>) -> Self {
        Self::Data {
            stream: OutputStream::Stdout,
            chunk: chunk.into(),
        }
    }

    pub fn stderr(chunk: impl Into<String>) -> Self {
        Self::Data {
            stream: OutputStream::Stderr,
            chunk: chunk.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Check if the event ends the lane
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Completed { .. })
    }
}
