//! Run request and result types
//!
//! A [`RunRequest`] is built once per turn by the caller and never mutated.
//! The controller answers it with exactly one [`RunResult`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default wall-clock budget for one run
pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;

/// Supported agent providers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Claude,
    Codex,
    Gemini,
    Opencode,
    /// OAuth-backed remote executor
    Copilot,
    /// OAuth-backed remote executor
    Antigravity,
    /// Hosted API executor
    Api,
    /// Anything else runs through the default subprocess binary
    Other(String),
}

impl Provider {
    /// Parse a provider from its string tag. Never fails: unknown tags become `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "claude" | "claude-code" | "claudecode" => Self::Claude,
            "codex" => Self::Codex,
            "gemini" | "gemini-cli" => Self::Gemini,
            "opencode" => Self::Opencode,
            "copilot" | "github-copilot" => Self::Copilot,
            "antigravity" => Self::Antigravity,
            "api" => Self::Api,
            other => Self::Other(other.to_string()),
        }
    }

    /// Get the canonical string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Opencode => "opencode",
            Self::Copilot => "copilot",
            Self::Antigravity => "antigravity",
            Self::Api => "api",
            Self::Other(name) => name,
        }
    }

    /// Providers whose output is forwarded without noise stripping
    pub fn is_verbatim(&self) -> bool {
        matches!(self, Self::Copilot | Self::Antigravity)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preferred language for the fallback acknowledgment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ja,
    Zh,
    Ko,
}

impl Language {
    /// Parse a language tag such as `ja`, `ja-JP` or `zh_CN`. Unknown tags fall back to English.
    pub fn parse(s: &str) -> Self {
        let tag = s.trim().to_lowercase();
        let primary = tag.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "ja" => Self::Ja,
            "zh" => Self::Zh,
            "ko" => Self::Ko,
            _ => Self::En,
        }
    }
}

/// Who is running the turn and through which backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Agent ID, used to name the log file
    pub id: String,
    /// Display name
    pub name: String,
    pub provider: Provider,
    /// Pinned model; falls back to the provider model config when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_level: Option<String>,
    /// OAuth account used by the remote executor lane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_account_id: Option<String>,
    /// API provider used by the hosted API lane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_model: Option<String>,
}

impl AgentIdentity {
    /// Create an identity with no model pinning or account linkage
    pub fn new(id: impl Into<String>, provider: Provider) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider,
            model: None,
            reasoning_level: None,
            oauth_account_id: None,
            api_provider_id: None,
            api_model: None,
        }
    }
}

/// Per-run options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Working directory for the agent
    pub project_path: PathBuf,
    pub timeout_ms: u64,
    /// Correlation ID for live-stream broadcast events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_task_id: Option<String>,
    /// Return the captured output instead of a conversational extract
    #[serde(default)]
    pub raw_output: bool,
    /// Cancel the run as soon as the agent tries to use a tool
    #[serde(default)]
    pub no_tools: bool,
    /// Overrides the configured acknowledgment language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("."),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stream_task_id: None,
            raw_output: false,
            no_tools: false,
            language: None,
        }
    }
}

/// Immutable input for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub agent: AgentIdentity,
    pub prompt: String,
    #[serde(default)]
    pub options: RunOptions,
}

impl RunRequest {
    pub fn new(agent: AgentIdentity, prompt: impl Into<String>) -> Self {
        Self {
            agent,
            prompt: prompt.into(),
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of one turn.
///
/// `error` marks a notable failure; `text` is still best-effort output and may be
/// non-empty at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    pub fn failed(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// How a run settled; drives the extraction cascade
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalMode {
    Success,
    /// Spawn failure, lane error or external cancellation
    GenericError(String),
    /// Carries the `timeout after {ms}ms` reason
    Timeout(String),
    /// Cancelled by the no-tools policy; never surfaces as an error
    NoToolsViolation,
}

impl TerminalMode {
    /// Reason string used when cancelling a lane
    pub const NO_TOOLS_REASON: &'static str = "tool_use_blocked_by_no_tools_policy";
}
