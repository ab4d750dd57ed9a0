//! Runner configuration
//!
//! Everything here is read once at startup and injected into the controller;
//! lanes never consult the process environment for their own settings.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::request::{Language, Provider, DEFAULT_TIMEOUT_MS};

/// Configuration for the run controller
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory that receives one log file per run
    pub log_dir: PathBuf,
    /// Binary used for providers without a dedicated CLI
    pub default_binary: String,
    /// Extra PATH entries appended for spawned agents
    pub fallback_path: Vec<PathBuf>,
    /// Timeout applied when a request keeps the default
    pub default_timeout_ms: u64,
    /// Acknowledgment language when a request does not specify one
    pub language: Language,
    /// Provider tag -> full argv, replacing the built-in command line
    pub command_overrides: HashMap<String, Vec<String>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(".turn-runner").join("logs"),
            default_binary: "claude".to_string(),
            fallback_path: default_fallback_path(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            language: Language::En,
            command_overrides: HashMap::new(),
        }
    }
}

impl RunnerConfig {
    /// Build a configuration from `TURN_RUNNER_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_string("TURN_RUNNER_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(binary) = env_string("TURN_RUNNER_DEFAULT_BINARY") {
            config.default_binary = binary;
        }
        if let Some(raw) = std::env::var_os("TURN_RUNNER_FALLBACK_PATH") {
            config.fallback_path = std::env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(timeout) = env_string("TURN_RUNNER_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.default_timeout_ms = timeout;
        }
        if let Some(lang) = env_string("TURN_RUNNER_LANGUAGE") {
            config.language = Language::parse(&lang);
        }

        config
    }

    /// Replace the command line used for `provider`
    pub fn with_command_override(
        mut self,
        provider: &Provider,
        argv: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.command_overrides.insert(
            provider.as_str().to_string(),
            argv.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn command_override(&self, provider: &Provider) -> Option<&[String]> {
        self.command_overrides
            .get(provider.as_str())
            .filter(|argv| !argv.is_empty())
            .map(Vec::as_slice)
    }
}

fn default_fallback_path() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if cfg!(unix) {
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/homebrew/bin"));
    }
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = PathBuf::from(home);
        paths.push(home.join(".local").join("bin"));
        paths.push(home.join(".npm-global").join("bin"));
    }
    paths
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean flag from the environment
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Default model and reasoning level for a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_level: Option<String>,
}

/// Lookup of per-provider model defaults, used when a request does not pin a model
pub trait ProviderModelConfig: Send + Sync {
    fn lookup(&self, provider: &Provider) -> Option<ModelDefaults>;
}

/// In-memory provider model table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticModelConfig {
    entries: HashMap<String, ModelDefaults>,
}

impl StaticModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: &Provider, defaults: ModelDefaults) -> Self {
        self.entries.insert(provider.as_str().to_string(), defaults);
        self
    }

    /// Parse a `{ "<provider>": { "model": ..., "reasoningLevel": ... } }` map
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl ProviderModelConfig for StaticModelConfig {
    fn lookup(&self, provider: &Provider) -> Option<ModelDefaults> {
        self.entries.get(provider.as_str()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.default_timeout_ms, 180_000);
        assert_eq!(config.default_binary, "claude");
        assert_eq!(config.language, Language::En);
        assert!(config.command_overrides.is_empty());
    }

    #[test]
    fn test_command_override() {
        let config = RunnerConfig::default()
            .with_command_override(&Provider::Codex, ["sh", "-c", "cat"])
            .with_command_override(&Provider::Gemini, Vec::<String>::new());

        assert_eq!(
            config.command_override(&Provider::Codex).unwrap(),
            ["sh", "-c", "cat"]
        );
        assert!(config.command_override(&Provider::Gemini).is_none());
        assert!(config.command_override(&Provider::Claude).is_none());
    }

    #[test]
    fn test_env_flag_default_when_unset() {
        assert!(env_flag("TURN_RUNNER_TEST_FLAG_THAT_IS_NEVER_SET", true));
        assert!(!env_flag("TURN_RUNNER_TEST_FLAG_THAT_IS_NEVER_SET", false));
    }

    #[test]
    fn test_static_model_config_from_json() {
        let config = StaticModelConfig::from_json(
            r#"{"codex":{"model":"gpt-5-codex","reasoningLevel":"high"},"claude":{"model":"opus"}}"#,
        )
        .unwrap();

        let codex = config.lookup(&Provider::Codex).unwrap();
        assert_eq!(codex.model.as_deref(), Some("gpt-5-codex"));
        assert_eq!(codex.reasoning_level.as_deref(), Some("high"));

        let claude = config.lookup(&Provider::Claude).unwrap();
        assert!(claude.reasoning_level.is_none());

        assert!(config.lookup(&Provider::Gemini).is_none());
    }
}
