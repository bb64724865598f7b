//! Configuration loading, validation, and management for toolrelay.
//!
//! Loads configuration from `~/.toolrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Instructions sent as the system message of every run.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant that uses tools to help answer questions. \
You have access to several tools that can help you find information and perform tasks.

When using tools:
- Only use the tools that are explicitly provided
- Explain what you're doing when using tools
- Always share the output from the tool call with the user
- If a tool call fails, explain the error and try again with corrected parameters
- Never create false information
- If a question is too long, break it down into smaller parts and use the tools to answer each part

Refer to previous messages for context and use them to accurately answer the question.";

/// The root configuration structure.
///
/// Maps directly to `~/.toolrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("system_prompt_len", &self.system_prompt.len())
            .field("agent", &self.agent)
            .field("history", &self.history)
            .field("checkpoint", &self.checkpoint)
            .field("provider", &self.provider)
            .field("tools", &self.tools)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// How answer text reaches the client.
///
/// The model only says whether a pass calls tools once the pass ends, so
/// the two modes trade latency against noise:
///
/// - `final_answer_only` (default): the client never sees text from passes
///   that went on to call tools, but the final answer arrives in one burst
///   when its pass completes rather than token by token.
/// - `immediate`: every fragment is forwarded as generated, so the answer
///   streams incrementally, at the cost of also showing the narration
///   ("Let me check...") of tool-calling passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMode {
    /// Hold a pass's text until the pass ends; drop it if the pass
    /// requested tools.
    #[default]
    FinalAnswerOnly,
    /// Forward every fragment as soon as the model produces it.
    Immediate,
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Reasoning passes allowed per run before it fails
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock limit for one run
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Run the calls of one batch concurrently
    #[serde(default = "default_true")]
    pub parallel_tools: bool,

    /// `final_answer_only` or `immediate`; see [`TokenMode`]
    #[serde(default)]
    pub token_mode: TokenMode,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_run_timeout_secs() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            run_timeout_secs: default_run_timeout_secs(),
            parallel_tools: true,
            token_mode: TokenMode::default(),
        }
    }
}

/// History trimming and cache hinting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Keep at most this many messages (system message excluded)
    #[serde(default = "default_max_messages")]
    pub max_messages: Option<usize>,

    /// Keep at most this many estimated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    #[serde(default = "default_true")]
    pub cache_hints: bool,
}

fn default_max_messages() -> Option<usize> {
    Some(10)
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_tokens: None,
            cache_hints: true,
        }
    }
}

/// In-memory checkpoint store bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

fn default_checkpoint_ttl_secs() -> u64 {
    3600
}
fn default_max_threads() -> usize {
    1024
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_checkpoint_ttl_secs(),
            max_threads: default_max_threads(),
        }
    }
}

/// Model backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Send prompt-cache markers and the caching beta header
    #[serde(default = "default_true")]
    pub prompt_caching: bool,
}

fn default_base_url() -> String {
    "https://api.anthropic.com/v1".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            prompt_caching: true,
        }
    }
}

/// Remote tool catalog endpoint.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_api_key: Option<String>,
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("remote_endpoint", &self.remote_endpoint)
            .field("remote_api_key", &redact(&self.remote_api_key))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Bearer token → user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            tokens: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("tokens", &format!("[{} REDACTED]", self.tokens.len()))
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolrelay/config.toml).
    ///
    /// Environment overrides:
    /// - `TOOLRELAY_API_KEY`, then `ANTHROPIC_API_KEY`
    /// - `TOOLRELAY_MODEL`
    /// - `TOOLRELAY_TOOLS_ENDPOINT`, `TOOLRELAY_TOOLS_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("TOOLRELAY_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY"));
        }

        if let Some(model) = lookup("TOOLRELAY_MODEL") {
            self.default_model = model;
        }

        if let Some(endpoint) = lookup("TOOLRELAY_TOOLS_ENDPOINT") {
            self.tools.remote_endpoint = Some(endpoint);
        }

        if let Some(key) = lookup("TOOLRELAY_TOOLS_API_KEY") {
            self.tools.remote_api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolrelay")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 1.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.run_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.run_timeout_secs must be at least 1".into(),
            ));
        }

        if self.history.max_messages == Some(0) {
            return Err(ConfigError::ValidationError(
                "history.max_messages must be at least 1".into(),
            ));
        }

        if self.checkpoint.max_threads == 0 {
            return Err(ConfigError::ValidationError(
                "checkpoint.max_threads must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Resolve a bearer token to the user id it authenticates.
    pub fn user_for_token(&self, token: &str) -> Option<&str> {
        self.gateway.tokens.get(token).map(String::as_str)
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            agent: AgentConfig::default(),
            history: HistoryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            provider: ProviderConfig::default(),
            tools: ToolsConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for toolrelay_core::Error {
    fn from(err: ConfigError) -> Self {
        toolrelay_core::Error::Config {
            message: err.to_string(),
        }
    }
}
