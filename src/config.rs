//! TOML configuration for a chat session
//!
//! Secrets are never stored in the file: the broker credentials and the LLM API
//! key are named by environment variable and read when they are needed.

use crate::protocol::{room_topic, validate_exchange_name};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File names searched, in order, when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["relaychat.toml", "config/relaychat.toml"];

/// Complete session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    pub session: SessionSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub auto_reply: AutoReplySection,
}

/// Local participant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Display name; also the identity used for self-echo suppression
    pub name: String,
}

/// How typing signals are put on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TypingSignalMode {
    /// Empty body, state carried in `x-msg-type`/`x-sender`/`x-is-typing`
    #[default]
    Headers,
    /// `{"type":"typing","sender":…,"isTyping":…}` body
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Room name; every client on the same exchange sees every message
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default)]
    pub typing_signal: TypingSignalMode,
    /// Reconnection attempts before giving up (unlimited when absent)
    pub max_reconnect_attempts: Option<u32>,
}

fn default_exchange() -> String {
    "llmchat_exchange".to_string()
}

/// OpenAI-compatible completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable containing the API key; local servers need none
    pub api_key_env: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_system_prompt() -> String {
    "You are a friendly participant in a group chat. Reply briefly and naturally.".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoReplySection {
    #[serde(default = "default_auto_reply_enabled")]
    pub enabled: bool,
    /// Pause between announcing typing and calling the LLM
    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
    /// Most recent history entries sent to the LLM
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_auto_reply_enabled() -> bool {
    true
}

fn default_typing_delay_ms() -> u64 {
    1500
}

fn default_history_limit() -> usize {
    16
}

impl Default for AutoReplySection {
    fn default() -> Self {
        Self {
            enabled: default_auto_reply_enabled(),
            typing_delay_ms: default_typing_delay_ms(),
            history_limit: default_history_limit(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("No config file found (tried {0})")]
    NotFound(String),
    #[error("Invalid session name: {0}")]
    InvalidName(String),
    #[error("Invalid exchange name: {0}")]
    InvalidExchange(String),
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChatConfig {
    /// Defaults for everything but the identity and the broker
    pub fn new(name: impl Into<String>, broker_url: impl Into<String>) -> Self {
        Self {
            session: SessionSection { name: name.into() },
            broker: BrokerSection {
                broker_url: broker_url.into(),
                exchange: default_exchange(),
                username_env: None,
                password_env: None,
                typing_signal: TypingSignalMode::default(),
                max_reconnect_attempts: None,
            },
            llm: LlmSection::default(),
            auto_reply: AutoReplySection::default(),
        }
    }

    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_session_name(&self.session.name)?;

        validate_exchange_name(&self.broker.exchange)
            .map_err(|e| ConfigError::InvalidExchange(format!("'{}': {e}", self.broker.exchange)))?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidConfig(format!(
                "temperature {} must be between 0.0 and 2.0",
                self.llm.temperature
            )));
        }

        if self.auto_reply.history_limit == 0 {
            return Err(ConfigError::InvalidConfig(
                "history_limit must be greater than 0".to_string(),
            ));
        }

        if self.broker.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_reconnect_attempts must be greater than 0 or omitted for unlimited"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Override one user-facing setting by its dotted key, re-validating the result
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut updated = self.clone();
        match key {
            "session.name" => updated.session.name = value.trim().to_string(),
            "broker.exchange" => updated.broker.exchange = value.trim().to_string(),
            "llm.model" => updated.llm.model = value.trim().to_string(),
            other => return Err(ConfigError::UnknownSetting(other.to_string())),
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Fanout topic for the configured exchange
    pub fn room_topic(&self) -> String {
        room_topic(&self.broker.exchange)
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get broker username from environment variable
    pub fn get_broker_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get broker password from environment variable
    pub fn get_broker_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Option<String> {
        Self::get_env_var_optional(self.llm.api_key_env.as_ref())
    }
}

/// Settings that `apply_setting` understands
pub const USER_SETTINGS: &[&str] = &["session.name", "broker.exchange", "llm.model"];

/// Resolve the config file: an explicit path, else the first default that exists
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .ok_or_else(|| ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))
}

fn validate_session_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidName(
            "session name must not be blank".to_string(),
        ));
    }

    if name.chars().any(char::is_control) {
        return Err(ConfigError::InvalidName(format!(
            "'{}' contains control characters",
            name.escape_default()
        )));
    }

    Ok(())
}
