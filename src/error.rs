//! Session-level error type
//!
//! Layer errors (`ConfigError`, `MqttError`, `LlmError`) convert into
//! [`ChatError`]. Anything shown to the user as a system message goes through
//! [`sanitize_error_message`] first.

use crate::config::ConfigError;
use crate::llm::provider::LlmError;
use crate::transport::mqtt::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for chat session operations
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Preference store error: {message}")]
    Preferences { message: String },

    #[error("Not connected to the room")]
    NotConnected,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ChatError {
    pub fn preferences<S: Into<String>>(message: S) -> Self {
        Self::Preferences {
            message: message.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Text safe to display in the transcript
    pub fn user_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact credentials and sensitive paths, and cap the length at 500 bytes
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for chat session operations
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ChatError::NotConnected.to_string(), "Not connected to the room");
        assert_eq!(
            ChatError::invalid_input("empty message").to_string(),
            "Invalid input: empty message"
        );
        assert_eq!(
            ChatError::preferences("locked").to_string(),
            "Preference store error: locked"
        );
        assert_eq!(ChatError::internal("oops").to_string(), "Internal error: oops");
    }

    #[test]
    fn test_layer_errors_convert() {
        let error: ChatError = ConfigError::InvalidName("blank".to_string()).into();
        assert!(matches!(error, ChatError::Config(_)));

        let error: ChatError = LlmError::NotConfigured("no model".to_string()).into();
        assert!(matches!(error, ChatError::Llm(_)));

        let error: ChatError = MqttError::InvalidBrokerUrl("nope".to_string()).into();
        assert!(matches!(error, ChatError::Transport(_)));
    }

    #[test]
    fn test_user_message_is_sanitized() {
        let error = ChatError::internal("Failed to authenticate: password=secret123 token=abc456");
        let shown = error.user_message();

        assert!(!shown.contains("secret123"));
        assert!(!shown.contains("abc456"));
        assert!(shown.contains("password=***"));
        assert!(shown.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"ñ".repeat(400));

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_bytes() {
        let message = "x".repeat(500);
        assert_eq!(sanitize_error_message(&message), message);
    }

    #[test]
    fn test_file_path_redaction() {
        let message = "Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_case_insensitive_and_colons() {
        let sanitized = sanitize_error_message("PASSWORD=secret123 Token: abc api_key=xyz");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}
