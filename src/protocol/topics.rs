//! Room topic construction and exchange name validation
//!
//! A relay room is a single MQTT topic that every participant both publishes
//! to and subscribes to, which gives fanout semantics on a plain broker.

use thiserror::Error;

/// Root prefix shared by all relay rooms
pub const ROOM_TOPIC_PREFIX: &str = "/relay";

pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Build the fanout topic for an exchange: `/relay/{exchange}`
pub fn room_topic(exchange: &str) -> String {
    canonicalize_topic(&format!("{ROOM_TOPIC_PREFIX}/{exchange}"))
}

/// Exchange names become a single topic level, so wildcards and separators are rejected.
pub fn validate_exchange_name(exchange: &str) -> Result<(), ValidationError> {
    if exchange.is_empty() {
        return Err(ValidationError::EmptyExchangeName);
    }

    for ch in exchange.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidExchangeChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for room naming
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Exchange name cannot be empty")]
    EmptyExchangeName,
    #[error("Exchange name contains invalid character: '{0}'")]
    InvalidExchangeChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn canonicalize_topic_is_idempotent(topic in ".*") {
            let first = canonicalize_topic(&topic);
            let second = canonicalize_topic(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn canonicalize_topic_has_no_empty_levels(topic in ".*") {
            let result = canonicalize_topic(&topic);
            prop_assert!(result.starts_with('/'));
            prop_assert!(!result.contains("//"), "No consecutive slashes allowed: {}", result);
            if result.len() > 1 {
                prop_assert!(!result.ends_with('/'));
            }
        }

        #[test]
        fn valid_exchange_names_pass(name in "[a-zA-Z0-9._-]{1,64}") {
            prop_assert!(validate_exchange_name(&name).is_ok());
            prop_assert_eq!(room_topic(&name), format!("/relay/{name}"));
        }

        #[test]
        fn exchange_names_with_separators_fail(name in "[^a-zA-Z0-9._-]{1}[a-zA-Z0-9._-]*") {
            prop_assert!(validate_exchange_name(&name).is_err());
        }
    }

    #[test]
    fn test_canonicalize_edge_cases() {
        assert_eq!(canonicalize_topic(""), "/");
        assert_eq!(canonicalize_topic("//"), "/");
        assert_eq!(canonicalize_topic("relay/room"), "/relay/room");
        assert_eq!(canonicalize_topic("//relay//room//"), "/relay/room");
    }

    #[test]
    fn test_room_topic() {
        assert_eq!(room_topic("llmchat_exchange"), "/relay/llmchat_exchange");
        assert_eq!(room_topic("lobby"), "/relay/lobby");
    }

    #[test]
    fn test_exchange_validation_errors() {
        assert_eq!(
            validate_exchange_name(""),
            Err(ValidationError::EmptyExchangeName)
        );
        assert_eq!(
            validate_exchange_name("room/sub"),
            Err(ValidationError::InvalidExchangeChar('/'))
        );
        assert_eq!(
            validate_exchange_name("room#"),
            Err(ValidationError::InvalidExchangeChar('#'))
        );
        assert_eq!(
            validate_exchange_name("my room"),
            Err(ValidationError::InvalidExchangeChar(' '))
        );
    }
}
