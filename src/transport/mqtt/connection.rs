//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! configuration handling, and topic construction.

use crate::config::BrokerSection;
use crate::protocol::room_topic;
use rumqttc::Transport as RumqttcTransport;
use rumqttc::v5::MqttOptions;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Default backoff with the attempt limit taken from the broker section
    pub fn from_broker(config: &BrokerSection) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            ..Self::default()
        }
    }

    /// Calculate the maximum total time for all reconnection attempts
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain at 250ms forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Build a client id that is unique per connection: `relaychat-{identity}-{uuid}`
///
/// Characters outside `[A-Za-z0-9_-]` are replaced so any display name is usable.
pub fn build_client_id(identity: &str) -> String {
    let slug: String = identity
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("relaychat-{slug}-{}", Uuid::new_v4().simple())
}

/// Pure function to configure MQTT options from config
///
/// Every call yields a fresh client id with a clean session, so the broker
/// never replays a previous connection's subscription.
pub fn configure_mqtt_options(
    identity: &str,
    config: &BrokerSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let scheme = url.scheme();
    if scheme != "mqtt" && scheme != "mqtts" && scheme != "tcp" {
        return Err(MqttError::InvalidBrokerUrl(config.broker_url.clone()));
    }

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if scheme == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(build_client_id(identity), host, port);
    mqtt_options.set_clean_start(true);

    if scheme == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(60));

    // Broker default of 10KB is too small for long LLM replies
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

/// Topic construction for the shared room
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build room topic: `/relay/{exchange}`
    pub fn room_topic(exchange: &str) -> String {
        room_topic(exchange)
    }
}
