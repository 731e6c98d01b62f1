//! MQTT room gateway
//!
//! The room is one MQTT v5 topic (`/relay/{exchange}`) that every participant
//! publishes to and subscribes on. Transport headers travel as user properties.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, options and topic construction
//! - [`message_handler`] - Pure event routing and publish payload building
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`client`] - Impure I/O: event loop supervisor, publishing, shutdown
//!
//! # Usage
//!
//! ```rust,no_run
//! use relaychat::config::{BrokerSection, TypingSignalMode};
//! use relaychat::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let config = BrokerSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     exchange: "llmchat_exchange".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     typing_signal: TypingSignalMode::Headers,
//!     max_reconnect_attempts: None,
//! };
//!
//! let client = MqttClient::new(config)?;
//! client.connect("Alice").await?;
//! client.publish_message("Alice", "hello room").await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig, TopicBuilder};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler, PublishKind};
