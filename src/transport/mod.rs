//! Transport layer for room communication
//!
//! This module provides the transport abstraction the chat session talks to,
//! and the MQTT implementation of the shared room.

use crate::protocol::{IncomingMessage, TypingSignal};
use tokio::sync::mpsc;

pub mod mqtt;

/// Transport trait for joining a shared room
///
/// This trait provides an abstraction over the broker connection
/// to enable dependency injection and testing. Methods take `&self` so a
/// single transport can be shared between the session and its reply task.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and join the room as `identity`
    async fn connect(&self, identity: &str) -> Result<(), Self::Error>;

    /// Leave the room and close the broker connection
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Publish a chat message document to the room
    async fn publish_message(&self, sender: &str, text: &str) -> Result<(), Self::Error>;

    /// Publish a typing signal; does nothing while disconnected
    async fn publish_typing(&self, sender: &str, is_typing: bool) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<crate::transport::mqtt::ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;

    /// Set the channels decoded room events are forwarded to
    fn set_event_senders(
        &self,
        messages: mpsc::Sender<IncomingMessage>,
        typing: mpsc::Sender<TypingSignal>,
    );
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
