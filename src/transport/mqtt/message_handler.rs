//! Pure message routing and payload building for MQTT events
//!
//! Incoming publishes become [`InboundDelivery`] values (body plus user
//! properties as headers); outgoing chat and typing signals become payloads
//! and publish properties.

use super::connection::MqttError;
use crate::config::TypingSignalMode;
use crate::protocol::{
    typing_headers, ChatEnvelope, DecodedEvent, InboundDelivery, IncomingMessage, TypingEnvelope,
    TypingSignal,
};
use rumqttc::v5::mqttbytes::v5::{Packet, Publish, PublishProperties, SubscribeReasonCode};
use rumqttc::v5::{mqttbytes::QoS, Event};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Return code recorded for a rejected subscription
const SUBSCRIPTION_REJECTED: u8 = 0x80;

/// Kinds of outbound publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishKind {
    Message,
    Typing,
}

/// A ready-to-send publish: body and optional user properties
#[derive(Debug, Clone)]
pub struct OutboundPublish {
    pub payload: Vec<u8>,
    pub properties: PublishProperties,
    pub qos: QoS,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Determine if message should be processed based on topic and retain flag
    pub fn should_process_message(topic: &str, retain: bool, expected_topic: &str) -> bool {
        if retain {
            debug!("Ignoring retained message on topic: {}", topic);
            return false;
        }

        if topic != expected_topic {
            debug!("Topic mismatch: expected {}, got {}", expected_topic, topic);
            return false;
        }

        true
    }

    /// Body and user properties of a publish as a delivery
    pub fn delivery_from_publish(publish: &Publish) -> InboundDelivery {
        let user_properties = publish
            .properties
            .as_ref()
            .map(|props| props.user_properties.as_slice())
            .unwrap_or_default();

        user_properties.iter().fold(
            InboundDelivery::new(publish.payload.clone()),
            |delivery, (name, value)| delivery.with_header(name.as_str(), value.as_bytes()),
        )
    }

    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    delivery: Self::delivery_from_publish(publish),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback.return_codes.iter().map(Self::return_code).collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    fn return_code(code: &SubscribeReasonCode) -> u8 {
        match code {
            SubscribeReasonCode::Success(qos) => *qos as u8,
            _ => SUBSCRIPTION_REJECTED,
        }
    }

    /// Validate subscription success from SubAck
    pub fn validate_subscription_success(return_codes: &[u8]) -> Result<(), String> {
        if return_codes.iter().any(|&code| code >= SUBSCRIPTION_REJECTED) {
            Err(format!(
                "Subscription failed with return codes: {return_codes:?}"
            ))
        } else {
            Ok(())
        }
    }

    /// Chat messages must arrive; typing signals are disposable
    pub fn determine_qos_level(kind: PublishKind) -> QoS {
        match kind {
            PublishKind::Message => QoS::AtLeastOnce,
            PublishKind::Typing => QoS::AtMostOnce,
        }
    }

    /// Build a chat message publish
    pub fn build_message_publish(sender: &str, text: &str) -> Result<OutboundPublish, MqttError> {
        let payload = serde_json::to_vec(&ChatEnvelope::new(sender, text))
            .map_err(MqttError::SerializationError)?;

        Ok(OutboundPublish {
            payload,
            properties: PublishProperties::default(),
            qos: Self::determine_qos_level(PublishKind::Message),
        })
    }

    /// Build a typing publish in the configured wire form
    pub fn build_typing_publish(
        sender: &str,
        is_typing: bool,
        mode: TypingSignalMode,
    ) -> Result<OutboundPublish, MqttError> {
        let (payload, properties) = match mode {
            TypingSignalMode::Headers => (
                Vec::new(),
                PublishProperties {
                    user_properties: typing_headers(sender, is_typing),
                    ..Default::default()
                },
            ),
            TypingSignalMode::Document => (
                serde_json::to_vec(&TypingEnvelope::new(sender, is_typing))
                    .map_err(MqttError::SerializationError)?,
                PublishProperties::default(),
            ),
        };

        Ok(OutboundPublish {
            payload,
            properties,
            qos: Self::determine_qos_level(PublishKind::Typing),
        })
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        delivery: InboundDelivery,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed with return codes
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Hands decoded events to the session's channels
#[derive(Debug, Clone, Default)]
pub struct MessageForwarder {
    message_sender: Option<mpsc::Sender<IncomingMessage>>,
    typing_sender: Option<mpsc::Sender<TypingSignal>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_senders(
        &mut self,
        messages: mpsc::Sender<IncomingMessage>,
        typing: mpsc::Sender<TypingSignal>,
    ) {
        self.message_sender = Some(messages);
        self.typing_sender = Some(typing);
    }

    pub fn has_senders(&self) -> bool {
        self.message_sender.is_some() && self.typing_sender.is_some()
    }

    /// Forward a decoded event to the matching channel
    pub async fn forward(&self, event: DecodedEvent) -> Result<(), String> {
        match event {
            DecodedEvent::Message(message) => match &self.message_sender {
                Some(sender) => sender
                    .send(message)
                    .await
                    .map_err(|e| format!("Failed to forward message: {e}")),
                None => {
                    warn!("Received chat message but no message sender configured - dropped");
                    Err("No message sender configured".to_string())
                }
            },
            DecodedEvent::Typing(signal) => match &self.typing_sender {
                Some(sender) => sender
                    .send(signal)
                    .await
                    .map_err(|e| format!("Failed to forward typing signal: {e}")),
                None => {
                    debug!("Received typing signal but no typing sender configured - dropped");
                    Err("No typing sender configured".to_string())
                }
            },
        }
    }
}
