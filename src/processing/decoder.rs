//! Classification of raw room deliveries into chat events
//!
//! One delivery is decoded in isolation, with no state carried between calls:
//!
//! 1. Header-flagged typing signal (`x-msg-type: typing`), body ignored
//! 2. Blank body, dropped
//! 3. Any JSON document: sender/type/content resolved through the alias lists
//! 4. Unparseable text: `"Name: message"` plain text
//!
//! Whatever the shape, a delivery whose sender is the local identity never
//! produces an event, and no input makes decoding fail.

use super::cleaner::clean;
use super::fields::{extract_field, find_key};
use super::plain_text::split_plain_text;
use crate::protocol::{
    DecodedEvent, InboundDelivery, CONTENT_FIELDS, HEADER_IS_TYPING, HEADER_MSG_TYPE,
    HEADER_SENDER, MESSAGE_TYPE, REMOTE_SENDER, SENDER_FIELDS, TYPING_TYPE,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a delivery produced no event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Empty or whitespace-only body
    Blank,
    /// Sender is the local participant
    SelfEcho,
    /// Nothing left after artifact cleaning
    EmptyContent,
}

/// Result of classifying one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Decoded through the normal pipeline
    Event(DecodedEvent),
    /// Surfaced by the catch-all fallback after a decode error
    Recovered(DecodedEvent),
    Dropped(DropReason),
}

impl DecodeOutcome {
    pub fn into_event(self) -> Option<DecodedEvent> {
        match self {
            Self::Event(event) | Self::Recovered(event) => Some(event),
            Self::Dropped(_) => None,
        }
    }
}

/// Failures inside the pipeline; these never leave the decoder
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Stateless decoder bound to the local session identity
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    identity: String,
}

impl MessageDecoder {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Case-insensitive comparison against the local identity, ignoring
    /// surrounding whitespace on either side
    pub fn is_self(&self, sender: &str) -> bool {
        sender.trim().to_lowercase() == self.identity.trim().to_lowercase()
    }

    /// Decode one delivery into at most one event.
    pub fn decode(&self, delivery: &InboundDelivery) -> Option<DecodedEvent> {
        self.classify(delivery).into_event()
    }

    /// Decode one delivery, keeping the reason when nothing is emitted.
    pub fn classify(&self, delivery: &InboundDelivery) -> DecodeOutcome {
        match self.try_decode(delivery) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    error = %e,
                    bytes = delivery.payload.len(),
                    "Decode failed, surfacing raw body"
                );
                self.fallback(delivery)
            }
        }
    }

    fn try_decode(&self, delivery: &InboundDelivery) -> Result<DecodeOutcome, DecodeError> {
        if Self::is_header_typing(delivery) {
            return Ok(self.decode_header_typing(delivery));
        }

        let body = std::str::from_utf8(&delivery.payload)?;
        if body.trim().is_empty() {
            debug!("Dropping blank delivery");
            return Ok(DecodeOutcome::Dropped(DropReason::Blank));
        }

        // Any parsed document takes the structured path; non-objects carry no fields
        match serde_json::from_str::<Value>(body) {
            Ok(document) => Ok(self.decode_document(&document, body)),
            Err(_) => Ok(self.decode_plain_text(body)),
        }
    }

    fn is_header_typing(delivery: &InboundDelivery) -> bool {
        delivery
            .header_text(HEADER_MSG_TYPE)
            .is_some_and(|kind| kind.eq_ignore_ascii_case(TYPING_TYPE))
    }

    fn decode_header_typing(&self, delivery: &InboundDelivery) -> DecodeOutcome {
        let sender = delivery
            .header_text(HEADER_SENDER)
            .filter(|sender| !sender.is_empty())
            .unwrap_or_else(|| REMOTE_SENDER.to_string());
        let is_typing = delivery
            .header_text(HEADER_IS_TYPING)
            .and_then(|flag| parse_flag(&flag))
            .unwrap_or(false);

        self.emit(DecodedEvent::typing(sender, is_typing))
    }

    fn decode_document(&self, document: &Value, body: &str) -> DecodeOutcome {
        let sender = extract_field(document, SENDER_FIELDS)
            .map(|sender| sender.trim().to_string())
            .filter(|sender| !sender.is_empty())
            .unwrap_or_else(|| REMOTE_SENDER.to_string());

        if self.is_self(&sender) {
            debug!(sender = %sender, "Suppressing self-echo");
            return DecodeOutcome::Dropped(DropReason::SelfEcho);
        }

        let kind = extract_field(document, &["type"]).unwrap_or_else(|| MESSAGE_TYPE.to_string());
        if kind.trim().eq_ignore_ascii_case(TYPING_TYPE) {
            if let Some(is_typing) = typing_flag(document) {
                return DecodeOutcome::Event(DecodedEvent::typing(sender, is_typing));
            }
        }

        let content = extract_field(document, CONTENT_FIELDS).unwrap_or_else(|| body.to_string());
        self.message_outcome(sender, &content)
    }

    fn decode_plain_text(&self, body: &str) -> DecodeOutcome {
        let (sender, content) = split_plain_text(body);
        self.message_outcome(sender, &content)
    }

    fn message_outcome(&self, sender: String, content: &str) -> DecodeOutcome {
        let content = clean(content);
        if content.is_empty() {
            debug!(sender = %sender, "Dropping message with no content after cleaning");
            return DecodeOutcome::Dropped(DropReason::EmptyContent);
        }

        self.emit(DecodedEvent::message(sender, content))
    }

    fn emit(&self, event: DecodedEvent) -> DecodeOutcome {
        if self.is_self(event.sender()) {
            debug!(sender = %event.sender(), "Suppressing self-echo");
            DecodeOutcome::Dropped(DropReason::SelfEcho)
        } else {
            DecodeOutcome::Event(event)
        }
    }

    fn fallback(&self, delivery: &InboundDelivery) -> DecodeOutcome {
        let raw = String::from_utf8_lossy(&delivery.payload);
        let raw = raw.trim();

        if raw.is_empty() {
            DecodeOutcome::Dropped(DropReason::Blank)
        } else if self.is_self(REMOTE_SENDER) {
            DecodeOutcome::Dropped(DropReason::SelfEcho)
        } else {
            DecodeOutcome::Recovered(DecodedEvent::message(REMOTE_SENDER, raw))
        }
    }
}

/// `isTyping` as a JSON boolean, or the strings `"true"`/`"false"`
fn typing_flag(document: &Value) -> Option<bool> {
    let object = document.as_object()?;
    match find_key(object, "isTyping")? {
        Value::Bool(flag) => Some(*flag),
        Value::String(flag) => parse_flag(flag),
        _ => None,
    }
}

fn parse_flag(flag: &str) -> Option<bool> {
    match flag.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
