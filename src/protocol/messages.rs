//! Wire documents, transport headers and decoded events for the chat relay
//!
//! Producers on the room are not all this client: older revisions, other tools and
//! hand-typed `mosquitto_pub` lines all share the topic. The outbound documents here
//! are what we publish; inbound payloads are interpreted by [`crate::processing`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header carrying the out-of-band message kind
pub const HEADER_MSG_TYPE: &str = "x-msg-type";
/// Header carrying the sender of a header-only typing signal
pub const HEADER_SENDER: &str = "x-sender";
/// Header carrying `"true"`/`"false"` for a header-only typing signal
pub const HEADER_IS_TYPING: &str = "x-is-typing";

pub const MESSAGE_TYPE: &str = "message";
pub const TYPING_TYPE: &str = "typing";

/// Sender used when a structured delivery or typing signal names nobody
pub const REMOTE_SENDER: &str = "Remote";
/// Sender used when a plain-text line has no `"name: "` prefix
pub const PLAIN_TEXT_SENDER: &str = "Remoto";

/// Accepted keys for the sender of a structured document, highest precedence first
pub const SENDER_FIELDS: &[&str] = &["sender", "user", "username", "name", "from", "author"];

/// Accepted keys for the text of a structured document, highest precedence first
pub const CONTENT_FIELDS: &[&str] = &["message", "content", "text", "msg", "body", "response"];

/// Chat message document as published on the room
///
/// # Examples
/// ```
/// use relaychat::protocol::ChatEnvelope;
///
/// let envelope = ChatEnvelope::new("Alice", "hello there");
/// let json = serde_json::to_string(&envelope).unwrap();
/// assert!(json.contains("\"type\":\"message\""));
/// assert!(json.contains("\"sender\":\"Alice\""));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub sender: String,
    pub message: String,
    /// ISO-8601 publish time
    pub timestamp: DateTime<Utc>,
}

impl ChatEnvelope {
    pub fn new(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            msg_type: MESSAGE_TYPE.to_string(),
            sender: sender.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Typing document, the body form of a typing signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub sender: String,
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
}

impl TypingEnvelope {
    pub fn new(sender: impl Into<String>, is_typing: bool) -> Self {
        Self {
            msg_type: TYPING_TYPE.to_string(),
            sender: sender.into(),
            is_typing,
        }
    }
}

/// Header set for a body-less typing signal
pub fn typing_headers(sender: &str, is_typing: bool) -> Vec<(String, String)> {
    vec![
        (HEADER_MSG_TYPE.to_string(), TYPING_TYPE.to_string()),
        (HEADER_SENDER.to_string(), sender.to_string()),
        (HEADER_IS_TYPING.to_string(), is_typing.to_string()),
    ]
}

/// One raw delivery from the broker: body bytes plus transport headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundDelivery {
    pub payload: Bytes,
    pub headers: HashMap<String, Vec<u8>>,
}

impl InboundDelivery {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header lookup by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }

    /// Header value as text, replacing invalid UTF-8
    pub fn header_text(&self, name: &str) -> Option<String> {
        self.header(name)
            .map(|value| String::from_utf8_lossy(value).trim().to_string())
    }
}

/// A chat line received from another participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender: String,
    pub content: String,
}

/// A typing indicator change from another participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub sender: String,
    pub is_typing: bool,
}

/// Normalized result of decoding one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Message(IncomingMessage),
    Typing(TypingSignal),
}

impl DecodedEvent {
    pub fn message(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Message(IncomingMessage {
            sender: sender.into(),
            content: content.into(),
        })
    }

    pub fn typing(sender: impl Into<String>, is_typing: bool) -> Self {
        Self::Typing(TypingSignal {
            sender: sender.into(),
            is_typing,
        })
    }

    pub fn sender(&self) -> &str {
        match self {
            Self::Message(message) => &message.sender,
            Self::Typing(signal) => &signal.sender,
        }
    }
}
