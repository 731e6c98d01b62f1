//! relaychat - peer-to-peer chat over a fanout MQTT room
//!
//! Every participant publishes to and subscribes on one shared room topic.
//! Producers on that topic are not all alike, so inbound deliveries go through a
//! tolerant decoding pipeline before they reach the chat session, and an optional
//! LLM auto-responder answers incoming messages.
//!
//! # Overview
//!
//! - [`processing`]: field extraction, LLM artifact cleaning, plain-text splitting
//!   and the message decoder
//! - [`transport`]: the room gateway over MQTT v5
//! - [`agent`]: transcript, LLM responder, reply orchestration and the chat session
//! - [`llm`]: OpenAI-compatible completion provider
//! - [`preferences`]: persisted user overrides
//! - [`observability`]: logging, metrics and the health endpoint
//!
//! # Quick Start
//!
//! ```rust
//! use relaychat::processing::MessageDecoder;
//! use relaychat::protocol::{DecodedEvent, InboundDelivery};
//!
//! let decoder = MessageDecoder::new("Alice");
//!
//! // A structured message from another client
//! let delivery = InboundDelivery::new(r#"{"user":"Bob","text":"hello"}"#.as_bytes().to_vec());
//! assert_eq!(decoder.decode(&delivery), Some(DecodedEvent::message("Bob", "hello")));
//!
//! // A header-only typing signal
//! let typing = InboundDelivery::new(Vec::<u8>::new())
//!     .with_header("x-msg-type", "typing")
//!     .with_header("x-sender", "Bob")
//!     .with_header("x-is-typing", "true");
//! assert_eq!(decoder.decode(&typing), Some(DecodedEvent::typing("Bob", true)));
//!
//! // Our own echo never comes back
//! let echo = InboundDelivery::new(r#"{"sender":"alice","message":"hi"}"#.as_bytes().to_vec());
//! assert_eq!(decoder.decode(&echo), None);
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod preferences;
pub mod processing;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use agent::{ChatSession, SessionEvent};
pub use config::*;
pub use error::{ChatError, ChatResult};
pub use processing::MessageDecoder;
pub use protocol::*;
pub use transport::mqtt::MqttClient;
