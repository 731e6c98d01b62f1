//! Chat session and auto-responder
//!
//! [`ChatSession`] ties a [`Transport`](crate::transport::Transport) to the
//! in-memory transcript; [`ResponseOrchestrator`] answers incoming messages
//! through an [`LlmResponder`] when auto-reply is on.

pub mod events;
pub mod history;
pub mod orchestrator;
pub mod responder;
pub mod session;

pub use events::{SessionEvent, Transcript};
pub use history::{ChatEntry, ConversationHistory, EntryOrigin, SYSTEM_SENDER};
pub use orchestrator::{CycleOutcome, ResponseOrchestrator};
pub use responder::{LlmResponder, ReplyOutcome, EMPTY_REPLY, LLM_ERROR_PREFIX};
pub use session::ChatSession;
