//! Inbound message normalization
//!
//! Every delivery on the room passes through [`MessageDecoder`], which leans on
//! three pure helpers: alias-tolerant field lookup, LLM artifact cleaning and
//! `"Name: message"` splitting.

pub mod cleaner;
pub mod decoder;
pub mod fields;
pub mod plain_text;

pub use cleaner::clean;
pub use decoder::{DecodeError, DecodeOutcome, DropReason, MessageDecoder};
pub use fields::{extract_field, find_key};
pub use plain_text::{split_plain_text, SENDER_PREFIX_WINDOW};
