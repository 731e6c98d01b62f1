//! Relay wire protocol
//!
//! Outbound documents, transport header names, field alias lists and
//! room topic helpers.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
