//! LLM provider abstraction
//!
//! The auto-responder talks to an [`LlmProvider`]; the shipped implementation
//! targets OpenAI-compatible servers.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
