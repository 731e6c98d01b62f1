//! Testing utilities and mock implementations
//!
//! Mock transport and LLM provider for exercising chat sessions without a
//! broker or an LLM server.

pub mod mocks;

pub use mocks::*;
