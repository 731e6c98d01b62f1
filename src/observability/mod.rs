//! Observability for a chat session
//!
//! Structured logging, process-wide metrics and an optional health endpoint.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{decode_span, mqtt_span, reply_span, session_span};
