//! Logging setup and bridge counters

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LogSettings};
pub use metrics::{BridgeMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{session_span, tick_span};
