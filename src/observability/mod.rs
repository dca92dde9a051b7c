//! Structured logging and per-bridge metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{BridgeMetrics, DownlinkMetrics, MetricsSnapshot, UplinkMetrics};

pub use logging::{dispatch_span, drain_span};
