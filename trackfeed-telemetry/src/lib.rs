//! # Trackfeed Telemetry
//!
//! Crate for logging and capture metrics.

pub mod logging;
pub mod metrics;

pub use logging::{EventLogger, TelemetryError};
pub use metrics::CaptureMetrics;
