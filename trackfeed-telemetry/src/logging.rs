//! ## trackfeed-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! `RUST_LOG` wins over the configured level when it is set.

use thiserror::Error;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Global subscriber already installed")]
    AlreadyInstalled,
}

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global fmt subscriber.
    pub fn init(default_level: &str) -> Result<(), TelemetryError> {
        let filter = Self::filter(default_level)?;
        fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(false)
            .with_span_events(FmtSpan::NONE)
            .try_init()
            .map_err(|_| TelemetryError::AlreadyInstalled)
    }

    fn filter(default_level: &str) -> Result<EnvFilter, TelemetryError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(default_level).map_err(|source| TelemetryError::Filter {
                directive: default_level.to_string(),
                source,
            }),
        }
    }
}
