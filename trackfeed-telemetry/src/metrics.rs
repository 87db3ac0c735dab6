//! ## trackfeed-telemetry::metrics
//! **Prometheus counters for the capture path**
//!
//! Counters are labelled by source address. Duplicate addresses share a
//! series.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct CaptureMetrics {
    pub registry: Registry,
    pub messages: IntCounterVec,
    pub bytes: IntCounterVec,
    pub connects: IntCounterVec,
    pub disconnects: IntCounterVec,
    pub dial_failures: IntCounterVec,
    pub active_connections: IntGauge,
}

impl CaptureMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages = IntCounterVec::new(
            Opts::new("trackfeed_messages_total", "Messages delivered to the bus"),
            &["source"],
        )?;
        let bytes = IntCounterVec::new(
            Opts::new("trackfeed_bytes_total", "Payload bytes delivered to the bus"),
            &["source"],
        )?;
        let connects = IntCounterVec::new(
            Opts::new("trackfeed_connects_total", "Successful dials"),
            &["source"],
        )?;
        let disconnects = IntCounterVec::new(
            Opts::new("trackfeed_disconnects_total", "Connections torn down"),
            &["source"],
        )?;
        let dial_failures = IntCounterVec::new(
            Opts::new("trackfeed_dial_failures_total", "Failed dial attempts"),
            &["source"],
        )?;
        let active_connections = IntGauge::new(
            "trackfeed_active_connections",
            "Connections currently registered",
        )?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(bytes.clone()))?;
        registry.register(Box::new(connects.clone()))?;
        registry.register(Box::new(disconnects.clone()))?;
        registry.register(Box::new(dial_failures.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            registry,
            messages,
            bytes,
            connects,
            disconnects,
            dial_failures,
            active_connections,
        })
    }

    #[inline]
    pub fn record_message(&self, source: &str, len: usize) {
        self.messages.with_label_values(&[source]).inc();
        self.bytes.with_label_values(&[source]).inc_by(len as u64);
    }

    pub fn record_connect(&self, source: &str) {
        self.connects.with_label_values(&[source]).inc();
        self.active_connections.inc();
    }

    pub fn record_disconnect(&self, source: &str) {
        self.disconnects.with_label_values(&[source]).inc();
        self.active_connections.dec();
    }

    pub fn record_dial_failure(&self, source: &str) {
        self.dial_failures.with_label_values(&[source]).inc();
    }

    pub fn messages_for(&self, source: &str) -> u64 {
        self.messages.with_label_values(&[source]).get()
    }

    /// Renders every series in the text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
