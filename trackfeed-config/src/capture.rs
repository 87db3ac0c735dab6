// trackfeed-config/src/capture.rs
//! Feed capture configuration.
//!
//! Defines the set of sources and the timing policy of every source worker:
//! - Reconnect cadence
//! - Read deadline and idle detection
//! - Keepalive tuning
//! - Outage classification thresholds

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Feed capture configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validation::validate_outage_thresholds))]
pub struct CaptureConfig {
    /// Source addresses in `host:port` form. Duplicates are kept.
    #[validate(custom(function = validation::validate_sources))]
    #[serde(default)]
    pub sources: Vec<String>,

    /// Bus capacity in messages.
    #[validate(range(min = 1, max = 1048576))]
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Fixed delay between failed dials (milliseconds).
    #[validate(range(min = 1, max = 3600000))]
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Deadline armed on every read (milliseconds).
    #[validate(range(min = 1, max = 600000))]
    #[serde(default = "default_read_deadline")]
    pub read_deadline_ms: u64,

    /// Silence after which a connection is considered stale (milliseconds).
    #[validate(range(min = 1, max = 3600000))]
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// TCP keepalive probe period (milliseconds).
    #[validate(range(min = 1000, max = 3600000))]
    #[serde(default = "default_keepalive_period")]
    pub keepalive_period_ms: u64,

    /// Disable send coalescing on dialed connections.
    #[serde(default = "default_true")]
    pub nodelay: bool,

    /// Scratch buffer size for each read, in bytes.
    #[validate(range(min = 64, max = 1048576))]
    #[serde(default = "default_read_buffer", deserialize_with = "deserialize_size")]
    pub read_buffer_size: usize,

    /// Shortest outage reported as a hiccup (milliseconds).
    #[serde(default = "default_hiccup_min")]
    pub hiccup_min_ms: u64,

    /// Outages at least this long are reported as reestablished (milliseconds).
    #[serde(default = "default_reestablished_after")]
    pub reestablished_after_ms: u64,
}

fn default_bus_capacity() -> usize {
    1000
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_read_deadline() -> u64 {
    2000
}

fn default_idle_timeout() -> u64 {
    3000
}

fn default_keepalive_period() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_read_buffer() -> usize {
    1024
}

fn default_hiccup_min() -> u64 {
    100
}

fn default_reestablished_after() -> u64 {
    10_000
}

impl CaptureConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn keepalive_period(&self) -> Duration {
        Duration::from_millis(self.keepalive_period_ms)
    }

    pub fn hiccup_min(&self) -> Duration {
        Duration::from_millis(self.hiccup_min_ms)
    }

    pub fn reestablished_after(&self) -> Duration {
        Duration::from_millis(self.reestablished_after_ms)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Num(usize),
    Str(String),
}

/// Custom deserializer to allow human‑friendly sizes (e.g. "4KiB") or direct numbers.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Num(n) => Ok(n),
        SizeValue::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(split);

    let number: f64 = num_part
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    let multiplier = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" | "kib" => 1024.0,
        "mb" | "mib" => 1024.0 * 1024.0,
        other => return Err(format!("unknown size unit '{other}'")),
    };
    Ok((number * multiplier) as usize)
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            bus_capacity: default_bus_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
            read_deadline_ms: default_read_deadline(),
            idle_timeout_ms: default_idle_timeout(),
            keepalive_period_ms: default_keepalive_period(),
            nodelay: default_true(),
            read_buffer_size: default_read_buffer(),
            hiccup_min_ms: default_hiccup_min(),
            reestablished_after_ms: default_reestablished_after(),
        }
    }
}
