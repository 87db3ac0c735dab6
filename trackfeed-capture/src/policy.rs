//! Timing and sizing policy shared by every source worker.

use std::time::Duration;

use trackfeed_config::CaptureConfig;
use trackfeed_core::DEFAULT_BUS_CAPACITY;

use crate::error::CaptureError;
use crate::outage::OutageThresholds;

#[derive(Debug, Clone)]
pub struct CapturePolicy {
    pub bus_capacity: usize,
    /// Fixed pause after a failed dial. Retries never stop.
    pub reconnect_delay: Duration,
    /// Deadline armed on every read.
    pub read_deadline: Duration,
    /// Silence that marks a connection stale.
    pub idle_timeout: Duration,
    pub keepalive_period: Duration,
    pub nodelay: bool,
    pub read_buffer_size: usize,
    pub outage: OutageThresholds,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
            reconnect_delay: Duration::from_secs(5),
            read_deadline: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(3),
            keepalive_period: Duration::from_secs(2),
            nodelay: true,
            read_buffer_size: 1024,
            outage: OutageThresholds::default(),
        }
    }
}

impl CapturePolicy {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.read_buffer_size == 0 {
            return Err(CaptureError::InvalidPolicy(
                "read buffer size must be non-zero".into(),
            ));
        }
        if self.read_deadline.is_zero() {
            return Err(CaptureError::InvalidPolicy(
                "read deadline must be non-zero".into(),
            ));
        }
        if self.outage.hiccup_min >= self.outage.reestablished_after {
            return Err(CaptureError::InvalidPolicy(format!(
                "hiccup threshold {:?} must be below reestablished threshold {:?}",
                self.outage.hiccup_min, self.outage.reestablished_after
            )));
        }
        Ok(())
    }
}

impl From<&CaptureConfig> for CapturePolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            bus_capacity: config.bus_capacity,
            reconnect_delay: config.reconnect_delay(),
            read_deadline: config.read_deadline(),
            idle_timeout: config.idle_timeout(),
            keepalive_period: config.keepalive_period(),
            nodelay: config.nodelay,
            read_buffer_size: config.read_buffer_size,
            outage: OutageThresholds {
                hiccup_min: config.hiccup_min(),
                reestablished_after: config.reestablished_after(),
            },
        }
    }
}
