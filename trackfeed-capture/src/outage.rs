//! Outage bookkeeping and reconnect classification.
//!
//! A worker records the instant its link went down and, on the next successful
//! dial, classifies how long the source was gone. The classification only
//! drives diagnostics.

use std::time::Duration;

use tokio::time::Instant;

/// Boundaries between silent, hiccup and reestablished reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutageThresholds {
    /// Outages shorter than this are not reported.
    pub hiccup_min: Duration,
    /// Outages at least this long are reported as reestablished.
    pub reestablished_after: Duration,
}

impl Default for OutageThresholds {
    fn default() -> Self {
        Self {
            hiccup_min: Duration::from_millis(100),
            reestablished_after: Duration::from_secs(10),
        }
    }
}

impl OutageThresholds {
    pub fn classify(&self, elapsed: Duration) -> Reconnect {
        if elapsed >= self.reestablished_after {
            Reconnect::Reestablished(elapsed)
        } else if elapsed >= self.hiccup_min {
            Reconnect::Hiccup(elapsed)
        } else {
            Reconnect::Quick(elapsed)
        }
    }
}

/// How a successful dial relates to the source's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// First connection since the worker started.
    First,
    /// Back before the hiccup threshold; not reported.
    Quick(Duration),
    Hiccup(Duration),
    Reestablished(Duration),
}

#[derive(Debug, Default)]
pub struct OutageTracker {
    ever_connected: bool,
    down_since: Option<Instant>,
}

impl OutageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `now` as the start of an outage.
    ///
    /// Only the first call after a connection counts; later failures of the
    /// same outage keep the earliest instant. Returns whether `now` was recorded.
    pub fn mark_down(&mut self, now: Instant) -> bool {
        if self.ever_connected && self.down_since.is_none() {
            self.down_since = Some(now);
            true
        } else {
            false
        }
    }

    /// Closes any recorded outage and classifies it.
    pub fn mark_up(&mut self, now: Instant, thresholds: &OutageThresholds) -> Reconnect {
        if !self.ever_connected {
            self.ever_connected = true;
            self.down_since = None;
            return Reconnect::First;
        }

        let elapsed = self
            .down_since
            .take()
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or(Duration::ZERO);
        thresholds.classify(elapsed)
    }

    pub fn down_since(&self) -> Option<Instant> {
        self.down_since
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }
}
