//! # Connection registry
//!
//! Tracks the live connection of every source worker so that shutdown can
//! force-close them. The registry never reads or writes on a connection; it
//! only holds the connection's close handle, a cancellation token observed by
//! the owning worker's read loop.
//!
//! ## Rules
//! - Entries are keyed by worker slot, so duplicate addresses never collide
//! - The lock guards only the map and is never held across an `.await`
//! - A [`Registration`] removes its entry on drop, including on panic unwinds

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Identity of one configured source: its position in the source list and its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub slot: usize,
    pub addr: Arc<str>,
}

impl SourceKey {
    pub fn new(slot: usize, addr: Arc<str>) -> Self {
        Self { slot, addr }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.addr, self.slot)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    live: Mutex<HashMap<SourceKey, CancellationToken>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records the close handle of a freshly dialed connection.
    pub fn register(self: &Arc<Self>, key: SourceKey, close: CancellationToken) -> Registration {
        let previous = self.live.lock().insert(key.clone(), close);
        if let Some(stale) = previous {
            // one worker per slot: a leftover entry means its guard leaked
            warn!(source = %key, "replacing stale registry entry");
            stale.cancel();
        }
        trace!(source = %key, "connection registered");

        Registration {
            registry: Arc::clone(self),
            key,
        }
    }

    fn unregister(&self, key: &SourceKey) -> bool {
        let removed = self.live.lock().remove(key).is_some();
        if removed {
            trace!(source = %key, "connection unregistered");
        }
        removed
    }

    /// Force-closes every registered connection. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let live = self.live.lock();
        for close in live.values() {
            close.cancel();
        }
        live.len()
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    /// Sorted addresses of the registered connections.
    pub fn addresses(&self) -> Vec<Arc<str>> {
        let mut addrs: Vec<Arc<str>> = self.live.lock().keys().map(|k| k.addr.clone()).collect();
        addrs.sort_unstable();
        addrs
    }
}

/// Registry entry owned by a connected worker.
#[must_use = "dropping a Registration unregisters the connection"]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    key: SourceKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.key);
    }
}
