//! Message type emitted once per successful read.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One opaque record read from a source, tagged with origin and receipt time.
#[derive(Clone, Debug)]
pub struct Message {
    /// Address of the source the bytes were read from (`host:port`).
    pub source: Arc<str>,

    /// Bytes of exactly one read. Always owned by the message, never a view
    /// into a reused receive buffer.
    pub data: Bytes,

    /// Wall-clock receipt time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Builds a message stamped with the current time.
    #[inline]
    pub fn new(source: Arc<str>, data: Bytes) -> Self {
        Self::at(source, data, Utc::now())
    }

    #[inline]
    pub fn at(source: Arc<str>, data: Bytes, timestamp: DateTime<Utc>) -> Self {
        Self {
            source,
            data,
            timestamp,
        }
    }

    /// Copies `chunk` into a fresh buffer so the caller may reuse its scratch space.
    #[inline]
    pub fn copied_from(source: Arc<str>, chunk: &[u8]) -> Self {
        Self::new(source, Bytes::copy_from_slice(chunk))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
