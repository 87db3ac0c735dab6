//! Bounded message bus shared by every source worker.
//!
//! The bus is a multi-producer / single-consumer FIFO over a bounded tokio
//! channel. Producers experience real backpressure: a full bus blocks the
//! sender rather than dropping messages. Blocking sends race the shared stop
//! signal so that shutdown can never park a producer forever.
//!
//! The bus keeps one sender of its own. [`MessageBus::close`] drops it; once
//! every producer handle is gone as well, receivers drain what is still
//! buffered and then observe end-of-stream.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::BusError;
use crate::message::Message;

/// Capacity used when none is configured.
pub const DEFAULT_BUS_CAPACITY: usize = 1000;

/// Outcome of a stop-aware delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message is queued.
    Delivered,
    /// The stop signal fired while the bus was full; the message was dropped.
    Stopped,
    /// Every receiver is gone.
    Closed,
}

pub struct MessageBus {
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    stream: MessageStream,
    capacity: usize,
}

impl MessageBus {
    /// Creates a bus holding at most `capacity` undelivered messages.
    pub fn with_capacity(capacity: usize) -> Result<Self, BusError> {
        if capacity == 0 {
            return Err(BusError::InvalidCapacity(capacity));
        }

        Ok(Self::build(capacity))
    }

    fn build(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: Mutex::new(Some(tx)),
            stream: MessageStream {
                inner: Arc::new(tokio::sync::Mutex::new(rx)),
            },
            capacity,
        }
    }

    /// Returns a new producer handle, or [`BusError::Closed`] once the bus is closed.
    pub fn sender(&self) -> Result<BusSender, BusError> {
        self.sender
            .lock()
            .as_ref()
            .map(|inner| BusSender {
                inner: inner.clone(),
            })
            .ok_or(BusError::Closed)
    }

    /// Receive-only handle; valid before, during and after capture.
    #[inline]
    pub fn stream(&self) -> MessageStream {
        self.stream.clone()
    }

    /// Drops the bus-owned sender. Returns `false` if the bus was already closed.
    pub fn close(&self) -> bool {
        let closed = self.sender.lock().take().is_some();
        if closed {
            trace!("message bus closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::build(DEFAULT_BUS_CAPACITY)
    }
}

/// Producer side of the bus, one clone per worker.
#[derive(Clone, Debug)]
pub struct BusSender {
    inner: mpsc::Sender<Message>,
}

impl BusSender {
    /// Queues `message`, waiting for room while the bus is full.
    ///
    /// Room is taken immediately when available. Otherwise the wait is
    /// abandoned as soon as `stop` fires, and the message is discarded.
    pub async fn deliver(&self, message: Message, stop: &CancellationToken) -> Delivery {
        let message = match self.inner.try_send(message) {
            Ok(()) => return Delivery::Delivered,
            Err(TrySendError::Closed(_)) => return Delivery::Closed,
            Err(TrySendError::Full(message)) => message,
        };

        trace!(source = %message.source, "message bus full, waiting for capacity");
        tokio::select! {
            biased;
            _ = stop.cancelled() => Delivery::Stopped,
            sent = self.inner.send(message) => match sent {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
        }
    }
}

/// Consumer side of the bus.
///
/// Clones share one underlying receiver, so the bus keeps exactly one
/// logical consumer no matter how many handles are handed out.
#[derive(Clone, Debug)]
pub struct MessageStream {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
}

impl MessageStream {
    /// Next message in FIFO order, or `None` once the bus is closed and drained.
    pub async fn recv(&self) -> Option<Message> {
        self.inner.lock().await.recv().await
    }

    /// Non-blocking receive. Returns `None` when empty or when another handle
    /// is currently receiving.
    pub fn try_recv(&self) -> Option<Message> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }
}
