//! # trackfeed-core
//!
//! Shared types for the fan-in path: the [`Message`] value produced by every
//! source worker and the bounded [`MessageBus`] that carries it to the single
//! downstream consumer.
//!
//! ### Key Submodules:
//! - `message`: immutable record of one read from one source
//! - `bus`: bounded multi-producer / single-consumer queue with stop-aware delivery

pub mod bus;
pub mod error;
pub mod message;

pub use bus::{BusSender, Delivery, MessageBus, MessageStream, DEFAULT_BUS_CAPACITY};
pub use error::BusError;
pub use message::Message;
