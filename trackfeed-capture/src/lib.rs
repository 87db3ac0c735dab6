//! trackfeed‑capture
//!
//! Multi-source connection management and message fan-in.
//!
//! A [`CaptureSupervisor`] runs one [`SourceWorker`] per configured feed
//! address. Each worker keeps its source connected with an unbounded
//! fixed-delay retry loop, drops connections that go quiet, and pushes every
//! read onto the shared bounded bus. Stopping the supervisor force-closes live
//! connections, joins all workers and then closes the bus.

pub mod error;
pub mod outage;
pub mod policy;
pub mod registry;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use error::CaptureError;
pub use outage::{OutageThresholds, Reconnect};
pub use policy::CapturePolicy;
pub use registry::{ConnectionRegistry, SourceKey};
pub use supervisor::CaptureSupervisor;
pub use transport::{Connection, Dialer, StreamTuning, TcpDialer};
pub use worker::{LinkState, SourceWorker, WorkerContext};
