//! # Capture supervisor
//!
//! Owns the configured sources, the message bus, the connection registry and
//! the shared stop signal.
//!
//! ## Lifecycle
//! ```text
//! new() ──► start() ──► spawn one SourceWorker per source
//!                         │
//! stop() ─────────────────┴─► cancel stop token
//!                             ├─► registry.close_all()   (unblocks reads and full-bus sends)
//!                             ├─► join every worker
//!                             └─► bus.close()            (consumers drain, then see end-of-stream)
//! ```
//!
//! ## Rules
//! - `start()` spawns at most once per instance
//! - `stop()` signals shutdown once; every call joins whatever workers remain
//! - the bus ends for consumers only after every worker has exited, even when a
//!   `stop()` future is dropped part way through

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trackfeed_core::{MessageBus, MessageStream};
use trackfeed_telemetry::CaptureMetrics;

use crate::error::CaptureError;
use crate::policy::CapturePolicy;
use crate::registry::{ConnectionRegistry, SourceKey};
use crate::transport::{Dialer, TcpDialer};
use crate::worker::{SourceWorker, WorkerContext};

pub struct CaptureSupervisor<D: Dialer = TcpDialer> {
    sources: Vec<Arc<str>>,
    dialer: Arc<D>,
    policy: Arc<CapturePolicy>,
    bus: MessageBus,
    registry: Arc<ConnectionRegistry>,
    stop: CancellationToken,
    metrics: Option<Arc<CaptureMetrics>>,
    started: AtomicBool,
    stopped: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureSupervisor<TcpDialer> {
    /// TCP supervisor with the default policy. An empty source list is valid.
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::assemble(
            collect_sources(sources),
            TcpDialer,
            CapturePolicy::default(),
            MessageBus::default(),
        )
    }
}

impl<D: Dialer> CaptureSupervisor<D> {
    pub fn with_policy<I, S>(sources: I, dialer: D, policy: CapturePolicy) -> Result<Self, CaptureError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        policy.validate()?;
        let bus = MessageBus::with_capacity(policy.bus_capacity)?;
        Ok(Self::assemble(collect_sources(sources), dialer, policy, bus))
    }

    fn assemble(sources: Vec<Arc<str>>, dialer: D, policy: CapturePolicy, bus: MessageBus) -> Self {
        Self {
            sources,
            dialer: Arc::new(dialer),
            policy: Arc::new(policy),
            bus,
            registry: ConnectionRegistry::new(),
            stop: CancellationToken::new(),
            metrics: None,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Attaches capture counters. Call before `start()`.
    pub fn with_metrics(mut self, metrics: Arc<CaptureMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawns one worker per source and returns without waiting for any dial.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        // held across the checks so a concurrent stop() sees every handle
        let mut workers = self.workers.lock();
        if self.stopped.load(Ordering::Acquire) {
            warn!("capture already stopped, ignoring start");
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("capture already started, ignoring start");
            return;
        }

        let bus = match self.bus.sender() {
            Ok(bus) => bus,
            Err(e) => {
                warn!(error = %e, "cannot start capture");
                return;
            }
        };

        let ctx = WorkerContext {
            dialer: Arc::clone(&self.dialer),
            policy: Arc::clone(&self.policy),
            bus,
            registry: Arc::clone(&self.registry),
            stop: self.stop.clone(),
            metrics: self.metrics.clone(),
        };

        for (slot, addr) in self.sources.iter().enumerate() {
            let worker = SourceWorker::new(SourceKey::new(slot, Arc::clone(addr)), ctx.clone());
            workers.push(tokio::spawn(worker.run()));
        }
        info!(sources = self.sources.len(), "capture started");
    }

    /// Graceful shutdown. Consumers should keep draining `messages()` until it
    /// ends, or producers parked on a full bus only leave through the stop signal.
    ///
    /// Dropping the returned future early still closes the bus; calling
    /// `stop()` again joins the workers that were not joined yet.
    pub async fn stop(&self) {
        let first = {
            let _workers = self.workers.lock();
            !self.stopped.swap(true, Ordering::AcqRel)
        };
        if first {
            self.stop.cancel();
            let closed = self.registry.close_all();
            debug!(closed, "force-closed live connections");
        }

        let _close = CloseOnDrop(&self.bus);
        let mut joined = 0usize;
        while let Some(handle) = self.next_worker() {
            if let Err(e) = handle.await {
                error!(error = %e, "source worker panicked");
            }
            joined += 1;
        }

        self.bus.close();
        if first || joined > 0 {
            info!(workers = joined, "capture stopped");
        } else {
            debug!("capture already stopped");
        }
    }

    fn next_worker(&self) -> Option<JoinHandle<()>> {
        self.workers.lock().pop()
    }

    /// Receive-only handle to the bus; callable at any time.
    pub fn messages(&self) -> MessageStream {
        self.bus.stream()
    }

    pub fn sources(&self) -> &[Arc<str>] {
        &self.sources
    }

    /// Addresses with a live connection right now.
    pub fn active_connections(&self) -> Vec<Arc<str>> {
        self.registry.addresses()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Drops the bus-owned sender when `stop()` returns or is abandoned. Worker
/// senders keep the channel open until each worker exits.
struct CloseOnDrop<'a>(&'a MessageBus);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn collect_sources<I, S>(sources: I) -> Vec<Arc<str>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    sources.into_iter().map(|s| Arc::from(s.into())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_supervisor_starts_and_stops() {
        let supervisor = CaptureSupervisor::new(Vec::<String>::new());
        supervisor.start();
        supervisor.stop().await;
        assert!(supervisor.messages().recv().await.is_none());
    }

    #[tokio::test]
    async fn stop_before_start_completes() {
        let supervisor = CaptureSupervisor::new(["127.0.0.1:1"]);
        tokio::time::timeout(Duration::from_secs(1), supervisor.stop())
            .await
            .unwrap();
        assert!(supervisor.is_stopped());
        assert!(supervisor.messages().recv().await.is_none());

        // no workers appear after the fact
        supervisor.start();
        assert!(supervisor.workers.lock().is_empty());
    }

    #[tokio::test]
    async fn repeated_stop_is_a_no_op() {
        let supervisor = CaptureSupervisor::new(["127.0.0.1:1"]);
        supervisor.start();
        supervisor.stop().await;
        supervisor.stop().await;
        assert!(supervisor.is_stopped());
    }

    #[tokio::test]
    async fn second_start_spawns_nothing() {
        let supervisor = CaptureSupervisor::new(["127.0.0.1:1", "127.0.0.1:1"]);
        supervisor.start();
        supervisor.start();
        assert_eq!(supervisor.workers.lock().len(), 2);
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn abandoned_stop_still_ends_the_stream() {
        let supervisor = CaptureSupervisor::new(["127.0.0.1:1", "127.0.0.1:1"]);
        let stream = supervisor.messages();
        supervisor.start();
        tokio::task::yield_now().await;

        {
            // polled once, then dropped while it waits on a worker
            let stopping = supervisor.stop();
            tokio::pin!(stopping);
            tokio::select! {
                biased;
                _ = &mut stopping => {}
                _ = std::future::ready(()) => {}
            }
        }
        assert!(supervisor.is_stopped());

        let end = tokio::time::timeout(Duration::from_secs(2), stream.recv())
            .await
            .expect("stream ends after an abandoned stop");
        assert!(end.is_none());

        tokio::time::timeout(Duration::from_secs(2), supervisor.stop())
            .await
            .unwrap();
        assert!(supervisor.workers.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_start_and_stop_leaves_no_workers_behind() {
        for _ in 0..50 {
            let supervisor = Arc::new(CaptureSupervisor::new(["127.0.0.1:1"; 4]));
            let starter = {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move { supervisor.start() })
            };
            supervisor.stop().await;
            starter.await.unwrap();

            assert!(supervisor.workers.lock().is_empty());
            let end = tokio::time::timeout(Duration::from_secs(2), supervisor.messages().recv())
                .await
                .unwrap();
            assert!(end.is_none());
        }
    }

    #[test]
    fn rejects_zero_capacity() {
        let policy = CapturePolicy {
            bus_capacity: 0,
            ..CapturePolicy::default()
        };
        assert!(matches!(
            CaptureSupervisor::with_policy(["a:1"], TcpDialer, policy),
            Err(CaptureError::Bus(_))
        ));
    }

    #[test]
    fn keeps_duplicate_sources() {
        let supervisor = CaptureSupervisor::new(["a:1", "a:1", "b:2"]);
        assert_eq!(supervisor.sources().len(), 3);
    }
}
