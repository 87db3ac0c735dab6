//! # Source worker
//!
//! One worker per configured source. The worker owns a dial/retry loop and a
//! read loop, and is the unit of failure isolation: whatever happens to one
//! source never blocks another.
//!
//! ```text
//! Disconnected ──► Dialing ──ok──► Connected ──read loop ends──► Disconnected
//!                     │                                              │
//!                     └──err──► sleep(reconnect_delay) ──────────────┘
//!
//! any state ──stop signal──► Stopped
//! ```
//!
//! Retries are unbounded and use a fixed delay. A connection is dropped when it
//! errors, reaches EOF, or stays silent longer than the idle timeout.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use trackfeed_core::{BusSender, Delivery, Message};
use trackfeed_telemetry::CaptureMetrics;

use crate::outage::{OutageTracker, Reconnect};
use crate::policy::CapturePolicy;
use crate::registry::{ConnectionRegistry, SourceKey};
use crate::transport::{tune, Dialer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Dialing,
    Connected,
    Stopped,
}

/// Why a read loop returned.
#[derive(Debug)]
pub enum ReadExit {
    /// No data for longer than the idle timeout.
    Idle(Duration),
    /// The peer closed the stream.
    Eof,
    Failed(io::Error),
    /// Force-closed or stopped.
    Closed,
    /// The bus lost its consumer.
    BusClosed,
}

/// Everything a worker shares with its supervisor and siblings.
pub struct WorkerContext<D: Dialer> {
    pub dialer: Arc<D>,
    pub policy: Arc<CapturePolicy>,
    pub bus: BusSender,
    pub registry: Arc<ConnectionRegistry>,
    pub stop: CancellationToken,
    pub metrics: Option<Arc<CaptureMetrics>>,
}

impl<D: Dialer> Clone for WorkerContext<D> {
    fn clone(&self) -> Self {
        Self {
            dialer: Arc::clone(&self.dialer),
            policy: Arc::clone(&self.policy),
            bus: self.bus.clone(),
            registry: Arc::clone(&self.registry),
            stop: self.stop.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

pub struct SourceWorker<D: Dialer> {
    key: SourceKey,
    ctx: WorkerContext<D>,
    state: LinkState,
    outage: OutageTracker,
    failed_dials: u64,
}

impl<D: Dialer> SourceWorker<D> {
    pub fn new(key: SourceKey, ctx: WorkerContext<D>) -> Self {
        Self {
            key,
            ctx,
            state: LinkState::Disconnected,
            outage: OutageTracker::new(),
            failed_dials: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Runs until the stop signal fires.
    #[instrument(name = "source", skip_all, fields(source = %self.key.addr, slot = self.key.slot))]
    pub async fn run(mut self) {
        // reused for every read on every connection of this worker
        let mut scratch = vec![0u8; self.ctx.policy.read_buffer_size];

        loop {
            if self.ctx.stop.is_cancelled() {
                break;
            }

            self.transition(LinkState::Dialing);
            let dialed = tokio::select! {
                biased;
                _ = self.ctx.stop.cancelled() => break,
                dialed = self.ctx.dialer.dial(&self.key.addr) => dialed,
            };

            let conn = match dialed {
                Ok(conn) => conn,
                Err(e) => {
                    self.on_dial_failure(&e);
                    tokio::select! {
                        biased;
                        _ = self.ctx.stop.cancelled() => break,
                        _ = sleep(self.ctx.policy.reconnect_delay) => continue,
                    }
                }
            };

            tune(&conn, &self.ctx.policy, &self.key.addr);
            self.on_connected();

            let close = self.ctx.stop.child_token();
            let registration = self.ctx.registry.register(self.key.clone(), close.clone());
            self.transition(LinkState::Connected);

            let exit = self.read_loop(conn, &close, &mut scratch).await;

            drop(registration);
            let bus_closed = matches!(exit, ReadExit::BusClosed);
            self.on_disconnected(exit);
            if bus_closed {
                break;
            }
        }

        self.transition(LinkState::Stopped);
        debug!("source worker stopped");
    }

    async fn read_loop(
        &self,
        mut conn: D::Conn,
        close: &CancellationToken,
        scratch: &mut [u8],
    ) -> ReadExit {
        let policy = &self.ctx.policy;
        let mut last_message = Instant::now();

        loop {
            let read = tokio::select! {
                biased;
                _ = close.cancelled() => return ReadExit::Closed,
                read = timeout(policy.read_deadline, conn.read(scratch)) => read,
            };

            let n = match read {
                Err(_deadline) => {
                    let silent = last_message.elapsed();
                    if silent > policy.idle_timeout {
                        return ReadExit::Idle(silent);
                    }
                    trace!(silent_ms = silent.as_millis() as u64, "read deadline passed");
                    continue;
                }
                Ok(Ok(0)) => return ReadExit::Eof,
                Ok(Err(e)) => return ReadExit::Failed(e),
                Ok(Ok(n)) => n,
            };

            last_message = Instant::now();
            let message = Message::copied_from(self.key.addr.clone(), &scratch[..n]);

            match self.ctx.bus.deliver(message, close).await {
                Delivery::Delivered => {
                    if let Some(metrics) = &self.ctx.metrics {
                        metrics.record_message(&self.key.addr, n);
                    }
                }
                Delivery::Stopped => return ReadExit::Closed,
                Delivery::Closed => return ReadExit::BusClosed,
            }
        }
    }

    fn on_dial_failure(&mut self, error: &io::Error) {
        self.outage.mark_down(Instant::now());
        self.transition(LinkState::Disconnected);
        self.failed_dials += 1;

        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_dial_failure(&self.key.addr);
        }

        let retry_in = self.ctx.policy.reconnect_delay;
        if self.failed_dials == 1 {
            warn!(error = %error, ?retry_in, "dial failed, retrying");
        } else {
            debug!(error = %error, attempt = self.failed_dials, ?retry_in, "dial failed, retrying");
        }
    }

    fn on_connected(&mut self) {
        self.failed_dials = 0;
        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_connect(&self.key.addr);
        }

        match self.outage.mark_up(Instant::now(), &self.ctx.policy.outage) {
            Reconnect::First => info!("connected"),
            Reconnect::Quick(elapsed) => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "reconnected")
            }
            Reconnect::Hiccup(elapsed) => info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "brief hiccup of {:.2} seconds",
                elapsed.as_secs_f64()
            ),
            Reconnect::Reestablished(elapsed) => info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "reestablished after {:.2} minutes",
                elapsed.as_secs_f64() / 60.0
            ),
        }
    }

    fn on_disconnected(&mut self, exit: ReadExit) {
        self.outage.mark_down(Instant::now());
        self.transition(LinkState::Disconnected);

        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_disconnect(&self.key.addr);
        }

        match exit {
            ReadExit::Idle(silent) => info!(
                silent_ms = silent.as_millis() as u64,
                "connection idle, reconnecting"
            ),
            ReadExit::Eof => info!("source closed the connection"),
            ReadExit::Failed(e) => warn!(error = %e, "read failed, reconnecting"),
            ReadExit::Closed => debug!("connection closed for shutdown"),
            ReadExit::BusClosed => warn!("message bus has no consumer, worker exiting"),
        }
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "link state");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;
    use tracing_test::traced_test;
    use trackfeed_core::{MessageBus, MessageStream};

    use crate::outage::OutageThresholds;

    #[derive(Clone, Copy)]
    enum Step {
        Accept,
        Refuse,
    }

    /// Plays a fixed script of dial outcomes, then refuses forever. The peer
    /// end of every accepted connection is handed to the test.
    struct ScriptedDialer {
        script: parking_lot::Mutex<VecDeque<Step>>,
        peers: mpsc::UnboundedSender<DuplexStream>,
    }

    impl ScriptedDialer {
        fn new(script: &[Step]) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
            let (peers, rx) = mpsc::unbounded_channel();
            let dialer = Self {
                script: parking_lot::Mutex::new(script.iter().copied().collect()),
                peers,
            };
            (dialer, rx)
        }
    }

    impl Dialer for ScriptedDialer {
        type Conn = DuplexStream;

        fn dial(&self, _addr: &str) -> impl Future<Output = io::Result<DuplexStream>> + Send {
            let step = self.script.lock().pop_front().unwrap_or(Step::Refuse);
            let outcome = match step {
                Step::Accept => {
                    let (ours, theirs) = tokio::io::duplex(4096);
                    let _ = self.peers.send(theirs);
                    Ok(ours)
                }
                Step::Refuse => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            };
            async move { outcome }
        }
    }

    struct Harness {
        stream: MessageStream,
        registry: Arc<ConnectionRegistry>,
        stop: CancellationToken,
        peers: mpsc::UnboundedReceiver<DuplexStream>,
        handle: tokio::task::JoinHandle<()>,
        _bus: MessageBus,
    }

    fn spawn(script: &[Step], policy: CapturePolicy, capacity: usize) -> Harness {
        let (dialer, peers) = ScriptedDialer::new(script);
        let bus = MessageBus::with_capacity(capacity).unwrap();
        let registry = ConnectionRegistry::new();
        let stop = CancellationToken::new();

        let ctx = WorkerContext {
            dialer: Arc::new(dialer),
            policy: Arc::new(policy),
            bus: bus.sender().unwrap(),
            registry: Arc::clone(&registry),
            stop: stop.clone(),
            metrics: None,
        };
        let worker = SourceWorker::new(SourceKey::new(0, Arc::from("feed:7")), ctx);
        assert_eq!(worker.state(), LinkState::Disconnected);

        Harness {
            stream: bus.stream(),
            registry,
            stop,
            peers,
            handle: tokio::spawn(worker.run()),
            _bus: bus,
        }
    }

    fn policy(reconnect_delay: Duration) -> CapturePolicy {
        CapturePolicy {
            reconnect_delay,
            ..CapturePolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn delivers_reads_and_redials_after_eof() {
        let mut h = spawn(&[Step::Accept, Step::Accept], policy(Duration::from_secs(5)), 8);

        let mut peer = h.peers.recv().await.unwrap();
        peer.write_all(b"A\n").await.unwrap();
        let message = h.stream.recv().await.unwrap();
        assert_eq!(&message.data[..], b"A\n");
        assert_eq!(&*message.source, "feed:7");
        drop(peer);

        // redial succeeds immediately: no outage diagnostic
        let mut peer = h.peers.recv().await.unwrap();
        peer.write_all(b"B\n").await.unwrap();
        assert_eq!(&h.stream.recv().await.unwrap().data[..], b"B\n");

        assert!(logs_contain("connected"));
        assert!(logs_contain("source closed the connection"));
        assert!(!logs_contain("brief hiccup"));
        assert!(!logs_contain("reestablished"));

        h.stop.cancel();
        h.handle.await.unwrap();
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn short_outage_is_a_hiccup() {
        let mut h = spawn(
            &[Step::Accept, Step::Refuse, Step::Accept],
            policy(Duration::from_millis(250)),
            8,
        );

        drop(h.peers.recv().await.unwrap());
        let mut peer = h.peers.recv().await.unwrap();
        peer.write_all(b"x").await.unwrap();
        h.stream.recv().await.unwrap();

        assert!(logs_contain("dial failed, retrying"));
        assert!(logs_contain("brief hiccup of 0.25 seconds"));
        assert!(!logs_contain("reestablished"));

        h.stop.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn long_outage_is_reestablished() {
        let mut h = spawn(
            &[Step::Accept, Step::Refuse, Step::Refuse, Step::Accept],
            policy(Duration::from_secs(5)),
            8,
        );

        drop(h.peers.recv().await.unwrap());
        let mut peer = h.peers.recv().await.unwrap();
        peer.write_all(b"x").await.unwrap();
        h.stream.recv().await.unwrap();

        assert!(logs_contain("reestablished after 0.17 minutes"));
        assert!(!logs_contain("brief hiccup"));

        h.stop.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_is_dropped() {
        let mut h = spawn(&[Step::Accept, Step::Accept], policy(Duration::from_secs(5)), 8);

        let _quiet = h.peers.recv().await.unwrap();
        let connected_at = Instant::now();
        let _next = h.peers.recv().await.unwrap();
        let waited = connected_at.elapsed();

        // idle (3s) is noticed on the second 2s deadline
        assert!(waited > Duration::from_secs(3), "{waited:?}");
        assert!(waited <= Duration::from_secs(5), "{waited:?}");

        h.stop.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_but_healthy_connection_survives_one_deadline() {
        let mut h = spawn(&[Step::Accept, Step::Accept], policy(Duration::from_secs(5)), 8);

        let mut peer = h.peers.recv().await.unwrap();
        for round in 0..4u8 {
            sleep(Duration::from_millis(2500)).await;
            peer.write_all(&[b'0' + round]).await.unwrap();
            assert_eq!(h.stream.recv().await.unwrap().data[0], b'0' + round);
        }
        assert!(h.peers.try_recv().is_err(), "connection was recycled");

        h.stop.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_unblocks_full_bus() {
        let mut h = spawn(&[Step::Accept], policy(Duration::from_secs(5)), 1);

        let mut peer = h.peers.recv().await.unwrap();
        peer.write_all(b"first").await.unwrap();
        while h.registry.is_empty() {
            tokio::task::yield_now().await;
        }
        for _ in 0..4 {
            peer.write_all(b"more").await.unwrap();
            sleep(Duration::from_millis(10)).await;
        }

        h.stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.handle)
            .await
            .expect("worker must exit while parked on a full bus")
            .unwrap();
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_reconnect_delay() {
        let h = spawn(&[], policy(Duration::from_secs(3600)), 8);

        sleep(Duration::from_millis(10)).await;
        h.stop.cancel();
        h.handle.await.unwrap();
    }

    #[test]
    fn default_thresholds_feed_policy() {
        assert_eq!(CapturePolicy::default().outage, OutageThresholds::default());
    }
}
