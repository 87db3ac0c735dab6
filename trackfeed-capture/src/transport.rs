//! Transport seam between source workers and the network.
//!
//! Workers are generic over a [`Dialer`] so that the same state machine runs
//! over TCP in production and over in-memory streams in tests. Socket tuning
//! is a capability: a connection exposes [`StreamTuning`] only when the
//! underlying transport has such controls.

use std::future::Future;
use std::io;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, DuplexStream};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::policy::CapturePolicy;

/// Keepalive and coalescing controls.
pub trait StreamTuning {
    fn set_keepalive(&self, period: Duration) -> io::Result<()>;
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;
}

/// A byte stream owned by one worker.
pub trait Connection: AsyncRead + Unpin + Send + 'static {
    /// Tuning controls, when the transport exposes them.
    fn tuning(&self) -> Option<&dyn StreamTuning> {
        None
    }
}

/// Opens connections to source addresses.
pub trait Dialer: Send + Sync + 'static {
    type Conn: Connection;

    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Conn = TcpStream;

    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = addr.to_owned();
        async move { TcpStream::connect(addr).await }
    }
}

impl Connection for TcpStream {
    fn tuning(&self) -> Option<&dyn StreamTuning> {
        Some(self)
    }
}

impl StreamTuning for TcpStream {
    fn set_keepalive(&self, period: Duration) -> io::Result<()> {
        let keepalive = TcpKeepalive::new().with_time(period);
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "freebsd",
            target_os = "windows"
        ))]
        let keepalive = keepalive.with_interval(period);

        SockRef::from(self).set_tcp_keepalive(&keepalive)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }
}

impl Connection for DuplexStream {}

/// Applies keepalive and no-delay when `conn` supports it. Failures are
/// logged and otherwise ignored.
pub(crate) fn tune<C: Connection>(conn: &C, policy: &CapturePolicy, source: &str) {
    let Some(tuning) = conn.tuning() else {
        trace!(source, "transport has no tuning controls");
        return;
    };

    if let Err(e) = tuning.set_keepalive(policy.keepalive_period) {
        debug!(source, error = %e, "failed to enable TCP keepalive");
    }
    if policy.nodelay {
        if let Err(e) = tuning.set_nodelay(true) {
            debug!(source, error = %e, "failed to set TCP_NODELAY");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    struct Stubborn {
        attempts: AtomicUsize,
    }

    impl StreamTuning for Stubborn {
        fn set_keepalive(&self, _period: Duration) -> io::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Unsupported, "no keepalive here"))
        }

        fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Unsupported, "no nodelay here"))
        }
    }

    impl AsyncRead for Stubborn {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Connection for Stubborn {
        fn tuning(&self) -> Option<&dyn StreamTuning> {
            Some(self)
        }
    }

    #[traced_test]
    #[test]
    fn tuning_failures_are_diagnostics_only() {
        let conn = Stubborn {
            attempts: AtomicUsize::new(0),
        };
        tune(&conn, &CapturePolicy::default(), "feed:1");

        assert_eq!(conn.attempts.load(Ordering::SeqCst), 2);
        assert!(logs_contain("failed to enable TCP keepalive"));
        assert!(logs_contain("failed to set TCP_NODELAY"));
    }

    #[test]
    fn duplex_streams_are_untuned() {
        let (a, _b) = tokio::io::duplex(64);
        assert!(a.tuning().is_none());
        tune(&a, &CapturePolicy::default(), "memory");
    }

    #[tokio::test]
    async fn tcp_streams_accept_tuning() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let conn = TcpDialer.dial(&addr).await.unwrap();
        let tuning = conn.tuning().expect("tcp exposes tuning");
        tuning.set_keepalive(Duration::from_secs(2)).unwrap();
        tuning.set_nodelay(true).unwrap();
        assert!(conn.nodelay().unwrap());
    }
}
