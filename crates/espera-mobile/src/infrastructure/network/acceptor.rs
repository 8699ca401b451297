//! Connection acceptor: TCP listener and accept loop.
//!
//! [`bind_listener`] binds `0.0.0.0:<port>` up front so the caller learns
//! about a port conflict immediately.  [`run_accept_loop`] then accepts
//! connections until the shutdown token is cancelled.  Each accepted
//! connection is handed to its own Tokio task, which creates the session,
//! registers it, and starts it; the loop moves straight on to the next
//! `accept()` so one slow client never delays another.
//!
//! # Shutdown
//!
//! The pending `accept()` is raced against the shutdown token.  When the
//! token wins, the loop returns and the listener is dropped, releasing the
//! port.  A connection that is accepted while shutdown is already under way
//! is dropped before a session is created, and the registry itself rejects
//! any registration that lands after its shutdown.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::session::SessionFactory;
use crate::application::session_registry::SessionRegistry;

/// Everything a connection task needs to turn a socket into a live session.
pub struct AcceptContext<L> {
    pub factory: Arc<dyn SessionFactory<L>>,
    pub library: Arc<L>,
    pub registry: Arc<SessionRegistry>,
    /// Total connections accepted, including ones later rejected.
    pub accepted: Arc<AtomicU64>,
}

impl<L> Clone for AcceptContext<L> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            library: Arc::clone(&self.library),
            registry: Arc::clone(&self.registry),
            accepted: Arc::clone(&self.accepted),
        }
    }
}

/// Binds the service listener on all IPv4 interfaces.
///
/// # Errors
///
/// Returns the I/O error if the port is in use or cannot be bound.
pub async fn bind_listener(port: u16) -> io::Result<TcpListener> {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await
}

/// Source of incoming connections; implemented by the TCP listener.
trait Incoming {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn describe(&self) -> String;
}

impl Incoming for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn describe(&self) -> String {
        self.local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string())
    }
}

/// Accepts connections until `shutdown` is cancelled or the listener fails.
pub async fn run_accept_loop<L: Send + Sync + 'static>(
    listener: TcpListener,
    ctx: AcceptContext<L>,
    shutdown: CancellationToken,
) {
    accept_loop(&listener, ctx, shutdown).await;
}

async fn accept_loop<I: Incoming, L: Send + Sync + 'static>(
    incoming: &I,
    ctx: AcceptContext<L>,
    shutdown: CancellationToken,
) {
    let local = incoming.describe();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("stopped accepting mobile connections on {local}");
                break;
            }
            accepted = incoming.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if shutdown.is_cancelled() {
                    debug!("dropping connection from {peer}: service is shutting down");
                    continue;
                }
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, ctx, shutdown);
                });
            }
            Err(e) if is_transient_accept_error(&e) => {
                debug!("transient accept error on {local}: {e}");
            }
            Err(e) => {
                warn!("mobile listener on {local} failed, no longer accepting connections: {e}");
                break;
            }
        }
    }
}

/// Creates, registers, and starts the session for one accepted connection.
fn handle_connection<L: Send + Sync + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: AcceptContext<L>,
    shutdown: CancellationToken,
) {
    if shutdown.is_cancelled() {
        debug!("dropping connection from {peer}: service is shutting down");
        return;
    }

    let total = ctx.accepted.fetch_add(1, Ordering::Relaxed) + 1;
    info!("new mobile client detected at {peer} ({total} accepted so far)");

    let session = ctx.factory.create(stream, peer, Arc::clone(&ctx.library));
    match ctx.registry.register(Arc::clone(&session)) {
        Ok(id) => {
            debug!("mobile client {peer} registered as {id}");
            session.listen();
        }
        Err(e) => debug!("mobile client {peer} discarded: {e}"),
    }
}

/// Returns `true` for errors that concern one incoming connection rather
/// than the listener itself.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::{ClientSession, DisconnectNotifier, DisconnectSignal};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Session that records `listen`/`dispose` calls and holds the socket open.
    struct ProbeSession {
        _stream: Mutex<Option<TcpStream>>,
        notifier: DisconnectNotifier,
        listens: AtomicUsize,
        disposals: AtomicUsize,
    }

    impl ClientSession for ProbeSession {
        fn disconnected(&self) -> DisconnectSignal {
            self.notifier.subscribe()
        }

        fn listen(&self) {
            self.listens.fetch_add(1, Ordering::SeqCst);
        }

        fn dispose(&self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ProbeFactory {
        created: Mutex<Vec<Arc<ProbeSession>>>,
    }

    impl SessionFactory<()> for ProbeFactory {
        fn create(
            &self,
            stream: TcpStream,
            _peer: SocketAddr,
            _library: Arc<()>,
        ) -> Arc<dyn ClientSession> {
            let (notifier, _) = DisconnectSignal::channel();
            let session = Arc::new(ProbeSession {
                _stream: Mutex::new(Some(stream)),
                notifier,
                listens: AtomicUsize::new(0),
                disposals: AtomicUsize::new(0),
            });
            self.created.lock().unwrap().push(Arc::clone(&session));
            session
        }
    }

    fn context(factory: Arc<ProbeFactory>) -> AcceptContext<()> {
        AcceptContext {
            factory,
            library: Arc::new(()),
            registry: Arc::new(SessionRegistry::new()),
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn loopback_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_accepted_connection_is_registered_and_started() {
        // Arrange
        let (listener, addr) = loopback_listener().await;
        let factory = Arc::new(ProbeFactory::default());
        let ctx = context(Arc::clone(&factory));
        let registry = Arc::clone(&ctx.registry);
        let mut count = registry.subscribe_count();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_accept_loop(listener, ctx.clone(), shutdown.clone()));

        // Act
        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), count.wait_for(|c| *c == 1))
            .await
            .expect("session was not registered")
            .unwrap();

        // Assert: listen() follows registration on the connection task
        let created = factory.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        tokio::time::timeout(Duration::from_secs(2), async {
            while created[0].listens.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session was not started");
        assert_eq!(ctx.accepted.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_many_clients_are_accepted_concurrently() {
        let (listener, addr) = loopback_listener().await;
        let factory = Arc::new(ProbeFactory::default());
        let ctx = context(Arc::clone(&factory));
        let mut count = ctx.registry.subscribe_count();
        let shutdown = CancellationToken::new();
        tokio::spawn(run_accept_loop(listener, ctx.clone(), shutdown.clone()));

        let mut clients = Vec::new();
        for _ in 0..5 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }

        tokio::time::timeout(Duration::from_secs(2), count.wait_for(|c| *c == 5))
            .await
            .expect("not all sessions registered")
            .unwrap();
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_loop_exits_and_releases_port_on_cancel() {
        // Arrange
        let (listener, addr) = loopback_listener().await;
        let ctx = context(Arc::new(ProbeFactory::default()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_accept_loop(listener, ctx, shutdown.clone()));

        // Act
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("accept loop did not stop")
            .unwrap();

        // Assert: the listener is gone, so the port can be bound again
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_after_cancel_is_not_registered() {
        let factory = Arc::new(ProbeFactory::default());
        let ctx = context(Arc::clone(&factory));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (listener, addr) = loopback_listener().await;
        let pending = TcpStream::connect(addr);

        let (server, peer) = tokio::join!(listener.accept(), pending).0.unwrap();
        handle_connection(server, peer, ctx.clone(), shutdown);

        assert!(factory.created.lock().unwrap().is_empty());
        assert!(ctx.registry.is_empty());
        assert_eq!(ctx.accepted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connection_after_registry_shutdown_is_disposed() {
        let factory = Arc::new(ProbeFactory::default());
        let ctx = context(Arc::clone(&factory));
        ctx.registry.shutdown();
        let (listener, addr) = loopback_listener().await;

        let (accepted, _client) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (server, peer) = accepted.unwrap();
        handle_connection(server, peer, ctx.clone(), CancellationToken::new());

        let created = factory.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].disposals.load(Ordering::SeqCst), 1);
        assert_eq!(created[0].listens.load(Ordering::SeqCst), 0);
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_bind_listener_reports_port_in_use() {
        let held = bind_listener(0).await.unwrap();
        let port = held.local_addr().unwrap().port();

        let result = bind_listener(port).await;

        assert!(result.is_err());
    }

    /// Yields a scripted sequence of accept errors, then pends forever.
    struct FailingIncoming {
        errors: Mutex<Vec<io::ErrorKind>>,
        calls: AtomicUsize,
    }

    impl FailingIncoming {
        fn new(mut kinds: Vec<io::ErrorKind>) -> Self {
            kinds.reverse();
            Self {
                errors: Mutex::new(kinds),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Incoming for FailingIncoming {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.errors.lock().unwrap().pop();
            match next {
                Some(kind) => Err(io::Error::new(kind, "scripted accept failure")),
                None => std::future::pending().await,
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[tokio::test]
    async fn test_fatal_accept_error_stops_loop() {
        // Arrange
        let incoming = FailingIncoming::new(vec![io::ErrorKind::PermissionDenied]);
        let ctx = context(Arc::new(ProbeFactory::default()));
        let shutdown = CancellationToken::new();

        // Act
        tokio::time::timeout(
            Duration::from_secs(2),
            accept_loop(&incoming, ctx.clone(), shutdown.clone()),
        )
        .await
        .expect("loop must return after a fatal accept error");

        // Assert: stopped on its own, without cancellation
        assert_eq!(incoming.calls.load(Ordering::SeqCst), 1);
        assert!(!shutdown.is_cancelled());
        assert_eq!(ctx.accepted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_accept_errors_keep_loop_running() {
        // Arrange
        let incoming = FailingIncoming::new(vec![
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
            io::ErrorKind::PermissionDenied,
        ]);
        let ctx = context(Arc::new(ProbeFactory::default()));

        // Act
        tokio::time::timeout(
            Duration::from_secs(2),
            accept_loop(&incoming, ctx, CancellationToken::new()),
        )
        .await
        .expect("loop must stop at the first fatal error");

        // Assert: every transient error was retried, the fatal one ended the loop
        assert_eq!(incoming.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_transient_accept_errors_alone_do_not_stop_loop() {
        let incoming = FailingIncoming::new(vec![io::ErrorKind::ConnectionAborted; 3]);
        let ctx = context(Arc::new(ProbeFactory::default()));
        let shutdown = CancellationToken::new();

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            accept_loop(&incoming, ctx, shutdown),
        )
        .await;

        assert!(outcome.is_err(), "loop must keep accepting after transient errors");
        assert_eq!(incoming.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_is_transient_accept_error_classification() {
        let transient = io::Error::new(io::ErrorKind::ConnectionAborted, "aborted");
        let fatal = io::Error::new(io::ErrorKind::PermissionDenied, "revoked");
        assert!(is_transient_accept_error(&transient));
        assert!(!is_transient_accept_error(&fatal));
    }
}
