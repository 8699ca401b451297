//! Minimal TCP client session.
//!
//! The request protocol spoken with the mobile app is not part of this
//! service.  `TcpClientSession` is the session the `espera-mobile` binary
//! uses: it keeps the connection open, drains whatever the client sends, and
//! reports a disconnect when the client closes the socket or the read fails.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::application::session::{
    ClientSession, DisconnectNotifier, DisconnectSignal, SessionFactory,
};

const READ_BUFFER_SIZE: usize = 4096;

/// A connected mobile client backed by a raw TCP stream.
pub struct TcpClientSession<L> {
    peer: SocketAddr,
    /// Kept alive for as long as the client is connected.
    _library: Arc<L>,
    stream: Mutex<Option<TcpStream>>,
    notifier: Arc<DisconnectNotifier>,
    closed: CancellationToken,
}

impl<L: Send + Sync + 'static> TcpClientSession<L> {
    pub fn new(stream: TcpStream, peer: SocketAddr, library: Arc<L>) -> Self {
        let (notifier, _) = DisconnectSignal::channel();
        Self {
            peer,
            _library: library,
            stream: Mutex::new(Some(stream)),
            notifier: Arc::new(notifier),
            closed: CancellationToken::new(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns `true` once [`dispose`](ClientSession::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn take_stream(&self) -> Option<TcpStream> {
        self.stream
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take()
    }
}

impl<L: Send + Sync + 'static> ClientSession for TcpClientSession<L> {
    fn disconnected(&self) -> DisconnectSignal {
        self.notifier.subscribe()
    }

    fn listen(&self) {
        let Some(stream) = self.take_stream() else {
            return;
        };
        if self.closed.is_cancelled() {
            return;
        }

        let peer = self.peer();
        let notifier = Arc::clone(&self.notifier);
        let closed = self.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {
                    debug!("session {peer} closed locally");
                }
                reason = drain(stream, peer) => {
                    debug!("session {peer} ended: {reason}");
                    notifier.notify();
                }
            }
        });
    }

    fn dispose(&self) {
        self.closed.cancel();
        // Drops the stream if listen() never took it.
        drop(self.take_stream());
    }
}

/// Reads until EOF or error, returning why the read loop ended.
async fn drain(mut stream: TcpStream, peer: SocketAddr) -> String {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return "closed by client".to_string(),
            Ok(n) => trace!("session {peer}: {n} byte(s) received"),
            Err(e) => return format!("read error: {e}"),
        }
    }
}

/// Produces a [`TcpClientSession`] for every accepted connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpSessionFactory;

impl<L: Send + Sync + 'static> SessionFactory<L> for TcpSessionFactory {
    fn create(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        library: Arc<L>,
    ) -> Arc<dyn ClientSession> {
        Arc::new(TcpClientSession::new(stream, peer, library))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
