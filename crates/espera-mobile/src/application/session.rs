//! The client session contract.
//!
//! A *client session* is one connected mobile app together with whatever
//! handles its requests.  The wire protocol lives entirely inside the session;
//! this service only needs three things from it:
//!
//! - a [`DisconnectSignal`] that fires when the client goes away,
//! - a non-blocking [`ClientSession::listen`] that starts request processing,
//! - an idempotent [`ClientSession::dispose`] that releases the connection.
//!
//! Sessions are produced by a [`SessionFactory`] from each accepted TCP
//! connection plus the shared library handle.
//!
//! # How the disconnect signal works (for beginners)
//!
//! The signal is built on a Tokio `watch` channel.  A `watch` channel holds a
//! single value that any number of receivers can read or wait on; sending
//! overwrites the value instead of queueing it.  Here the value is a `bool`
//! that starts as `false` and flips to `true` on disconnect:
//!
//! ```text
//! DisconnectNotifier ──send(true)──► [ watch value: false → true ]
//!                                          │
//!                      ┌───────────────────┼───────────────────┐
//!                      ▼                   ▼                   ▼
//!               registry watcher     other waiter        late subscriber
//!               (wakes up)           (wakes up)          (sees `true` at once)
//! ```
//!
//! Because the value stays `true`, a waiter that subscribes after the
//! disconnect still sees it immediately.  A second notification leaves the
//! value unchanged.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::watch;
use uuid::Uuid;

/// Registry-assigned identity of a registered session.
pub type SessionId = Uuid;

/// One connected mobile client.
pub trait ClientSession: Send + Sync + 'static {
    /// Returns a signal that fires when the client disconnects.
    ///
    /// Every call returns a handle to the same underlying signal.
    fn disconnected(&self) -> DisconnectSignal;

    /// Starts the session's own request loop.  Must return immediately.
    fn listen(&self);

    /// Releases the connection.  Calling it more than once has no effect.
    fn dispose(&self);
}

/// Creates sessions for accepted connections.
///
/// `L` is the media library handle; the service never looks inside it.
pub trait SessionFactory<L>: Send + Sync + 'static {
    fn create(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        library: Arc<L>,
    ) -> Arc<dyn ClientSession>;
}

/// Sending half of a disconnect signal, held by the session.
#[derive(Debug)]
pub struct DisconnectNotifier {
    tx: watch::Sender<bool>,
}

/// Receiving half of a disconnect signal.
///
/// Waiters observe the first disconnect only; later notifications change
/// nothing.  Dropping the [`DisconnectNotifier`] also counts as a disconnect,
/// so a session that is torn down without notifying never leaves a waiter
/// hanging.
#[derive(Debug, Clone)]
pub struct DisconnectSignal {
    rx: watch::Receiver<bool>,
}

impl DisconnectSignal {
    /// Creates a connected notifier/signal pair.
    pub fn channel() -> (DisconnectNotifier, DisconnectSignal) {
        let (tx, rx) = watch::channel(false);
        (DisconnectNotifier { tx }, DisconnectSignal { rx })
    }

    /// Returns `true` once the session has disconnected.
    pub fn is_disconnected(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Completes when the session disconnects (or the notifier is dropped).
    pub async fn wait(mut self) {
        // An Err here means the notifier is gone, which is a disconnect too.
        let _ = self.rx.wait_for(|disconnected| *disconnected).await;
    }
}

impl DisconnectNotifier {
    /// Fires the signal.  Returns `true` only for the first call.
    pub fn notify(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Returns a new receiving handle for this signal.
    pub fn subscribe(&self) -> DisconnectSignal {
        DisconnectSignal {
            rx: self.tx.subscribe(),
        }
    }
}
