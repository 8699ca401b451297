//! SessionRegistry: the set of currently-connected mobile clients.
//!
//! The registry is the only piece of state written by more than one task:
//! the accept loop registers sessions, each session's watcher task removes
//! its own entry on disconnect, and the facade drains everything on shutdown.
//! All three go through one `Mutex`, and the connected-client count is
//! published from inside the same critical section.
//!
//! # Session lifecycle
//!
//! ```text
//! register() ──► Registered ──(disconnect signal, first fire)──► removed + disposed
//!                    │
//!                    └──(shutdown)──► drained + disposed
//! ```
//!
//! Whichever path takes an entry out of the collection disposes it; the other
//! path then finds nothing, so every session is disposed exactly once.
//! Disposal always runs after the lock is released because it may block on
//! socket teardown.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::session::{ClientSession, SessionId};

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry was shut down; the session was disposed instead.
    #[error("session registry is shut down")]
    Closed,
}

struct Entry {
    id: SessionId,
    session: Arc<dyn ClientSession>,
    watcher: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<Entry>,
    closed: bool,
}

/// Concurrency-safe collection of live client sessions.
///
/// `register` spawns a Tokio task, so it must be called from within a runtime.
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    count_tx: watch::Sender<usize>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(RegistryState::default()),
            count_tx,
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `session` and starts watching its disconnect signal.
    ///
    /// On the first disconnect the entry is removed and the session disposed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Closed`] after [`shutdown`](Self::shutdown);
    /// the session is disposed before returning.
    pub fn register(
        self: &Arc<Self>,
        session: Arc<dyn ClientSession>,
    ) -> Result<SessionId, RegistryError> {
        let id = Uuid::new_v4();
        // Session code never runs under the registry lock.
        let signal = session.disconnected();

        let mut state = self.lock();
        if state.closed {
            drop(state);
            debug!("registry closed; disposing session instead of registering");
            dispose_logged(id, session.as_ref());
            return Err(RegistryError::Closed);
        }

        let registry = Arc::downgrade(self);
        let watcher = tokio::spawn(async move {
            signal.wait().await;
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if let Some(session) = registry.take(id) {
                info!("mobile client {id} disconnected");
                dispose_logged(id, session.as_ref());
            }
        });

        state.entries.push(Entry {
            id,
            session,
            watcher,
        });
        self.count_tx.send_replace(state.entries.len());
        debug!("registered mobile client {id}; {} connected", state.entries.len());
        Ok(id)
    }

    /// Removes the session with `id`, returning it if it was present.
    ///
    /// Absent ids are not an error: shutdown may already have drained the
    /// entry.  The caller is responsible for disposing the returned session.
    pub fn remove(&self, id: SessionId) -> Option<Arc<dyn ClientSession>> {
        let entry = self.take_entry(id)?;
        entry.watcher.abort();
        Some(entry.session)
    }

    /// Disposes every registered session and rejects future registrations.
    ///
    /// Idempotent: later calls find an empty, closed registry.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            let drained = std::mem::take(&mut state.entries);
            self.count_tx.send_replace(0);
            drained
        };

        if drained.is_empty() {
            return;
        }
        info!("disconnecting {} mobile client(s)", drained.len());
        for entry in drained {
            entry.watcher.abort();
            dispose_logged(entry.id, entry.session.as_ref());
        }
    }

    /// Number of currently registered sessions.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the registered sessions, in registration order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.lock().entries.iter().map(|e| e.id).collect()
    }

    /// Subscribes to the connected-client count.
    ///
    /// The receiver starts at the current count and sees the new size after
    /// every register, remove, and shutdown.
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    /// Removes an entry without touching its watcher (used by the watcher itself).
    fn take(&self, id: SessionId) -> Option<Arc<dyn ClientSession>> {
        self.take_entry(id).map(|entry| entry.session)
    }

    fn take_entry(&self, id: SessionId) -> Option<Entry> {
        let mut state = self.lock();
        let index = state.entries.iter().position(|e| e.id == id)?;
        let entry = state.entries.remove(index);
        self.count_tx.send_replace(state.entries.len());
        Some(entry)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Disposes `session`, containing any panic it raises.
fn dispose_logged(id: SessionId, session: &dyn ClientSession) {
    if catch_unwind(AssertUnwindSafe(|| session.dispose())).is_err() {
        error!("mobile client {id} panicked while being disposed");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
