//! MobileApi: the facade the desktop application talks to.
//!
//! ```text
//! MobileApi::new(config, library, factory)    -- validates, allocates nothing
//!  ├─ start_broadcast()   -- UDP socket + DiscoveryBroadcaster task
//!  ├─ start_accepting()   -- TCP bind + accept loop task
//!  └─ dispose()           -- cancel both loops, drop listener, disconnect all
//! ```
//!
//! `start_broadcast` and `start_accepting` are independent: either, both, or
//! neither may run before `dispose`.  `dispose` is terminal and idempotent,
//! and also runs when the facade is dropped.
//!
//! # What `dispose` guarantees
//!
//! When `dispose` returns, every session that was registered has been
//! disposed and no new session can be registered.  The background loops stop
//! on their own shortly afterwards: the accept loop as soon as it observes
//! the cancelled token, the broadcaster after finishing its current sweep.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use espera_core::port::{validate_port, PortError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::session::{SessionFactory, SessionId};
use crate::application::session_registry::SessionRegistry;
use crate::infrastructure::network::acceptor::{bind_listener, run_accept_loop, AcceptContext};
use crate::infrastructure::network::discovery::{
    DiscoveryBroadcaster, DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL,
};
use crate::infrastructure::network::subnet::{AddressSource, HostnameResolver};

/// Error type for the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The configuration was rejected at construction.
    #[error("invalid mobile service configuration: {0}")]
    Config(#[from] PortError),
    /// The sweep interval is below [`MIN_SWEEP_INTERVAL`].
    #[error(
        "invalid mobile service configuration: sweep interval {interval:?} is shorter than {:?}",
        MIN_SWEEP_INTERVAL
    )]
    InvalidInterval { interval: Duration },
    /// The TCP listener could not be bound.
    #[error("failed to bind mobile listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The discovery UDP socket could not be created.
    #[error("failed to create discovery socket: {0}")]
    DiscoverySocket(#[source] std::io::Error),
    /// The named background loop was already started.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
    /// The service has been disposed.
    #[error("mobile service has been disposed")]
    Disposed,
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MobileApiConfig {
    /// Listening and discovery port; must lie in 49152–65535.
    pub port: u32,
    /// Pause between two discovery sweeps; at least [`MIN_SWEEP_INTERVAL`].
    pub sweep_interval: Duration,
}

impl MobileApiConfig {
    pub fn new(port: u32) -> Self {
        Self {
            port,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl Default for MobileApiConfig {
    fn default() -> Self {
        Self::new(u32::from(espera_core::DEFAULT_PORT))
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed; nothing started.
    Created,
    /// At least one background loop was started.  Each flag is `true` while
    /// that loop is still alive.
    Running { discovery: bool, listening: bool },
    /// Terminal.
    Disposed,
}

#[derive(Default)]
struct Tasks {
    discovery: Option<JoinHandle<()>>,
    acceptor: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// Makes the application discoverable and reachable by mobile clients.
///
/// `L` is the media library handle handed to every session.
pub struct MobileApi<L> {
    port: u16,
    sweep_interval: Duration,
    library: Arc<L>,
    factory: Arc<dyn SessionFactory<L>>,
    addresses: Arc<dyn AddressSource>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    accepted: Arc<AtomicU64>,
    tasks: Mutex<Tasks>,
}

impl<L: Send + Sync + 'static> MobileApi<L> {
    /// Creates the service without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if the port is outside 49152–65535,
    /// or [`ServiceError::InvalidInterval`] if the sweep interval is shorter
    /// than [`MIN_SWEEP_INTERVAL`].
    pub fn new(
        config: MobileApiConfig,
        library: Arc<L>,
        factory: Arc<dyn SessionFactory<L>>,
    ) -> Result<Self, ServiceError> {
        let port = validate_port(config.port)?;
        if config.sweep_interval < MIN_SWEEP_INTERVAL {
            return Err(ServiceError::InvalidInterval {
                interval: config.sweep_interval,
            });
        }
        Ok(Self {
            port,
            sweep_interval: config.sweep_interval,
            library,
            factory,
            addresses: Arc::new(HostnameResolver),
            registry: Arc::new(SessionRegistry::new()),
            shutdown: CancellationToken::new(),
            accepted: Arc::new(AtomicU64::new(0)),
            tasks: Mutex::new(Tasks::default()),
        })
    }

    /// Replaces the source of local addresses used by discovery.
    pub fn with_address_source(mut self, addresses: Arc<dyn AddressSource>) -> Self {
        self.addresses = addresses;
        self
    }

    /// Starts the periodic discovery sweep on a background task.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Disposed`] after dispose, [`ServiceError::AlreadyRunning`]
    /// on a second call, [`ServiceError::DiscoverySocket`] if no UDP socket
    /// can be created.
    pub fn start_broadcast(&self) -> Result<(), ServiceError> {
        let mut tasks = self.lock_tasks();
        self.ensure_not_disposed()?;
        if tasks.discovery.is_some() {
            return Err(ServiceError::AlreadyRunning("discovery broadcast"));
        }

        let socket = DiscoveryBroadcaster::bind_socket().map_err(ServiceError::DiscoverySocket)?;
        let broadcaster = DiscoveryBroadcaster::new(
            Arc::new(socket),
            Arc::clone(&self.addresses),
            self.port,
            self.sweep_interval,
        );
        tasks.discovery = Some(tokio::spawn(broadcaster.run(self.shutdown.clone())));
        Ok(())
    }

    /// Binds `0.0.0.0:<port>` and starts accepting mobile clients.
    ///
    /// Returns the bound address once the listener is ready.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Disposed`] after dispose, [`ServiceError::AlreadyRunning`]
    /// on a second call, [`ServiceError::Bind`] if the port cannot be bound.
    pub async fn start_accepting(&self) -> Result<SocketAddr, ServiceError> {
        {
            let tasks = self.lock_tasks();
            self.ensure_not_disposed()?;
            if tasks.acceptor.is_some() {
                return Err(ServiceError::AlreadyRunning("connection acceptor"));
            }
        }

        let listener = bind_listener(self.port)
            .await
            .map_err(|source| ServiceError::Bind {
                addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.port)));

        let mut tasks = self.lock_tasks();
        // Re-check: dispose or a concurrent start may have won while binding.
        self.ensure_not_disposed()?;
        if tasks.acceptor.is_some() {
            return Err(ServiceError::AlreadyRunning("connection acceptor"));
        }

        let ctx = AcceptContext {
            factory: Arc::clone(&self.factory),
            library: Arc::clone(&self.library),
            registry: Arc::clone(&self.registry),
            accepted: Arc::clone(&self.accepted),
        };
        tasks.acceptor = Some(tokio::spawn(run_accept_loop(
            listener,
            ctx,
            self.shutdown.clone(),
        )));
        tasks.local_addr = Some(local_addr);
        info!("listening for mobile clients on port {}", self.port);
        Ok(local_addr)
    }
}

impl<L> MobileApi<L> {
    /// Stops discovery and accepting, and disconnects every client.
    ///
    /// Idempotent.  Every registered session has been disposed on return.
    pub fn dispose(&self) {
        let first = {
            let mut tasks = self.lock_tasks();
            let first = !self.shutdown.is_cancelled();
            self.shutdown.cancel();
            tasks.local_addr = None;
            first
        };
        if first {
            info!("stopping mobile service on port {}", self.port);
        }
        self.registry.shutdown();
    }

    /// Subscribes to the connected-client count.
    pub fn connected_clients(&self) -> watch::Receiver<usize> {
        self.registry.subscribe_count()
    }

    /// Number of currently connected clients.
    pub fn connected_client_count(&self) -> usize {
        self.registry.len()
    }

    /// Session ids of the connected clients, oldest first.
    pub fn connected_client_ids(&self) -> Vec<SessionId> {
        self.registry.ids()
    }

    /// Total connections accepted since construction.
    pub fn accepted_connections(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address of the TCP listener while accepting.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let tasks = self.lock_tasks();
        if is_live(&tasks.acceptor) {
            tasks.local_addr
        } else {
            None
        }
    }

    /// Current lifecycle state.
    ///
    /// A loop that stopped on its own (the listener failing, for example)
    /// reports `false` while the service keeps running in degraded mode.
    pub fn state(&self) -> ServiceState {
        if self.shutdown.is_cancelled() {
            return ServiceState::Disposed;
        }
        let tasks = self.lock_tasks();
        if tasks.discovery.is_none() && tasks.acceptor.is_none() {
            return ServiceState::Created;
        }
        ServiceState::Running {
            discovery: is_live(&tasks.discovery),
            listening: is_live(&tasks.acceptor),
        }
    }

    /// Waits for both background loops to finish.  Intended for use after
    /// [`dispose`](Self::dispose).
    pub async fn join(&self) {
        let handles = {
            let mut tasks = self.lock_tasks();
            [tasks.discovery.take(), tasks.acceptor.take()]
        };
        for handle in handles.into_iter().flatten() {
            let _ = handle.await;
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), ServiceError> {
        if self.shutdown.is_cancelled() {
            return Err(ServiceError::Disposed);
        }
        Ok(())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn is_live(task: &Option<JoinHandle<()>>) -> bool {
    task.as_ref().is_some_and(|handle| !handle.is_finished())
}

impl<L> Drop for MobileApi<L> {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
