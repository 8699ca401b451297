//! espera-mobile library entry point.
//!
//! Makes the desktop media library discoverable and reachable by mobile
//! companion apps on the local network, and tracks the connected clients.
//!
//! ```text
//! MobileApi (mobile_api)
//!  ├─ DiscoveryBroadcaster  -- UDP sweep of every local /24, once per interval
//!  ├─ accept loop           -- TCP listener, one task per connection
//!  └─ SessionRegistry       -- live sessions + connected-client count
//! ```
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;
pub mod mobile_api;

pub use application::session::{
    ClientSession, DisconnectNotifier, DisconnectSignal, SessionFactory, SessionId,
};
pub use application::session_registry::{RegistryError, SessionRegistry};
pub use mobile_api::{MobileApi, MobileApiConfig, ServiceError, ServiceState};
