//! Network infrastructure for the mobile service.
//!
//! # Sub-modules
//!
//! - **`subnet`** – Enumerates the local IPv4 addresses whose `/24` subnets
//!   are swept for discovery.
//!
//! - **`discovery`** – The periodic UDP sweep that announces the service to
//!   mobile clients on the LAN.
//!
//! - **`acceptor`** – Binds the TCP listener and runs the accept loop that
//!   turns each connection into a registered session.
//!
//! - **`session`** – The minimal TCP-backed client session used by the
//!   `espera-mobile` binary.

pub mod acceptor;
pub mod discovery;
pub mod session;
pub mod subnet;
