//! # espera-core
//!
//! Shared, I/O-free building blocks for the Espera mobile connection service.
//!
//! Mobile companion apps find the desktop application by listening for a
//! small UDP datagram that the desktop sends to every host on its local
//! subnets.  Once found, they open a TCP connection on the same port.  This
//! crate owns the parts of that contract that both sides must agree on and
//! that can be tested without touching a socket:
//!
//! - **`discovery`** – The discovery payload (UTF-16LE text), a recogniser
//!   for it, and the list of sweep targets for a local IPv4 address.
//!
//! - **`port`** – The IANA dynamic port range the service is allowed to
//!   listen on, and the validation that enforces it.

pub mod discovery;
pub mod port;

pub use discovery::{
    encode_discovery_message, is_discovery_message, sweep_targets, DISCOVERY_MESSAGE,
};
pub use port::{validate_port, PortError, DEFAULT_PORT, DYNAMIC_PORT_RANGE};
