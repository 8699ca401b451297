//! Application layer for the mobile service.
//!
//! Nothing in here opens a socket.  The layer defines what a client session
//! must provide and keeps track of the sessions that are currently live, so
//! the bookkeeping can be tested with in-memory fakes.
//!
//! # Sub-modules
//!
//! - **`session`** – The [`ClientSession`](session::ClientSession) and
//!   [`SessionFactory`](session::SessionFactory) contracts plus the
//!   first-fire-wins [`DisconnectSignal`](session::DisconnectSignal).
//!
//! - **`session_registry`** – The lock-guarded set of registered sessions,
//!   the connected-client count signal, and bulk teardown.

pub mod session;
pub mod session_registry;
