//! Infrastructure layer for the mobile service.
//!
//! Contains the OS-facing adapters: UDP discovery, the TCP listener, the
//! default TCP session, and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `espera_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
