//! Listening port rules.
//!
//! The service only listens on ports from the IANA dynamic/private range
//! (49152–65535), which no registered service claims.  The discovery datagram
//! targets the same port number, so a single value configures both.

use std::ops::RangeInclusive;

use thiserror::Error;

/// The IANA dynamic/private port range.
pub const DYNAMIC_PORT_RANGE: RangeInclusive<u32> = 49152..=65535;

/// Default listening port for the mobile service.
pub const DEFAULT_PORT: u16 = 49587;

/// Error returned when a configured port is unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("port {port} is outside the dynamic port range 49152-65535")]
    OutOfRange { port: u32 },
}

/// Validates `port` against [`DYNAMIC_PORT_RANGE`].
///
/// The argument is wider than `u16` so that out-of-range configuration values
/// such as `65536` are rejected instead of silently wrapping.
///
/// # Errors
///
/// Returns [`PortError::OutOfRange`] for any port outside the range.
pub fn validate_port(port: u32) -> Result<u16, PortError> {
    if !DYNAMIC_PORT_RANGE.contains(&port) {
        return Err(PortError::OutOfRange { port });
    }
    u16::try_from(port).map_err(|_| PortError::OutOfRange { port })
}
