//! Local IPv4 address enumeration for the discovery sweep.
//!
//! The desktop resolves its own host name through the system resolver and
//! keeps every IPv4 result, which yields one address per configured LAN
//! interface on typical desktop setups.  Many Linux distributions map the
//! host name to `127.0.1.1` only; when the resolver produces no usable
//! address the enumerator falls back to the outbound-route probe.
//!
//! Enumeration is best-effort: failures produce an empty list, which simply
//! means the current discovery cycle sends nothing.

use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};

use tracing::debug;

/// Public addresses used to learn the default outbound interface.  The probe
/// only connects a UDP socket; no packet is sent.
const ROUTE_PROBE_TARGETS: [&str; 2] = ["8.8.8.8:80", "1.1.1.1:80"];

/// Source of the host's network addresses.
#[cfg_attr(test, mockall::automock)]
pub trait AddressSource: Send + Sync {
    /// Returns every address the host is known by, in any family.
    fn host_addresses(&self) -> io::Result<Vec<IpAddr>>;
}

/// Resolves the local host name via the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostnameResolver;

impl AddressSource for HostnameResolver {
    fn host_addresses(&self) -> io::Result<Vec<IpAddr>> {
        let hostname = gethostname::gethostname();
        let hostname = hostname.to_string_lossy();
        let mut addrs: Vec<IpAddr> = (hostname.as_ref(), 0u16)
            .to_socket_addrs()?
            .map(|sa| sa.ip())
            .collect();

        if !addrs.iter().any(|ip| is_sweepable(*ip)) {
            if let Some(ip) = route_probe() {
                debug!("host name {hostname} has no LAN address; using route probe {ip}");
                addrs.push(ip);
            }
        }
        Ok(addrs)
    }
}

/// Returns the local IPv4 addresses to sweep, in ascending order.
///
/// IPv6, loopback, and unspecified addresses are dropped and duplicates
/// removed.  A resolution error yields an empty list.
pub fn local_ipv4_addresses(source: &dyn AddressSource) -> Vec<Ipv4Addr> {
    let addrs = match source.host_addresses() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("local address resolution failed: {e}");
            return Vec::new();
        }
    };

    addrs
        .into_iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) if is_sweepable(ip) => Some(v4),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn is_sweepable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_unspecified(),
        IpAddr::V6(_) => false,
    }
}

/// Learns the address of the default outbound interface.
fn route_probe() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    if !ROUTE_PROBE_TARGETS
        .iter()
        .any(|target| socket.connect(target).is_ok())
    {
        return None;
    }
    socket.local_addr().ok().map(|addr| addr.ip())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn source_returning(addrs: Vec<IpAddr>) -> MockAddressSource {
        let mut source = MockAddressSource::new();
        source
            .expect_host_addresses()
            .returning(move || Ok(addrs.clone()));
        source
    }

    #[test]
    fn test_local_ipv4_addresses_excludes_ipv6() {
        // Arrange
        let source = source_returning(vec![
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)),
        ]);

        // Act
        let result = local_ipv4_addresses(&source);

        // Assert
        assert_eq!(result, vec![Ipv4Addr::new(192, 168, 1, 42)]);
    }

    #[test]
    fn test_local_ipv4_addresses_excludes_loopback_and_unspecified() {
        let source = source_returning(vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(127, 0, 1, 1)),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        ]);

        assert_eq!(
            local_ipv4_addresses(&source),
            vec![Ipv4Addr::new(10, 0, 0, 5)]
        );
    }

    #[test]
    fn test_local_ipv4_addresses_deduplicates_and_sorts() {
        let source = source_returning(vec![
            IpAddr::V4(Ipv4Addr::new(192, 168, 2, 9)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 2, 9)),
        ]);

        assert_eq!(
            local_ipv4_addresses(&source),
            vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(192, 168, 2, 9)]
        );
    }

    #[test]
    fn test_local_ipv4_addresses_returns_empty_on_resolution_error() {
        // Arrange
        let mut source = MockAddressSource::new();
        source
            .expect_host_addresses()
            .times(1)
            .returning(|| Err(io::Error::new(io::ErrorKind::NotFound, "no such host")));

        // Act / Assert
        assert!(local_ipv4_addresses(&source).is_empty());
    }

    #[test]
    fn test_is_sweepable_rejects_ipv6_loopback() {
        assert!(!is_sweepable(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_sweepable(IpAddr::V4(Ipv4Addr::new(172, 16, 4, 2))));
    }

    #[test]
    fn test_hostname_resolver_does_not_panic() {
        // The result depends on the host; only the absence of a panic is asserted.
        let _ = HostnameResolver.host_addresses();
    }
}
