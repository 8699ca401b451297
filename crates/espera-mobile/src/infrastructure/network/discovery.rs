//! Discovery broadcaster: lets mobile clients find the desktop without setup.
//!
//! Every cycle the broadcaster:
//!
//! 1. Enumerates the local IPv4 addresses (see [`subnet`](super::subnet)).
//! 2. For each address, sends the discovery datagram to every other host on
//!    its `/24` (last octet `1..=254`, own octet skipped) at the service port.
//! 3. Sleeps for the sweep interval (1 second by default).
//!
//! A mobile client that hears the datagram learns the desktop's address from
//! the datagram's source and connects over TCP on the same port.
//!
//! # Why a unicast sweep instead of a broadcast? (for beginners)
//!
//! A UDP *broadcast* is a single datagram addressed to `255.255.255.255` (or
//! the subnet's broadcast address, such as `192.168.1.255`) that the network
//! delivers to every host at once.  Many Wi-Fi access points and phone
//! operating systems filter or rate-limit broadcast traffic to save battery,
//! so a phone often never sees it.
//!
//! A *unicast sweep* sends an ordinary datagram to each possible host address
//! in turn instead:
//!
//! ```text
//! desktop 192.168.1.42                        phones on the LAN
//! ────────────────────                        ─────────────────
//! send "espera-server-discovery" ──► 192.168.1.1
//! send "espera-server-discovery" ──► 192.168.1.2
//!   ...                                 (own address .42 skipped)
//! send "espera-server-discovery" ──► 192.168.1.254
//! ```
//!
//! Each datagram is small (46 bytes), so a full `/24` sweep is about 12 KB.
//! Addresses with no host behind them simply drop the datagram; UDP has no
//! handshake, so nothing waits for a reply.
//!
//! # Blocking sends
//!
//! One sweep is ~253 `send_to` calls per subnet on a plain
//! `std::net::UdpSocket`.  The whole sweep runs as a single
//! `spawn_blocking` job rather than hundreds of async sends.
//!
//! # Shutdown
//!
//! The cancellation token is checked at the top of every cycle.  A sweep in
//! progress is allowed to finish and the loop then exits, so shutdown takes
//! at most one sweep plus one interval.  The sleep is cut short by the token.
//!
//! # Failures
//!
//! Discovery is lossy by nature and repeats every second, so a failed send is
//! dropped and counted, never retried or reported to the caller.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use espera_core::discovery::{encode_discovery_message, sweep_targets};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::subnet::{local_ipv4_addresses, AddressSource};

/// Default pause between two sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest pause the service accepts between two sweeps.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Destination for discovery datagrams.
#[cfg_attr(test, mockall::automock)]
pub trait DatagramSink: Send + Sync {
    fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, payload, target)
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Number of local subnets swept.
    pub subnets: usize,
    /// Datagrams handed to the OS.
    pub sent: usize,
    /// Datagrams whose send failed.
    pub failed: usize,
}

/// Periodically announces the service on every local subnet.
pub struct DiscoveryBroadcaster {
    sink: Arc<dyn DatagramSink>,
    addresses: Arc<dyn AddressSource>,
    port: u16,
    interval: Duration,
    payload: Arc<[u8]>,
}

impl DiscoveryBroadcaster {
    pub fn new(
        sink: Arc<dyn DatagramSink>,
        addresses: Arc<dyn AddressSource>,
        port: u16,
        interval: Duration,
    ) -> Self {
        Self {
            sink,
            addresses,
            port,
            interval,
            payload: encode_discovery_message().into(),
        }
    }

    /// Creates the UDP socket used for discovery sends.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if no ephemeral UDP port can be bound.
    pub fn bind_socket() -> io::Result<UdpSocket> {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
    }

    /// Enumerates local subnets and sweeps each of them once.
    ///
    /// Blocks for the duration of the sweep.
    pub fn sweep_once(&self) -> SweepReport {
        let locals = local_ipv4_addresses(self.addresses.as_ref());
        let mut report = SweepReport {
            subnets: locals.len(),
            ..SweepReport::default()
        };
        for local in locals {
            sweep_subnet(self.sink.as_ref(), local, self.port, &self.payload, &mut report);
        }
        report
    }

    /// Runs sweeps until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "discovery broadcaster started on port {} (every {:?})",
            self.port, self.interval
        );
        let this = Arc::new(self);
        let mut had_subnets = true;

        while !shutdown.is_cancelled() {
            let sweeper = Arc::clone(&this);
            let report = match tokio::task::spawn_blocking(move || sweeper.sweep_once()).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("discovery sweep task failed: {e}");
                    SweepReport::default()
                }
            };

            if report.subnets == 0 {
                if had_subnets {
                    warn!("no local IPv4 subnet found; mobile clients cannot discover this host");
                }
                had_subnets = false;
            } else {
                had_subnets = true;
                debug!(
                    "discovery sweep: {} subnet(s), {} sent, {} failed",
                    report.subnets, report.sent, report.failed
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(this.interval) => {}
            }
        }

        info!("discovery broadcaster stopped");
    }
}

/// Sends the payload to every sweep target of `local`'s subnet.
fn sweep_subnet(
    sink: &dyn DatagramSink,
    local: Ipv4Addr,
    port: u16,
    payload: &[u8],
    report: &mut SweepReport,
) {
    for host in sweep_targets(local) {
        let target = SocketAddr::V4(SocketAddrV4::new(host, port));
        match sink.send_to(payload, target) {
            Ok(_) => report.sent += 1,
            Err(e) => {
                trace!("discovery datagram to {target} dropped: {e}");
                report.failed += 1;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
