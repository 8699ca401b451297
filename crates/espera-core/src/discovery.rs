//! Discovery payload and sweep addressing.
//!
//! # Why a sweep instead of a broadcast?
//!
//! Sending one datagram to the subnet broadcast address (`192.168.1.255`) is
//! the textbook way to reach every host.  In practice many access points and
//! consumer routers drop or rate-limit broadcast traffic, especially on
//! Wi-Fi where the phones live.  The desktop therefore sends a *unicast*
//! datagram to every host address on its subnet instead: 253 small packets
//! per subnet per cycle is cheap, and unicast is delivered reliably.
//!
//! The sweep assumes a `/24` network: the first three octets of the local
//! address are kept and the last octet runs over `1..=254`, skipping the
//! local host itself.
//!
//! # Wire format
//!
//! The payload is the ASCII literal [`DISCOVERY_MESSAGE`] encoded as UTF-16
//! little-endian with no byte-order mark and no terminator (46 bytes).

use std::net::Ipv4Addr;

/// The literal text carried by every discovery datagram.
pub const DISCOVERY_MESSAGE: &str = "espera-server-discovery";

/// First host octet of a sweep.
const FIRST_HOST_OCTET: u8 = 1;

/// Last host octet of a sweep (`255` is the broadcast address).
const LAST_HOST_OCTET: u8 = 254;

/// Encodes [`DISCOVERY_MESSAGE`] as UTF-16LE bytes.
pub fn encode_discovery_message() -> Vec<u8> {
    DISCOVERY_MESSAGE
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Returns `true` if `datagram` is exactly the encoded discovery payload.
///
/// Mobile clients use this to ignore unrelated traffic on the port.
pub fn is_discovery_message(datagram: &[u8]) -> bool {
    if datagram.len() != DISCOVERY_MESSAGE.len() * 2 {
        return false;
    }
    datagram
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .eq(DISCOVERY_MESSAGE.encode_utf16())
}

/// Returns every sweep target on the `/24` subnet of `local`.
///
/// The last octet runs over `1..=254`; the local host's own octet is skipped,
/// so a host whose last octet is inside that range yields 253 targets.
pub fn sweep_targets(local: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> {
    let [a, b, c, own] = local.octets();
    (FIRST_HOST_OCTET..=LAST_HOST_OCTET)
        .filter(move |&host| host != own)
        .map(move |host| Ipv4Addr::new(a, b, c, host))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_discovery_message_is_utf16_little_endian() {
        // Arrange / Act
        let bytes = encode_discovery_message();

        // Assert
        assert_eq!(bytes.len(), 46);
        assert_eq!(&bytes[..4], &[b'e', 0, b's', 0]);
        assert_eq!(&bytes[44..], &[b'y', 0]);
    }

    #[test]
    fn test_is_discovery_message_accepts_encoded_payload() {
        let bytes = encode_discovery_message();
        assert!(is_discovery_message(&bytes));
    }

    #[test]
    fn test_is_discovery_message_rejects_ascii_payload() {
        // The same text in single-byte encoding must not be mistaken for a discovery datagram.
        assert!(!is_discovery_message(DISCOVERY_MESSAGE.as_bytes()));
    }

    #[test]
    fn test_is_discovery_message_rejects_big_endian_payload() {
        let be: Vec<u8> = DISCOVERY_MESSAGE
            .encode_utf16()
            .flat_map(u16::to_be_bytes)
            .collect();
        assert!(!is_discovery_message(&be));
    }

    #[test]
    fn test_is_discovery_message_rejects_empty_and_truncated() {
        let bytes = encode_discovery_message();
        assert!(!is_discovery_message(&[]));
        assert!(!is_discovery_message(&bytes[..bytes.len() - 2]));
    }

    #[test]
    fn test_sweep_targets_skips_local_octet() {
        // Arrange
        let local = Ipv4Addr::new(192, 168, 1, 42);

        // Act
        let targets: Vec<Ipv4Addr> = sweep_targets(local).collect();

        // Assert
        assert_eq!(targets.len(), 253);
        assert!(!targets.contains(&local));
        assert_eq!(targets.first(), Some(&Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(targets.last(), Some(&Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[test]
    fn test_sweep_targets_keeps_first_three_octets() {
        let targets: Vec<Ipv4Addr> = sweep_targets(Ipv4Addr::new(10, 20, 30, 7)).collect();
        assert!(targets
            .iter()
            .all(|t| t.octets()[..3] == [10, 20, 30]));
    }

    #[test]
    fn test_sweep_targets_for_out_of_range_own_octet_covers_full_range() {
        // A host ending in .255 or .0 has no octet inside 1..=254 to skip.
        assert_eq!(sweep_targets(Ipv4Addr::new(172, 16, 0, 255)).count(), 254);
        assert_eq!(sweep_targets(Ipv4Addr::new(172, 16, 0, 0)).count(), 254);
    }
}
