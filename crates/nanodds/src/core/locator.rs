// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locators (DDS-RTPS v2.5 Sec.9.3.2).
//!
//! The wire form is 24 bytes: kind (4) + port (4) + a 16-byte address.
//! IPv4 addresses occupy the last 4 bytes of the address field. In-memory
//! we keep the compact [`LocatorIpv4`] form: 4-byte suffix, port, validity
//! flag. Locator lists are fixed-size arrays with invalid unused slots.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Locator kind: UDP over IPv4.
pub const LOCATOR_KIND_UDPV4: i32 = 1;

/// Locator kind: unset slot.
pub const LOCATOR_KIND_INVALID: i32 = -1;

/// Full-length locator as carried on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    /// UDPv4 locator for an address/port pair.
    pub fn from_ipv4(addr: Ipv4Addr, port: u16) -> Self {
        let mut address = [0u8; 16];
        address[12..16].copy_from_slice(&addr.octets());
        Self {
            kind: LOCATOR_KIND_UDPV4,
            port: u32::from(port),
            address,
        }
    }

    /// Invalid placeholder locator.
    pub fn invalid() -> Self {
        Self {
            kind: LOCATOR_KIND_INVALID,
            port: 0,
            address: [0; 16],
        }
    }

    /// IPv4 suffix of the address field.
    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.address[12],
            self.address[13],
            self.address[14],
            self.address[15],
        )
    }

    pub fn is_udpv4(&self) -> bool {
        self.kind == LOCATOR_KIND_UDPV4
    }

    /// True for administratively-scoped IPv4 multicast (224.0.0.0/4).
    pub fn is_multicast(&self) -> bool {
        self.is_udpv4() && self.ipv4().is_multicast()
    }
}

/// Compact IPv4 locator held in proxy tables and locator lists.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocatorIpv4 {
    pub address: [u8; 4],
    pub port: u32,
    valid: bool,
}

impl LocatorIpv4 {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self {
            address: addr.octets(),
            port: u32::from(port),
            valid: true,
        }
    }

    /// Unset list slot.
    pub fn invalid() -> Self {
        Self {
            address: [0; 4],
            port: 0,
            valid: false,
        }
    }

    pub fn set_invalid(&mut self) {
        *self = Self::invalid();
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.address[0], self.address[1], self.address[2], self.address[3])
    }

    /// Destination socket address, truncating the RTPS u32 port to the UDP
    /// range.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ipv4(), self.port as u16))
    }
}

impl From<Locator> for LocatorIpv4 {
    fn from(loc: Locator) -> Self {
        if loc.is_udpv4() {
            Self {
                address: loc.ipv4().octets(),
                port: loc.port,
                valid: true,
            }
        } else {
            Self::invalid()
        }
    }
}

impl From<LocatorIpv4> for Locator {
    fn from(loc: LocatorIpv4) -> Self {
        if loc.valid {
            Locator::from_ipv4(loc.ipv4(), loc.port as u16)
        } else {
            Locator::invalid()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_ipv4_layout() {
        let loc = Locator::from_ipv4(Ipv4Addr::new(192, 168, 1, 7), 7410);
        assert_eq!(loc.kind, LOCATOR_KIND_UDPV4);
        assert_eq!(loc.port, 7410);
        assert_eq!(&loc.address[0..12], &[0u8; 12]);
        assert_eq!(&loc.address[12..16], &[192, 168, 1, 7]);
        assert_eq!(loc.ipv4(), Ipv4Addr::new(192, 168, 1, 7));
    }

    #[test]
    fn test_locator_multicast() {
        assert!(Locator::from_ipv4(Ipv4Addr::new(239, 255, 0, 1), 7400).is_multicast());
        assert!(!Locator::from_ipv4(Ipv4Addr::new(192, 168, 0, 1), 7400).is_multicast());
        assert!(!Locator::invalid().is_multicast());
    }

    #[test]
    fn test_compact_conversion() {
        let full = Locator::from_ipv4(Ipv4Addr::new(10, 0, 0, 9), 7411);
        let compact = LocatorIpv4::from(full);
        assert!(compact.is_valid());
        assert_eq!(compact.socket_addr().to_string(), "10.0.0.9:7411");
        assert_eq!(Locator::from(compact), full);

        let invalid = LocatorIpv4::from(Locator::invalid());
        assert!(!invalid.is_valid());
    }
}
