// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction consumed by readers, writers, and discovery.
//!
//! The protocol core never touches sockets directly: everything outbound
//! goes through [`NetworkDriver::send_packet`], and the application's
//! receive loop feeds complete datagrams into `Participant::new_message`.
//! The driver is resolved at instantiation time (static polymorphism);
//! tests substitute a capturing mock.

pub mod udp;

use std::net::Ipv4Addr;

use crate::error::Result;

pub use udp::UdpTransport;

/// One outbound UDP datagram.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    /// Source port the packet should leave from (RTPS port-mapping rules).
    pub src_port: u16,
    pub dest_addr: Ipv4Addr,
    pub dest_port: u16,
    pub buffer: Vec<u8>,
}

impl PacketInfo {
    pub fn new(src_port: u16, dest_addr: Ipv4Addr, dest_port: u16, buffer: Vec<u8>) -> Self {
        Self {
            src_port,
            dest_addr,
            dest_port,
            buffer,
        }
    }
}

/// Capability interface over the UDP driver.
///
/// Send failures are non-fatal to the protocol: callers log and rely on
/// the heartbeat/acknack loop to recover. An asynchronous send is
/// acceptable as long as the buffer is consumed before returning.
pub trait NetworkDriver: Send + Sync + 'static {
    fn send_packet(&self, info: &PacketInfo) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Driver that records every packet instead of sending it.
    #[derive(Default)]
    pub struct MockDriver {
        pub sent: Mutex<Vec<PacketInfo>>,
    }

    impl MockDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn take_sent(&self) -> Vec<PacketInfo> {
            std::mem::take(&mut self.sent.lock())
        }
    }

    impl NetworkDriver for MockDriver {
        fn send_packet(&self, info: &PacketInfo) -> Result<()> {
            self.sent.lock().push(info.clone());
            Ok(())
        }
    }
}
