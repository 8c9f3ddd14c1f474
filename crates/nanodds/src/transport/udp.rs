// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP/IPv4 driver: three sockets per participant, mapped to the RTPS
//! port formulas.
//!
//! - discovery socket: bound to the SPDP multicast port, joined to
//!   239.255.0.1
//! - builtin socket: metatraffic unicast (SEDP, ACKNACK, HEARTBEAT)
//! - user socket: user data unicast
//!
//! Outbound packets leave through the socket whose local port matches
//! `PacketInfo::src_port`, so peers see spec-conformant source ports. All
//! sockets are non-blocking; the application drives [`UdpTransport::poll`]
//! and feeds datagrams into `Participant::new_message`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{
    builtin_unicast_port, spdp_multicast_port, user_unicast_port, RtpsConfig, MULTICAST_IP,
};
use crate::error::Result;
use crate::transport::{NetworkDriver, PacketInfo};

/// UDP transport bound to one participant's port set.
pub struct UdpTransport {
    discovery_socket: UdpSocket,
    builtin_socket: UdpSocket,
    user_socket: UdpSocket,
    builtin_port: u16,
    user_port: u16,
}

impl UdpTransport {
    /// Bind and configure the participant's sockets. Errors here are
    /// fatal to participant bring-up.
    pub fn new(config: &RtpsConfig, participant_id: u16) -> io::Result<Self> {
        let spdp_port = spdp_multicast_port(config.domain_id);
        let builtin_port = builtin_unicast_port(config.domain_id, participant_id);
        let user_port = user_unicast_port(config.domain_id, participant_id);

        let discovery_socket = bind_udp(spdp_port)?;
        discovery_socket.join_multicast_v4(&MULTICAST_IP, &config.local_ip)?;
        discovery_socket.set_multicast_loop_v4(true)?;
        log::debug!(
            "[udp] joined {} on iface {} (port {})",
            MULTICAST_IP,
            config.local_ip,
            spdp_port
        );

        let builtin_socket = bind_udp(builtin_port)?;
        let user_socket = bind_udp(user_port)?;
        log::debug!(
            "[udp] bound builtin port {} and user port {}",
            builtin_port,
            user_port
        );

        Ok(Self {
            discovery_socket,
            builtin_socket,
            user_socket,
            builtin_port,
            user_port,
        })
    }

    /// Non-blocking receive across all three sockets. Returns the first
    /// datagram available, if any.
    pub fn poll(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        for socket in [
            &self.discovery_socket,
            &self.builtin_socket,
            &self.user_socket,
        ] {
            match socket.recv_from(buf) {
                Ok((size, from)) => return Some((size, from)),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => {
                    log::debug!("[udp] recv error: {}", err);
                    continue;
                }
            }
        }
        None
    }

    pub fn builtin_port(&self) -> u16 {
        self.builtin_port
    }

    pub fn user_port(&self) -> u16 {
        self.user_port
    }

    fn socket_for(&self, src_port: u16) -> &UdpSocket {
        if src_port == self.user_port {
            &self.user_socket
        } else if src_port == self.builtin_port {
            &self.builtin_socket
        } else {
            &self.discovery_socket
        }
    }
}

impl NetworkDriver for UdpTransport {
    fn send_packet(&self, info: &PacketInfo) -> Result<()> {
        let dest = SocketAddr::V4(SocketAddrV4::new(info.dest_addr, info.dest_port));
        self.socket_for(info.src_port).send_to(&info.buffer, dest)?;
        Ok(())
    }
}

/// socket2 setup shared by all sockets: reuse-address (multiple
/// participants on one host), bound to the wildcard address,
/// non-blocking.
fn bind_udp(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_config(domain_id: u16) -> RtpsConfig {
        RtpsConfig::localhost(domain_id)
    }

    #[test]
    fn test_transport_binds_rtps_ports() {
        let transport = UdpTransport::new(&test_config(90), 0).expect("bind succeeds");
        assert_eq!(transport.builtin_port(), 7400 + 250 * 90 + 10);
        assert_eq!(transport.user_port(), 7400 + 250 * 90 + 11);
    }

    #[test]
    fn test_send_and_poll_loopback() {
        let config = test_config(91);
        let transport = Arc::new(UdpTransport::new(&config, 0).expect("bind succeeds"));

        let info = PacketInfo::new(
            transport.builtin_port(),
            Ipv4Addr::LOCALHOST,
            transport.user_port(),
            b"RTPS-test".to_vec(),
        );
        transport.send_packet(&info).expect("send succeeds");

        let mut buf = [0u8; 64];
        let mut received = None;
        for _ in 0..50 {
            if let Some((size, _from)) = transport.poll(&mut buf) {
                received = Some(size);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let size = received.expect("datagram arrives on loopback");
        assert_eq!(&buf[..size], b"RTPS-test");
    }

    #[test]
    fn test_two_participants_share_host() {
        let config = test_config(92);
        let _first = UdpTransport::new(&config, 0).expect("first binds");
        let second = UdpTransport::new(&config, 1).expect("second binds");
        assert_eq!(second.builtin_port(), 7400 + 250 * 92 + 10 + 2);
    }
}
