// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # nanodds - embedded RTPS wire protocol core
//!
//! An implementation of the RTPS (Real-Time Publish-Subscribe) wire
//! protocol that interoperates with full DDS stacks over UDP/IPv4, sized
//! for resource-constrained nodes: fixed slot arrays everywhere, bounded
//! history caches, no allocation in the steady-state path beyond reused
//! buffers.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                       Participant                            |
//! |  entity table | remote-participant table | periodic sweep    |
//! +--------------------------------------------------------------+
//! |  Discovery (SPDP/SEDP)    |  Reliability                     |
//! |  announcements, proxy     |  StatefulReader/Writer,          |
//! |  wire-up, lease expiry    |  HistoryCache, ACKNACK/GAP       |
//! +--------------------------------------------------------------+
//! |  Protocol: header/submessage codecs, MessageReceiver         |
//! +--------------------------------------------------------------+
//! |  Transport: NetworkDriver trait, UDP/IPv4 driver             |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nanodds::{Participant, ReliabilityKind, RtpsConfig, UdpTransport};
//!
//! fn main() -> nanodds::Result<()> {
//!     let config = Arc::new(RtpsConfig::localhost(0));
//!     let driver = Arc::new(UdpTransport::new(&config, 0)?);
//!     let participant = Participant::new(Arc::clone(&config), 0, Arc::clone(&driver))?;
//!
//!     let writer = participant.add_writer("sensors/temp", "Temperature", ReliabilityKind::Reliable)?;
//!     writer.new_change(b"\x01\x00\x00\x00");
//!
//!     // Receive loop: feed datagrams into the participant.
//!     let mut buf = [0u8; 1472];
//!     loop {
//!         if let Some((size, _from)) = driver.poll(&mut buf) {
//!             participant.new_message(&buf[..size]);
//!         }
//!     }
//! }
//! ```
//!
//! Discovery, heartbeats, and lease sweeps run on the participant's
//! periodic task; the receive loop above is the only thing the
//! application drives.

/// Global configuration: RTPS constants and the process-wide config record.
pub mod config;
/// Wire-level value types: GUIDs, sequence numbers, locators, durations.
pub mod core;
/// SPDP/SEDP discovery state machines and parameter-list codecs.
pub mod discovery;
/// Errors and the crate-wide `Result` alias.
pub mod error;
/// Bounded history cache of outgoing changes.
pub mod history;
/// The participant: entity owner and submessage router.
pub mod participant;
/// RTPS header/submessage codecs and the datagram receiver.
pub mod protocol;
/// Stateful reader/writer reliability protocol.
pub mod reliability;
/// Transport abstraction and the UDP/IPv4 driver.
pub mod transport;

pub use crate::core::{
    Guid, GuidPrefix, Locator, LocatorIpv4, SequenceNumber, SequenceNumberSet,
};
pub use config::RtpsConfig;
pub use discovery::{DurabilityKind, ParticipantProxyData, ReliabilityKind, TopicData};
pub use error::{Error, Result};
pub use history::{CacheChange, ChangeKind, HistoryCache};
pub use participant::Participant;
pub use reliability::{
    ReaderCacheChange, ReaderProxy, StatefulReader, StatefulWriter, StatelessReader, WriterProxy,
};
pub use transport::{NetworkDriver, PacketInfo, UdpTransport};
