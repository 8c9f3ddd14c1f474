// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SEDP endpoint description: the parameter list a participant publishes
//! for each of its readers and writers.
//!
//! Doubles as the attribute record of local endpoints, so announcing an
//! endpoint is just serializing its attributes.

use crate::config::RtpsConfig;
use crate::core::guid::{EntityId, Guid};
use crate::core::locator::{Locator, LocatorIpv4};
use crate::error::{Error, Result};
use crate::protocol::cdr::{CdrReader, CdrWriter};
use crate::protocol::constants::{
    PID_DURABILITY, PID_ENDPOINT_GUID, PID_KEY_HASH, PID_MULTICAST_LOCATOR, PID_RELIABILITY,
    PID_SENTINEL, PID_STATUS_INFO, PID_TOPIC_NAME, PID_TYPE_NAME, PID_UNICAST_LOCATOR,
    STATUS_INFO_DISPOSED, STATUS_INFO_UNREGISTERED,
};

/// Longest topic/type name accepted off the wire.
const MAX_NAME_LENGTH: usize = 256;

/// Reliability kind as serialized in SEDP (DDS QoS policy values).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReliabilityKind {
    BestEffort = 1,
    Reliable = 2,
}

impl ReliabilityKind {
    fn from_wire(value: u32) -> Self {
        if value == ReliabilityKind::Reliable as u32 {
            Self::Reliable
        } else {
            Self::BestEffort
        }
    }
}

/// Durability kind as serialized in SEDP.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DurabilityKind {
    Volatile = 0,
    TransientLocal = 1,
}

impl DurabilityKind {
    fn from_wire(value: u32) -> Self {
        if value == DurabilityKind::TransientLocal as u32 {
            Self::TransientLocal
        } else {
            Self::Volatile
        }
    }
}

/// Endpoint metadata exchanged over SEDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicData {
    pub endpoint_guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub reliability: ReliabilityKind,
    pub durability: DurabilityKind,
    pub unicast_locator: LocatorIpv4,
    pub multicast_locator: LocatorIpv4,
    /// Last byte of PID_STATUS_INFO, when present.
    pub status_info: Option<u8>,
    /// Entity id recovered from PID_KEY_HASH, when present.
    pub entity_id_from_key_hash: Option<EntityId>,
}

impl TopicData {
    pub fn new(
        endpoint_guid: Guid,
        topic_name: &str,
        type_name: &str,
        reliability: ReliabilityKind,
        unicast_locator: LocatorIpv4,
    ) -> Self {
        Self {
            endpoint_guid,
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            reliability,
            durability: DurabilityKind::Volatile,
            unicast_locator,
            multicast_locator: LocatorIpv4::invalid(),
            status_info: None,
            entity_id_from_key_hash: None,
        }
    }

    /// Placeholder for built-in endpoints that never appear in SEDP.
    pub fn empty(endpoint_guid: Guid, reliability: ReliabilityKind) -> Self {
        Self::new(endpoint_guid, "", "", reliability, LocatorIpv4::invalid())
    }

    pub fn matches_topic_of(&self, other: &TopicData) -> bool {
        self.topic_name == other.topic_name && self.type_name == other.type_name
    }

    /// DDS status-info bit 0: instance disposed.
    pub fn is_disposed_flag_set(&self) -> bool {
        self.status_info
            .is_some_and(|info| info & STATUS_INFO_DISPOSED != 0)
    }

    /// DDS status-info bit 1: instance unregistered.
    pub fn is_unregistered_flag_set(&self) -> bool {
        self.status_info
            .is_some_and(|info| info & STATUS_INFO_UNREGISTERED != 0)
    }

    /// Copy of this record marked disposed and unregistered, as published
    /// when the local endpoint is withdrawn.
    pub fn as_disposal(&self) -> Self {
        let mut disposal = self.clone();
        disposal.status_info = Some(STATUS_INFO_DISPOSED | STATUS_INFO_UNREGISTERED);
        disposal
    }

    /// Deserialize from a parameter list. The reader must sit at the first
    /// parameter id (after the encapsulation header).
    ///
    /// Unknown pids are skipped; remote unicast locators outside the local
    /// subnet are ignored; the list may end at the sentinel or exactly at
    /// the buffer end.
    pub fn read_from(reader: &mut CdrReader<'_>, config: &RtpsConfig) -> Result<Self> {
        let mut data = Self::empty(Guid::unknown(), ReliabilityKind::BestEffort);

        while reader.remaining() >= 4 {
            let pid = reader.read_u16()?;
            let length = usize::from(reader.read_u16()?);
            if reader.remaining() < length {
                return Err(Error::Malformed);
            }
            let value_start = reader.position();

            match pid {
                PID_SENTINEL => return Ok(data),
                PID_ENDPOINT_GUID => {
                    data.endpoint_guid = Guid::from_bytes(reader.read_array()?);
                }
                PID_RELIABILITY => {
                    data.reliability = ReliabilityKind::from_wire(reader.read_u32()?);
                    // 8 trailing bytes: max_blocking_time, not interpreted
                }
                PID_DURABILITY => {
                    data.durability = DurabilityKind::from_wire(reader.read_u32()?);
                }
                PID_TOPIC_NAME => {
                    data.topic_name = read_wire_string(reader, length)?;
                }
                PID_TYPE_NAME => {
                    data.type_name = read_wire_string(reader, length)?;
                }
                PID_UNICAST_LOCATOR => {
                    let locator = reader.read_locator()?;
                    if locator.is_udpv4() && config.is_same_subnet(locator.ipv4()) {
                        data.unicast_locator = LocatorIpv4::from(locator);
                    }
                }
                PID_MULTICAST_LOCATOR => {
                    let locator = reader.read_locator()?;
                    if locator.is_multicast() {
                        data.multicast_locator = LocatorIpv4::from(locator);
                    }
                }
                PID_STATUS_INFO => {
                    if length == 4 {
                        // First 3 bytes are reserved.
                        reader.advance(3)?;
                        data.status_info = Some(reader.read_u8()?);
                    }
                }
                PID_KEY_HASH => {
                    if length == 16 {
                        let guid = Guid::from_bytes(reader.read_array()?);
                        data.endpoint_guid.prefix = guid.prefix;
                        data.entity_id_from_key_hash = Some(guid.entity_id);
                    }
                }
                _ => {}
            }

            // Always land exactly past the declared value, then realign.
            let consumed = reader.position() - value_start;
            if consumed < length {
                reader.advance(length - consumed)?;
            }
            reader.align_to(4)?;
        }

        if reader.remaining() == 0 {
            Ok(data)
        } else {
            Err(Error::Malformed)
        }
    }

    /// Serialize as a parameter list terminated by the sentinel. The
    /// caller writes the encapsulation header.
    pub fn write_into(&self, writer: &mut CdrWriter) {
        if self.unicast_locator.is_valid() {
            writer.write_u16(PID_UNICAST_LOCATOR);
            writer.write_u16(24);
            writer.write_locator(&Locator::from(self.unicast_locator));
        }
        if self.multicast_locator.is_valid() {
            writer.write_u16(PID_MULTICAST_LOCATOR);
            writer.write_u16(24);
            writer.write_locator(&Locator::from(self.multicast_locator));
        }

        write_wire_string(writer, PID_TOPIC_NAME, &self.topic_name);
        write_wire_string(writer, PID_TYPE_NAME, &self.type_name);

        writer.write_u16(PID_KEY_HASH);
        writer.write_u16(16);
        writer.write_bytes(&self.endpoint_guid.as_bytes());

        writer.write_u16(PID_ENDPOINT_GUID);
        writer.write_u16(16);
        writer.write_bytes(&self.endpoint_guid.as_bytes());

        writer.write_u16(PID_RELIABILITY);
        writer.write_u16(12);
        writer.write_u32(self.reliability as u32);
        writer.write_u32(0); // max_blocking_time seconds
        writer.write_u32(0); // max_blocking_time fraction

        writer.write_u16(PID_DURABILITY);
        writer.write_u16(4);
        writer.write_u32(self.durability as u32);

        if let Some(info) = self.status_info {
            writer.write_u16(PID_STATUS_INFO);
            writer.write_u16(4);
            // First 3 bytes are reserved.
            writer.write_bytes(&[0, 0, 0, info]);
        }

        writer.write_u16(PID_SENTINEL);
        writer.write_u16(0);
    }
}

/// Strings on the wire: u32 length (including NUL) + bytes + NUL + pad.
fn read_wire_string(reader: &mut CdrReader<'_>, param_length: usize) -> Result<String> {
    if param_length < 4 {
        return Err(Error::Malformed);
    }
    let char_count = reader.read_u32()? as usize;
    if char_count == 0 || char_count > MAX_NAME_LENGTH || char_count > param_length - 4 {
        return Err(Error::Malformed);
    }

    let bytes = reader.read_bytes(char_count)?;
    let without_nul = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    String::from_utf8(without_nul.to_vec()).map_err(|_| Error::Malformed)
}

fn write_wire_string(writer: &mut CdrWriter, pid: u16, value: &str) {
    let char_count = value.len() + 1; // trailing NUL
    let padding = (4 - (char_count % 4)) % 4;
    let total = 4 + char_count + padding;

    writer.write_u16(pid);
    writer.write_u16(total as u16);
    writer.write_u32(char_count as u32);
    writer.write_bytes(value.as_bytes());
    writer.write_u8(0);
    for _ in 0..padding {
        writer.write_u8(0);
    }
}
