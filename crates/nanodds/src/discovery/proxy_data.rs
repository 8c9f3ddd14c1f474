// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote participant record built from SPDP announcements.
//!
//! Deserialized from the PL_CDR parameter list a peer broadcasts;
//! refreshed on every later SPDP or HEARTBEAT; reaped once its lease (or
//! the configured ceiling, whichever is shorter) elapses without a sign
//! of life.

use std::time::Instant;

use crate::config::{RtpsConfig, SPDP_DEFAULT_REMOTE_LEASE, SPDP_MAX_REMOTE_LEASE, SPDP_MAX_NUM_LOCATORS};
use crate::core::duration::RtpsDuration;
use crate::core::guid::Guid;
use crate::core::locator::{Locator, LocatorIpv4};
use crate::error::{Error, Result};
use crate::protocol::cdr::{CdrReader, CdrWriter};
use crate::protocol::constants::{
    BIE_PARTICIPANT_ANNOUNCER, BIE_PARTICIPANT_DETECTOR, BIE_PUBLICATION_ANNOUNCER,
    BIE_PUBLICATION_DETECTOR, BIE_SUBSCRIPTION_ANNOUNCER, BIE_SUBSCRIPTION_DETECTOR,
    PID_BUILTIN_ENDPOINT_SET, PID_DEFAULT_MULTICAST_LOCATOR, PID_DEFAULT_UNICAST_LOCATOR,
    PID_EXPECTS_INLINE_QOS, PID_METATRAFFIC_MULTICAST_LOCATOR, PID_METATRAFFIC_UNICAST_LOCATOR,
    PID_PARTICIPANT_GUID, PID_PARTICIPANT_LEASE_DURATION, PID_PROTOCOL_VERSION, PID_SENTINEL,
    PID_VENDOR_ID, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, VENDOR_UNKNOWN,
};

type LocatorList = [LocatorIpv4; SPDP_MAX_NUM_LOCATORS];

/// Everything we know about a remote participant.
#[derive(Debug, Clone)]
pub struct ParticipantProxyData {
    pub guid: Guid,
    pub protocol_version: (u8, u8),
    pub vendor_id: [u8; 2],
    pub expects_inline_qos: bool,
    pub available_builtin_endpoints: u32,
    pub metatraffic_unicast_locators: LocatorList,
    pub metatraffic_multicast_locators: LocatorList,
    pub default_unicast_locators: LocatorList,
    pub default_multicast_locators: LocatorList,
    pub lease_duration: RtpsDuration,
    last_liveliness: Instant,
}

impl Default for ParticipantProxyData {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticipantProxyData {
    pub fn new() -> Self {
        Self {
            guid: Guid::unknown(),
            protocol_version: (PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR),
            vendor_id: VENDOR_UNKNOWN,
            expects_inline_qos: false,
            available_builtin_endpoints: 0,
            metatraffic_unicast_locators: [LocatorIpv4::invalid(); SPDP_MAX_NUM_LOCATORS],
            metatraffic_multicast_locators: [LocatorIpv4::invalid(); SPDP_MAX_NUM_LOCATORS],
            default_unicast_locators: [LocatorIpv4::invalid(); SPDP_MAX_NUM_LOCATORS],
            default_multicast_locators: [LocatorIpv4::invalid(); SPDP_MAX_NUM_LOCATORS],
            lease_duration: SPDP_DEFAULT_REMOTE_LEASE,
            last_liveliness: Instant::now(),
        }
    }

    /// Reset to the empty state so a table slot can be reused.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // Built-in endpoint bitmask accessors.

    pub fn has_participant_writer(&self) -> bool {
        self.available_builtin_endpoints & BIE_PARTICIPANT_ANNOUNCER != 0
    }

    pub fn has_participant_reader(&self) -> bool {
        self.available_builtin_endpoints & BIE_PARTICIPANT_DETECTOR != 0
    }

    pub fn has_publication_writer(&self) -> bool {
        self.available_builtin_endpoints & BIE_PUBLICATION_ANNOUNCER != 0
    }

    pub fn has_publication_reader(&self) -> bool {
        self.available_builtin_endpoints & BIE_PUBLICATION_DETECTOR != 0
    }

    pub fn has_subscription_writer(&self) -> bool {
        self.available_builtin_endpoints & BIE_SUBSCRIPTION_ANNOUNCER != 0
    }

    pub fn has_subscription_reader(&self) -> bool {
        self.available_builtin_endpoints & BIE_SUBSCRIPTION_DETECTOR != 0
    }

    /// Record a sign of life (SPDP receipt or HEARTBEAT).
    pub fn on_alive_signal(&mut self) {
        self.last_liveliness = Instant::now();
    }

    /// Milliseconds since the last sign of life.
    pub fn alive_signal_age_ms(&self) -> u64 {
        u64::try_from(self.last_liveliness.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Alive iff the age stays within the announced lease, capped by the
    /// configured maximum.
    pub fn is_alive(&self) -> bool {
        let lease_ms = self
            .lease_duration
            .as_millis()
            .min(SPDP_MAX_REMOTE_LEASE.as_millis());
        self.alive_signal_age_ms() <= lease_ms
    }

    /// First usable meta-traffic unicast locator (SEDP destination).
    pub fn metatraffic_unicast_locator(&self) -> Option<LocatorIpv4> {
        self.metatraffic_unicast_locators
            .iter()
            .find(|l| l.is_valid())
            .copied()
    }

    /// Deserialize from a parameter list positioned after the
    /// encapsulation header.
    pub fn read_from(reader: &mut CdrReader<'_>, config: &RtpsConfig) -> Result<Self> {
        let mut data = Self::new();

        while reader.remaining() >= 4 {
            let pid = reader.read_u16()?;
            let length = usize::from(reader.read_u16()?);
            if reader.remaining() < length {
                return Err(Error::Malformed);
            }
            let value_start = reader.position();

            match pid {
                PID_SENTINEL => return Ok(data),
                PID_PROTOCOL_VERSION => {
                    let major = reader.read_u8()?;
                    if major < PROTOCOL_VERSION_MAJOR {
                        return Err(Error::Malformed);
                    }
                    data.protocol_version = (major, reader.read_u8()?);
                }
                PID_VENDOR_ID => {
                    data.vendor_id = reader.read_array()?;
                }
                PID_EXPECTS_INLINE_QOS => {
                    data.expects_inline_qos = reader.read_bool()?;
                }
                PID_PARTICIPANT_GUID => {
                    data.guid = Guid::from_bytes(reader.read_array()?);
                }
                PID_METATRAFFIC_UNICAST_LOCATOR => {
                    read_locator_into_list(
                        reader,
                        &mut data.metatraffic_unicast_locators,
                        config,
                    )?;
                }
                PID_METATRAFFIC_MULTICAST_LOCATOR => {
                    read_locator_into_list(
                        reader,
                        &mut data.metatraffic_multicast_locators,
                        config,
                    )?;
                }
                PID_DEFAULT_UNICAST_LOCATOR => {
                    read_locator_into_list(reader, &mut data.default_unicast_locators, config)?;
                }
                PID_DEFAULT_MULTICAST_LOCATOR => {
                    read_locator_into_list(
                        reader,
                        &mut data.default_multicast_locators,
                        config,
                    )?;
                }
                PID_PARTICIPANT_LEASE_DURATION => {
                    let seconds = reader.read_i32()?;
                    let fraction = reader.read_u32()?;
                    data.lease_duration = RtpsDuration::new(seconds, fraction);
                }
                PID_BUILTIN_ENDPOINT_SET => {
                    data.available_builtin_endpoints = reader.read_u32()?;
                }
                _ => {}
            }

            let consumed = reader.position() - value_start;
            if consumed < length {
                reader.advance(length - consumed)?;
            }
            reader.align_to(4)?;
        }

        // A missing sentinel is tolerated only when the list ends exactly
        // at the buffer end.
        if reader.remaining() == 0 {
            Ok(data)
        } else {
            Err(Error::Malformed)
        }
    }

    /// Serialize the announcement parameter list, sentinel included. The
    /// caller prepends the PL_CDR_LE encapsulation header.
    pub fn write_into(&self, writer: &mut CdrWriter) {
        writer.write_u16(PID_PROTOCOL_VERSION);
        writer.write_u16(4);
        writer.write_u8(self.protocol_version.0);
        writer.write_u8(self.protocol_version.1);
        writer.write_u16(0); // padding

        writer.write_u16(PID_VENDOR_ID);
        writer.write_u16(4);
        writer.write_bytes(&self.vendor_id);
        writer.write_u16(0); // padding

        for (pid, list) in [
            (PID_DEFAULT_UNICAST_LOCATOR, &self.default_unicast_locators),
            (PID_DEFAULT_MULTICAST_LOCATOR, &self.default_multicast_locators),
            (PID_METATRAFFIC_UNICAST_LOCATOR, &self.metatraffic_unicast_locators),
            (PID_METATRAFFIC_MULTICAST_LOCATOR, &self.metatraffic_multicast_locators),
        ] {
            for locator in list.iter().filter(|l| l.is_valid()) {
                writer.write_u16(pid);
                writer.write_u16(24);
                writer.write_locator(&Locator::from(*locator));
            }
        }

        writer.write_u16(PID_PARTICIPANT_LEASE_DURATION);
        writer.write_u16(8);
        writer.write_i32(self.lease_duration.seconds);
        writer.write_u32(self.lease_duration.fraction);

        writer.write_u16(PID_PARTICIPANT_GUID);
        writer.write_u16(16);
        writer.write_bytes(&self.guid.as_bytes());

        writer.write_u16(PID_BUILTIN_ENDPOINT_SET);
        writer.write_u16(4);
        writer.write_u32(self.available_builtin_endpoints);

        writer.write_u16(PID_SENTINEL);
        writer.write_u16(0);
    }
}

/// Read one full-length locator and file it into the first free slot.
///
/// Unicast locators outside the local subnet are dropped (we could not
/// reach them anyway); multicast locators always pass. A full list drops
/// the locator on the floor.
fn read_locator_into_list(
    reader: &mut CdrReader<'_>,
    list: &mut LocatorList,
    config: &RtpsConfig,
) -> Result<()> {
    let locator = reader.read_locator()?;
    if !locator.is_udpv4() {
        return Ok(());
    }
    let reachable = locator.is_multicast() || config.is_same_subnet(locator.ipv4());
    if !reachable {
        log::trace!("[spdp] ignoring unreachable locator {}", locator.ipv4());
        return Ok(());
    }

    if let Some(slot) = list.iter_mut().find(|l| !l.is_valid()) {
        *slot = LocatorIpv4::from(locator);
    } else {
        log::trace!("[spdp] locator list full, dropping {}", locator.ipv4());
    }
    Ok(())
}
