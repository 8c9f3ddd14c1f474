// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side reliability protocol.
//!
//! [`StatefulReader`] delivers DATA in sequence-number order per matched
//! writer and answers HEARTBEAT/GAP with ACKNACK. Out-of-order DATA is
//! dropped, not buffered; reordering is recovered through the
//! heartbeat/acknack dialog. [`StatelessReader`] is the best-effort
//! variant used by SPDP, which must accept announcements from writers it
//! has never matched.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{MAX_CALLBACKS_PER_READER, MAX_PROXIES_PER_ENDPOINT};
use crate::core::guid::{Guid, GuidPrefix};
use crate::core::locator::LocatorIpv4;
use crate::core::sequence::{SequenceNumber, SequenceNumberSet};
use crate::discovery::topic_data::TopicData;
use crate::error::{Error, Result};
use crate::history::ChangeKind;
use crate::protocol::factory::{self, RtpsMessage};
use crate::protocol::submessages::{GapSubmessage, HeartbeatSubmessage};
use crate::reliability::proxy::WriterProxy;
use crate::transport::{NetworkDriver, PacketInfo};

/// A change as handed to reader callbacks: borrowed payload, valid for the
/// duration of the callback only.
#[derive(Debug, Clone, Copy)]
pub struct ReaderCacheChange<'a> {
    pub kind: ChangeKind,
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
    pub data: &'a [u8],
}

/// Callback invoked synchronously from the receive task. Must not block.
pub type ReaderCallback = Box<dyn Fn(&ReaderCacheChange<'_>) + Send + Sync>;

struct ReaderState {
    proxies: Vec<WriterProxy>,
    callbacks: Vec<ReaderCallback>,
    /// DATA dropped for being out of order, duplicate, or unmatched.
    dropped_changes: u64,
}

/// Reliable reader: per matched writer, delivers every DATA in SN order
/// and requests missing SNs.
pub struct StatefulReader<D: NetworkDriver> {
    attributes: TopicData,
    driver: Arc<D>,
    src_port: u16,
    state: Mutex<ReaderState>,
}

impl<D: NetworkDriver> StatefulReader<D> {
    pub fn new(attributes: TopicData, driver: Arc<D>, src_port: u16) -> Self {
        Self {
            attributes,
            driver,
            src_port,
            state: Mutex::new(ReaderState {
                proxies: Vec::with_capacity(MAX_PROXIES_PER_ENDPOINT),
                callbacks: Vec::with_capacity(MAX_CALLBACKS_PER_READER),
                dropped_changes: 0,
            }),
        }
    }

    pub fn attributes(&self) -> &TopicData {
        &self.attributes
    }

    pub fn guid(&self) -> Guid {
        self.attributes.endpoint_guid
    }

    /// Register a delivery callback. Fails once the fixed slots are used.
    pub fn register_callback(&self, callback: ReaderCallback) -> Result<()> {
        let mut state = self.state.lock();
        if state.callbacks.len() >= MAX_CALLBACKS_PER_READER {
            return Err(Error::CapacityExceeded);
        }
        state.callbacks.push(callback);
        Ok(())
    }

    /// Match a remote writer. A proxy for the same GUID is replaced in
    /// place (refreshed locator), so rediscovery is idempotent.
    pub fn add_matched_writer(&self, proxy: WriterProxy) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .proxies
            .iter_mut()
            .find(|p| p.remote_writer_guid == proxy.remote_writer_guid)
        {
            existing.remote_locator = proxy.remote_locator;
            return Ok(());
        }
        if state.proxies.len() >= MAX_PROXIES_PER_ENDPOINT {
            log::debug!(
                "[reader] proxy table full, rejecting writer {}",
                proxy.remote_writer_guid
            );
            return Err(Error::CapacityExceeded);
        }
        state.proxies.push(proxy);
        Ok(())
    }

    pub fn remove_writer(&self, writer_guid: &Guid) {
        let mut state = self.state.lock();
        state.proxies.retain(|p| p.remote_writer_guid != *writer_guid);
    }

    /// Drop every proxy belonging to a reaped remote participant.
    pub fn remove_writers_with_prefix(&self, prefix: &GuidPrefix) {
        let mut state = self.state.lock();
        state.proxies.retain(|p| p.remote_writer_guid.prefix != *prefix);
    }

    pub fn matches_writer(&self, writer_guid: &Guid) -> bool {
        self.state
            .lock()
            .proxies
            .iter()
            .any(|p| p.remote_writer_guid == *writer_guid)
    }

    /// Handle a DATA change. Delivered iff it is the next expected SN of a
    /// matched writer; everything else is dropped silently.
    pub fn new_change(&self, change: &ReaderCacheChange<'_>) {
        let mut state = self.state.lock();

        let Some(idx) = state
            .proxies
            .iter()
            .position(|p| p.remote_writer_guid == change.writer_guid)
        else {
            state.dropped_changes += 1;
            return;
        };

        if change.sequence_number != state.proxies[idx].expected_sn {
            state.dropped_changes += 1;
            log::trace!(
                "[reader] dropping sn {:?} from {} (expected {:?})",
                change.sequence_number,
                change.writer_guid,
                state.proxies[idx].expected_sn
            );
            return;
        }

        for callback in &state.callbacks {
            callback(change);
        }
        state.proxies[idx].expected_sn.advance();
    }

    /// Handle a HEARTBEAT: gate on the count, jump past discarded history,
    /// and answer with an ACKNACK listing what is still missing.
    pub fn on_new_heartbeat(&self, hb: &HeartbeatSubmessage, source_prefix: &GuidPrefix) -> bool {
        let writer_guid = Guid::new(*source_prefix, hb.writer_id);
        let packet;
        {
            let mut state = self.state.lock();
            let Some(proxy) = state
                .proxies
                .iter_mut()
                .find(|p| p.remote_writer_guid == writer_guid)
            else {
                return false;
            };

            if hb.count <= proxy.hb_count {
                return false;
            }
            proxy.hb_count = hb.count;

            // The writer discarded everything before firstSN.
            if proxy.expected_sn < hb.first_sn {
                proxy.expected_sn = hb.first_sn;
            }

            let mut missing = SequenceNumberSet::new(proxy.expected_sn);
            let mut sn = proxy.expected_sn;
            while sn <= hb.last_sn {
                if !missing.insert(sn) {
                    break;
                }
                sn.advance();
            }

            let count = proxy.next_ack_nack_count();
            let acknack = factory::encode_acknack(
                &self.attributes.endpoint_guid.entity_id,
                &hb.writer_id,
                &missing,
                count,
                missing.is_empty(),
            );
            packet = (self.wrap(acknack), proxy.remote_locator);
        }

        self.send(&packet.1, packet.0);
        true
    }

    /// Handle a GAP. Three cases, by where `expected_sn` falls relative to
    /// `gap_start` and the gap list base.
    pub fn on_new_gap_message(&self, gap: &GapSubmessage, source_prefix: &GuidPrefix) -> bool {
        let writer_guid = Guid::new(*source_prefix, gap.writer_id);
        let mut outgoing: Option<(Vec<u8>, LocatorIpv4)> = None;
        {
            let mut state = self.state.lock();
            let Some(proxy) = state
                .proxies
                .iter_mut()
                .find(|p| p.remote_writer_guid == writer_guid)
            else {
                return false;
            };

            let base = gap.gap_list.base;

            if proxy.expected_sn < gap.gap_start {
                // Everything before the gap is still retrievable: ask for it.
                let mut wanted = SequenceNumberSet::new(proxy.expected_sn);
                let mut sn = proxy.expected_sn;
                while sn < gap.gap_start {
                    if !wanted.insert(sn) {
                        break;
                    }
                    sn.advance();
                }
                let count = proxy.next_ack_nack_count();
                let acknack = factory::encode_acknack(
                    &self.attributes.endpoint_guid.entity_id,
                    &gap.writer_id,
                    &wanted,
                    count,
                    false,
                );
                outgoing = Some((self.wrap(acknack), proxy.remote_locator));
            } else if proxy.expected_sn < base {
                // Inside [gapStart, base): the contiguous range is declared
                // absent, then skip the bitmap-flagged SNs after base.
                proxy.expected_sn = base;
                let mut index = 0u32;
                while index < gap.gap_list.num_bits && gap.gap_list.bit_at(index) {
                    proxy.expected_sn.advance();
                    index += 1;
                }
            } else if let Some(offset) = proxy.expected_sn.offset_from(base) {
                // At or past the base: walk the bitmap from our position;
                // the first unset bit is still expected, request it.
                let mut index = u32::try_from(offset).unwrap_or(u32::MAX);
                while index < gap.gap_list.num_bits && gap.gap_list.bit_at(index) {
                    proxy.expected_sn.advance();
                    index += 1;
                }

                let mut wanted = SequenceNumberSet::new(proxy.expected_sn);
                wanted.insert(proxy.expected_sn);
                let count = proxy.next_ack_nack_count();
                let acknack = factory::encode_acknack(
                    &self.attributes.endpoint_guid.entity_id,
                    &gap.writer_id,
                    &wanted,
                    count,
                    false,
                );
                outgoing = Some((self.wrap(acknack), proxy.remote_locator));
            }
        }

        if let Some((packet, locator)) = outgoing {
            self.send(&locator, packet);
        }
        true
    }

    /// Zero-count ACKNACK with an empty set: prompts the remote writer to
    /// heartbeat. Sent right after a writer proxy is installed.
    pub fn send_preemptive_acknack(&self, writer_guid: &Guid) -> bool {
        let packet;
        {
            let state = self.state.lock();
            let Some(proxy) = state
                .proxies
                .iter()
                .find(|p| p.remote_writer_guid == *writer_guid)
            else {
                return false;
            };

            let empty = SequenceNumberSet::new(proxy.expected_sn);
            let acknack = factory::encode_acknack(
                &self.attributes.endpoint_guid.entity_id,
                &writer_guid.entity_id,
                &empty,
                0,
                false,
            );
            packet = (self.wrap(acknack), proxy.remote_locator);
        }

        self.send(&packet.1, packet.0);
        true
    }

    /// Diagnostic counter: DATA dropped as duplicate/out-of-order/unmatched.
    pub fn dropped_changes(&self) -> u64 {
        self.state.lock().dropped_changes
    }

    /// Expected SN of a matched writer (test/diagnostic hook).
    pub fn expected_sn_of(&self, writer_guid: &Guid) -> Option<SequenceNumber> {
        self.state
            .lock()
            .proxies
            .iter()
            .find(|p| p.remote_writer_guid == *writer_guid)
            .map(|p| p.expected_sn)
    }

    fn wrap(&self, submessage: Vec<u8>) -> Vec<u8> {
        RtpsMessage::new(&self.attributes.endpoint_guid.prefix)
            .append(&submessage)
            .into_bytes()
    }

    fn send(&self, locator: &LocatorIpv4, buffer: Vec<u8>) {
        if !locator.is_valid() {
            return;
        }
        let info = PacketInfo::new(
            self.src_port,
            locator.ipv4(),
            locator.port as u16,
            buffer,
        );
        if let Err(err) = self.driver.send_packet(&info) {
            log::debug!("[reader] acknack send failed: {}", err);
        }
    }
}

// ============================================================================
// STATELESS READER (SPDP)
// ============================================================================

/// Best-effort reader without proxy state: every ALIVE change is handed to
/// the callbacks regardless of origin or ordering. SPDP rides on this.
pub struct StatelessReader {
    attributes: TopicData,
    callbacks: Mutex<Vec<ReaderCallback>>,
}

impl StatelessReader {
    pub fn new(attributes: TopicData) -> Self {
        Self {
            attributes,
            callbacks: Mutex::new(Vec::with_capacity(MAX_CALLBACKS_PER_READER)),
        }
    }

    pub fn attributes(&self) -> &TopicData {
        &self.attributes
    }

    pub fn guid(&self) -> Guid {
        self.attributes.endpoint_guid
    }

    pub fn register_callback(&self, callback: ReaderCallback) -> Result<()> {
        let mut callbacks = self.callbacks.lock();
        if callbacks.len() >= MAX_CALLBACKS_PER_READER {
            return Err(Error::CapacityExceeded);
        }
        callbacks.push(callback);
        Ok(())
    }

    pub fn new_change(&self, change: &ReaderCacheChange<'_>) {
        if change.kind != ChangeKind::Alive {
            return;
        }
        for callback in self.callbacks.lock().iter() {
            callback(change);
        }
    }
}
