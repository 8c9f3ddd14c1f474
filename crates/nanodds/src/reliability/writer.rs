// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side reliability protocol.
//!
//! A [`StatefulWriter`] owns a bounded [`HistoryCache`] of outgoing
//! changes and a reader-proxy table. ACKNACKs drive retransmission;
//! requested sequence numbers that have already been evicted are declared
//! absent with a GAP so the reader can move on. A periodic heartbeat
//! round (triggered by the participant sweep) announces the cache range
//! to every reliable proxy.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::MAX_PROXIES_PER_ENDPOINT;
use crate::core::guid::{Guid, GuidPrefix};
use crate::core::locator::LocatorIpv4;
use crate::core::sequence::{SequenceNumber, SequenceNumberSet};
use crate::discovery::topic_data::TopicData;
use crate::error::{Error, Result};
use crate::history::HistoryCache;
use crate::protocol::factory::{self, RtpsMessage};
use crate::protocol::submessages::AckNackSubmessage;
use crate::reliability::proxy::ReaderProxy;
use crate::transport::{NetworkDriver, PacketInfo};

struct WriterState {
    history: HistoryCache,
    proxies: Vec<ReaderProxy>,
    hb_count: u32,
}

/// Reliable writer: appends changes to its history cache and delivers
/// them to every matched reader.
pub struct StatefulWriter<D: NetworkDriver> {
    attributes: TopicData,
    driver: Arc<D>,
    src_port: u16,
    state: Mutex<WriterState>,
}

impl<D: NetworkDriver> StatefulWriter<D> {
    pub fn new(
        attributes: TopicData,
        driver: Arc<D>,
        src_port: u16,
        history_capacity: usize,
    ) -> Self {
        Self {
            attributes,
            driver,
            src_port,
            state: Mutex::new(WriterState {
                history: HistoryCache::with_capacity(history_capacity),
                proxies: Vec::with_capacity(MAX_PROXIES_PER_ENDPOINT),
                hb_count: 0,
            }),
        }
    }

    pub fn attributes(&self) -> &TopicData {
        &self.attributes
    }

    pub fn guid(&self) -> Guid {
        self.attributes.endpoint_guid
    }

    /// Append a change and push it to the matched readers. Returns the
    /// assigned sequence number.
    pub fn new_change(&self, data: &[u8]) -> SequenceNumber {
        self.new_change_with_flags(data, false, false)
    }

    /// Append with explicit inline-QoS / dispose-after-write flags (SEDP
    /// disposal path).
    pub fn new_change_with_flags(
        &self,
        data: &[u8],
        inline_qos: bool,
        dispose_after_write: bool,
    ) -> SequenceNumber {
        let sn;
        {
            let mut state = self.state.lock();
            sn = state
                .history
                .add_change(data, inline_qos, dispose_after_write)
                .sequence_number;
        }
        self.send_unsent_changes();
        sn
    }

    /// Match a remote reader. The new proxy's send cursor starts at the
    /// oldest cached change so late joiners receive the retained history.
    pub fn add_matched_reader(&self, mut proxy: ReaderProxy) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .proxies
            .iter_mut()
            .find(|p| p.remote_reader_guid == proxy.remote_reader_guid)
        {
            existing.remote_locator = proxy.remote_locator;
            return Ok(());
        }
        if state.proxies.len() >= MAX_PROXIES_PER_ENDPOINT {
            log::debug!(
                "[writer] proxy table full, rejecting reader {}",
                proxy.remote_reader_guid
            );
            return Err(Error::CapacityExceeded);
        }
        proxy.next_unsent = state.history.seq_num_min().unwrap_or(
            state.history.last_used_sequence_number().next(),
        );
        state.proxies.push(proxy);
        Ok(())
    }

    pub fn remove_reader(&self, reader_guid: &Guid) {
        let mut state = self.state.lock();
        state.proxies.retain(|p| p.remote_reader_guid != *reader_guid);
    }

    /// Drop every proxy belonging to a reaped remote participant.
    pub fn remove_readers_with_prefix(&self, prefix: &GuidPrefix) {
        let mut state = self.state.lock();
        state.proxies.retain(|p| p.remote_reader_guid.prefix != *prefix);
    }

    /// Handle an ACKNACK: gate on the count, record the acked position,
    /// retransmit requested changes still in the cache, and GAP the rest.
    pub fn on_new_acknack(&self, msg: &AckNackSubmessage, source_prefix: &GuidPrefix) -> bool {
        let reader_guid = Guid::new(*source_prefix, msg.reader_id);
        let mut outgoing: Vec<(LocatorIpv4, Vec<u8>)> = Vec::new();
        {
            let mut state = self.state.lock();
            let WriterState {
                history, proxies, ..
            } = &mut *state;

            {
                let Some(proxy) = proxies
                    .iter_mut()
                    .find(|p| p.remote_reader_guid == reader_guid)
                else {
                    return false;
                };

                if msg.count <= proxy.last_ack_nack_count {
                    return false;
                }
                proxy.last_ack_nack_count = msg.count;

                let base = msg.reader_sn_state.base;
                if !base.is_unknown() {
                    let acked = SequenceNumber::from_i64(base.as_i64() - 1);
                    proxy.update_acked(acked);
                    if proxy.next_unsent < base {
                        proxy.next_unsent = base;
                    }
                }

                let mut evicted: Vec<SequenceNumber> = Vec::new();
                for sn in msg.reader_sn_state.iter() {
                    match history.get_by_sn(sn) {
                        Some(change) => {
                            let data = factory::encode_data(
                                &proxy.remote_reader_guid.entity_id,
                                &self.attributes.endpoint_guid.entity_id,
                                change.sequence_number,
                                &change.data,
                            );
                            outgoing.push((proxy.remote_locator, self.wrap(data)));
                        }
                        None => evicted.push(sn),
                    }
                }

                // Requested but gone from the cache: declared absent via GAP.
                if let Some(first) = evicted.first().copied() {
                    let mut gap_list = SequenceNumberSet::new(first.next());
                    for sn in evicted.iter().skip(1) {
                        gap_list.insert(*sn);
                    }
                    let gap = factory::encode_gap(
                        &proxy.remote_reader_guid.entity_id,
                        &self.attributes.endpoint_guid.entity_id,
                        first,
                        &gap_list,
                    );
                    outgoing.push((proxy.remote_locator, self.wrap(gap)));
                }

                // Nothing requested means a plain ack or a preemptive
                // nudge; the proxy send cursor already advanced past
                // `base`.
            }

            // Disposal entries acknowledged by every reliable proxy have
            // done their job; drop them from the history.
            if history.dispose_after_write_count() > 0 {
                if let Some(acked) = proxies
                    .iter()
                    .filter(|p| p.is_reliable)
                    .map(|p| p.acked_up_to)
                    .min()
                {
                    history.drop_disposed_until_incl(acked);
                }
            }
        }

        for (locator, packet) in outgoing {
            self.send(&locator, packet);
        }
        true
    }

    /// Reset every proxy's send cursor to the oldest cached change. Used
    /// by the SPDP agent to rebroadcast, and to help newcomers catch up.
    pub fn unsent_changes_reset(&self) {
        let mut state = self.state.lock();
        let restart = state.history.seq_num_min();
        for proxy in &mut state.proxies {
            if let Some(min) = restart {
                proxy.next_unsent = min;
            }
        }
    }

    /// Push every not-yet-sent change to each proxy.
    pub fn send_unsent_changes(&self) {
        let mut outgoing: Vec<(LocatorIpv4, Vec<u8>)> = Vec::new();
        {
            let mut state = self.state.lock();
            let WriterState {
                history, proxies, ..
            } = &mut *state;

            let Some(max) = history.seq_num_max() else {
                return;
            };
            for proxy in proxies.iter_mut() {
                if let Some(min) = history.seq_num_min() {
                    if proxy.next_unsent < min {
                        proxy.next_unsent = min;
                    }
                }
                while proxy.next_unsent <= max {
                    let sn = proxy.next_unsent;
                    if let Some(change) = history.get_by_sn(sn) {
                        let data = factory::encode_data(
                            &proxy.remote_reader_guid.entity_id,
                            &self.attributes.endpoint_guid.entity_id,
                            change.sequence_number,
                            &change.data,
                        );
                        outgoing.push((proxy.remote_locator, self.wrap(data)));
                    }
                    proxy.next_unsent = sn.next();
                }
            }
        }

        for (locator, packet) in outgoing {
            self.send(&locator, packet);
        }
    }

    /// One heartbeat round: announce the cache range to every reliable
    /// proxy with the next count. Final flag is set when every proxy has
    /// acknowledged everything (or the cache is empty).
    pub fn send_heartbeat(&self) {
        let mut outgoing: Vec<(LocatorIpv4, Vec<u8>)> = Vec::new();
        {
            let mut state = self.state.lock();
            if state.proxies.iter().all(|p| !p.is_reliable) {
                return;
            }

            state.hb_count += 1;
            let count = state.hb_count;

            let last_used = state.history.last_used_sequence_number();
            let (first, last, empty) = match (
                state.history.seq_num_min(),
                state.history.seq_num_max(),
            ) {
                (Some(min), Some(max)) => (min, max, false),
                // Empty cache announces an empty range (first > last).
                _ => (last_used.next(), last_used, true),
            };

            let all_acked =
                empty || state.proxies.iter().all(|p| p.acked_up_to >= last);

            for proxy in state.proxies.iter().filter(|p| p.is_reliable) {
                let hb = factory::encode_heartbeat(
                    &proxy.remote_reader_guid.entity_id,
                    &self.attributes.endpoint_guid.entity_id,
                    first,
                    last,
                    count,
                    all_acked,
                );
                outgoing.push((proxy.remote_locator, self.wrap(hb)));
            }
        }

        for (locator, packet) in outgoing {
            self.send(&locator, packet);
        }
    }

    /// Remove one change from the cache. The SEDP agent deletes a
    /// superseded endpoint announcement this way when the endpoint is
    /// withdrawn.
    pub fn remove_change(&self, sn: SequenceNumber) -> bool {
        self.state.lock().history.drop_change(sn)
    }

    /// True when every reliable proxy acknowledged the full cache range.
    pub fn is_acked_by_all(&self) -> bool {
        let state = self.state.lock();
        match state.history.seq_num_max() {
            Some(max) => state
                .proxies
                .iter()
                .filter(|p| p.is_reliable)
                .all(|p| p.acked_up_to >= max),
            None => true,
        }
    }

    pub fn seq_num_min(&self) -> Option<SequenceNumber> {
        self.state.lock().history.seq_num_min()
    }

    pub fn seq_num_max(&self) -> Option<SequenceNumber> {
        self.state.lock().history.seq_num_max()
    }

    /// Acked position of a matched reader (test/diagnostic hook).
    pub fn acked_up_to_of(&self, reader_guid: &Guid) -> Option<SequenceNumber> {
        self.state
            .lock()
            .proxies
            .iter()
            .find(|p| p.remote_reader_guid == *reader_guid)
            .map(|p| p.acked_up_to)
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
            log::debug!("[writer] send failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::topic_data::ReliabilityKind;
    use crate::protocol::constants::SUBMSG_DATA;
    use crate::protocol::submessages::{
        decode_data, decode_gap, decode_heartbeat, MessageHeader, SubmessageHeader,
    };
    use std::net::Ipv4Addr;

    use crate::transport::mock::MockDriver;

    fn writer_attributes() -> TopicData {
        TopicData::new(
            Guid::new([4; 12], [0, 0, 1, 0x03]),
            "test/topic",
            "TestType",
            ReliabilityKind::Reliable,
            LocatorIpv4::new(Ipv4Addr::LOCALHOST, 7411),
        )
    }

    fn reader_guid() -> Guid {
        Guid::new([7; 12], [0, 0, 2, 0x04])
    }

    fn make_writer() -> (Arc<MockDriver>, StatefulWriter<MockDriver>) {
        let driver = Arc::new(MockDriver::new());
        let writer = StatefulWriter::new(writer_attributes(), Arc::clone(&driver), 7411, 8);
        (driver, writer)
    }

    fn matched_writer() -> (Arc<MockDriver>, StatefulWriter<MockDriver>) {
        let (driver, writer) = make_writer();
        writer
            .add_matched_reader(ReaderProxy::new(
                reader_guid(),
                LocatorIpv4::new(Ipv4Addr::new(10, 0, 0, 7), 7413),
                true,
            ))
            .expect("capacity available");
        (driver, writer)
    }

    fn acknack(base: u32, missing: &[u32], count: u32) -> AckNackSubmessage {
        let mut set = SequenceNumberSet::new(SequenceNumber::new(0, base));
        for low in missing {
            set.insert(SequenceNumber::new(0, *low));
        }
        AckNackSubmessage {
            reader_id: reader_guid().entity_id,
            writer_id: writer_attributes().endpoint_guid.entity_id,
            reader_sn_state: set,
            count,
            final_flag: false,
        }
    }

    #[test]
    fn test_new_change_pushes_data_to_proxies() {
        let (driver, writer) = matched_writer();
        let sn = writer.new_change(b"hello");
        assert_eq!(sn, SequenceNumber::FIRST);

        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        MessageHeader::decode(bytes).expect("rtps header");
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        assert_eq!(header.submessage_id, SUBMSG_DATA);
        let data = decode_data(&bytes[24..], &header).expect("data body");
        assert_eq!(data.serialized_payload, b"hello");
        assert_eq!(data.writer_sn, SequenceNumber::FIRST);
    }

    #[test]
    fn test_acknack_triggers_retransmit() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"one");
        writer.new_change(b"two");
        writer.new_change(b"three");
        driver.take_sent();

        // Reader has 1 and 3, wants 2.
        assert!(writer.on_new_acknack(&acknack(2, &[2], 1), &reader_guid().prefix));

        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let data = decode_data(&bytes[24..], &header).expect("data body");
        assert_eq!(data.serialized_payload, b"two");
        assert_eq!(data.writer_sn, SequenceNumber::new(0, 2));
    }

    #[test]
    fn test_acknack_count_gating() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"one");
        driver.take_sent();

        assert!(writer.on_new_acknack(&acknack(1, &[1], 2), &reader_guid().prefix));
        driver.take_sent();
        // Replayed count: dropped, no resend.
        assert!(!writer.on_new_acknack(&acknack(1, &[1], 2), &reader_guid().prefix));
        assert!(driver.take_sent().is_empty());
        // Older count: dropped too.
        assert!(!writer.on_new_acknack(&acknack(1, &[1], 1), &reader_guid().prefix));
        assert!(driver.take_sent().is_empty());
    }

    #[test]
    fn test_acknack_records_acked_position() {
        let (_driver, writer) = matched_writer();
        writer.new_change(b"one");
        writer.new_change(b"two");

        writer.on_new_acknack(&acknack(3, &[], 1), &reader_guid().prefix);
        assert_eq!(
            writer.acked_up_to_of(&reader_guid()),
            Some(SequenceNumber::new(0, 2))
        );
        assert!(writer.is_acked_by_all());

        // Regression attempt: acked position must not move backwards.
        writer.on_new_acknack(&acknack(2, &[], 2), &reader_guid().prefix);
        assert_eq!(
            writer.acked_up_to_of(&reader_guid()),
            Some(SequenceNumber::new(0, 2))
        );
    }

    #[test]
    fn test_evicted_request_answered_with_gap() {
        let (driver, writer) = matched_writer();
        // Capacity 8: writing 10 evicts SNs 1 and 2.
        for i in 0..10u8 {
            writer.new_change(&[i]);
        }
        driver.take_sent();

        writer.on_new_acknack(&acknack(1, &[1, 2], 1), &reader_guid().prefix);

        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let gap = decode_gap(&bytes[24..], &header).expect("gap body");
        assert_eq!(gap.gap_start, SequenceNumber::new(0, 1));
        assert_eq!(gap.gap_list.base, SequenceNumber::new(0, 2));
        assert!(gap.gap_list.bit_at(0)); // SN 2
    }

    #[test]
    fn test_heartbeat_round() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"x");
        writer.new_change(b"y");
        driver.take_sent();

        writer.send_heartbeat();
        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let hb = decode_heartbeat(&bytes[24..], &header).expect("hb body");
        assert_eq!(hb.first_sn, SequenceNumber::new(0, 1));
        assert_eq!(hb.last_sn, SequenceNumber::new(0, 2));
        assert_eq!(hb.count, 1);
        assert!(!hb.final_flag);

        // Second round increments the count.
        writer.send_heartbeat();
        let sent = driver.take_sent();
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let hb = decode_heartbeat(&bytes[24..], &header).expect("hb body");
        assert_eq!(hb.count, 2);
    }

    #[test]
    fn test_heartbeat_final_when_fully_acked() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"x");
        driver.take_sent();
        writer.on_new_acknack(&acknack(2, &[], 1), &reader_guid().prefix);
        driver.take_sent();

        writer.send_heartbeat();
        let sent = driver.take_sent();
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let hb = decode_heartbeat(&bytes[24..], &header).expect("hb body");
        assert!(hb.final_flag);
    }

    #[test]
    fn test_no_heartbeat_for_best_effort_proxies() {
        let (driver, writer) = make_writer();
        writer
            .add_matched_reader(ReaderProxy::new(
                reader_guid(),
                LocatorIpv4::new(Ipv4Addr::new(239, 255, 0, 1), 7400),
                false,
            ))
            .expect("capacity available");
        writer.new_change(b"spdp");
        driver.take_sent();

        writer.send_heartbeat();
        assert!(driver.take_sent().is_empty());
    }

    #[test]
    fn test_unsent_changes_reset_rebroadcasts() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"announce");
        driver.take_sent();

        writer.unsent_changes_reset();
        writer.send_unsent_changes();

        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let data = decode_data(&bytes[24..], &header).expect("data body");
        assert_eq!(data.serialized_payload, b"announce");
    }

    #[test]
    fn test_late_joiner_receives_history() {
        let (driver, writer) = make_writer();
        writer.new_change(b"early");
        driver.take_sent();

        writer
            .add_matched_reader(ReaderProxy::new(
                reader_guid(),
                LocatorIpv4::new(Ipv4Addr::new(10, 0, 0, 7), 7413),
                true,
            ))
            .expect("capacity available");
        writer.send_unsent_changes();

        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let data = decode_data(&bytes[24..], &header).expect("data body");
        assert_eq!(data.serialized_payload, b"early");
    }

    #[test]
    fn test_removed_change_answered_with_gap() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"stale announcement");
        writer.new_change(b"still valid");
        driver.take_sent();

        assert!(writer.remove_change(SequenceNumber::new(0, 1)));
        assert!(!writer.remove_change(SequenceNumber::new(0, 1)));

        // The reader still asks for SN 1; the writer can only GAP it.
        writer.on_new_acknack(&acknack(1, &[1], 1), &reader_guid().prefix);
        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let gap = decode_gap(&bytes[24..], &header).expect("gap body");
        assert_eq!(gap.gap_start, SequenceNumber::new(0, 1));
    }

    #[test]
    fn test_acked_disposal_is_purged() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"announcement"); // 1
        writer.new_change_with_flags(b"disposal", false, true); // 2
        driver.take_sent();
        assert_eq!(writer.seq_num_max(), Some(SequenceNumber::new(0, 2)));

        // Full acknowledgment: the disposal entry has served its purpose.
        writer.on_new_acknack(&acknack(3, &[], 1), &reader_guid().prefix);
        driver.take_sent();

        // A later request for the disposal SN gets a GAP, not a resend.
        writer.on_new_acknack(&acknack(1, &[2], 2), &reader_guid().prefix);
        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let gap = decode_gap(&bytes[24..], &header).expect("gap body");
        assert_eq!(gap.gap_start, SequenceNumber::new(0, 2));

        // The ordinary announcement is retained.
        assert_eq!(writer.seq_num_min(), Some(SequenceNumber::new(0, 1)));
    }

    #[test]
    fn test_unacked_disposal_is_retained() {
        let (driver, writer) = matched_writer();
        writer.new_change_with_flags(b"disposal", false, true); // 1
        driver.take_sent();

        // Reader acked nothing yet: a NACK for the disposal resends it.
        writer.on_new_acknack(&acknack(1, &[1], 1), &reader_guid().prefix);
        let sent = driver.take_sent();
        assert_eq!(sent.len(), 1);
        let bytes = &sent[0].buffer;
        let header = SubmessageHeader::decode(&bytes[20..]).expect("submsg");
        let data = decode_data(&bytes[24..], &header).expect("data body");
        assert_eq!(data.serialized_payload, b"disposal");
    }

    #[test]
    fn test_unknown_reader_acknack_dropped() {
        let (driver, writer) = matched_writer();
        writer.new_change(b"x");
        driver.take_sent();

        let foreign_prefix = [0xFE; 12];
        assert!(!writer.on_new_acknack(&acknack(1, &[1], 1), &foreign_prefix));
        assert!(driver.take_sent().is_empty());
    }
}
