// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incoming datagram demultiplexer.
//!
//! Parses the RTPS header, walks the submessages, and routes each one to
//! the owning participant's endpoints by entity id. Receiver state
//! (source prefix, vendor, version, timestamp presence) is reset per
//! datagram. Runs in the context of the network receive task.

use crate::core::guid::{Guid, GuidPrefix, ENTITYID_UNKNOWN, GUIDPREFIX_UNKNOWN};
use crate::history::ChangeKind;
use crate::participant::Participant;
use crate::protocol::constants::{
    FLAG_INVALIDATE_TS, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, RTPS_HEADER_SIZE,
    SUBMSG_ACKNACK, SUBMSG_DATA, SUBMSG_GAP, SUBMSG_HEADER_SIZE, SUBMSG_HEARTBEAT,
    SUBMSG_INFO_DST, SUBMSG_INFO_TS, VENDOR_UNKNOWN,
};
use crate::protocol::submessages::{
    decode_acknack, decode_data, decode_gap, decode_heartbeat, MessageHeader, SubmessageHeader,
};
use crate::reliability::ReaderCacheChange;
use crate::transport::NetworkDriver;

/// Per-datagram parser state.
pub struct MessageReceiver {
    own_guid_prefix: GuidPrefix,
    pub source_guid_prefix: GuidPrefix,
    pub source_vendor: [u8; 2],
    pub source_version: (u8, u8),
    pub have_timestamp: bool,
}

impl MessageReceiver {
    pub fn new(own_guid_prefix: GuidPrefix) -> Self {
        Self {
            own_guid_prefix,
            source_guid_prefix: GUIDPREFIX_UNKNOWN,
            source_vendor: VENDOR_UNKNOWN,
            source_version: (PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR),
            have_timestamp: false,
        }
    }

    fn reset_state(&mut self) {
        self.source_guid_prefix = GUIDPREFIX_UNKNOWN;
        self.source_vendor = VENDOR_UNKNOWN;
        self.source_version = (PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR);
        self.have_timestamp = false;
    }

    /// Process one datagram. Returns false when the datagram was rejected
    /// (bad header, own loopback, version mismatch, or a submessage whose
    /// declared length overruns the buffer).
    pub fn process_message<D: NetworkDriver>(
        &mut self,
        data: &[u8],
        participant: &Participant<D>,
    ) -> bool {
        self.reset_state();

        let header = match MessageHeader::decode(data) {
            Ok(header) => header,
            Err(_) => return false,
        };

        // Our own multicast loopback.
        if header.guid_prefix == self.own_guid_prefix {
            return false;
        }
        if header.protocol_version.0 != PROTOCOL_VERSION_MAJOR {
            log::trace!(
                "[receiver] rejecting protocol version {}.{}",
                header.protocol_version.0,
                header.protocol_version.1
            );
            return false;
        }

        self.source_guid_prefix = header.guid_prefix;
        self.source_vendor = header.vendor_id;
        self.source_version = header.protocol_version;

        let mut pos = RTPS_HEADER_SIZE;
        while pos < data.len() {
            let Ok(submsg) = SubmessageHeader::decode(&data[pos..]) else {
                return false;
            };

            let body_start = pos + SUBMSG_HEADER_SIZE;
            // octetsToNextHeader == 0: the submessage runs to the end of
            // the datagram.
            let declared = usize::from(submsg.octets_to_next_header);
            let body_len = if declared == 0 {
                data.len().saturating_sub(body_start)
            } else {
                declared
            };
            if body_start + body_len > data.len() {
                return false;
            }

            self.process_submessage(&submsg, &data[body_start..body_start + body_len], participant);

            if declared == 0 {
                break;
            }
            pos = body_start + body_len;
        }

        true
    }

    fn process_submessage<D: NetworkDriver>(
        &mut self,
        header: &SubmessageHeader,
        body: &[u8],
        participant: &Participant<D>,
    ) {
        match header.submessage_id {
            SUBMSG_DATA => self.process_data(header, body, participant),
            SUBMSG_HEARTBEAT => self.process_heartbeat(header, body, participant),
            SUBMSG_ACKNACK => self.process_acknack(header, body, participant),
            SUBMSG_GAP => self.process_gap(header, body, participant),
            SUBMSG_INFO_TS => {
                // Accepted, not acted upon.
                self.have_timestamp = header.flags & FLAG_INVALIDATE_TS == 0;
            }
            SUBMSG_INFO_DST => {
                // Accepted, not acted upon.
            }
            other => {
                log::trace!("[receiver] skipping submessage kind 0x{:02x}", other);
            }
        }
    }

    fn process_data<D: NetworkDriver>(
        &self,
        header: &SubmessageHeader,
        body: &[u8],
        participant: &Participant<D>,
    ) {
        let Ok(data) = decode_data(body, header) else {
            log::debug!("[receiver] malformed DATA submessage dropped");
            return;
        };

        let writer_guid = Guid::new(self.source_guid_prefix, data.writer_id);
        let reader = if data.reader_id == ENTITYID_UNKNOWN {
            participant.get_reader_by_writer_guid(&writer_guid)
        } else {
            participant.get_reader(data.reader_id)
        };

        match reader {
            Some(reader) => {
                let change = ReaderCacheChange {
                    kind: ChangeKind::Alive,
                    writer_guid,
                    sequence_number: data.writer_sn,
                    data: data.serialized_payload,
                };
                reader.new_change(&change);
            }
            None => {
                log::trace!(
                    "[receiver] no reader for DATA (reader_id {:02x?}, writer {})",
                    data.reader_id,
                    writer_guid
                );
            }
        }
    }

    fn process_heartbeat<D: NetworkDriver>(
        &self,
        header: &SubmessageHeader,
        body: &[u8],
        participant: &Participant<D>,
    ) {
        let Ok(hb) = decode_heartbeat(body, header) else {
            log::debug!("[receiver] malformed HEARTBEAT submessage dropped");
            return;
        };

        let reader = if hb.reader_id == ENTITYID_UNKNOWN {
            participant
                .get_reader_by_writer_guid(&Guid::new(self.source_guid_prefix, hb.writer_id))
        } else {
            participant.get_reader(hb.reader_id)
        };

        if let Some(reader) = reader {
            reader.on_new_heartbeat(&hb, &self.source_guid_prefix);
            // A heartbeat is proof of life for the whole participant.
            participant.refresh_remote_participant_liveliness(&self.source_guid_prefix);
        }
    }

    fn process_acknack<D: NetworkDriver>(
        &self,
        header: &SubmessageHeader,
        body: &[u8],
        participant: &Participant<D>,
    ) {
        let Ok(acknack) = decode_acknack(body, header) else {
            log::debug!("[receiver] malformed ACKNACK submessage dropped");
            return;
        };

        match participant.get_writer(acknack.writer_id) {
            Some(writer) => {
                writer.on_new_acknack(&acknack, &self.source_guid_prefix);
            }
            None => {
                log::trace!(
                    "[receiver] no writer for ACKNACK (writer_id {:02x?})",
                    acknack.writer_id
                );
            }
        }
    }

    fn process_gap<D: NetworkDriver>(
        &self,
        header: &SubmessageHeader,
        body: &[u8],
        participant: &Participant<D>,
    ) {
        let Ok(gap) = decode_gap(body, header) else {
            log::debug!("[receiver] malformed GAP submessage dropped");
            return;
        };

        if let Some(reader) = participant.get_reader(gap.reader_id) {
            reader.on_new_gap_message(&gap, &self.source_guid_prefix);
        }
    }
}
