// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS submessage and message encoders.
//!
//! Everything is emitted little-endian with the endianness flag set; the
//! submessage layouts are bit-exact per DDS-RTPS v2.5 Sec.9.4.5. Outbound
//! packets are assembled by [`RtpsMessage`]: header first, then any number
//! of submessages.

use crate::core::guid::{EntityId, GuidPrefix};
use crate::core::sequence::{SequenceNumber, SequenceNumberSet};
use crate::protocol::constants::{
    FLAG_DATA_PRESENT, FLAG_ENDIANNESS, FLAG_FINAL, PROTOCOL_VERSION_MAJOR,
    PROTOCOL_VERSION_MINOR, RTPS_HEADER_SIZE, RTPS_MAGIC, SUBMSG_ACKNACK, SUBMSG_DATA,
    SUBMSG_GAP, SUBMSG_HEARTBEAT, VENDOR_ID,
};

/// Outbound RTPS message: 20-byte header plus appended submessages.
pub struct RtpsMessage {
    buf: Vec<u8>,
}

impl RtpsMessage {
    /// Start a message originating from `guid_prefix`.
    pub fn new(guid_prefix: &GuidPrefix) -> Self {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(RTPS_MAGIC);
        buf.push(PROTOCOL_VERSION_MAJOR);
        buf.push(PROTOCOL_VERSION_MINOR);
        buf.extend_from_slice(&VENDOR_ID);
        buf.extend_from_slice(guid_prefix);
        Self { buf }
    }

    /// Append an already-encoded submessage.
    pub fn append(mut self, submessage: &[u8]) -> Self {
        self.buf.extend_from_slice(submessage);
        self
    }

    /// Finished datagram bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= RTPS_HEADER_SIZE
    }
}

/// Encode a DATA submessage (no inline QoS, payload present).
pub fn encode_data(
    reader_id: &EntityId,
    writer_id: &EntityId,
    writer_sn: SequenceNumber,
    payload: &[u8],
) -> Vec<u8> {
    let submsg_len = 20 + payload.len();
    let mut buf = Vec::with_capacity(4 + submsg_len);

    buf.push(SUBMSG_DATA);
    buf.push(FLAG_ENDIANNESS | FLAG_DATA_PRESENT);
    buf.extend_from_slice(&(submsg_len as u16).to_le_bytes());

    buf.extend_from_slice(&0u16.to_le_bytes()); // extraFlags
    buf.extend_from_slice(&16u16.to_le_bytes()); // octetsToInlineQos
    buf.extend_from_slice(reader_id);
    buf.extend_from_slice(writer_id);
    buf.extend_from_slice(&writer_sn.high.to_le_bytes());
    buf.extend_from_slice(&writer_sn.low.to_le_bytes());
    buf.extend_from_slice(payload);

    buf
}

/// Encode a HEARTBEAT submessage (32 bytes).
pub fn encode_heartbeat(
    reader_id: &EntityId,
    writer_id: &EntityId,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: u32,
    final_flag: bool,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);

    buf.push(SUBMSG_HEARTBEAT);
    buf.push(if final_flag {
        FLAG_ENDIANNESS | FLAG_FINAL
    } else {
        FLAG_ENDIANNESS
    });
    buf.extend_from_slice(&28u16.to_le_bytes());

    buf.extend_from_slice(reader_id);
    buf.extend_from_slice(writer_id);
    buf.extend_from_slice(&first_sn.high.to_le_bytes());
    buf.extend_from_slice(&first_sn.low.to_le_bytes());
    buf.extend_from_slice(&last_sn.high.to_le_bytes());
    buf.extend_from_slice(&last_sn.low.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());

    buf
}

/// Encode an ACKNACK submessage. The final flag means the reader is in
/// sync (nothing missing).
pub fn encode_acknack(
    reader_id: &EntityId,
    writer_id: &EntityId,
    reader_sn_state: &SequenceNumberSet,
    count: u32,
    final_flag: bool,
) -> Vec<u8> {
    let bitmap_bytes = reader_sn_state.word_count() * 4;
    let submsg_len = 8 + 12 + bitmap_bytes + 4;
    let mut buf = Vec::with_capacity(4 + submsg_len);

    buf.push(SUBMSG_ACKNACK);
    buf.push(if final_flag {
        FLAG_ENDIANNESS | FLAG_FINAL
    } else {
        FLAG_ENDIANNESS
    });
    buf.extend_from_slice(&(submsg_len as u16).to_le_bytes());

    buf.extend_from_slice(reader_id);
    buf.extend_from_slice(writer_id);
    encode_sn_set(&mut buf, reader_sn_state);
    buf.extend_from_slice(&count.to_le_bytes());

    buf
}

/// Encode a GAP submessage.
pub fn encode_gap(
    reader_id: &EntityId,
    writer_id: &EntityId,
    gap_start: SequenceNumber,
    gap_list: &SequenceNumberSet,
) -> Vec<u8> {
    let bitmap_bytes = gap_list.word_count() * 4;
    let submsg_len = 8 + 8 + 12 + bitmap_bytes;
    let mut buf = Vec::with_capacity(4 + submsg_len);

    buf.push(SUBMSG_GAP);
    buf.push(FLAG_ENDIANNESS);
    buf.extend_from_slice(&(submsg_len as u16).to_le_bytes());

    buf.extend_from_slice(reader_id);
    buf.extend_from_slice(writer_id);
    buf.extend_from_slice(&gap_start.high.to_le_bytes());
    buf.extend_from_slice(&gap_start.low.to_le_bytes());
    encode_sn_set(&mut buf, gap_list);

    buf
}

/// SequenceNumberSet wire form: base + numBits + bitmap words.
fn encode_sn_set(buf: &mut Vec<u8>, set: &SequenceNumberSet) {
    buf.extend_from_slice(&set.base.high.to_le_bytes());
    buf.extend_from_slice(&set.base.low.to_le_bytes());
    buf.extend_from_slice(&set.num_bits.to_le_bytes());
    for idx in 0..set.word_count() {
        buf.extend_from_slice(&set.bitmap_word(idx).to_le_bytes());
    }
}
