// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS submessage wire structs and decoders (DDS-RTPS v2.5 Sec.9.4.5).
//!
//! Decoders operate on the submessage *body* (the bytes after the 4-byte
//! submessage header) and take their endianness from flag bit 0. Any
//! declared length that exceeds the remaining bytes is `Malformed`.

use crate::core::guid::{EntityId, GuidPrefix};
use crate::core::sequence::{SequenceNumber, SequenceNumberSet};
use crate::error::{Error, Result};
use crate::protocol::cdr::CdrReader;
use crate::protocol::constants::{
    FLAG_ENDIANNESS, FLAG_INLINE_QOS, PID_SENTINEL, RTPS_HEADER_SIZE, RTPS_MAGIC,
    SUBMSG_HEADER_SIZE,
};

/// RTPS message header: magic + version + vendor + source GUID prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub protocol_version: (u8, u8),
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl MessageHeader {
    /// Decode the 20-byte header. Fails on short input or magic mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTPS_HEADER_SIZE {
            return Err(Error::Malformed);
        }
        if &buf[0..4] != RTPS_MAGIC {
            return Err(Error::Malformed);
        }

        let mut guid_prefix = [0u8; 12];
        guid_prefix.copy_from_slice(&buf[8..20]);
        Ok(Self {
            protocol_version: (buf[4], buf[5]),
            vendor_id: [buf[6], buf[7]],
            guid_prefix,
        })
    }
}

/// Submessage header: id, flags, octetsToNextHeader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmessageHeader {
    pub submessage_id: u8,
    pub flags: u8,
    pub octets_to_next_header: u16,
}

impl SubmessageHeader {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SUBMSG_HEADER_SIZE {
            return Err(Error::Malformed);
        }

        let flags = buf[1];
        let octets = if flags & FLAG_ENDIANNESS != 0 {
            u16::from_le_bytes([buf[2], buf[3]])
        } else {
            u16::from_be_bytes([buf[2], buf[3]])
        };
        Ok(Self {
            submessage_id: buf[0],
            flags,
            octets_to_next_header: octets,
        })
    }

    pub fn is_little_endian(&self) -> bool {
        self.flags & FLAG_ENDIANNESS != 0
    }
}

/// DATA submessage body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSubmessage<'a> {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub serialized_payload: &'a [u8],
}

/// HEARTBEAT submessage body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: SequenceNumber,
    pub last_sn: SequenceNumber,
    pub count: u32,
    pub final_flag: bool,
}

/// ACKNACK submessage body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckNackSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub reader_sn_state: SequenceNumberSet,
    pub count: u32,
    pub final_flag: bool,
}

/// GAP submessage body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: SequenceNumber,
    pub gap_list: SequenceNumberSet,
}

/// Decode a DATA body. The payload is whatever follows the inline QoS (or
/// the fixed prefix when the Q flag is clear); it may be empty.
pub fn decode_data<'a>(body: &'a [u8], header: &SubmessageHeader) -> Result<DataSubmessage<'a>> {
    let mut reader = CdrReader::new(body, header.is_little_endian());

    let _extra_flags = reader.read_u16()?;
    let octets_to_inline_qos = reader.read_u16()?;
    let reader_id = reader.read_entity_id()?;
    let writer_id = reader.read_entity_id()?;
    let writer_sn = reader.read_sequence_number()?;

    // octetsToInlineQos counts from the octet after itself (body offset 4)
    // to the start of the inline QoS, or of the payload when Q is clear.
    let data_start = 4usize.checked_add(usize::from(octets_to_inline_qos)).ok_or(Error::Malformed)?;
    if data_start > body.len() {
        return Err(Error::Malformed);
    }
    if data_start > reader.position() {
        reader.advance(data_start - reader.position())?;
    }

    if header.flags & FLAG_INLINE_QOS != 0 {
        skip_parameter_list(&mut reader)?;
    }

    let payload_start = reader.position();
    Ok(DataSubmessage {
        reader_id,
        writer_id,
        writer_sn,
        serialized_payload: &body[payload_start..],
    })
}

/// Decode a HEARTBEAT body.
pub fn decode_heartbeat(body: &[u8], header: &SubmessageHeader) -> Result<HeartbeatSubmessage> {
    let mut reader = CdrReader::new(body, header.is_little_endian());

    Ok(HeartbeatSubmessage {
        reader_id: reader.read_entity_id()?,
        writer_id: reader.read_entity_id()?,
        first_sn: reader.read_sequence_number()?,
        last_sn: reader.read_sequence_number()?,
        count: reader.read_u32()?,
        final_flag: header.flags & crate::protocol::constants::FLAG_FINAL != 0,
    })
}

/// Decode an ACKNACK body: entity ids, readerSNState, trailing count.
pub fn decode_acknack(body: &[u8], header: &SubmessageHeader) -> Result<AckNackSubmessage> {
    let mut reader = CdrReader::new(body, header.is_little_endian());

    let reader_id = reader.read_entity_id()?;
    let writer_id = reader.read_entity_id()?;
    let reader_sn_state = decode_sn_set(&mut reader)?;
    let count = reader.read_u32()?;

    Ok(AckNackSubmessage {
        reader_id,
        writer_id,
        reader_sn_state,
        count,
        final_flag: header.flags & crate::protocol::constants::FLAG_FINAL != 0,
    })
}

/// Decode a GAP body: entity ids, gapStart, gapList.
pub fn decode_gap(body: &[u8], header: &SubmessageHeader) -> Result<GapSubmessage> {
    let mut reader = CdrReader::new(body, header.is_little_endian());

    Ok(GapSubmessage {
        reader_id: reader.read_entity_id()?,
        writer_id: reader.read_entity_id()?,
        gap_start: reader.read_sequence_number()?,
        gap_list: decode_sn_set(&mut reader)?,
    })
}

/// Decode a SequenceNumberSet: base (8) + numBits (4) + bitmap words.
fn decode_sn_set(reader: &mut CdrReader<'_>) -> Result<SequenceNumberSet> {
    let base = reader.read_sequence_number()?;
    let num_bits = reader.read_u32()?;
    if num_bits > crate::core::sequence::SNS_MAX_NUM_BITS {
        return Err(Error::Malformed);
    }

    let word_count = SequenceNumberSet::word_count_for_bits(num_bits);
    let mut words = [0u32; 8];
    for word in words.iter_mut().take(word_count) {
        *word = reader.read_u32()?;
    }

    SequenceNumberSet::from_raw(base, num_bits, &words[..word_count]).ok_or(Error::Malformed)
}

/// Walk a parameter list (pid, length, value) until PID_SENTINEL.
fn skip_parameter_list(reader: &mut CdrReader<'_>) -> Result<()> {
    loop {
        let pid = reader.read_u16()?;
        let length = reader.read_u16()?;
        if pid == PID_SENTINEL {
            return Ok(());
        }
        reader.advance(usize::from(length))?;
        reader.align_to(4)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::factory;

    #[test]
    fn test_message_header_decode() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RTPS");
        buf.extend_from_slice(&[2, 1]);
        buf.extend_from_slice(&[0x01, 0xAB]);
        buf.extend_from_slice(&[7; 12]);

        let header = MessageHeader::decode(&buf).expect("valid header");
        assert_eq!(header.protocol_version, (2, 1));
        assert_eq!(header.vendor_id, [0x01, 0xAB]);
        assert_eq!(header.guid_prefix, [7; 12]);
    }

    #[test]
    fn test_message_header_rejects_bad_magic() {
        let mut buf = vec![0u8; 20];
        buf[0..4].copy_from_slice(b"FAKE");
        assert!(MessageHeader::decode(&buf).is_err());
        assert!(MessageHeader::decode(&buf[..10]).is_err());
    }

    #[test]
    fn test_submessage_header_endianness() {
        // LE flag set: length 0x0100 = 256 read little-endian.
        let le = SubmessageHeader::decode(&[0x15, 0x01, 0x00, 0x01]).expect("le header");
        assert_eq!(le.octets_to_next_header, 256);
        assert!(le.is_little_endian());

        let be = SubmessageHeader::decode(&[0x15, 0x00, 0x00, 0x01]).expect("be header");
        assert_eq!(be.octets_to_next_header, 1);
        assert!(!be.is_little_endian());
    }

    #[test]
    fn test_data_roundtrip() {
        let encoded = factory::encode_data(
            &[0, 0, 0, 0],
            &[1, 2, 3, 0x03],
            SequenceNumber::new(0, 9),
            b"payload!",
        );
        let header = SubmessageHeader::decode(&encoded).expect("header");
        assert_eq!(header.submessage_id, 0x15);

        let body = &encoded[4..];
        let data = decode_data(body, &header).expect("body");
        assert_eq!(data.writer_id, [1, 2, 3, 0x03]);
        assert_eq!(data.writer_sn, SequenceNumber::new(0, 9));
        assert_eq!(data.serialized_payload, b"payload!");
    }

    #[test]
    fn test_heartbeat_roundtrip() {
        let encoded = factory::encode_heartbeat(
            &[0, 0, 4, 0xC7],
            &[0, 0, 3, 0xC2],
            SequenceNumber::new(0, 1),
            SequenceNumber::new(0, 50),
            3,
            true,
        );
        let header = SubmessageHeader::decode(&encoded).expect("header");
        let hb = decode_heartbeat(&encoded[4..], &header).expect("body");

        assert_eq!(hb.first_sn, SequenceNumber::new(0, 1));
        assert_eq!(hb.last_sn, SequenceNumber::new(0, 50));
        assert_eq!(hb.count, 3);
        assert!(hb.final_flag);
    }

    #[test]
    fn test_acknack_roundtrip() {
        let mut set = SequenceNumberSet::new(SequenceNumber::new(0, 3));
        set.insert(SequenceNumber::new(0, 3));
        set.insert(SequenceNumber::new(0, 5));

        let encoded = factory::encode_acknack(&[0, 0, 4, 0xC7], &[0, 0, 3, 0xC2], &set, 2, false);
        let header = SubmessageHeader::decode(&encoded).expect("header");
        let acknack = decode_acknack(&encoded[4..], &header).expect("body");

        assert_eq!(acknack.count, 2);
        assert_eq!(acknack.reader_sn_state, set);
        assert!(!acknack.final_flag);
    }

    #[test]
    fn test_gap_roundtrip() {
        let mut list = SequenceNumberSet::new(SequenceNumber::new(0, 5));
        list.insert(SequenceNumber::new(0, 5));

        let encoded = factory::encode_gap(
            &[0, 0, 0, 4],
            &[0, 0, 0, 3],
            SequenceNumber::new(0, 2),
            &list,
        );
        let header = SubmessageHeader::decode(&encoded).expect("header");
        let gap = decode_gap(&encoded[4..], &header).expect("body");

        assert_eq!(gap.gap_start, SequenceNumber::new(0, 2));
        assert_eq!(gap.gap_list, list);
    }

    #[test]
    fn test_truncated_bodies_are_malformed() {
        let header = SubmessageHeader {
            submessage_id: 0x07,
            flags: 0x01,
            octets_to_next_header: 28,
        };
        assert!(decode_heartbeat(&[0u8; 10], &header).is_err());
        assert!(decode_acknack(&[0u8; 12], &header).is_err());
        assert!(decode_gap(&[0u8; 16], &header).is_err());
    }
}
