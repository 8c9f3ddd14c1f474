// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: a capturing network driver and datagram builders.
#![allow(dead_code)] // each test binary uses a subset of these helpers

use std::sync::{Arc, Mutex};

use nanodds::core::guid::{EntityId, GuidPrefix};
use nanodds::core::SequenceNumber;
use nanodds::protocol::factory::{self, RtpsMessage};
use nanodds::protocol::submessages::{
    AckNackSubmessage, GapSubmessage, HeartbeatSubmessage, MessageHeader, SubmessageHeader,
};
use nanodds::transport::{NetworkDriver, PacketInfo};

/// Network driver that records every outbound packet.
#[derive(Default)]
pub struct CaptureDriver {
    sent: Mutex<Vec<PacketInfo>>,
}

impl CaptureDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_sent(&self) -> Vec<PacketInfo> {
        std::mem::take(&mut self.sent.lock().expect("capture lock"))
    }
}

impl NetworkDriver for CaptureDriver {
    fn send_packet(&self, info: &PacketInfo) -> nanodds::Result<()> {
        self.sent.lock().expect("capture lock").push(info.clone());
        Ok(())
    }
}

pub fn sn(low: u32) -> SequenceNumber {
    SequenceNumber::new(0, low)
}

/// DATA datagram from a remote writer.
pub fn data_datagram(
    source_prefix: &GuidPrefix,
    reader_id: EntityId,
    writer_id: EntityId,
    writer_sn: SequenceNumber,
    payload: &[u8],
) -> Vec<u8> {
    RtpsMessage::new(source_prefix)
        .append(&factory::encode_data(&reader_id, &writer_id, writer_sn, payload))
        .into_bytes()
}

/// HEARTBEAT datagram from a remote writer.
pub fn heartbeat_datagram(
    source_prefix: &GuidPrefix,
    reader_id: EntityId,
    writer_id: EntityId,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: u32,
) -> Vec<u8> {
    RtpsMessage::new(source_prefix)
        .append(&factory::encode_heartbeat(
            &reader_id, &writer_id, first_sn, last_sn, count, false,
        ))
        .into_bytes()
}

/// First submessage of a captured packet, decoded as ACKNACK.
pub fn parse_acknack(packet: &[u8]) -> AckNackSubmessage {
    MessageHeader::decode(packet).expect("rtps header");
    let header = SubmessageHeader::decode(&packet[20..]).expect("submessage header");
    assert_eq!(header.submessage_id, 0x06, "expected ACKNACK submessage");
    nanodds::protocol::submessages::decode_acknack(&packet[24..], &header).expect("acknack body")
}

/// First submessage of a captured packet, decoded as DATA; returns
/// (sequence number, payload).
pub fn parse_data(packet: &[u8]) -> (SequenceNumber, Vec<u8>) {
    MessageHeader::decode(packet).expect("rtps header");
    let header = SubmessageHeader::decode(&packet[20..]).expect("submessage header");
    assert_eq!(header.submessage_id, 0x15, "expected DATA submessage");
    let data =
        nanodds::protocol::submessages::decode_data(&packet[24..], &header).expect("data body");
    (data.writer_sn, data.serialized_payload.to_vec())
}

/// First submessage of a captured packet, decoded as HEARTBEAT.
pub fn parse_heartbeat(packet: &[u8]) -> HeartbeatSubmessage {
    MessageHeader::decode(packet).expect("rtps header");
    let header = SubmessageHeader::decode(&packet[20..]).expect("submessage header");
    assert_eq!(header.submessage_id, 0x07, "expected HEARTBEAT submessage");
    nanodds::protocol::submessages::decode_heartbeat(&packet[24..], &header).expect("heartbeat body")
}

/// First submessage of a captured packet, decoded as GAP.
pub fn parse_gap(packet: &[u8]) -> GapSubmessage {
    MessageHeader::decode(packet).expect("rtps header");
    let header = SubmessageHeader::decode(&packet[20..]).expect("submessage header");
    assert_eq!(header.submessage_id, 0x08, "expected GAP submessage");
    nanodds::protocol::submessages::decode_gap(&packet[24..], &header).expect("gap body")
}
