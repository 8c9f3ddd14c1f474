// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery integration: SPDP admission and liveliness, SEDP proxy
//! wire-up from the built-in endpoint bitmask, lease-expiry reaping, and
//! the SPDP -> SEDP -> user-data pipeline end to end.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{data_datagram, parse_acknack, sn, CaptureDriver};
use nanodds::core::guid::{Guid, GuidPrefix};
use nanodds::core::{LocatorIpv4, RtpsDuration};
use nanodds::protocol::cdr::CdrWriter;
use nanodds::protocol::constants::{
    BUILTIN_ENDPOINT_SET, ENTITYID_PARTICIPANT, ENTITYID_SEDP_PUBLICATIONS_WRITER,
    ENTITYID_SPDP_WRITER, SCHEME_PL_CDR_LE,
};
use nanodds::{Participant, ParticipantProxyData, ReliabilityKind, RtpsConfig, TopicData};
use std::net::Ipv4Addr;

const REMOTE_PREFIX: GuidPrefix = [0x44; 12];
const REMOTE_META_PORT: u16 = 7420;

fn make_participant(participant_id: u16) -> (Arc<CaptureDriver>, Arc<Participant<CaptureDriver>>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let driver = CaptureDriver::new();
    let config = Arc::new(RtpsConfig::localhost(0));
    let participant =
        Participant::new(config, participant_id, Arc::clone(&driver)).expect("bring-up");
    (driver, participant)
}

/// SPDP announcement datagram for a synthetic remote participant.
fn spdp_datagram(prefix: GuidPrefix, lease: RtpsDuration, seq: u32) -> Vec<u8> {
    let mut proxy = ParticipantProxyData::new();
    proxy.guid = Guid::new(prefix, ENTITYID_PARTICIPANT);
    proxy.vendor_id = [0x01, 0x0F];
    proxy.available_builtin_endpoints = BUILTIN_ENDPOINT_SET;
    proxy.lease_duration = lease;
    proxy.metatraffic_unicast_locators[0] =
        LocatorIpv4::new(Ipv4Addr::new(127, 0, 0, 2), REMOTE_META_PORT);
    proxy.default_unicast_locators[0] = LocatorIpv4::new(Ipv4Addr::new(127, 0, 0, 2), 7421);

    let mut writer = CdrWriter::new();
    writer.write_bytes(&SCHEME_PL_CDR_LE);
    writer.write_u16(0); // options
    proxy.write_into(&mut writer);

    data_datagram(
        &prefix,
        [0, 0, 0, 0], // ENTITYID_UNKNOWN: routed to the SPDP reader by writer id
        ENTITYID_SPDP_WRITER,
        sn(seq),
        &writer.into_bytes(),
    )
}

#[test]
fn spdp_admits_new_participant_once() {
    let (driver, participant) = make_participant(0);
    driver.take_sent();

    let announcement = spdp_datagram(REMOTE_PREFIX, RtpsDuration::from_seconds(30), 1);
    assert!(participant.new_message(&announcement));
    assert_eq!(participant.remote_participant_count(), 1);

    // Give the liveliness clock something to measure.
    std::thread::sleep(Duration::from_millis(20));

    // Same announcement again: table unchanged, liveliness refreshed.
    let announcement = spdp_datagram(REMOTE_PREFIX, RtpsDuration::from_seconds(30), 2);
    assert!(participant.new_message(&announcement));
    assert_eq!(participant.remote_participant_count(), 1);

    let entry = participant
        .find_remote_participant(&REMOTE_PREFIX)
        .expect("remote registered");
    assert!(
        entry.alive_signal_age_ms() < 20,
        "second announcement must refresh liveliness"
    );
}

#[test]
fn spdp_wires_sedp_proxies_and_solicits_heartbeats() {
    let (driver, participant) = make_participant(0);
    driver.take_sent();

    let announcement = spdp_datagram(REMOTE_PREFIX, RtpsDuration::from_seconds(30), 1);
    participant.new_message(&announcement);

    // The SEDP readers now know the remote's built-in writers.
    let remote_pub_writer = Guid::new(REMOTE_PREFIX, ENTITYID_SEDP_PUBLICATIONS_WRITER);
    assert!(
        participant.get_reader_by_writer_guid(&remote_pub_writer).is_some(),
        "SEDP publications reader must be matched to the remote writer"
    );

    // Preemptive zero-count ACKNACKs went to the remote's meta-traffic
    // unicast locator, plus our own SPDP rebroadcast to multicast.
    let sent = driver.take_sent();
    let acknacks: Vec<_> = sent
        .iter()
        .filter(|p| p.dest_addr == Ipv4Addr::new(127, 0, 0, 2) && p.dest_port == REMOTE_META_PORT)
        .collect();
    assert_eq!(acknacks.len(), 2, "one ACKNACK per remote SEDP writer");
    for packet in acknacks {
        let acknack = parse_acknack(&packet.buffer);
        assert_eq!(acknack.count, 0);
        assert_eq!(acknack.reader_sn_state.num_bits, 0);
    }
    assert!(
        sent.iter().any(|p| p.dest_addr == Ipv4Addr::new(239, 255, 0, 1)),
        "newcomer triggers an immediate SPDP rebroadcast"
    );
}

#[test]
fn malformed_spdp_is_dropped_without_state_change() {
    let (driver, participant) = make_participant(0);
    driver.take_sent();

    let mut announcement = spdp_datagram(REMOTE_PREFIX, RtpsDuration::from_seconds(30), 1);
    let len = announcement.len();
    announcement.truncate(len - 12); // cut into the parameter list
    participant.new_message(&announcement);

    assert_eq!(participant.remote_participant_count(), 0);
}

#[test]
fn lease_expiry_reaps_remote_participant() {
    let (driver, participant) = make_participant(0);
    driver.take_sent();

    // Fraction 0x0080_0000 is roughly two milliseconds.
    let announcement = spdp_datagram(REMOTE_PREFIX, RtpsDuration::new(0, 0x0080_0000), 1);
    participant.new_message(&announcement);
    assert_eq!(participant.remote_participant_count(), 1);

    let remote_pub_writer = Guid::new(REMOTE_PREFIX, ENTITYID_SEDP_PUBLICATIONS_WRITER);
    assert!(participant.get_reader_by_writer_guid(&remote_pub_writer).is_some());

    std::thread::sleep(Duration::from_millis(15));
    participant.check_and_reset_heartbeats();

    assert_eq!(participant.remote_participant_count(), 0);
    assert!(
        participant.get_reader_by_writer_guid(&remote_pub_writer).is_none(),
        "reaping must drop the SEDP proxies too"
    );
}

#[test]
fn full_pipeline_spdp_sedp_user_data() {
    // Participant A publishes; B subscribes. We shuttle A's real packets
    // into B (one direction is enough to exercise B's whole intake path).
    let (a_driver, participant_a) = make_participant(0);
    let writer_a = participant_a
        .add_writer("chat/messages", "ChatMessage", ReliabilityKind::Reliable)
        .expect("writer slot");

    let (_b_driver, participant_b) = make_participant(1);
    let reader_b = participant_b
        .add_reader("chat/messages", "ChatMessage", ReliabilityKind::Reliable)
        .expect("reader slot");

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    reader_b
        .register_callback(Box::new(move |change| {
            sink.lock().expect("sink lock").push(change.data.to_vec());
        }))
        .expect("callback slot");

    // 1. A's own SPDP announcement (captured at bring-up) reaches B.
    let a_packets = a_driver.take_sent();
    let spdp_packet = a_packets
        .iter()
        .find(|p| p.dest_addr == Ipv4Addr::new(239, 255, 0, 1))
        .expect("A announced itself at bring-up");
    assert!(participant_b.new_message(&spdp_packet.buffer));
    assert_eq!(participant_b.remote_participant_count(), 1);

    // 2. A's SEDP publication record reaches B; B matches its reader.
    let mut sedp_payload = CdrWriter::new();
    sedp_payload.write_bytes(&SCHEME_PL_CDR_LE);
    sedp_payload.write_u16(0);
    writer_a.attributes().write_into(&mut sedp_payload);
    let sedp_datagram = data_datagram(
        &participant_a.guid_prefix(),
        [0, 0, 0, 0],
        ENTITYID_SEDP_PUBLICATIONS_WRITER,
        sn(1),
        &sedp_payload.into_bytes(),
    );
    assert!(participant_b.new_message(&sedp_datagram));
    assert!(
        reader_b.matches_writer(&writer_a.guid()),
        "SEDP must match A's writer to B's reader by (topic, type)"
    );

    // 3. User DATA from A's writer flows into B's reader callback.
    let user_datagram = data_datagram(
        &participant_a.guid_prefix(),
        reader_b.guid().entity_id,
        writer_a.guid().entity_id,
        sn(1),
        b"hello over rtps",
    );
    assert!(participant_b.new_message(&user_datagram));
    assert_eq!(
        received.lock().expect("sink lock").as_slice(),
        &[b"hello over rtps".to_vec()]
    );
}

#[test]
fn local_endpoint_disposal_flows_end_to_end() {
    // A announces a writer toward a discovered peer, then withdraws it.
    // B consumes A's real packets and must match, then unmatch.
    let (a_driver, participant_a) = make_participant(0);

    // Teach A about a peer so its SEDP writer has a destination.
    let announcement = spdp_datagram(REMOTE_PREFIX, RtpsDuration::from_seconds(30), 1);
    participant_a.new_message(&announcement);
    let a_boot = a_driver.take_sent();
    let a_spdp = a_boot
        .iter()
        .find(|p| p.dest_addr == Ipv4Addr::new(239, 255, 0, 1))
        .expect("A announced itself at bring-up")
        .buffer
        .clone();

    let writer_a = participant_a
        .add_writer("chat/messages", "ChatMessage", ReliabilityKind::Reliable)
        .expect("writer slot");

    // The announcement went out to the peer's meta-traffic locator.
    let sent = a_driver.take_sent();
    let sedp_announcement = sent
        .iter()
        .find(|p| p.dest_port == REMOTE_META_PORT)
        .expect("SEDP announcement sent")
        .buffer
        .clone();
    let config = RtpsConfig::localhost(0);
    let (announce_sn, announce_payload) = common::parse_data(&sedp_announcement);
    assert_eq!(announce_sn, sn(1));
    {
        let mut reader = nanodds::protocol::cdr::CdrReader::new(&announce_payload[4..], true);
        let announced = TopicData::read_from(&mut reader, &config).expect("announcement decodes");
        assert!(!announced.is_disposed_flag_set());
        assert_eq!(announced.topic_name, "chat/messages");
    }

    // Withdraw the writer: a status-info disposal goes out.
    participant_a.remove_writer(&writer_a).expect("writer known");
    assert!(
        participant_a.get_writer(writer_a.guid().entity_id).is_none(),
        "withdrawn writer must leave the entity table"
    );
    let sent = a_driver.take_sent();
    let disposal_datagram = sent
        .iter()
        .find(|p| p.dest_port == REMOTE_META_PORT)
        .expect("disposal sent")
        .buffer
        .clone();
    let (disposal_sn, disposal_payload) = common::parse_data(&disposal_datagram);
    assert_eq!(disposal_sn, sn(2));
    {
        let mut reader = nanodds::protocol::cdr::CdrReader::new(&disposal_payload[4..], true);
        let disposal = TopicData::read_from(&mut reader, &config).expect("disposal decodes");
        assert!(disposal.is_disposed_flag_set());
        assert!(disposal.is_unregistered_flag_set());
        assert_eq!(disposal.endpoint_guid, writer_a.guid());
    }

    // B plays the receiving side with A's captured packets.
    let (_b_driver, participant_b) = make_participant(1);
    let reader_b = participant_b
        .add_reader("chat/messages", "ChatMessage", ReliabilityKind::Reliable)
        .expect("reader slot");

    assert!(participant_b.new_message(&a_spdp));
    assert!(participant_b.new_message(&sedp_announcement));
    assert!(
        reader_b.matches_writer(&writer_a.guid()),
        "announcement must match B's reader"
    );

    assert!(participant_b.new_message(&disposal_datagram));
    assert!(
        !reader_b.matches_writer(&writer_a.guid()),
        "disposal must tear the proxy down"
    );
}

#[test]
fn proxy_data_roundtrip_preserves_observable_fields() {
    let mut original = ParticipantProxyData::new();
    original.guid = Guid::new(REMOTE_PREFIX, ENTITYID_PARTICIPANT);
    original.vendor_id = [0x01, 0xAB];
    original.available_builtin_endpoints = BUILTIN_ENDPOINT_SET;
    original.lease_duration = RtpsDuration::new(12, 0x4000_0000);
    original.metatraffic_unicast_locators[0] =
        LocatorIpv4::new(Ipv4Addr::new(127, 0, 0, 9), 7410);
    original.metatraffic_multicast_locators[0] =
        LocatorIpv4::new(Ipv4Addr::new(239, 255, 0, 1), 7400);
    original.default_unicast_locators[0] = LocatorIpv4::new(Ipv4Addr::new(127, 0, 0, 9), 7411);

    let mut writer = CdrWriter::new();
    original.write_into(&mut writer);
    let bytes = writer.into_bytes();

    let config = RtpsConfig::localhost(0);
    let mut reader = nanodds::protocol::cdr::CdrReader::new(&bytes, true);
    let decoded =
        ParticipantProxyData::read_from(&mut reader, &config).expect("roundtrip decodes");

    assert_eq!(decoded.guid, original.guid);
    assert_eq!(decoded.vendor_id, original.vendor_id);
    assert_eq!(decoded.protocol_version, original.protocol_version);
    assert_eq!(
        decoded.available_builtin_endpoints,
        original.available_builtin_endpoints
    );
    assert_eq!(decoded.lease_duration, original.lease_duration);
    assert_eq!(
        decoded.metatraffic_unicast_locators,
        original.metatraffic_unicast_locators
    );
    assert_eq!(
        decoded.metatraffic_multicast_locators,
        original.metatraffic_multicast_locators
    );
    assert_eq!(
        decoded.default_unicast_locators,
        original.default_unicast_locators
    );
    assert_eq!(
        decoded.default_multicast_locators,
        original.default_multicast_locators
    );
}

#[test]
fn topic_data_roundtrip_via_public_api() {
    let guid = Guid::new(REMOTE_PREFIX, [0, 0, 7, 0x03]);
    let mut original = TopicData::new(
        guid,
        "vehicle/pose",
        "PoseStamped",
        ReliabilityKind::Reliable,
        LocatorIpv4::new(Ipv4Addr::new(127, 0, 0, 9), 7411),
    );
    original.multicast_locator = LocatorIpv4::new(Ipv4Addr::new(239, 255, 0, 1), 7401);

    let mut writer = CdrWriter::new();
    original.write_into(&mut writer);
    let bytes = writer.into_bytes();

    let config = RtpsConfig::localhost(0);
    let mut reader = nanodds::protocol::cdr::CdrReader::new(&bytes, true);
    let decoded = TopicData::read_from(&mut reader, &config).expect("roundtrip decodes");

    assert_eq!(decoded.endpoint_guid, original.endpoint_guid);
    assert_eq!(decoded.topic_name, original.topic_name);
    assert_eq!(decoded.type_name, original.type_name);
    assert_eq!(decoded.reliability, original.reliability);
    assert_eq!(decoded.unicast_locator, original.unicast_locator);
    assert_eq!(decoded.multicast_locator, original.multicast_locator);
}
