// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The participant: owner of local endpoints, built-in discovery
//! endpoints, and the remote-participant table.
//!
//! Routes incoming submessages to the right endpoint, assigns user entity
//! ids, and runs the periodic heartbeat/lease sweep that the SPDP agent
//! triggers. A `Participant` is always handled as `Arc<Participant<D>>`;
//! the discovery agents hold weak back-references (the participant owns
//! them, not the other way round).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{
    builtin_unicast_port, spdp_multicast_port, user_unicast_port, RtpsConfig,
    HISTORY_CACHE_CAPACITY, MAX_NUM_REMOTE_PARTICIPANTS, MULTICAST_IP,
    NUM_READERS_PER_PARTICIPANT, NUM_WRITERS_PER_PARTICIPANT, SEDP_HISTORY_CAPACITY,
    SPDP_HISTORY_CAPACITY,
};
use crate::core::guid::{EntityId, Guid, GuidPrefix, ENTITYID_UNKNOWN, GUIDPREFIX_UNKNOWN};
use crate::core::locator::LocatorIpv4;
use crate::discovery::proxy_data::ParticipantProxyData;
use crate::discovery::topic_data::{ReliabilityKind, TopicData};
use crate::discovery::{SedpAgent, SpdpAgent};
use crate::error::{Error, Result};
use crate::protocol::constants::{
    BUILTIN_ENDPOINT_SET, ENTITYID_PARTICIPANT, ENTITYID_SEDP_PUBLICATIONS_READER,
    ENTITYID_SEDP_PUBLICATIONS_WRITER, ENTITYID_SEDP_SUBSCRIPTIONS_READER,
    ENTITYID_SEDP_SUBSCRIPTIONS_WRITER, ENTITYID_SPDP_READER, ENTITYID_SPDP_WRITER,
    ENTITY_KIND_USER_READER, ENTITY_KIND_USER_WRITER, VENDOR_ID,
};
use crate::protocol::receiver::MessageReceiver;
use crate::protocol::submessages::{GapSubmessage, HeartbeatSubmessage};
use crate::reliability::{
    ReaderCacheChange, ReaderProxy, StatefulReader, StatefulWriter, StatelessReader,
};
use crate::transport::NetworkDriver;

/// Local reader handle: stateful user/SEDP readers or the stateless SPDP
/// reader, dispatched uniformly by the receiver.
pub enum AnyReader<D: NetworkDriver> {
    Stateful(Arc<StatefulReader<D>>),
    Stateless(Arc<StatelessReader>),
}

impl<D: NetworkDriver> Clone for AnyReader<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Stateful(r) => Self::Stateful(Arc::clone(r)),
            Self::Stateless(r) => Self::Stateless(Arc::clone(r)),
        }
    }
}

impl<D: NetworkDriver> AnyReader<D> {
    pub fn guid(&self) -> Guid {
        match self {
            Self::Stateful(r) => r.guid(),
            Self::Stateless(r) => r.guid(),
        }
    }

    pub fn new_change(&self, change: &ReaderCacheChange<'_>) {
        match self {
            Self::Stateful(r) => r.new_change(change),
            Self::Stateless(r) => r.new_change(change),
        }
    }

    pub fn on_new_heartbeat(&self, hb: &HeartbeatSubmessage, source_prefix: &GuidPrefix) -> bool {
        match self {
            Self::Stateful(r) => r.on_new_heartbeat(hb, source_prefix),
            // Best-effort: heartbeats carry nothing for us.
            Self::Stateless(_) => false,
        }
    }

    pub fn on_new_gap_message(&self, gap: &GapSubmessage, source_prefix: &GuidPrefix) -> bool {
        match self {
            Self::Stateful(r) => r.on_new_gap_message(gap, source_prefix),
            Self::Stateless(_) => false,
        }
    }

    fn matches_writer(&self, writer_guid: &Guid) -> bool {
        match self {
            Self::Stateful(r) => r.matches_writer(writer_guid),
            // The stateless SPDP reader pairs with the well-known SPDP
            // writer of any participant.
            Self::Stateless(r) => {
                r.guid().entity_id == ENTITYID_SPDP_READER
                    && writer_guid.entity_id == ENTITYID_SPDP_WRITER
            }
        }
    }
}

/// The six built-in discovery endpoints of a participant.
pub struct BuiltInEndpoints<D: NetworkDriver> {
    pub spdp_reader: Arc<StatelessReader>,
    pub spdp_writer: Arc<StatefulWriter<D>>,
    pub sedp_pub_reader: Arc<StatefulReader<D>>,
    pub sedp_pub_writer: Arc<StatefulWriter<D>>,
    pub sedp_sub_reader: Arc<StatefulReader<D>>,
    pub sedp_sub_writer: Arc<StatefulWriter<D>>,
}

impl<D: NetworkDriver> Clone for BuiltInEndpoints<D> {
    fn clone(&self) -> Self {
        Self {
            spdp_reader: Arc::clone(&self.spdp_reader),
            spdp_writer: Arc::clone(&self.spdp_writer),
            sedp_pub_reader: Arc::clone(&self.sedp_pub_reader),
            sedp_pub_writer: Arc::clone(&self.sedp_pub_writer),
            sedp_sub_reader: Arc::clone(&self.sedp_sub_reader),
            sedp_sub_writer: Arc::clone(&self.sedp_sub_writer),
        }
    }
}

impl<D: NetworkDriver> BuiltInEndpoints<D> {
    fn create(prefix: GuidPrefix, builtin_port: u16, driver: &Arc<D>) -> Self {
        let attrs = |entity_id: EntityId, reliability: ReliabilityKind| {
            TopicData::empty(Guid::new(prefix, entity_id), reliability)
        };

        Self {
            spdp_reader: Arc::new(StatelessReader::new(attrs(
                ENTITYID_SPDP_READER,
                ReliabilityKind::BestEffort,
            ))),
            spdp_writer: Arc::new(StatefulWriter::new(
                attrs(ENTITYID_SPDP_WRITER, ReliabilityKind::BestEffort),
                Arc::clone(driver),
                builtin_port,
                SPDP_HISTORY_CAPACITY,
            )),
            sedp_pub_reader: Arc::new(StatefulReader::new(
                attrs(ENTITYID_SEDP_PUBLICATIONS_READER, ReliabilityKind::Reliable),
                Arc::clone(driver),
                builtin_port,
            )),
            sedp_pub_writer: Arc::new(StatefulWriter::new(
                attrs(ENTITYID_SEDP_PUBLICATIONS_WRITER, ReliabilityKind::Reliable),
                Arc::clone(driver),
                builtin_port,
                SEDP_HISTORY_CAPACITY,
            )),
            sedp_sub_reader: Arc::new(StatefulReader::new(
                attrs(ENTITYID_SEDP_SUBSCRIPTIONS_READER, ReliabilityKind::Reliable),
                Arc::clone(driver),
                builtin_port,
            )),
            sedp_sub_writer: Arc::new(StatefulWriter::new(
                attrs(ENTITYID_SEDP_SUBSCRIPTIONS_WRITER, ReliabilityKind::Reliable),
                Arc::clone(driver),
                builtin_port,
                SEDP_HISTORY_CAPACITY,
            )),
        }
    }
}

/// Process-scope container for readers, writers, and discovery state.
pub struct Participant<D: NetworkDriver> {
    guid_prefix: GuidPrefix,
    participant_id: u16,
    config: Arc<RtpsConfig>,
    driver: Arc<D>,
    builtin: BuiltInEndpoints<D>,
    readers: Mutex<Vec<Arc<StatefulReader<D>>>>,
    writers: Mutex<Vec<Arc<StatefulWriter<D>>>>,
    remote_participants: Mutex<Vec<ParticipantProxyData>>,
    next_user_entity_key: Mutex<[u8; 3]>,
    receiver: Mutex<MessageReceiver>,
    spdp_agent: Arc<SpdpAgent<D>>,
    sedp_agent: Arc<SedpAgent<D>>,
}

impl<D: NetworkDriver> Participant<D> {
    /// Bring up a participant: build the built-in endpoints, wire the
    /// discovery agents, seed the SPDP announcement, and start the
    /// periodic task. Failure here is fatal to the participant.
    pub fn new(config: Arc<RtpsConfig>, participant_id: u16, driver: Arc<D>) -> Result<Arc<Self>> {
        let guid_prefix = make_guid_prefix(&config, participant_id);
        let builtin_port = builtin_unicast_port(config.domain_id, participant_id);
        let user_port = user_unicast_port(config.domain_id, participant_id);
        let spdp_port = spdp_multicast_port(config.domain_id);

        let builtin = BuiltInEndpoints::create(guid_prefix, builtin_port, &driver);

        // The SPDP writer broadcasts to the well-known multicast group.
        builtin.spdp_writer.add_matched_reader(ReaderProxy::new(
            Guid::new(GUIDPREFIX_UNKNOWN, ENTITYID_UNKNOWN),
            LocatorIpv4::new(MULTICAST_IP, spdp_port),
            false,
        ))?;

        let participant = Arc::new_cyclic(|weak| {
            let spdp_agent = Arc::new(SpdpAgent::new(
                weak.clone(),
                builtin.clone(),
                Arc::clone(&config),
            ));
            let sedp_agent = Arc::new(SedpAgent::new(
                weak.clone(),
                builtin.clone(),
                Arc::clone(&config),
            ));

            Participant {
                guid_prefix,
                participant_id,
                config: Arc::clone(&config),
                driver,
                builtin: builtin.clone(),
                readers: Mutex::new(Vec::with_capacity(NUM_READERS_PER_PARTICIPANT)),
                writers: Mutex::new(Vec::with_capacity(NUM_WRITERS_PER_PARTICIPANT)),
                remote_participants: Mutex::new(
                    (0..MAX_NUM_REMOTE_PARTICIPANTS)
                        .map(|_| ParticipantProxyData::new())
                        .collect(),
                ),
                next_user_entity_key: Mutex::new([0, 0, 0]),
                receiver: Mutex::new(MessageReceiver::new(guid_prefix)),
                spdp_agent,
                sedp_agent,
            }
        });

        let local_proxy = participant.local_proxy_data(builtin_port, user_port, spdp_port);
        participant.spdp_agent.init(local_proxy)?;
        participant.sedp_agent.init()?;
        participant.spdp_agent.start();

        log::info!(
            "[participant] up: guid_prefix {:02x?}, domain {}, id {}",
            guid_prefix,
            config.domain_id,
            participant_id
        );
        Ok(participant)
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid_prefix
    }

    pub fn participant_id(&self) -> u16 {
        self.participant_id
    }

    pub fn config(&self) -> &RtpsConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Feed one received UDP datagram into the protocol stack.
    pub fn new_message(self: &Arc<Self>, data: &[u8]) -> bool {
        self.receiver.lock().process_message(data, self)
    }

    // ========================================================================
    // Local endpoints
    // ========================================================================

    /// Create a user writer and announce it over SEDP.
    pub fn add_writer(
        self: &Arc<Self>,
        topic_name: &str,
        type_name: &str,
        reliability: ReliabilityKind,
    ) -> Result<Arc<StatefulWriter<D>>> {
        let mut writers = self.writers.lock();
        if writers.len() >= NUM_WRITERS_PER_PARTICIPANT {
            return Err(Error::CapacityExceeded);
        }

        let entity_id = self.next_user_entity_id(ENTITY_KIND_USER_WRITER);
        let attributes = TopicData::new(
            Guid::new(self.guid_prefix, entity_id),
            topic_name,
            type_name,
            reliability,
            self.user_locator(),
        );
        let writer = Arc::new(StatefulWriter::new(
            attributes.clone(),
            Arc::clone(&self.driver),
            self.user_locator().port as u16,
            HISTORY_CACHE_CAPACITY,
        ));
        writers.push(Arc::clone(&writer));
        drop(writers);

        self.sedp_agent.announce_publication(&attributes);
        Ok(writer)
    }

    /// Create a user reader and announce it over SEDP.
    pub fn add_reader(
        self: &Arc<Self>,
        topic_name: &str,
        type_name: &str,
        reliability: ReliabilityKind,
    ) -> Result<Arc<StatefulReader<D>>> {
        let mut readers = self.readers.lock();
        if readers.len() >= NUM_READERS_PER_PARTICIPANT {
            return Err(Error::CapacityExceeded);
        }

        let entity_id = self.next_user_entity_id(ENTITY_KIND_USER_READER);
        let attributes = TopicData::new(
            Guid::new(self.guid_prefix, entity_id),
            topic_name,
            type_name,
            reliability,
            self.user_locator(),
        );
        let reader = Arc::new(StatefulReader::new(
            attributes.clone(),
            Arc::clone(&self.driver),
            self.user_locator().port as u16,
        ));
        readers.push(Arc::clone(&reader));
        drop(readers);

        self.sedp_agent.announce_subscription(&attributes);
        Ok(reader)
    }

    /// Withdraw a user writer: drop it from the entity table and publish
    /// an SEDP disposal so remote readers unmatch it.
    pub fn remove_writer(&self, writer: &Arc<StatefulWriter<D>>) -> Result<()> {
        let removed = {
            let mut writers = self.writers.lock();
            let Some(idx) = writers.iter().position(|w| Arc::ptr_eq(w, writer)) else {
                return Err(Error::UnknownEntity);
            };
            writers.remove(idx)
        };

        self.sedp_agent.dispose_publication(removed.attributes());
        Ok(())
    }

    /// Withdraw a user reader, the same way.
    pub fn remove_reader(&self, reader: &Arc<StatefulReader<D>>) -> Result<()> {
        let removed = {
            let mut readers = self.readers.lock();
            let Some(idx) = readers.iter().position(|r| Arc::ptr_eq(r, reader)) else {
                return Err(Error::UnknownEntity);
            };
            readers.remove(idx)
        };

        self.sedp_agent.dispose_subscription(removed.attributes());
        Ok(())
    }

    /// Look up a writer (user or built-in) by entity id.
    pub fn get_writer(&self, entity_id: EntityId) -> Option<Arc<StatefulWriter<D>>> {
        for builtin in [
            &self.builtin.spdp_writer,
            &self.builtin.sedp_pub_writer,
            &self.builtin.sedp_sub_writer,
        ] {
            if builtin.guid().entity_id == entity_id {
                return Some(Arc::clone(builtin));
            }
        }
        self.writers
            .lock()
            .iter()
            .find(|w| w.guid().entity_id == entity_id)
            .cloned()
    }

    /// Look up a reader (user or built-in) by entity id.
    pub fn get_reader(&self, entity_id: EntityId) -> Option<AnyReader<D>> {
        if self.builtin.spdp_reader.guid().entity_id == entity_id {
            return Some(AnyReader::Stateless(Arc::clone(&self.builtin.spdp_reader)));
        }
        for builtin in [&self.builtin.sedp_pub_reader, &self.builtin.sedp_sub_reader] {
            if builtin.guid().entity_id == entity_id {
                return Some(AnyReader::Stateful(Arc::clone(builtin)));
            }
        }
        self.readers
            .lock()
            .iter()
            .find(|r| r.guid().entity_id == entity_id)
            .map(|r| AnyReader::Stateful(Arc::clone(r)))
    }

    /// Find the local reader matched to a remote writer; used when DATA
    /// arrives addressed to ENTITYID_UNKNOWN.
    pub fn get_reader_by_writer_guid(&self, writer_guid: &Guid) -> Option<AnyReader<D>> {
        let candidates = [
            AnyReader::Stateless(Arc::clone(&self.builtin.spdp_reader)),
            AnyReader::Stateful(Arc::clone(&self.builtin.sedp_pub_reader)),
            AnyReader::Stateful(Arc::clone(&self.builtin.sedp_sub_reader)),
        ];
        for candidate in candidates {
            if candidate.matches_writer(writer_guid) {
                return Some(candidate);
            }
        }
        self.readers
            .lock()
            .iter()
            .find(|r| r.matches_writer(writer_guid))
            .map(|r| AnyReader::Stateful(Arc::clone(r)))
    }

    /// Look up a user writer by (topic, type).
    pub fn get_writer_by_topic(&self, topic_name: &str, type_name: &str) -> Option<Arc<StatefulWriter<D>>> {
        self.writers
            .lock()
            .iter()
            .find(|w| {
                w.attributes().topic_name == topic_name && w.attributes().type_name == type_name
            })
            .cloned()
    }

    /// Look up a user reader by (topic, type).
    pub fn get_reader_by_topic(&self, topic_name: &str, type_name: &str) -> Option<Arc<StatefulReader<D>>> {
        self.readers
            .lock()
            .iter()
            .find(|r| {
                r.attributes().topic_name == topic_name && r.attributes().type_name == type_name
            })
            .cloned()
    }

    /// Snapshot of the user readers (SEDP matching walks these).
    pub(crate) fn user_readers(&self) -> Vec<Arc<StatefulReader<D>>> {
        self.readers.lock().clone()
    }

    /// Snapshot of the user writers.
    pub(crate) fn user_writers(&self) -> Vec<Arc<StatefulWriter<D>>> {
        self.writers.lock().clone()
    }

    // ========================================================================
    // Remote participant table
    // ========================================================================

    /// Register a newly discovered participant. Slot allocation reuses
    /// entries whose GUID is unknown or whose lease has expired.
    pub fn add_new_remote_participant(&self, proxy_data: ParticipantProxyData) -> Result<()> {
        let mut table = self.remote_participants.lock();
        let Some(slot) = table
            .iter_mut()
            .find(|slot| slot.guid.is_unknown() || !slot.is_alive())
        else {
            log::debug!(
                "[participant] remote table full, dropping {}",
                proxy_data.guid
            );
            return Err(Error::CapacityExceeded);
        };

        log::info!("[participant] discovered remote participant {}", proxy_data.guid);
        *slot = proxy_data;
        slot.on_alive_signal();
        Ok(())
    }

    pub fn find_remote_participant(&self, prefix: &GuidPrefix) -> Option<ParticipantProxyData> {
        self.remote_participants
            .lock()
            .iter()
            .find(|slot| !slot.guid.is_unknown() && slot.guid.prefix == *prefix)
            .cloned()
    }

    /// Record a sign of life for a known remote participant.
    pub fn refresh_remote_participant_liveliness(&self, prefix: &GuidPrefix) {
        let mut table = self.remote_participants.lock();
        if let Some(slot) = table
            .iter_mut()
            .find(|slot| !slot.guid.is_unknown() && slot.guid.prefix == *prefix)
        {
            slot.on_alive_signal();
        }
    }

    /// Number of live remote participants.
    pub fn remote_participant_count(&self) -> usize {
        self.remote_participants
            .lock()
            .iter()
            .filter(|slot| !slot.guid.is_unknown())
            .count()
    }

    /// Periodic sweep: emit a heartbeat round for every writer and reap
    /// remote participants whose lease expired. Invoked from the SPDP
    /// agent's periodic task.
    pub fn check_and_reset_heartbeats(&self) {
        self.builtin.sedp_pub_writer.send_heartbeat();
        self.builtin.sedp_sub_writer.send_heartbeat();
        for writer in self.writers.lock().iter() {
            writer.send_heartbeat();
        }

        let expired: Vec<GuidPrefix> = {
            let mut table = self.remote_participants.lock();
            let mut reaped = Vec::new();
            for slot in table.iter_mut() {
                if !slot.guid.is_unknown() && !slot.is_alive() {
                    log::info!(
                        "[participant] lease expired, removing remote participant {}",
                        slot.guid
                    );
                    reaped.push(slot.guid.prefix);
                    slot.reset();
                }
            }
            reaped
        };

        for prefix in &expired {
            self.remove_proxies_with_prefix(prefix);
        }
    }

    fn remove_proxies_with_prefix(&self, prefix: &GuidPrefix) {
        self.builtin.sedp_pub_reader.remove_writers_with_prefix(prefix);
        self.builtin.sedp_sub_reader.remove_writers_with_prefix(prefix);
        self.builtin.sedp_pub_writer.remove_readers_with_prefix(prefix);
        self.builtin.sedp_sub_writer.remove_readers_with_prefix(prefix);
        for reader in self.readers.lock().iter() {
            reader.remove_writers_with_prefix(prefix);
        }
        for writer in self.writers.lock().iter() {
            writer.remove_readers_with_prefix(prefix);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn local_proxy_data(
        &self,
        builtin_port: u16,
        user_port: u16,
        spdp_port: u16,
    ) -> ParticipantProxyData {
        let mut local = ParticipantProxyData::new();
        local.guid = Guid::new(self.guid_prefix, ENTITYID_PARTICIPANT);
        local.vendor_id = VENDOR_ID;
        local.available_builtin_endpoints = BUILTIN_ENDPOINT_SET;
        local.lease_duration = crate::config::SPDP_LEASE_DURATION;
        local.metatraffic_unicast_locators[0] =
            LocatorIpv4::new(self.config.local_ip, builtin_port);
        local.metatraffic_multicast_locators[0] = LocatorIpv4::new(MULTICAST_IP, spdp_port);
        local.default_unicast_locators[0] = LocatorIpv4::new(self.config.local_ip, user_port);
        local
    }

    fn user_locator(&self) -> LocatorIpv4 {
        LocatorIpv4::new(
            self.config.local_ip,
            user_unicast_port(self.config.domain_id, self.participant_id),
        )
    }

    /// Sequential 3-byte entity keys for user endpoints.
    fn next_user_entity_id(&self, kind: u8) -> EntityId {
        let mut key = self.next_user_entity_key.lock();
        let value = u32::from_be_bytes([0, key[0], key[1], key[2]]) + 1;
        let bytes = value.to_be_bytes();
        *key = [bytes[1], bytes[2], bytes[3]];
        [bytes[1], bytes[2], bytes[3], kind]
    }
}

impl<D: NetworkDriver> Drop for Participant<D> {
    fn drop(&mut self) {
        self.spdp_agent.stop();
    }
}

/// GUID prefix: vendor id + local IP + participant id + process salt.
fn make_guid_prefix(config: &RtpsConfig, participant_id: u16) -> GuidPrefix {
    let mut prefix = [0u8; 12];
    prefix[0..2].copy_from_slice(&VENDOR_ID);
    prefix[2..6].copy_from_slice(&config.local_ip.octets());
    prefix[6..8].copy_from_slice(&participant_id.to_be_bytes());
    prefix[8..12].copy_from_slice(&config.guid_salt.to_be_bytes());
    prefix
}
