// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SEDP: endpoint metadata exchange over the built-in publication and
//! subscription channels.
//!
//! Local user endpoints are announced by serializing their `TopicData`
//! into the matching built-in writer. Inbound `TopicData` is matched
//! against local endpoints by (topic, type); a match installs the proxy
//! that makes user traffic flow. Disposal messages (status-info bits)
//! tear the proxy down again; withdrawing a local endpoint publishes one
//! and deletes the superseded announcement from the SEDP history.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::{DISCOVERY_SCRATCH_SIZE, RtpsConfig};
use crate::core::guid::{EntityId, Guid};
use crate::core::sequence::SequenceNumber;
use crate::discovery::payload_reader;
use crate::discovery::topic_data::{ReliabilityKind, TopicData};
use crate::error::Result;
use crate::history::ChangeKind;
use crate::participant::{BuiltInEndpoints, Participant};
use crate::protocol::cdr::CdrWriter;
use crate::protocol::constants::SCHEME_PL_CDR_LE;
use crate::reliability::{ReaderCacheChange, ReaderProxy, StatefulWriter, WriterProxy};
use crate::transport::NetworkDriver;

/// Simple Endpoint Discovery Protocol agent.
pub struct SedpAgent<D: NetworkDriver> {
    participant: Weak<Participant<D>>,
    endpoints: BuiltInEndpoints<D>,
    config: Arc<RtpsConfig>,
    /// Sequence numbers of the announcements we currently retain, one per
    /// announced local endpoint. Needed to delete them on withdrawal.
    announced_publications: Mutex<Vec<(EntityId, SequenceNumber)>>,
    announced_subscriptions: Mutex<Vec<(EntityId, SequenceNumber)>>,
}

impl<D: NetworkDriver> SedpAgent<D> {
    pub fn new(
        participant: Weak<Participant<D>>,
        endpoints: BuiltInEndpoints<D>,
        config: Arc<RtpsConfig>,
    ) -> Self {
        Self {
            participant,
            endpoints,
            config,
            announced_publications: Mutex::new(Vec::new()),
            announced_subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Hook the callbacks on both SEDP built-in readers.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        let agent = Arc::clone(self);
        self.endpoints
            .sedp_pub_reader
            .register_callback(Box::new(move |change| {
                agent.handle_publication(change);
            }))?;

        let agent = Arc::clone(self);
        self.endpoints
            .sedp_sub_reader
            .register_callback(Box::new(move |change| {
                agent.handle_subscription(change);
            }))?;
        Ok(())
    }

    /// Announce a local writer on the publications channel.
    pub fn announce_publication(&self, attributes: &TopicData) {
        let sn = self
            .endpoints
            .sedp_pub_writer
            .new_change(&Self::serialize(attributes));
        self.announced_publications
            .lock()
            .push((attributes.endpoint_guid.entity_id, sn));
        log::debug!(
            "[sedp] announced publication {} ({})",
            attributes.topic_name,
            attributes.endpoint_guid
        );
    }

    /// Announce a local reader on the subscriptions channel.
    pub fn announce_subscription(&self, attributes: &TopicData) {
        let sn = self
            .endpoints
            .sedp_sub_writer
            .new_change(&Self::serialize(attributes));
        self.announced_subscriptions
            .lock()
            .push((attributes.endpoint_guid.entity_id, sn));
        log::debug!(
            "[sedp] announced subscription {} ({})",
            attributes.topic_name,
            attributes.endpoint_guid
        );
    }

    /// Withdraw a local writer: delete its retained announcement and
    /// publish a status-info disposal so remote readers drop the proxy.
    pub fn dispose_publication(&self, attributes: &TopicData) {
        Self::dispose(
            &self.endpoints.sedp_pub_writer,
            &self.announced_publications,
            attributes,
        );
        log::debug!(
            "[sedp] disposed publication {} ({})",
            attributes.topic_name,
            attributes.endpoint_guid
        );
    }

    /// Withdraw a local reader, the same way.
    pub fn dispose_subscription(&self, attributes: &TopicData) {
        Self::dispose(
            &self.endpoints.sedp_sub_writer,
            &self.announced_subscriptions,
            attributes,
        );
        log::debug!(
            "[sedp] disposed subscription {} ({})",
            attributes.topic_name,
            attributes.endpoint_guid
        );
    }

    fn dispose(
        writer: &Arc<StatefulWriter<D>>,
        announced: &Mutex<Vec<(EntityId, SequenceNumber)>>,
        attributes: &TopicData,
    ) {
        let entity_id = attributes.endpoint_guid.entity_id;
        let announced_sn = {
            let mut announced = announced.lock();
            announced
                .iter()
                .position(|(id, _)| *id == entity_id)
                .map(|idx| announced.remove(idx).1)
        };

        // The stale announcement must not be replayed to late joiners.
        if let Some(sn) = announced_sn {
            writer.remove_change(sn);
        }

        // The disposal itself is flagged dispose-after-write: the writer
        // purges it once every matched reader has acknowledged it.
        let disposal = attributes.as_disposal();
        writer.new_change_with_flags(&Self::serialize(&disposal), false, true);
    }

    /// Remote writer advertised: match against local readers.
    fn handle_publication(&self, change: &ReaderCacheChange<'_>) {
        let Some(topic_data) = self.parse(change) else {
            return;
        };
        let Some(participant) = self.participant.upgrade() else {
            return;
        };

        let writer_guid = remote_endpoint_guid(&topic_data);
        if topic_data.is_disposed_flag_set() || topic_data.is_unregistered_flag_set() {
            for reader in participant.user_readers() {
                reader.remove_writer(&writer_guid);
            }
            log::debug!("[sedp] remote publication {} disposed", writer_guid);
            return;
        }

        for reader in participant.user_readers() {
            if !reader.attributes().matches_topic_of(&topic_data) {
                continue;
            }
            let locator = self.reach_locator(&topic_data, &writer_guid);
            if reader
                .add_matched_writer(WriterProxy::new(writer_guid, locator))
                .is_ok()
            {
                log::info!(
                    "[sedp] matched remote writer {} to local reader {} on '{}'",
                    writer_guid,
                    reader.guid(),
                    topic_data.topic_name
                );
                if topic_data.reliability == ReliabilityKind::Reliable {
                    reader.send_preemptive_acknack(&writer_guid);
                }
            }
        }
    }

    /// Remote reader advertised: match against local writers.
    fn handle_subscription(&self, change: &ReaderCacheChange<'_>) {
        let Some(topic_data) = self.parse(change) else {
            return;
        };
        let Some(participant) = self.participant.upgrade() else {
            return;
        };

        let reader_guid = remote_endpoint_guid(&topic_data);
        if topic_data.is_disposed_flag_set() || topic_data.is_unregistered_flag_set() {
            for writer in participant.user_writers() {
                writer.remove_reader(&reader_guid);
            }
            log::debug!("[sedp] remote subscription {} disposed", reader_guid);
            return;
        }

        for writer in participant.user_writers() {
            if !writer.attributes().matches_topic_of(&topic_data) {
                continue;
            }
            let locator = self.reach_locator(&topic_data, &reader_guid);
            let is_reliable = topic_data.reliability == ReliabilityKind::Reliable;
            if writer
                .add_matched_reader(ReaderProxy::new(reader_guid, locator, is_reliable))
                .is_ok()
            {
                log::info!(
                    "[sedp] matched remote reader {} to local writer {} on '{}'",
                    reader_guid,
                    writer.guid(),
                    topic_data.topic_name
                );
                writer.send_unsent_changes();
            }
        }
    }

    fn parse(&self, change: &ReaderCacheChange<'_>) -> Option<TopicData> {
        if change.kind != ChangeKind::Alive {
            return None;
        }
        let mut reader = match payload_reader(change.data) {
            Ok(reader) => reader,
            Err(_) => {
                log::debug!("[sedp] bad encapsulation header, endpoint data dropped");
                return None;
            }
        };
        match TopicData::read_from(&mut reader, &self.config) {
            Ok(data) => Some(data),
            Err(err) => {
                log::debug!("[sedp] malformed endpoint data dropped: {}", err);
                None
            }
        }
    }

    /// Destination for user traffic toward the remote endpoint: its own
    /// advertised locator when usable, otherwise the default unicast
    /// locator from the participant announcement.
    fn reach_locator(
        &self,
        topic_data: &TopicData,
        endpoint_guid: &Guid,
    ) -> crate::core::locator::LocatorIpv4 {
        if topic_data.unicast_locator.is_valid() {
            return topic_data.unicast_locator;
        }
        if let Some(participant) = self.participant.upgrade() {
            if let Some(remote) = participant.find_remote_participant(&endpoint_guid.prefix) {
                if let Some(locator) = remote
                    .default_unicast_locators
                    .iter()
                    .find(|l| l.is_valid())
                {
                    return *locator;
                }
            }
        }
        crate::core::locator::LocatorIpv4::invalid()
    }

    fn serialize(attributes: &TopicData) -> Vec<u8> {
        let mut writer = CdrWriter::with_capacity(DISCOVERY_SCRATCH_SIZE);
        writer.write_bytes(&SCHEME_PL_CDR_LE);
        writer.write_u16(0); // options
        attributes.write_into(&mut writer);
        writer.into_bytes()
    }
}

/// GUID of the advertised endpoint: key-hash entity id wins when the
/// endpoint-guid parameter was absent (disposal messages).
fn remote_endpoint_guid(topic_data: &TopicData) -> Guid {
    let mut guid = topic_data.endpoint_guid;
    if guid.entity_id == crate::core::guid::ENTITYID_UNKNOWN {
        if let Some(entity_id) = topic_data.entity_id_from_key_hash {
            guid.entity_id = entity_id;
        }
    }
    guid
}
