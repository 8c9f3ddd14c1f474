// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SPDP: periodic participant announcement and remote-participant intake.
//!
//! One cooperative task per participant: rebroadcast our own announcement
//! every resend period, and every few cycles trigger the participant's
//! heartbeat/lease sweep. Inbound announcements arrive through the SPDP
//! reader's callback; new participants get their SEDP proxies wired up
//! from the built-in endpoint bitmask.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{
    RtpsConfig, DISCOVERY_SCRATCH_SIZE, SPDP_CYCLECOUNT_HEARTBEAT, SPDP_RESEND_PERIOD_MS,
};
use crate::core::guid::Guid;
use crate::discovery::payload_reader;
use crate::discovery::proxy_data::ParticipantProxyData;
use crate::error::Result;
use crate::history::ChangeKind;
use crate::participant::{BuiltInEndpoints, Participant};
use crate::protocol::cdr::CdrWriter;
use crate::protocol::constants::{
    ENTITYID_SEDP_PUBLICATIONS_READER, ENTITYID_SEDP_PUBLICATIONS_WRITER,
    ENTITYID_SEDP_SUBSCRIPTIONS_READER, ENTITYID_SEDP_SUBSCRIPTIONS_WRITER, SCHEME_PL_CDR_LE,
};
use crate::reliability::{ReaderCacheChange, ReaderProxy, WriterProxy};
use crate::transport::NetworkDriver;

/// Simple Participant Discovery Protocol agent.
pub struct SpdpAgent<D: NetworkDriver> {
    participant: Weak<Participant<D>>,
    endpoints: BuiltInEndpoints<D>,
    config: Arc<RtpsConfig>,
    /// Scratch for inbound parameter lists; datagrams that do not fit are
    /// dropped.
    scratch: Mutex<Vec<u8>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<D: NetworkDriver> SpdpAgent<D> {
    pub fn new(
        participant: Weak<Participant<D>>,
        endpoints: BuiltInEndpoints<D>,
        config: Arc<RtpsConfig>,
    ) -> Self {
        Self {
            participant,
            endpoints,
            config,
            scratch: Mutex::new(Vec::with_capacity(DISCOVERY_SCRATCH_SIZE)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Serialize the local announcement into the SPDP writer's history
    /// and hook the inbound callback. Called once during bring-up.
    pub fn init(self: &Arc<Self>, local: ParticipantProxyData) -> Result<()> {
        let mut writer = CdrWriter::with_capacity(DISCOVERY_SCRATCH_SIZE);
        writer.write_bytes(&SCHEME_PL_CDR_LE);
        writer.write_u16(0); // options
        local.write_into(&mut writer);
        self.endpoints.spdp_writer.new_change(&writer.into_bytes());

        let agent = Arc::clone(self);
        self.endpoints
            .spdp_reader
            .register_callback(Box::new(move |change| {
                agent.handle_spdp_package(change);
            }))?;
        Ok(())
    }

    /// Start the periodic resend task.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        let running = Arc::clone(&self.running);
        let participant = self.participant.clone();
        let spdp_writer = Arc::clone(&self.endpoints.spdp_writer);

        let handle = thread::spawn(move || {
            let mut cycles: u32 = 0;
            while running.load(Ordering::Relaxed) {
                // Chunked sleep keeps shutdown latency under ~50 ms.
                let wake = std::time::Instant::now()
                    + Duration::from_millis(SPDP_RESEND_PERIOD_MS);
                while std::time::Instant::now() < wake {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(50));
                }

                spdp_writer.unsent_changes_reset();
                spdp_writer.send_unsent_changes();

                cycles = cycles.wrapping_add(1);
                if cycles % SPDP_CYCLECOUNT_HEARTBEAT == 0 {
                    match participant.upgrade() {
                        Some(participant) => participant.check_and_reset_heartbeats(),
                        None => break,
                    }
                }
            }
            log::debug!("[spdp] periodic task stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    /// Clear the running flag and join the periodic task.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().take() {
            // The periodic task can hold the last participant reference;
            // a drop on that thread must not join itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }

    /// Inbound SPDP DATA, delivered through the SPDP reader's callback in
    /// the receive-task context.
    pub fn handle_spdp_package(&self, change: &ReaderCacheChange<'_>) {
        if change.kind != ChangeKind::Alive {
            return;
        }
        if change.data.len() > DISCOVERY_SCRATCH_SIZE {
            log::debug!(
                "[spdp] announcement of {} bytes exceeds scratch buffer, dropped",
                change.data.len()
            );
            return;
        }

        let Some(participant) = self.participant.upgrade() else {
            return;
        };

        let mut scratch = self.scratch.lock();
        scratch.clear();
        scratch.extend_from_slice(change.data);

        let proxy_data = {
            let mut reader = match payload_reader(&scratch) {
                Ok(reader) => reader,
                Err(_) => {
                    log::debug!("[spdp] bad encapsulation header, announcement dropped");
                    return;
                }
            };
            match ParticipantProxyData::read_from(&mut reader, &self.config) {
                Ok(data) => data,
                Err(err) => {
                    log::debug!("[spdp] malformed announcement dropped: {}", err);
                    return;
                }
            }
        };

        if proxy_data.guid.prefix == participant.guid_prefix() {
            return; // our own packet
        }

        if participant
            .find_remote_participant(&proxy_data.guid.prefix)
            .is_some()
        {
            participant.refresh_remote_participant_liveliness(&proxy_data.guid.prefix);
            return;
        }

        // A newcomer: rebroadcast our own announcement so it learns about
        // us without waiting a full resend period.
        self.endpoints.spdp_writer.unsent_changes_reset();
        self.endpoints.spdp_writer.send_unsent_changes();

        if participant
            .add_new_remote_participant(proxy_data.clone())
            .is_err()
        {
            return;
        }
        self.add_proxies_for_builtin_endpoints(&proxy_data);
    }

    /// Wire SEDP proxies for every endpoint the remote declares in its
    /// built-in endpoint bitmask, and solicit heartbeats from its writers.
    fn add_proxies_for_builtin_endpoints(&self, remote: &ParticipantProxyData) {
        let Some(locator) = remote.metatraffic_unicast_locator() else {
            log::debug!(
                "[spdp] {} has no reachable meta-traffic locator, SEDP not wired",
                remote.guid
            );
            return;
        };
        let prefix = remote.guid.prefix;

        if remote.has_publication_writer() {
            let guid = Guid::new(prefix, ENTITYID_SEDP_PUBLICATIONS_WRITER);
            if self
                .endpoints
                .sedp_pub_reader
                .add_matched_writer(WriterProxy::new(guid, locator))
                .is_ok()
            {
                self.endpoints.sedp_pub_reader.send_preemptive_acknack(&guid);
            }
        }

        if remote.has_subscription_writer() {
            let guid = Guid::new(prefix, ENTITYID_SEDP_SUBSCRIPTIONS_WRITER);
            if self
                .endpoints
                .sedp_sub_reader
                .add_matched_writer(WriterProxy::new(guid, locator))
                .is_ok()
            {
                self.endpoints.sedp_sub_reader.send_preemptive_acknack(&guid);
            }
        }

        if remote.has_publication_reader() {
            let guid = Guid::new(prefix, ENTITYID_SEDP_PUBLICATIONS_READER);
            let _ = self
                .endpoints
                .sedp_pub_writer
                .add_matched_reader(ReaderProxy::new(guid, locator, true));
        }

        if remote.has_subscription_reader() {
            let guid = Guid::new(prefix, ENTITYID_SEDP_SUBSCRIPTIONS_READER);
            let _ = self
                .endpoints
                .sedp_sub_writer
                .add_matched_reader(ReaderProxy::new(guid, locator, true));
        }
    }
}
