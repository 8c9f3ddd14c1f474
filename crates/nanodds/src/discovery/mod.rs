// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery: SPDP participant announcement and SEDP endpoint exchange.
//!
//! SPDP periodically multicasts the local participant's proxy data and
//! ingests remote announcements; SEDP exchanges per-endpoint metadata so
//! user readers and writers get matched by (topic, type).

pub mod proxy_data;
pub mod sedp;
pub mod spdp;
pub mod topic_data;

pub use proxy_data::ParticipantProxyData;
pub use sedp::SedpAgent;
pub use spdp::SpdpAgent;
pub use topic_data::{DurabilityKind, ReliabilityKind, TopicData};

use crate::error::{Error, Result};
use crate::protocol::cdr::CdrReader;
use crate::protocol::constants::{SCHEME_PL_CDR_BE, SCHEME_PL_CDR_LE};

/// Open a discovery payload: a 2-byte encapsulation id selecting the
/// endianness, 2 option bytes, then the parameter list.
pub(crate) fn payload_reader(data: &[u8]) -> Result<CdrReader<'_>> {
    if data.len() < 4 {
        return Err(Error::Malformed);
    }

    let scheme = [data[0], data[1]];
    let little_endian = if scheme == SCHEME_PL_CDR_LE {
        true
    } else if scheme == SCHEME_PL_CDR_BE {
        false
    } else {
        return Err(Error::Malformed);
    };

    Ok(CdrReader::new(&data[4..], little_endian))
}
