// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use nanodds::config::RtpsConfig;
use nanodds::discovery::ParticipantProxyData;
use nanodds::protocol::cdr::CdrReader;

fuzz_target!(|data: &[u8]| {
    let config = RtpsConfig::localhost(0);

    // Both endiannesses of the participant parameter-list parser.
    let mut reader = CdrReader::new(data, true);
    let _ = ParticipantProxyData::read_from(&mut reader, &config);

    let mut reader = CdrReader::new(data, false);
    let _ = ParticipantProxyData::read_from(&mut reader, &config);
});
