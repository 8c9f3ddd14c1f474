// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use nanodds::config::RtpsConfig;
use nanodds::discovery::TopicData;
use nanodds::protocol::cdr::CdrReader;

fuzz_target!(|data: &[u8]| {
    let config = RtpsConfig::localhost(0);

    let mut reader = CdrReader::new(data, true);
    let _ = TopicData::read_from(&mut reader, &config);

    let mut reader = CdrReader::new(data, false);
    let _ = TopicData::read_from(&mut reader, &config);
});
