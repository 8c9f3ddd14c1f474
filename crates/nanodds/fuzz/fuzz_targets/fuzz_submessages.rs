// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use nanodds::protocol::submessages::{
    decode_acknack, decode_data, decode_gap, decode_heartbeat, MessageHeader, SubmessageHeader,
};

fuzz_target!(|data: &[u8]| {
    let _ = MessageHeader::decode(data);

    let Ok(header) = SubmessageHeader::decode(data) else {
        return;
    };
    let body = &data[4.min(data.len())..];

    let _ = decode_data(body, &header);
    let _ = decode_heartbeat(body, &header);
    let _ = decode_acknack(body, &header);
    let _ = decode_gap(body, &header);
});
