// Copyright (c) 2026 Amunchain
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Best-effort: header parsing must never panic, on any input length
    // or content, whether it looks like base64, legacy hex, or garbage.
    let _ = shardmesh::core::header::MessageHeader::parse(data);
});
