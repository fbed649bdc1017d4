// Copyright (c) 2026 Amunchain
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shardmesh::core::sector::ShardSector;

#[derive(Arbitrary, Debug)]
struct Input {
    start: u16,
    ring: u8,
    probe_bin: u16,
}

fuzz_target!(|input: Input| {
    let Ok(sector) = ShardSector::new(input.start, input.ring) else {
        return;
    };
    let _ = sector.width();
    let _ = sector.raw_end();
    let _ = sector.contains(input.probe_bin);
    let _ = sector.ranges();
    let _ = sector.key_ranges();
    let _ = ShardSector::next_adjacent(sector.start, sector.ring);
});
