// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `find_sector` returns exactly the set of locally-cached headers whose
//! bin falls inside the queried arc — including the arcs that wrap past
//! `0x3FF` back to `0x200`.

use std::collections::BTreeSet;

use shardmesh::core::header::{HeaderVersion, MessageHeader};
use shardmesh::core::sector::ShardSector;
use shardmesh::networking::local_cache::LocalHeaderCache;

fn header_with_bin(bin: u16) -> MessageHeader {
    MessageHeader {
        version: HeaderVersion::V2,
        time: 1,
        expire: 1_000_000,
        i: {
            let mut i = [0u8; 33];
            i[0] = (bin >> 8) as u8;
            i[1] = (bin & 0xFF) as u8;
            i
        },
        j: [0u8; 33],
        k: [0u8; 33],
        blocklen: 0,
        reserved: 0,
        r: [0u8; 32],
        s: [0u8; 32],
        nonce: 0,
    }
}

#[test]
fn find_sector_matches_brute_force_membership_across_a_wrap() {
    let dir = tempfile::tempdir().unwrap();
    let lhc = LocalHeaderCache::open(dir.path()).unwrap();

    // Scatter one header per bin across the whole ring, plus duplicates
    // within a single bin to exercise more than a singleton match.
    let mut all_bins = Vec::new();
    for bin in 0x0200u16..=0x03FFu16 {
        if bin % 23 == 0 {
            lhc.insert(&header_with_bin(bin), bin as u32).unwrap();
            all_bins.push(bin);
        }
    }

    // A sector whose arc wraps: start near the top of the ring.
    let sector = ShardSector::new(0x03F0, 4).unwrap(); // width 32, end 0x410 -> wraps to 0x210
    let expected: BTreeSet<u16> = all_bins
        .iter()
        .copied()
        .filter(|&bin| sector.contains(bin))
        .collect();

    let found = lhc.find_sector(&sector).unwrap();
    let found_bins: BTreeSet<u16> = found.iter().map(|h| h.bin()).collect();

    assert_eq!(found_bins, expected);
    assert_eq!(found.len(), expected.len());
}
