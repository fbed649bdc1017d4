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

//! Binary and base64 v2 header encodings roundtrip for arbitrary field
//! values, independent of whether the header happens to satisfy the
//! proof-of-work invariant.

use proptest::prelude::*;
use shardmesh::core::header::{HeaderVersion, MessageHeader};

fn arb_header() -> impl Strategy<Value = MessageHeader> {
    (
        any::<u32>(),
        1u32..=u32::MAX,
        any::<[u8; 33]>(),
        any::<[u8; 33]>(),
        any::<[u8; 33]>(),
        any::<u32>(),
        any::<u64>(),
        any::<[u8; 32]>(),
        any::<[u8; 32]>(),
        0u64..(1u64 << 40),
    )
        .prop_filter_map("expire must exceed time", |v| {
            let (time, expire_offset, i, j, k, blocklen, reserved, r, s, nonce) = v;
            let expire = time.checked_add(expire_offset)?;
            Some(MessageHeader {
                version: HeaderVersion::V2,
                time,
                expire,
                i,
                j,
                k,
                blocklen,
                reserved,
                r,
                s,
                nonce,
            })
        })
}

proptest! {
    #[test]
    fn v2_binary_and_base64_roundtrip(h in arb_header()) {
        let bin = h.serialize_v2();
        let parsed = MessageHeader::parse(&bin).unwrap();
        prop_assert_eq!(&parsed, &h);

        let b64 = h.serialize_v2_base64();
        let parsed_b64 = MessageHeader::parse(b64.as_bytes()).unwrap();
        prop_assert_eq!(parsed_b64, h);
    }

    #[test]
    fn bin_is_always_in_ring_range(h in arb_header()) {
        let bin = h.bin();
        prop_assert!((0x0200..=0x03FF).contains(&bin));
    }
}
