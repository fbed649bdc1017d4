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

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! The expiry pruner shared by the remote cache, local cache and message
//! store: scan the `expire` key family up to `now`, delete every key
//! family a caller maintains for each expired row in one atomic batch,
//! and hand back the removed rows so the caller can unlink files
//! (message store only) and adjust its own counters.

use crate::core::header::MessageHeader;
use crate::core::kv::{KvError, KvOp, Store};

const EXPIRE_FAMILY: u8 = 0xE0;

fn expire_key_bound(t: u32) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + 4);
    k.push(EXPIRE_FAMILY);
    k.extend_from_slice(&t.to_be_bytes());
    k
}

/// Scan the `expire` family for rows with `expire < now`, delete every key
/// family `key_families_for` names for each, and return the removed
/// `(header, servertime)` pairs.
///
/// `key_families_for(header, servertime)` must return every key this
/// cache maintains for that header (the message store passes a 3-key
/// closure; the header caches pass a 4-key one including the `date`
/// family).
pub fn prune_expired(
    store: &Store,
    now: u32,
    key_families_for: impl Fn(&MessageHeader, u32) -> Vec<Vec<u8>>,
) -> Result<Vec<(MessageHeader, u32)>, KvError> {
    let lo = expire_key_bound(0);
    let hi = expire_key_bound(now);
    let rows = store.range(lo, hi)?;

    let mut removed = Vec::with_capacity(rows.len());
    let mut ops = Vec::new();
    for (_k, v) in &rows {
        let (header, servertime) = match MessageHeader::from_value_blob(v) {
            Ok(pair) => pair,
            Err(_) => continue,
        };
        for key in key_families_for(&header, servertime) {
            ops.push(KvOp::Del { key });
        }
        removed.push((header, servertime));
    }

    if !ops.is_empty() {
        store.apply_batch(ops)?;
    }

    Ok(removed)
}
