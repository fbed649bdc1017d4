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

//! A peer that starts answering every call with a server error is
//! dropped from the local cache after enough consecutive failed sync
//! rounds, while headers it already contributed stay queryable.
//!
//! Both the local cache and each remote cache coalesce `sync()` calls
//! within a 10-second window, so driving 20 consecutive real rounds
//! takes a few minutes of wall clock — that coalescing is itself part
//! of what this test exercises, not an artifact to work around.

mod support;

use std::sync::Arc;
use std::time::Duration;

use shardmesh::networking::local_cache::{LocalHeaderCache, PEER_CONSECUTIVE_ERROR_MAX};

use support::{signed_header_and_body, MockPeer};

#[tokio::test]
async fn unhealthy_peer_is_dropped_after_consecutive_failures() {
    let peer = MockPeer::start().await;
    let (h, body) = signed_header_and_body(0x03, 0x10, 0, 1_000 + 7 * 86_400);
    peer.add_header(h.clone(), body);

    let dir = tempfile::tempdir().unwrap();
    let lhc = Arc::new(LocalHeaderCache::open(dir.path().join("lhc")).unwrap());
    lhc.add_peer("127.0.0.1", peer.port);

    lhc.sync().await.expect("first sync brings the peer and its header in");
    assert_eq!(lhc.peer_count().await, 1);
    assert_eq!(lhc.count(), 1);

    peer.set_failing(true);

    for _ in 0..PEER_CONSECUTIVE_ERROR_MAX {
        tokio::time::sleep(Duration::from_secs(11)).await;
        let _ = lhc.sync().await;
    }

    assert_eq!(
        lhc.peer_count().await,
        0,
        "peer should be evicted after {PEER_CONSECUTIVE_ERROR_MAX} consecutive failures"
    );
    assert_eq!(
        lhc.find_by_i(&h.i).unwrap().map(|found| found.i),
        Some(h.i),
        "the header the evicted peer contributed stays in the local cache"
    );
}
