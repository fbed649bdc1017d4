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

//! End-to-end federation scenario: one node learns a header from a
//! single peer over real HTTP, commits a sector that contains it, and
//! the message store's worker pool pulls the body from that same peer.

mod support;

use std::sync::Arc;
use std::time::Duration;

use shardmesh::core::sector::ShardSector;
use shardmesh::networking::local_cache::LocalHeaderCache;
use shardmesh::store::message_store::MessageStore;

use support::{signed_header_and_body, MockPeer};

#[tokio::test]
async fn single_peer_header_and_body_replicate() {
    let peer = MockPeer::start().await;
    let (h, body) = signed_header_and_body(0x02, 0x34, 1, 1_000 + 7 * 86_400);
    peer.add_header(h.clone(), body.clone());

    let dir = tempfile::tempdir().unwrap();
    let lhc = Arc::new(LocalHeaderCache::open(dir.path().join("lhc")).unwrap());
    lhc.add_peer("127.0.0.1", peer.port);

    lhc.sync().await.expect("lhc sync");
    assert_eq!(lhc.count(), 1, "header should have replicated into the LHC");

    let sector = ShardSector::new(0x0234, 9).unwrap();
    let found = lhc.find_sector(&sector).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].i, h.i);

    let ms = MessageStore::open(dir.path().join("ms"), Arc::clone(&lhc), sector)
        .await
        .unwrap();
    ms.sync().await.expect("ms sync enqueues the missing body");

    let mut attempts = 0;
    loop {
        if ms.find_by_i(&h.i).unwrap().is_some() {
            break;
        }
        attempts += 1;
        assert!(attempts < 100, "worker pool never fetched the body");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stored = ms.read_body(&h.i).unwrap().expect("body present on disk");
    assert_eq!(stored, body);
    assert_eq!(ms.count(), 1);

    ms.close().await;
}
