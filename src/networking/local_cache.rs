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

//! The local header cache: the union of all remote header caches, plus
//! deferred peer registration, health-based eviction and sector-range
//! scans. This is the authoritative local index of "what exists in the
//! federation".

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::core::header::MessageHeader;
use crate::core::kv::{KvError, KvOp, Store};
use crate::core::pruner;
use crate::core::sector::{SectorError, ShardSector};
use crate::networking::remote_cache::{CacheError, RemoteHeaderCache};

/// Minimum interval between two real sync rounds.
pub const REFRESH_MIN_DELAY_SECS: u64 = 10;
/// Consecutive network errors before a peer is evicted.
pub const PEER_CONSECUTIVE_ERROR_MAX: u32 = 20;

const SECTOR_STATE_KEY: &[u8] = b"sector_state";

/// Errors from local cache operations.
#[derive(Debug, Error)]
pub enum LocalCacheError {
    /// Backing KV store failure.
    #[error("kv error: {0}")]
    Kv(#[from] KvError),
    /// Sector validation failure in `find_sector`.
    #[error("sector error: {0}")]
    Sector(#[from] SectorError),
}

struct PeerEntry {
    host: String,
    port: u16,
    rhc: Arc<RemoteHeaderCache>,
    last_refresh: AtomicU64,
}

struct PeerCandidate {
    host: String,
    port: u16,
}

fn now_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

fn four_key_families(h: &MessageHeader, servertime: u32) -> Vec<Vec<u8>> {
    let keys = h.db_keys(servertime);
    vec![keys.i_key, keys.date_key, keys.servertime_key, keys.expire_key]
}

/// Aggregated view over every registered peer's mirrored headers.
pub struct LocalHeaderCache {
    store: Store,
    dbroot: PathBuf,
    peers: RwLock<Vec<PeerEntry>>,
    candidates: StdMutex<Vec<PeerCandidate>>,
    last_refresh_local: AtomicU64,
    count: AtomicU64,
    evictions: AtomicU64,
    evicted_network_errors: AtomicU64,
    sync_lock: AsyncMutex<()>,
}

impl LocalHeaderCache {
    /// Open the cache, backed by `dbpath` for its own KV store and
    /// `dbpath/peers/{host}_{port}` for each registered peer's RHC.
    pub fn open(dbpath: impl AsRef<Path>) -> Result<Self, LocalCacheError> {
        let dbroot = dbpath.as_ref().to_path_buf();
        let store = Store::open(&dbroot)?;
        let count = store.range_count(vec![0xE0], {
            let mut v = vec![0xE0u8];
            v.extend(std::iter::repeat(0xFFu8).take(4 + 33 + 1));
            v
        })? as u64;

        Ok(Self {
            store,
            dbroot,
            peers: RwLock::new(Vec::new()),
            candidates: StdMutex::new(Vec::new()),
            last_refresh_local: AtomicU64::new(0),
            count: AtomicU64::new(count),
            evictions: AtomicU64::new(0),
            evicted_network_errors: AtomicU64::new(0),
            sync_lock: AsyncMutex::new(()),
        })
    }

    /// Read the persisted sector start bin, if this node has booted
    /// before. Otherwise callers should choose one and call
    /// [`LocalHeaderCache::persist_start_bin`].
    pub fn persisted_start_bin(&self) -> Result<Option<u16>, KvError> {
        Ok(self.store.get(SECTOR_STATE_KEY)?.and_then(|v| {
            if v.len() == 2 {
                Some(u16::from_be_bytes([v[0], v[1]]))
            } else {
                None
            }
        }))
    }

    /// Persist the sector start bin chosen at first boot so subsequent
    /// restarts recover it instead of re-rolling.
    pub fn persist_start_bin(&self, start: u16) -> Result<(), KvError> {
        self.store.apply_batch(vec![KvOp::Put {
            key: SECTOR_STATE_KEY.to_vec(),
            value: start.to_be_bytes().to_vec(),
        }])
    }

    /// Number of headers currently indexed locally.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Non-blocking peer registration: appends to a candidate list drained
    /// by the next [`LocalHeaderCache::sync`] call.
    pub fn add_peer(&self, host: impl Into<String>, port: u16) {
        self.candidates
            .lock()
            .expect("candidate mutex poisoned")
            .push(PeerCandidate {
                host: host.into(),
                port,
            });
    }

    /// Number of live (non-evicted) peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Total network errors observed across every peer this cache has
    /// ever held, live or evicted.
    pub async fn total_network_errors(&self) -> u64 {
        let live: u64 = self
            .peers
            .read()
            .await
            .iter()
            .map(|p| p.rhc.network_errors_total())
            .sum();
        live + self.evicted_network_errors.load(Ordering::SeqCst)
    }

    /// Total peers evicted for crossing the consecutive-error threshold,
    /// since this cache was opened.
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::SeqCst)
    }

    fn peer_dbpath(&self, host: &str, port: u16) -> PathBuf {
        self.dbroot.join("peers").join(format!("{host}_{port}"))
    }

    async fn drain_candidates(&self) -> Vec<PeerEntry> {
        let pending: Vec<PeerCandidate> = {
            let mut guard = self.candidates.lock().expect("candidate mutex poisoned");
            std::mem::take(&mut *guard)
        };

        let mut opened = Vec::with_capacity(pending.len());
        for c in pending {
            let dbpath = self.peer_dbpath(&c.host, c.port);
            match RemoteHeaderCache::open(&c.host, c.port, &dbpath).await {
                Ok(rhc) => opened.push(PeerEntry {
                    host: c.host,
                    port: c.port,
                    rhc: Arc::new(rhc),
                    last_refresh: AtomicU64::new(0),
                }),
                Err(e) => {
                    tracing::warn!(host = %c.host, port, err = %e, "failed to open peer, dropping candidate");
                }
            }
        }
        opened
    }

    /// Timed-coalescing sync: drains pending peer candidates, then for
    /// each live peer (visited in random order) refreshes its remote
    /// cache and pulls anything new into the local store. Peers with
    /// [`PEER_CONSECUTIVE_ERROR_MAX`] or more consecutive network errors
    /// are dropped at the end of the round.
    pub async fn sync(&self) -> Result<(), LocalCacheError> {
        let now = now_secs();
        if self.last_refresh_local.load(Ordering::SeqCst) + REFRESH_MIN_DELAY_SECS > now as u64 {
            return Ok(());
        }

        let _guard = self.sync_lock.lock().await;
        let now = now_secs();
        if self.last_refresh_local.load(Ordering::SeqCst) + REFRESH_MIN_DELAY_SECS > now as u64 {
            return Ok(());
        }

        let newly_opened = self.drain_candidates().await;
        if !newly_opened.is_empty() {
            self.peers.write().await.extend(newly_opened);
        }

        let mut order: Vec<usize> = {
            let peers = self.peers.read().await;
            (0..peers.len()).collect()
        };
        order.shuffle(&mut rand::thread_rng());

        let removed = pruner::prune_expired(&self.store, now, four_key_families)?;
        self.count.fetch_sub(removed.len() as u64, Ordering::SeqCst);

        for idx in order {
            let peers = self.peers.read().await;
            let Some(peer) = peers.get(idx) else {
                continue;
            };
            if peer.rhc.sync().await.is_err() {
                continue;
            }
            let server_advanced = peer.rhc.last_refresh_server();
            let watermark = peer.last_refresh.load(Ordering::SeqCst) as u32;
            if server_advanced <= watermark {
                continue;
            }
            let Ok(headers) = peer.rhc.find_since_with_servertime(watermark) else {
                continue;
            };
            for (h, servertime) in headers {
                if h.is_legacy() {
                    continue;
                }
                if self.insert(&h, servertime)? {
                    // newly inserted, nothing further to do
                }
            }
            peer.last_refresh
                .store(server_advanced as u64, Ordering::SeqCst);
        }

        self.evict_unhealthy_peers().await;
        self.last_refresh_local.store(now as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn evict_unhealthy_peers(&self) {
        let mut peers = self.peers.write().await;
        let mut evicted = 0u64;
        let mut evicted_errors = 0u64;
        for p in peers.iter().filter(|p| p.rhc.network_errors() >= PEER_CONSECUTIVE_ERROR_MAX) {
            tracing::warn!(
                host = %p.host,
                port = p.port,
                errors = p.rhc.network_errors(),
                "evicting unhealthy peer from local cache"
            );
            evicted += 1;
            evicted_errors += p.rhc.network_errors_total();
        }
        peers.retain(|p| p.rhc.network_errors() < PEER_CONSECUTIVE_ERROR_MAX);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::SeqCst);
            self.evicted_network_errors
                .fetch_add(evicted_errors, Ordering::SeqCst);
        }
    }

    /// Write the 4-key batch for `h` if not already present, preserving
    /// the caller-supplied `servertime`.
    pub fn insert(&self, h: &MessageHeader, servertime: u32) -> Result<bool, KvError> {
        if self.store.contains(&h.i)? {
            return Ok(false);
        }
        let keys = h.db_keys(servertime);
        self.store.apply_batch(vec![
            KvOp::Put {
                key: keys.i_key,
                value: keys.value.clone(),
            },
            KvOp::Put {
                key: keys.date_key,
                value: keys.value.clone(),
            },
            KvOp::Put {
                key: keys.servertime_key,
                value: keys.value.clone(),
            },
            KvOp::Put {
                key: keys.expire_key,
                value: keys.value,
            },
        ])?;
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    /// Point lookup by I against the local index only (no peer network
    /// access; that's the remote cache's job).
    pub fn find_by_i(&self, i: &[u8]) -> Result<Option<MessageHeader>, KvError> {
        match self.store.get(i)? {
            Some(blob) => Ok(MessageHeader::from_value_blob(&blob).ok().map(|(h, _)| h)),
            None => Ok(None),
        }
    }

    /// Headers with `servertime >= t`.
    pub fn find_since(&self, t: u32) -> Result<Vec<MessageHeader>, KvError> {
        let mut lower = vec![0xC0];
        lower.extend_from_slice(&t.to_be_bytes());
        let mut upper = vec![0xC0u8];
        upper.extend(std::iter::repeat(0xFFu8).take(4 + 33 + 1));
        let rows = self.store.range(lower, upper)?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, v)| MessageHeader::from_value_blob(&v).ok().map(|(h, _)| h))
            .collect())
    }

    /// Try every live peer, in random order, for a body matching `i`.
    /// Used by the message store's workers; returns the first successful
    /// download, or `None` if no peer has it.
    pub async fn fetch_body_from_any_peer(&self, i: &[u8]) -> Option<Vec<u8>> {
        let mut order: Vec<usize> = {
            let peers = self.peers.read().await;
            (0..peers.len()).collect()
        };
        order.shuffle(&mut rand::thread_rng());

        for idx in order {
            let rhc = {
                let peers = self.peers.read().await;
                peers.get(idx).map(|p| Arc::clone(&p.rhc))
            };
            let Some(rhc) = rhc else {
                continue;
            };
            match rhc.contains(i) {
                Ok(true) => {}
                _ => continue,
            }
            // The Arc clone lets the download run without holding the
            // peers read lock, so a slow peer never blocks sync()'s
            // write lock.
            if let Ok(bytes) = rhc.download_message(i).await {
                return Some(bytes);
            }
        }
        None
    }

    /// Exactly the headers whose `bin(I)` falls in `s`'s arc, scanning the
    /// I family directly (one range, or two when the arc wraps).
    pub fn find_sector(&self, s: &ShardSector) -> Result<Vec<MessageHeader>, LocalCacheError> {
        s.validate()?;
        let mut out = Vec::new();
        for (lo, hi) in s.key_ranges() {
            let rows = self.store.range(lo, hi)?;
            out.extend(
                rows.into_iter()
                    .filter_map(|(_, v)| MessageHeader::from_value_blob(&v).ok().map(|(h, _)| h)),
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::HeaderVersion;

    fn header(i0: u8, i1: u8, expire: u32) -> MessageHeader {
        MessageHeader {
            version: HeaderVersion::V2,
            time: 1,
            expire,
            i: {
                let mut i = [0u8; 33];
                i[0] = i0;
                i[1] = i1;
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
    fn scenario_single_peer_ingest_via_direct_insert() {
        let dir = tempfile::tempdir().unwrap();
        let lhc = LocalHeaderCache::open(dir.path()).unwrap();
        let h = header(0x02, 0x34, 1000 + 7 * 86_400);
        assert!(lhc.insert(&h, 500).unwrap());
        assert_eq!(lhc.count(), 1);

        let sector = ShardSector::new(0x0234, 9).unwrap();
        let found = lhc.find_sector(&sector).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].i, h.i);
    }

    #[test]
    fn sector_state_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let lhc = LocalHeaderCache::open(dir.path()).unwrap();
        assert_eq!(lhc.persisted_start_bin().unwrap(), None);
        lhc.persist_start_bin(0x0280).unwrap();
        assert_eq!(lhc.persisted_start_bin().unwrap(), Some(0x0280));
    }

    #[test]
    fn prunes_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let lhc = LocalHeaderCache::open(dir.path()).unwrap();
        let h = header(0x02, 0x01, 100);
        lhc.insert(&h, 10).unwrap();
        assert_eq!(lhc.count(), 1);

        let removed = pruner::prune_expired(&lhc.store, 200, four_key_families).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(lhc.find_by_i(&h.i).unwrap().is_none());
    }
}
