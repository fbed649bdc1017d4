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

//! The remote header cache: one per peer, mirroring that peer's headers
//! into a local KV store under the four index key families, with a
//! timed-coalescing `sync` that pulls only what's changed since the last
//! round.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::core::header::MessageHeader;
use crate::core::kv::{KvError, KvOp, Store};
use crate::core::pruner;
use crate::networking::peer_client::{PeerClient, PeerClientError};

/// Minimum interval between two real sync rounds for the same peer.
pub const REFRESH_MIN_DELAY_SECS: u64 = 10;

/// Errors from opening or operating a remote header cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `dbpath` was empty.
    #[error("db path must not be empty")]
    EmptyDbPath,
    /// The initial status probe against the peer failed.
    #[error("peer probe failed: {0}")]
    Probe(#[from] PeerClientError),
    /// The backing KV store could not be opened or accessed.
    #[error("kv error: {0}")]
    Kv(#[from] KvError),
}

/// Outcome of one `sync` round.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncStats {
    /// Headers inserted for the first time this round.
    pub inserted: u64,
    /// Rows removed by the expiry prune at the start of this round.
    pub pruned: u64,
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

fn family_upper_bound(family: u8) -> Vec<u8> {
    let mut v = vec![family];
    v.extend(std::iter::repeat(0xFFu8).take(4 + 33 + 1));
    v
}

fn four_key_families(h: &MessageHeader, servertime: u32) -> Vec<Vec<u8>> {
    let keys = h.db_keys(servertime);
    vec![keys.i_key, keys.date_key, keys.servertime_key, keys.expire_key]
}

/// One peer's mirrored header set.
pub struct RemoteHeaderCache {
    client: PeerClient,
    store: Store,
    last_refresh_server: AtomicU32,
    last_refresh_local: AtomicU64,
    network_errors: AtomicU32,
    network_errors_total: AtomicU64,
    count: AtomicU64,
    sync_lock: AsyncMutex<()>,
}

impl RemoteHeaderCache {
    /// Open the cache for a peer at `host:port`, backed by `dbpath`.
    /// Fails if `dbpath` is empty, the initial status probe fails, or the
    /// KV store cannot be opened.
    pub async fn open(
        host: &str,
        port: u16,
        dbpath: impl AsRef<Path>,
    ) -> Result<Self, CacheError> {
        let dbpath = dbpath.as_ref();
        if dbpath.as_os_str().is_empty() {
            return Err(CacheError::EmptyDbPath);
        }
        let client = PeerClient::new(host, port);
        client.status().await?;

        let store = Store::open(dbpath)?;
        let count = store.range_count(vec![0xE0], family_upper_bound(0xE0))? as u64;

        Ok(Self {
            client,
            store,
            last_refresh_server: AtomicU32::new(0),
            last_refresh_local: AtomicU64::new(0),
            network_errors: AtomicU32::new(0),
            network_errors_total: AtomicU64::new(0),
            count: AtomicU64::new(count),
            sync_lock: AsyncMutex::new(()),
        })
    }

    /// Consecutive network errors recorded against this peer since the
    /// last success. The local cache evicts a peer once this crosses its
    /// own threshold.
    pub fn network_errors(&self) -> u32 {
        self.network_errors.load(Ordering::SeqCst)
    }

    /// Total network errors ever recorded against this peer, never reset.
    pub fn network_errors_total(&self) -> u64 {
        self.network_errors_total.load(Ordering::SeqCst)
    }

    /// Number of headers currently mirrored from this peer.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Server-time high-water mark as of the last successful sync.
    pub fn last_refresh_server(&self) -> u32 {
        self.last_refresh_server.load(Ordering::SeqCst)
    }

    fn note_result<T>(&self, result: &Result<T, PeerClientError>) {
        match result {
            Ok(_) => self.network_errors.store(0, Ordering::SeqCst),
            Err(PeerClientError::Network(_)) => {
                self.network_errors.fetch_add(1, Ordering::SeqCst);
                self.network_errors_total.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {}
        }
    }

    /// Write the 4-key batch for `h`. No-op if `h.i` is already present.
    /// Returns `true` if this was a first-sight insert.
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

    /// Delete all 4 keys for `h`, recovering the persisted servertime.
    pub fn remove(&self, i: &[u8]) -> Result<bool, KvError> {
        let Some(blob) = self.store.get(i)? else {
            return Ok(false);
        };
        let Ok((header, servertime)) = MessageHeader::from_value_blob(&blob) else {
            return Ok(false);
        };
        let keys = header.db_keys(servertime);
        self.store.apply_batch(vec![
            KvOp::Del { key: keys.i_key },
            KvOp::Del { key: keys.date_key },
            KvOp::Del {
                key: keys.servertime_key,
            },
            KvOp::Del {
                key: keys.expire_key,
            },
        ])?;
        self.count.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    }

    /// `true` if this peer's mirror already holds `i`, without touching
    /// the network.
    pub fn contains(&self, i: &[u8]) -> Result<bool, KvError> {
        self.store.contains(i)
    }

    /// Download a message body directly from this peer.
    pub async fn download_message(&self, i: &[u8]) -> Result<Vec<u8>, PeerClientError> {
        let result = self.client.download_message(i).await;
        self.note_result(&result);
        result
    }

    /// Point lookup by I, triggering an opportunistic sync first.
    pub async fn find_by_i(&self, i: &[u8]) -> Result<Option<MessageHeader>, CacheError> {
        let _ = self.sync().await;
        match self.store.get(i)? {
            Some(blob) => Ok(MessageHeader::from_value_blob(&blob).ok().map(|(h, _)| h)),
            None => Ok(None),
        }
    }

    /// Headers with `servertime >= t`, via the `servertime` family.
    pub fn find_since(&self, t: u32) -> Result<Vec<MessageHeader>, KvError> {
        Ok(self
            .find_since_with_servertime(t)?
            .into_iter()
            .map(|(h, _)| h)
            .collect())
    }

    /// As [`RemoteHeaderCache::find_since`], but also returns the
    /// servertime this node originally recorded for each header — the
    /// local cache preserves it verbatim when promoting a row rather than
    /// re-stamping it with a second wall-clock read.
    pub fn find_since_with_servertime(
        &self,
        t: u32,
    ) -> Result<Vec<(MessageHeader, u32)>, KvError> {
        let mut lower = vec![0xC0];
        lower.extend_from_slice(&t.to_be_bytes());
        let rows = self.store.range(lower, family_upper_bound(0xC0))?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, v)| MessageHeader::from_value_blob(&v).ok())
            .collect())
    }

    /// Headers expiring at or after `t`, via the `expire` family.
    pub fn find_expiring_after(&self, t: u32) -> Result<Vec<MessageHeader>, KvError> {
        let mut lower = vec![0xE0];
        lower.extend_from_slice(&t.to_be_bytes());
        let rows = self.store.range(lower, family_upper_bound(0xE0))?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, v)| MessageHeader::from_value_blob(&v).ok().map(|(h, _)| h))
            .collect())
    }

    /// Timed-coalescing sync: fetch peer time, prune expired rows, pull
    /// headers since the last server-observed high-water mark, insert
    /// them, then commit the new high-water marks. At most one caller
    /// performs the actual round at a time; others observing a
    /// sufficiently fresh cache return immediately.
    pub async fn sync(&self) -> Result<SyncStats, CacheError> {
        let now = now_secs();
        if self.last_refresh_local.load(Ordering::SeqCst) + REFRESH_MIN_DELAY_SECS > now as u64 {
            return Ok(SyncStats::default());
        }

        let _guard = self.sync_lock.lock().await;
        let now = now_secs();
        if self.last_refresh_local.load(Ordering::SeqCst) + REFRESH_MIN_DELAY_SECS > now as u64 {
            return Ok(SyncStats::default());
        }

        let time_result = self.client.time().await;
        self.note_result(&time_result);
        let server_time = time_result?.time;

        let removed = pruner::prune_expired(&self.store, now, four_key_families)?;
        self.count.fetch_sub(removed.len() as u64, Ordering::SeqCst);

        let headers_result = self
            .client
            .headers_since(self.last_refresh_server.load(Ordering::SeqCst))
            .await;
        self.note_result(&headers_result);
        let headers = headers_result?;

        let mut inserted = 0u64;
        for h in headers {
            if h.is_legacy() {
                continue;
            }
            if self.insert(&h, now)? {
                inserted += 1;
            }
        }

        self.last_refresh_server.store(server_time, Ordering::SeqCst);
        self.last_refresh_local.store(now as u64, Ordering::SeqCst);

        Ok(SyncStats {
            inserted,
            pruned: removed.len() as u64,
        })
    }
}
