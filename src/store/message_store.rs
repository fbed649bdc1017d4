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

//! The message store: the blob store whose contents are driven to match
//! the subset of local-cache entries lying inside this node's declared
//! shard sector. Bodies are fetched lazily, by a bounded worker pool, from
//! whichever peer has them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;

use crate::core::header::{MessageHeader, POINT_LEN};
use crate::core::kv::{KvError, KvOp, Store};
use crate::core::message::{self, MessageError, MessageFile};
use crate::core::pruner;
use crate::core::sector::{SectorError, ShardSector, MAX_RING};
use crate::networking::local_cache::LocalHeaderCache;

/// Fixed worker pool size draining the download retry queue.
pub const WORKER_COUNT: usize = 16;
/// Retry queue capacity: `5 * WORKER_COUNT`.
pub const QUEUE_CAPACITY: usize = 5 * WORKER_COUNT;
/// A header due to expire within this window of `now` is dropped rather
/// than re-enqueued after a failed download attempt.
pub const ALLOWABLE_CLOCK_SKEW_SECS: u64 = 15 * 60;

type MsgId = [u8; POINT_LEN];

/// Errors from message store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing KV store failure.
    #[error("kv error: {0}")]
    Kv(#[from] KvError),
    /// Sector validation failure.
    #[error("sector error: {0}")]
    Sector(#[from] SectorError),
    /// Proof-of-work, size-check, or filesystem failure on a message body.
    #[error("message error: {0}")]
    Message(#[from] MessageError),
    /// Filesystem I/O failure outside of ingest.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The retry queue's receiving half was dropped (shutdown in progress).
    #[error("retry queue closed")]
    QueueClosed,
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn three_key_families(h: &MessageHeader, servertime: u32) -> Vec<Vec<u8>> {
    let mut servertime_key = vec![0xC0u8];
    servertime_key.extend_from_slice(&servertime.to_be_bytes());
    servertime_key.extend_from_slice(&h.i);

    let mut expire_key = vec![0xE0u8];
    expire_key.extend_from_slice(&h.expire.to_be_bytes());
    expire_key.extend_from_slice(&h.i);

    vec![h.i.to_vec(), servertime_key, expire_key]
}

#[cfg(unix)]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

struct WorkerHandle {
    quit: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

/// Store-and-forward blob store for messages inside this node's sector.
pub struct MessageStore {
    store: Store,
    root: PathBuf,
    lhc: Arc<LocalHeaderCache>,
    current_sector: AsyncRwLock<ShardSector>,
    count: AtomicU64,
    queue_tx: mpsc::Sender<MsgId>,
    queue_rx: Arc<AsyncMutex<mpsc::Receiver<MsgId>>>,
    workers: StdMutex<Vec<WorkerHandle>>,
}

impl MessageStore {
    /// Open the store at `root`, performing directory layout creation,
    /// KV recount, and the startup filesystem sweep, then spawn the
    /// worker pool. `start` is the initial (smallest) sector this node
    /// declares ownership of.
    pub async fn open(
        root: impl AsRef<Path>,
        lhc: Arc<LocalHeaderCache>,
        start: ShardSector,
    ) -> Result<Arc<Self>, StoreError> {
        start.validate()?;
        let root = root.as_ref().to_path_buf();

        create_dir_0755(&root.join("receive"))?;
        for bin in 0x0200u16..=0x03FF {
            create_dir_0755(&root.join("store").join(format!("{bin:04x}")))?;
        }

        let store = Store::open(root.join("msgdb"))?;
        let mut upper = vec![0xE0u8];
        upper.extend(std::iter::repeat(0xFFu8).take(4 + POINT_LEN + 1));
        let count = store.range_count(vec![0xE0], upper)? as u64;

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let this = Arc::new(Self {
            store,
            root,
            lhc,
            current_sector: AsyncRwLock::new(start),
            count: AtomicU64::new(count),
            queue_tx: tx,
            queue_rx: Arc::new(AsyncMutex::new(rx)),
            workers: StdMutex::new(Vec::new()),
        });

        this.filesystem_sweep().await?;
        this.spawn_workers();
        Ok(this)
    }

    /// Ingest any file under `store/{bin}/` not already present in the
    /// KV database. Orphan KV rows whose file has vanished are left for
    /// the next lookup-miss or expiry to clean up.
    async fn filesystem_sweep(&self) -> Result<(), StoreError> {
        let now = now_secs();
        for bin in 0x0200u16..=0x03FF {
            let dir = self.root.join("store").join(format!("{bin:04x}"));
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Ok(i_bytes) = hex::decode(name) else {
                    continue;
                };
                if i_bytes.len() != POINT_LEN || self.store.contains(&i_bytes)? {
                    continue;
                }
                match MessageFile::ingest(&path, now) {
                    Ok(mf) => {
                        if let Err(e) = self.insert(&mf) {
                            tracing::warn!(err = %e, file = %path.display(), "sweep insert failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, file = %path.display(), "sweep ingest rejected file");
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_workers(self: &Arc<Self>) {
        let mut handles = Vec::with_capacity(WORKER_COUNT);
        for id in 0..WORKER_COUNT {
            let (quit_tx, quit_rx) = mpsc::channel(1);
            let this = Arc::clone(self);
            let rx = Arc::clone(&this.queue_rx);
            let join = tokio::spawn(async move {
                this.worker_loop(id, rx, quit_rx).await;
            });
            handles.push(WorkerHandle {
                quit: quit_tx,
                join,
            });
        }
        *self.workers.lock().expect("workers mutex poisoned") = handles;
    }

    async fn worker_loop(
        self: Arc<Self>,
        id: usize,
        rx: Arc<AsyncMutex<mpsc::Receiver<MsgId>>>,
        mut quit: mpsc::Receiver<()>,
    ) {
        loop {
            let item = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    _ = quit.recv() => None,
                    maybe = guard.recv() => maybe,
                }
            };
            let Some(i) = item else {
                break;
            };
            if let Err(e) = self.handle_download(id, i).await {
                tracing::warn!(worker = id, err = %e, "download attempt failed");
            }
        }
    }

    async fn handle_download(&self, worker_id: usize, i: MsgId) -> Result<(), StoreError> {
        let body = self.lhc.fetch_body_from_any_peer(&i).await;
        let Some(bytes) = body else {
            return self.on_total_failure(&i).await;
        };

        let staging = message::receive_path(&self.root, now_nanos());
        let staging_write = staging.clone();
        let bytes_clone = bytes.clone();
        tokio::task::spawn_blocking(move || std::fs::write(&staging_write, &bytes_clone))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let now = now_secs();
        let staging_for_ingest = staging.clone();
        let ingest_result =
            tokio::task::spawn_blocking(move || MessageFile::ingest(&staging_for_ingest, now))
                .await
                .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let mut mf = match ingest_result {
            Ok(mf) => mf,
            Err(e) => {
                tracing::warn!(worker = worker_id, err = %e, "ingest rejected downloaded body");
                let _ = tokio::fs::remove_file(&staging).await;
                return Ok(());
            }
        };

        let dest = message::store_path(&self.root, mf.header.bin(), &mf.header.i);
        let dest_for_move = dest.clone();
        let mut moved = mf.clone();
        tokio::task::spawn_blocking(move || moved.move_to(dest_for_move).map(|_| moved))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        mf.filepath = dest;

        self.insert(&mf)?;
        Ok(())
    }

    async fn on_total_failure(&self, i: &MsgId) -> Result<(), StoreError> {
        let Some(header) = self.lhc.find_by_i(i)? else {
            return Ok(());
        };
        let now = now_secs() as u64;
        if header.expire as u64 > now + ALLOWABLE_CLOCK_SKEW_SECS {
            self.queue_tx
                .send(*i)
                .await
                .map_err(|_| StoreError::QueueClosed)?;
        }
        Ok(())
    }

    /// Enumerate all local-cache headers in `sector` and enqueue any I
    /// whose body is missing locally.
    async fn sync_sector(&self, sector: &ShardSector) -> Result<(), StoreError> {
        let headers = self.lhc.find_sector(sector)?;
        for h in headers {
            if h.is_legacy() {
                continue;
            }
            if !self.store.contains(&h.i)? {
                self.queue_tx
                    .send(h.i)
                    .await
                    .map_err(|_| StoreError::QueueClosed)?;
            }
        }
        Ok(())
    }

    /// Enqueue any header received since `checkpoint` whose bin falls
    /// inside `sector` and whose body isn't yet stored.
    async fn refresh_sector(&self, sector: &ShardSector, checkpoint: u32) -> Result<(), StoreError> {
        let headers = self.lhc.find_since(checkpoint)?;
        for h in headers {
            if h.is_legacy() || !sector.contains(h.bin()) {
                continue;
            }
            if !self.store.contains(&h.i)? {
                self.queue_tx
                    .send(h.i)
                    .await
                    .map_err(|_| StoreError::QueueClosed)?;
            }
        }
        Ok(())
    }

    /// Set the target sector and launch the background ring-descent
    /// `populate` task that widens coverage down to it.
    pub fn set_target(self: &Arc<Self>, target: ShardSector) -> Result<(), StoreError> {
        target.validate()?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            {
                let mut cur = this.current_sector.write().await;
                *cur = ShardSector {
                    start: target.start,
                    ring: MAX_RING,
                };
            }
            if let Err(e) = this.populate(target).await {
                tracing::warn!(err = %e, "sector populate failed");
            }
        });
        Ok(())
    }

    async fn populate(&self, target: ShardSector) -> Result<(), StoreError> {
        let mut current = *self.current_sector.read().await;
        self.sync_sector(&current).await?;

        let mut checkpoint = now_secs();
        let mut r = current.ring;
        while r > target.ring {
            let adjacent = ShardSector::next_adjacent(current.start, r);
            self.sync_sector(&adjacent).await?;
            r -= 1;
            current = ShardSector {
                start: current.start,
                ring: r,
            };
            {
                let mut cur = self.current_sector.write().await;
                *cur = current;
            }
            self.refresh_sector(&current, checkpoint).await?;
            checkpoint = now_secs();
        }

        *self.current_sector.write().await = target;
        Ok(())
    }

    /// Re-synchronize the currently committed sector against the local
    /// cache. Intended to be called periodically in the background.
    pub async fn sync(&self) -> Result<(), StoreError> {
        let current = *self.current_sector.read().await;
        self.sync_sector(&current).await
    }

    /// Currently committed sector.
    pub async fn current_sector(&self) -> ShardSector {
        *self.current_sector.read().await
    }

    /// Number of messages currently indexed.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Current depth of the download retry queue (items sent but not
    /// yet received by a worker).
    pub fn queue_depth(&self) -> usize {
        QUEUE_CAPACITY - self.queue_tx.capacity()
    }

    /// Idempotent insert: writes the 3-key batch (I, servertime, expire)
    /// the first time a header's I is seen and returns the servertime
    /// just written. A later call for the same I returns the
    /// originally-stored servertime, never the new one.
    pub fn insert(&self, mf: &MessageFile) -> Result<u32, StoreError> {
        if let Some(blob) = self.store.get(&mf.header.i)? {
            let (_, stored_servertime, _) = MessageFile::deserialize(&blob)?;
            return Ok(stored_servertime);
        }

        let value = mf.serialize();
        let mut servertime_key = vec![0xC0u8];
        servertime_key.extend_from_slice(&mf.servertime.to_be_bytes());
        servertime_key.extend_from_slice(&mf.header.i);
        let mut expire_key = vec![0xE0u8];
        expire_key.extend_from_slice(&mf.header.expire.to_be_bytes());
        expire_key.extend_from_slice(&mf.header.i);

        self.store.apply_batch(vec![
            KvOp::Put {
                key: mf.header.i.to_vec(),
                value: value.clone(),
            },
            KvOp::Put {
                key: servertime_key,
                value: value.clone(),
            },
            KvOp::Put {
                key: expire_key,
                value,
            },
        ])?;
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(mf.servertime)
    }

    /// Delete the three KV keys for `i`, then unlink its file. Count is
    /// decremented once the KV batch commits, regardless of whether the
    /// subsequent unlink succeeds — an unlink failure leaves `count`
    /// advisory-only off by one rather than blocking removal.
    pub fn remove(&self, i: &[u8]) -> Result<bool, StoreError> {
        let Some(blob) = self.store.get(i)? else {
            return Ok(false);
        };
        let (header, servertime, _size) = MessageFile::deserialize(&blob)?;

        let mut servertime_key = vec![0xC0u8];
        servertime_key.extend_from_slice(&servertime.to_be_bytes());
        servertime_key.extend_from_slice(&header.i);
        let mut expire_key = vec![0xE0u8];
        expire_key.extend_from_slice(&header.expire.to_be_bytes());
        expire_key.extend_from_slice(&header.i);

        self.store.apply_batch(vec![
            KvOp::Del {
                key: header.i.to_vec(),
            },
            KvOp::Del { key: servertime_key },
            KvOp::Del { key: expire_key },
        ])?;
        self.count.fetch_sub(1, Ordering::SeqCst);

        let path = message::store_path(&self.root, header.bin(), &header.i);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(err = %e, path = %path.display(), "unlink failed after KV removal");
        }
        Ok(true)
    }

    /// Local point lookup by I.
    pub fn find_by_i(&self, i: &[u8]) -> Result<Option<MessageHeader>, StoreError> {
        match self.store.get(i)? {
            Some(blob) => Ok(Some(MessageFile::deserialize(&blob)?.0)),
            None => Ok(None),
        }
    }

    /// Read a message body's raw bytes off disk, by I. Returns `None` if
    /// the KV row is absent (the HTTP surface maps that to a 404 rather
    /// than surfacing a stale-row/missing-file distinction to clients).
    pub fn read_body(&self, i: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(blob) = self.store.get(i)? else {
            return Ok(None);
        };
        let (header, _servertime, _size) = MessageFile::deserialize(&blob)?;
        let path = message::store_path(&self.root, header.bin(), &header.i);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Messages with `servertime >= t`, via this store's own
    /// `servertime` key family.
    pub fn find_since(&self, t: u32) -> Result<Vec<MessageHeader>, StoreError> {
        let mut lower = vec![0xC0u8];
        lower.extend_from_slice(&t.to_be_bytes());
        let mut upper = vec![0xC0u8];
        upper.extend(std::iter::repeat(0xFFu8).take(4 + POINT_LEN + 1));
        let rows = self.store.range(lower, upper)?;
        let mut out = Vec::with_capacity(rows.len());
        for (_, v) in rows {
            out.push(MessageFile::deserialize(&v)?.0);
        }
        Ok(out)
    }

    /// Prune expired rows: deletes all 3 key families this store
    /// maintains for each row (the retrieved source only deleted 2 of
    /// its 3 families for this component; this implementation keeps all
    /// three consistent with RHC/LHC's own pruners) and unlinks their
    /// files.
    pub fn prune_expired(&self) -> Result<usize, StoreError> {
        let now = now_secs();
        let removed = pruner::prune_expired(&self.store, now, three_key_families)?;
        for (header, _servertime) in &removed {
            let path = message::store_path(&self.root, header.bin(), &header.i);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(err = %e, path = %path.display(), "prune unlink missed file");
            }
        }
        self.count.fetch_sub(removed.len() as u64, Ordering::SeqCst);
        Ok(removed.len())
    }

    /// Stage, validate (proof-of-work and size) and store a message body uploaded directly
    /// by a client, returning its header and the servertime it was
    /// stored under. Blocking; callers on an async runtime should run
    /// this via `spawn_blocking`.
    pub fn ingest_upload(&self, bytes: &[u8]) -> Result<(MessageHeader, u32), StoreError> {
        let staging = message::receive_path(&self.root, now_nanos());
        if let Some(parent) = staging.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&staging, bytes)?;

        let mut mf = match MessageFile::ingest(&staging, now_secs()) {
            Ok(mf) => mf,
            Err(e) => {
                let _ = std::fs::remove_file(&staging);
                return Err(e.into());
            }
        };

        let dest = message::store_path(&self.root, mf.header.bin(), &mf.header.i);
        mf.move_to(dest)?;
        let servertime = self.insert(&mf)?;
        Ok((mf.header, servertime))
    }

    /// Signal every worker to quit and join its task.
    pub async fn close(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().expect("workers mutex poisoned"));
        for h in &handles {
            let _ = h.quit.send(()).await;
        }
        for h in handles {
            let _ = h.join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::HeaderVersion;

    fn header(i0: u8, i1: u8, blocklen: u32, expire: u32) -> MessageHeader {
        MessageHeader {
            version: HeaderVersion::V2,
            time: 1,
            expire,
            i: {
                let mut i = [0u8; POINT_LEN];
                i[0] = i0;
                i[1] = i1;
                i
            },
            j: [0u8; POINT_LEN],
            k: [0u8; POINT_LEN],
            blocklen,
            reserved: 0,
            r: [0u8; 32],
            s: [0u8; 32],
            nonce: 0,
        }
    }

    async fn open_store(dir: &std::path::Path) -> Arc<MessageStore> {
        let lhc = Arc::new(LocalHeaderCache::open(dir.join("lhc")).unwrap());
        MessageStore::open(dir.join("ms"), lhc, ShardSector::new(0x0200, 9).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn idempotent_insert_returns_original_servertime() {
        let dir = tempfile::tempdir().unwrap();
        let ms = open_store(dir.path()).await;

        let h = header(0x02, 0x01, 0, 100_000);
        let mf = MessageFile {
            header: h.clone(),
            size: 256,
            servertime: 1_000,
            filepath: dir.path().join("unused"),
        };

        let first = ms.insert(&mf).unwrap();
        assert_eq!(first, 1_000);

        let mut mf2 = mf.clone();
        mf2.servertime = 2_000;
        let second = ms.insert(&mf2).unwrap();
        assert_eq!(second, 1_000);

        ms.close().await;
    }

    #[tokio::test]
    async fn remove_deletes_kv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let ms = open_store(dir.path()).await;

        let h = header(0x02, 0x02, 0, 100_000);
        let mf = MessageFile {
            header: h.clone(),
            size: 256,
            servertime: 500,
            filepath: dir.path().join("unused"),
        };
        ms.insert(&mf).unwrap();
        assert_eq!(ms.count(), 1);

        assert!(ms.remove(&h.i).unwrap());
        assert_eq!(ms.count(), 0);
        assert!(ms.find_by_i(&h.i).unwrap().is_none());

        ms.close().await;
    }

    #[tokio::test]
    async fn prune_removes_expired_and_decrements_count() {
        let dir = tempfile::tempdir().unwrap();
        let ms = open_store(dir.path()).await;

        let h = header(0x02, 0x03, 0, 100);
        let mf = MessageFile {
            header: h.clone(),
            size: 256,
            servertime: 10,
            filepath: dir.path().join("unused"),
        };
        ms.insert(&mf).unwrap();

        let removed = ms.prune_expired().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ms.count(), 0);

        ms.close().await;
    }
}
