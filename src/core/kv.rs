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

//! Ordered byte-keyed store shared by the remote cache, local cache and
//! message store. Wraps `sled` and exposes only the primitives the
//! replication engine needs: point lookup, atomic multi-key batch writes,
//! and prefix/bounded range iteration.

use std::path::Path;

use sled::IVec;
use thiserror::Error;

/// KV errors.
#[derive(Debug, Error)]
pub enum KvError {
    /// Failed to open the backing store.
    #[error("kv open")]
    Open,
    /// Read or write against the store failed.
    #[error("kv io")]
    Io,
}

/// A single keyed mutation applied as part of an atomic batch.
#[derive(Clone, Debug)]
pub enum KvOp {
    /// Insert or overwrite `key` with `value`.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Del {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// Ordered key-value store. Cheap to clone; all clones share the same
/// underlying `sled::Db` handle.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    /// Open (or create) the store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let db = sled::open(path).map_err(|_| KvError::Open)?;
        Ok(Self { db })
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<IVec>, KvError> {
        self.db.get(key).map_err(|_| KvError::Io)
    }

    /// `true` if `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool, KvError> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply a set of puts/deletes as a single atomic batch.
    pub fn apply_batch(&self, ops: Vec<KvOp>) -> Result<(), KvError> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                KvOp::Put { key, value } => batch.insert(key, value),
                KvOp::Del { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch).map_err(|_| KvError::Io)
    }

    /// Iterate `[start, end)` in key order, collecting owned (key, value) pairs.
    ///
    /// Callers pick `start`/`end` so the scan never needs to load more than
    /// one bounded slice of the keyspace; all current callers scan a single
    /// 4-byte-prefixed timestamp range or a sector's I-key arc.
    pub fn range(&self, start: Vec<u8>, end: Vec<u8>) -> Result<Vec<(IVec, IVec)>, KvError> {
        let mut out = Vec::new();
        for item in self.db.range(start..end) {
            let (k, v) = item.map_err(|_| KvError::Io)?;
            out.push((k, v));
        }
        Ok(out)
    }

    /// Count of keys in `[start, end)`, without materializing values.
    pub fn range_count(&self, start: Vec<u8>, end: Vec<u8>) -> Result<usize, KvError> {
        let mut n = 0usize;
        for item in self.db.range(start..end) {
            item.map_err(|_| KvError::Io)?;
            n += 1;
        }
        Ok(n)
    }

    /// Flush to disk. Best-effort; callers that need durability guarantees
    /// on shutdown should call this explicitly.
    pub fn flush(&self) -> Result<(), KvError> {
        self.db.flush().map_err(|_| KvError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_atomic_and_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store
            .apply_batch(vec![
                KvOp::Put {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                KvOp::Put {
                    key: b"b".to_vec(),
                    value: b"2".to_vec(),
                },
            ])
            .unwrap();

        assert_eq!(store.get(b"a").unwrap().unwrap().as_ref(), b"1");
        assert_eq!(store.get(b"b").unwrap().unwrap().as_ref(), b"2");

        store
            .apply_batch(vec![KvOp::Del { key: b"a".to_vec() }])
            .unwrap();
        assert!(store.get(b"a").unwrap().is_none());
    }

    #[test]
    fn range_respects_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        for k in [1u8, 2, 3, 4, 5] {
            store
                .apply_batch(vec![KvOp::Put {
                    key: vec![k],
                    value: vec![k],
                }])
                .unwrap();
        }
        let got = store.range(vec![2], vec![4]).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0.as_ref(), &[2]);
        assert_eq!(got[1].0.as_ref(), &[3]);
    }
}
