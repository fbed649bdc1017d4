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

//! A message body on disk: the header plus the local bookkeeping
//! (size, servertime, filepath) the message store needs. Distinct from
//! the header caches' KV value format — a message file carries its own
//! richer value blob (header + servertime + size) since the store indexes
//! bodies, not just metadata.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::header::{HeaderError, MessageHeader, V2_B64_LEN, V2_LEN};

/// Errors from ingesting or validating a message body on disk.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The header embedded in the body failed to parse.
    #[error("header parse failed: {0}")]
    Header(#[from] HeaderError),
    /// Proof-of-work check failed.
    #[error("proof of work check failed")]
    ProofOfWork,
    /// On-disk size didn't match `(blocklen+1)*256`.
    #[error("size mismatch: on disk {on_disk}, expected {expected}")]
    SizeMismatch {
        /// Actual file size in bytes.
        on_disk: u64,
        /// Expected size per the header's `blocklen`.
        expected: u64,
    },
    /// Filesystem I/O failure reading, moving, or unlinking a body.
    #[error("message io: {0}")]
    Io(#[from] std::io::Error),
}

/// A message body known to the store: header plus local bookkeeping.
/// `servertime` is the only mutable attribute, set once at first sight
/// and preserved across restarts.
#[derive(Clone, Debug)]
pub struct MessageFile {
    /// The message's header.
    pub header: MessageHeader,
    /// On-disk size in bytes, `(blocklen+1)*256`.
    pub size: u64,
    /// Wall-clock time this node first observed the message.
    pub servertime: u32,
    /// Path to the body under `store/{bin}/{I-hex}`.
    pub filepath: PathBuf,
}

impl MessageFile {
    /// Validate a staged body at `path` against its embedded header and,
    /// on success, build the `MessageFile` the store will index.
    ///
    /// The body's first 256 bytes are the base64 transport encoding of
    /// the v2 header (block 0); `blocklen` further 256-byte blocks follow.
    /// Checks proof-of-work on the header and size against the file
    /// actually on disk. Does not move the file; callers `rename` it
    /// into place only after this returns `Ok`.
    pub fn ingest(path: &Path, servertime: u32) -> Result<Self, MessageError> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < V2_B64_LEN {
            return Err(HeaderError::Length.into());
        }
        let header = MessageHeader::parse(&bytes[..V2_B64_LEN])?;
        header
            .check_proof_of_work()
            .map_err(|_| MessageError::ProofOfWork)?;

        let on_disk = std::fs::metadata(path)?.len();
        let expected = header.body_size();
        if on_disk != expected {
            return Err(MessageError::SizeMismatch { on_disk, expected });
        }

        Ok(Self {
            header,
            size: on_disk,
            servertime,
            filepath: path.to_path_buf(),
        })
    }

    /// Atomically move this file's body to `dest`, updating `filepath`.
    pub fn move_to(&mut self, dest: PathBuf) -> Result<(), MessageError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&self.filepath, &dest)?;
        self.filepath = dest;
        Ok(())
    }

    /// Serialize the store's own value blob: header (v2 binary) ‖
    /// be32(servertime) ‖ be64(size). Distinct from the header caches'
    /// value format, which carries no size.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.header.serialize_v2();
        out.extend_from_slice(&self.servertime.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        out
    }

    /// Recover `(header, servertime, size)` from a value blob built by
    /// [`MessageFile::serialize`]. `filepath` is not stored in the KV
    /// value; callers derive it deterministically from `bin(I)`/`I`.
    pub fn deserialize(blob: &[u8]) -> Result<(MessageHeader, u32, u64), MessageError> {
        if blob.len() != V2_LEN + 4 + 8 {
            return Err(HeaderError::Length.into());
        }
        let header = MessageHeader::parse(&blob[..V2_LEN])?;
        let mut st = [0u8; 4];
        st.copy_from_slice(&blob[V2_LEN..V2_LEN + 4]);
        let mut sz = [0u8; 8];
        sz.copy_from_slice(&blob[V2_LEN + 4..]);
        Ok((header, u32::from_be_bytes(st), u64::from_be_bytes(sz)))
    }
}

/// Deterministic on-disk path for a message body: `store/{bin:04x}/{I-hex}`.
pub fn store_path(root: &Path, bin: u16, i: &[u8]) -> PathBuf {
    root.join("store")
        .join(format!("{bin:04x}"))
        .join(hex::encode(i))
}

/// Staging path for an in-progress download: `receive/{nanos}`.
pub fn receive_path(root: &Path, nanos: u128) -> PathBuf {
    root.join("receive").join(nanos.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::HeaderVersion;

    fn signed_enough_header() -> MessageHeader {
        // Not a real PoW-satisfying header; tests that need the proof-of-work
        // check to pass search a small nonce space instead of hardcoding one.
        MessageHeader {
            version: HeaderVersion::V2,
            time: 1_000,
            expire: 1_000 + 3600,
            i: [0x02; 33],
            j: [0x03; 33],
            k: [0x04; 33],
            blocklen: 1,
            reserved: 0,
            r: [0u8; 32],
            s: [0u8; 32],
            nonce: 0,
        }
    }

    fn find_pow(mut h: MessageHeader) -> MessageHeader {
        for nonce in 0..1_000_000u64 {
            h.nonce = nonce;
            if h.check_proof_of_work().is_ok() {
                return h;
            }
        }
        panic!("no PoW nonce found in search space");
    }

    #[test]
    fn ingest_rejects_size_mismatch() {
        let h = find_pow(signed_enough_header());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        let mut body = h.serialize_v2_base64().into_bytes();
        body.extend_from_slice(&[0u8; 100]); // wrong: blocklen=1 wants 512 total
        std::fs::write(&path, &body).unwrap();

        let err = MessageFile::ingest(&path, 42).unwrap_err();
        assert!(matches!(err, MessageError::SizeMismatch { .. }));
    }

    #[test]
    fn ingest_accepts_valid_body_and_roundtrips_value_blob() {
        let h = find_pow(signed_enough_header());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        let mut body = h.serialize_v2_base64().into_bytes();
        body.extend_from_slice(&vec![0u8; 256 * (h.blocklen as usize)]);
        std::fs::write(&path, &body).unwrap();

        let mf = MessageFile::ingest(&path, 42).unwrap();
        assert_eq!(mf.size, h.body_size());
        assert_eq!(mf.servertime, 42);

        let blob = mf.serialize();
        let (recovered, servertime, size) = MessageFile::deserialize(&blob).unwrap();
        assert_eq!(recovered, h);
        assert_eq!(servertime, 42);
        assert_eq!(size, h.body_size());
    }

    #[test]
    fn store_path_is_deterministic() {
        let root = Path::new("/data");
        let p = store_path(root, 0x0234, &[0x02; 33]);
        assert_eq!(p, root.join("store").join("0234").join(hex::encode([0x02; 33])));
    }
}
