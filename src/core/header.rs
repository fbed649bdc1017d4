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

//! The message header codec: the fixed-length v2 wire format, the legacy
//! v1 colon-hex text form (parsed for compatibility, never surfaced to
//! sector sync), the proof-of-work hash check, and the multi-key-family
//! index keys every cache builds from a header.

use ring::digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a compressed EC point as carried in a header (I, J, K).
pub const POINT_LEN: usize = 33;
/// Length of a signature half (r, s).
pub const SIG_HALF_LEN: usize = 32;

const V2_MAGIC: [u8; 4] = [b'M', 0x02, 0x00, 0x00];
/// Full v2 binary header length.
pub const V2_LEN: usize = 192;
/// Length of the v2 signing preimage (everything before r, s, nonce).
pub const V2_SHORT_LEN: usize = 123;
/// Length of the base64 transport encoding of a full v2 header.
pub const V2_B64_LEN: usize = 256;

const V1_MAGIC: &str = "M01";

/// Errors raised while parsing or validating a header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Input length didn't match any known wire format.
    #[error("header length mismatch")]
    Length,
    /// Leading magic bytes matched neither v1 nor v2.
    #[error("unrecognized header magic")]
    Magic,
    /// Base64 decoding of a v2 transport envelope failed.
    #[error("base64 decode failed")]
    Base64,
    /// Hex decoding of a v1 field failed.
    #[error("hex decode failed")]
    Hex,
    /// A v1 field didn't hold the expected colon-separated shape.
    #[error("malformed legacy header")]
    Legacy,
    /// `expire` was not strictly after `time`.
    #[error("expire must be after time")]
    Expiry,
    /// Proof-of-work check failed: serialized hash doesn't lead with two zero bytes.
    #[error("proof of work check failed")]
    ProofOfWork,
}

/// Which wire format a header was parsed from, or should be emitted as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderVersion {
    /// Legacy colon-separated hex text. Parsed, never replicated.
    V1,
    /// Current fixed-length binary format.
    V2,
}

/// A parsed message header. Replication only ever constructs or stores
/// [`HeaderVersion::V2`] headers; v1 headers may be parsed from a peer
/// response but [`MessageHeader::is_legacy`] lets callers skip them the
/// way sector sync does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Wire format this header was parsed as / will be emitted as.
    pub version: HeaderVersion,
    /// Creator timestamp, unix seconds.
    pub time: u32,
    /// Expiry timestamp, unix seconds. Always `> time`.
    pub expire: u32,
    /// Message identity: compressed EC point, opaque to the core.
    pub i: [u8; POINT_LEN],
    /// Opaque compressed EC point.
    pub j: [u8; POINT_LEN],
    /// Opaque compressed EC point.
    pub k: [u8; POINT_LEN],
    /// Number of additional 256-byte base64 blocks making up the body.
    pub blocklen: u32,
    /// Reserved, must be zero on emit.
    pub reserved: u64,
    /// Signature half.
    pub r: [u8; SIG_HALF_LEN],
    /// Signature half.
    pub s: [u8; SIG_HALF_LEN],
    /// 40-bit proof-of-work nonce.
    pub nonce: u64,
}

impl MessageHeader {
    /// `true` for a v1 header; replication and sector sync skip these.
    pub fn is_legacy(&self) -> bool {
        self.version == HeaderVersion::V1
    }

    /// Total on-disk message body size implied by `blocklen`.
    pub fn body_size(&self) -> u64 {
        256 * (self.blocklen as u64 + 1)
    }

    /// 10-bit ring bin derived from the leading two bytes of I.
    pub fn bin(&self) -> u16 {
        (((self.i[0] as u16) << 8) | self.i[1] as u16) & 0x03FF
    }

    /// Parse either wire format. Distinguishes by leading magic:
    /// `M01` (v1 text) vs `M\x02\x00\x00` (v2 binary) vs base64 of the
    /// latter.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() >= 3 && &bytes[..3] == V1_MAGIC.as_bytes() {
            return Self::parse_v1(bytes);
        }
        if bytes.len() == V2_LEN && bytes[..4] == V2_MAGIC {
            return Self::parse_v2_binary(bytes);
        }
        if bytes.len() == V2_B64_LEN {
            let decoded = base64::decode(bytes).map_err(|_| HeaderError::Base64)?;
            if decoded.len() == V2_LEN && decoded[..4] == V2_MAGIC {
                return Self::parse_v2_binary(&decoded);
            }
            return Err(HeaderError::Magic);
        }
        // Also accept base64 text passed as a &str-like slice that failed
        // the length check above due to trailing whitespace/newline.
        let trimmed: Vec<u8> = bytes
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if trimmed.len() == V2_B64_LEN {
            let decoded = base64::decode(&trimmed).map_err(|_| HeaderError::Base64)?;
            if decoded.len() == V2_LEN && decoded[..4] == V2_MAGIC {
                return Self::parse_v2_binary(&decoded);
            }
        }
        Err(HeaderError::Length)
    }

    fn parse_v2_binary(b: &[u8]) -> Result<Self, HeaderError> {
        if b.len() != V2_LEN {
            return Err(HeaderError::Length);
        }
        if b[..4] != V2_MAGIC {
            return Err(HeaderError::Magic);
        }
        let mut off = 4;
        let time = be32(b, &mut off);
        let expire = be32(b, &mut off);
        let i = take33(b, &mut off);
        let j = take33(b, &mut off);
        let k = take33(b, &mut off);
        let blocklen = be32(b, &mut off);
        let reserved = be64(b, &mut off);
        let r = take32(b, &mut off);
        let s = take32(b, &mut off);
        let nonce_hi = b[off] as u64;
        off += 1;
        let nonce_lo = be32(b, &mut off) as u64;
        let nonce = (nonce_hi << 32) | nonce_lo;

        if expire <= time {
            return Err(HeaderError::Expiry);
        }

        Ok(Self {
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
    }

    fn parse_v1(bytes: &[u8]) -> Result<Self, HeaderError> {
        let text = std::str::from_utf8(bytes).map_err(|_| HeaderError::Legacy)?;
        let fields: Vec<&str> = text.trim_end().split(':').collect();
        if fields.len() != 11 || fields[0] != V1_MAGIC {
            return Err(HeaderError::Legacy);
        }
        let time = u32::from_str_radix(fields[1], 16).map_err(|_| HeaderError::Hex)?;
        let expire = u32::from_str_radix(fields[2], 16).map_err(|_| HeaderError::Hex)?;
        let i = hex_fixed::<POINT_LEN>(fields[3])?;
        let j = hex_fixed::<POINT_LEN>(fields[4])?;
        let k = hex_fixed::<POINT_LEN>(fields[5])?;
        let blocklen = u32::from_str_radix(fields[6], 16).map_err(|_| HeaderError::Hex)?;
        let reserved = u64::from_str_radix(fields[7], 16).map_err(|_| HeaderError::Hex)?;
        let r = hex_fixed::<SIG_HALF_LEN>(fields[8])?;
        let s = hex_fixed::<SIG_HALF_LEN>(fields[9])?;
        let nonce = u64::from_str_radix(fields[10], 16).map_err(|_| HeaderError::Hex)?;

        if expire <= time {
            return Err(HeaderError::Expiry);
        }

        Ok(Self {
            version: HeaderVersion::V1,
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
    }

    /// Serialize in this header's own wire format.
    pub fn serialize(&self) -> Vec<u8> {
        match self.version {
            HeaderVersion::V2 => self.serialize_v2(),
            HeaderVersion::V1 => self.serialize_v1(),
        }
    }

    /// Binary v2 serialization (192 bytes), regardless of `self.version`.
    pub fn serialize_v2(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(V2_LEN);
        out.extend_from_slice(&V2_MAGIC);
        out.extend_from_slice(&self.time.to_be_bytes());
        out.extend_from_slice(&self.expire.to_be_bytes());
        out.extend_from_slice(&self.i);
        out.extend_from_slice(&self.j);
        out.extend_from_slice(&self.k);
        out.extend_from_slice(&self.blocklen.to_be_bytes());
        out.extend_from_slice(&self.reserved.to_be_bytes());
        out.extend_from_slice(&self.r);
        out.extend_from_slice(&self.s);
        out.push(((self.nonce >> 32) & 0xFF) as u8);
        out.extend_from_slice(&((self.nonce & 0xFFFF_FFFF) as u32).to_be_bytes());
        debug_assert_eq!(out.len(), V2_LEN);
        out
    }

    /// Base64 transport encoding of the v2 serialization (256 ASCII chars).
    pub fn serialize_v2_base64(&self) -> String {
        base64::encode(self.serialize_v2())
    }

    /// The v2 signing preimage: the leading 123 bytes, before r/s/nonce.
    pub fn short_form(&self) -> Vec<u8> {
        let full = self.serialize_v2();
        full[..V2_SHORT_LEN].to_vec()
    }

    fn serialize_v1(&self) -> Vec<u8> {
        let fields = [
            V1_MAGIC.to_string(),
            format!("{:08x}", self.time),
            format!("{:08x}", self.expire),
            hex::encode(self.i),
            hex::encode(self.j),
            hex::encode(self.k),
            format!("{:08x}", self.blocklen),
            format!("{:016x}", self.reserved),
            hex::encode(self.r),
            hex::encode(self.s),
            format!("{:010x}", self.nonce),
        ];
        fields.join(":").into_bytes()
    }

    /// SHA-256 of the wire serialization, used for the proof-of-work check.
    pub fn hash(&self) -> [u8; 32] {
        let digest = digest::digest(&digest::SHA256, &self.serialize());
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_ref());
        out
    }

    /// The header's own hash must lead with two zero bytes.
    pub fn check_proof_of_work(&self) -> Result<(), HeaderError> {
        let h = self.hash();
        if h[0] == 0 && h[1] == 0 {
            Ok(())
        } else {
            Err(HeaderError::ProofOfWork)
        }
    }

    /// Build the four index keys (I, date, servertime, expire) and the
    /// shared value blob (serialized header + servertime) every cache
    /// writes atomically for this header.
    pub fn db_keys(&self, servertime: u32) -> HeaderKeys {
        let mut value = self.serialize_v2();
        value.extend_from_slice(&servertime.to_be_bytes());

        let mut date_key = Vec::with_capacity(1 + 4 + POINT_LEN);
        date_key.push(0xD0);
        date_key.extend_from_slice(&self.time.to_be_bytes());
        date_key.extend_from_slice(&self.i);

        let mut servertime_key = Vec::with_capacity(1 + 4 + POINT_LEN);
        servertime_key.push(0xC0);
        servertime_key.extend_from_slice(&servertime.to_be_bytes());
        servertime_key.extend_from_slice(&self.i);

        let mut expire_key = Vec::with_capacity(1 + 4 + POINT_LEN);
        expire_key.push(0xE0);
        expire_key.extend_from_slice(&self.expire.to_be_bytes());
        expire_key.extend_from_slice(&self.i);

        HeaderKeys {
            i_key: self.i.to_vec(),
            date_key,
            servertime_key,
            expire_key,
            value,
        }
    }

    /// Recover `(header, servertime)` from a value blob previously built by
    /// [`MessageHeader::db_keys`].
    pub fn from_value_blob(blob: &[u8]) -> Result<(Self, u32), HeaderError> {
        if blob.len() != V2_LEN + 4 {
            return Err(HeaderError::Length);
        }
        let header = Self::parse_v2_binary(&blob[..V2_LEN])?;
        let mut st = [0u8; 4];
        st.copy_from_slice(&blob[V2_LEN..]);
        Ok((header, u32::from_be_bytes(st)))
    }

    /// Serde-friendly projection served by the HTTP header-info surface.
    pub fn to_json_view(&self) -> MessageHeaderJson {
        MessageHeaderJson {
            time: self.time,
            expire: self.expire,
            i: hex::encode(self.i),
            j: hex::encode(self.j),
            k: hex::encode(self.k),
            blocklen: self.blocklen,
            bin: self.bin(),
            b64_header: self.serialize_v2_base64(),
        }
    }
}

/// The four atomic index keys plus shared value blob for one header.
#[derive(Clone, Debug)]
pub struct HeaderKeys {
    /// `I` family key: the raw 33-byte point.
    pub i_key: Vec<u8>,
    /// `date` family key: `0xD0 ‖ be32(time) ‖ I`.
    pub date_key: Vec<u8>,
    /// `servertime` family key: `0xC0 ‖ be32(servertime) ‖ I`.
    pub servertime_key: Vec<u8>,
    /// `expire` family key: `0xE0 ‖ be32(expire) ‖ I`.
    pub expire_key: Vec<u8>,
    /// Shared value written at all four keys.
    pub value: Vec<u8>,
}

/// JSON view of a header, used by the HTTP headers/status surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageHeaderJson {
    /// Creator timestamp.
    pub time: u32,
    /// Expiry timestamp.
    pub expire: u32,
    /// Hex-encoded I.
    pub i: String,
    /// Hex-encoded J.
    pub j: String,
    /// Hex-encoded K.
    pub k: String,
    /// Additional body blocks.
    pub blocklen: u32,
    /// Ring bin this header falls in.
    pub bin: u16,
    /// Base64 wire encoding, as served to peers.
    pub b64_header: String,
}

fn be32(b: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_be_bytes([b[*off], b[*off + 1], b[*off + 2], b[*off + 3]]);
    *off += 4;
    v
}

fn be64(b: &[u8], off: &mut usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[*off..*off + 8]);
    *off += 8;
    u64::from_be_bytes(arr)
}

fn take33(b: &[u8], off: &mut usize) -> [u8; 33] {
    let mut arr = [0u8; 33];
    arr.copy_from_slice(&b[*off..*off + 33]);
    *off += 33;
    arr
}

fn take32(b: &[u8], off: &mut usize) -> [u8; 32] {
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&b[*off..*off + 32]);
    *off += 32;
    arr
}

fn hex_fixed<const N: usize>(s: &str) -> Result<[u8; N], HeaderError> {
    let bytes = hex::decode(s).map_err(|_| HeaderError::Hex)?;
    if bytes.len() != N {
        return Err(HeaderError::Hex);
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
