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

//! Stateless HTTP client for a single peer's `/api/v2/*` surface. Used
//! exclusively by the remote header cache; callers decide what a
//! [`PeerClientError::Network`] means for their own error counters —
//! this module never touches a `NetworkErrors` tally itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::header::MessageHeader;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const BULK_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from a single peer HTTP call.
#[derive(Debug, Error)]
pub enum PeerClientError {
    /// Transport failure or non-2xx/404 status: counts against the peer.
    #[error("network error contacting peer: {0}")]
    Network(String),
    /// Peer responded but the body didn't parse: a peer bug, not a
    /// network failure, so callers must NOT bump their error counter.
    #[error("failed to parse peer response: {0}")]
    Parse(String),
    /// The peer reported the resource as absent (404).
    #[error("not found")]
    NotFound,
}

/// `GET /api/v2/status` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Peer's advertised public key, opaque hex.
    pub pubkey: String,
    /// Peer's advertised software version string.
    pub version: String,
    /// Storage utilization summary.
    pub storage: StorageStatus,
}

/// Storage summary nested in [`StatusResponse`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageStatus {
    /// Number of messages currently held.
    pub messages: u64,
    /// Largest body size the peer will accept.
    pub max_file_size: u64,
    /// Total storage capacity in bytes.
    pub capacity: u64,
    /// Storage currently in use, in bytes.
    pub used: u64,
}

/// `GET /api/v2/time` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeResponse {
    /// Peer's wall clock, unix seconds.
    pub time: u32,
}

/// `GET /api/v2/headers?since=T` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeaderListResponse {
    /// Base64-encoded v2 headers.
    pub header_list: Vec<String>,
}

/// `GET /api/v2/messages?since=T` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    /// Hex-encoded I values of messages available since `T`.
    pub message_list: Vec<String>,
}

/// Response to a multipart message upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageUploadResponse {
    /// Hex-encoded I of the stored message.
    pub header: String,
    /// Servertime the receiving node assigned.
    pub servertime: u32,
}

/// Stateless HTTP client bound to one peer's base URL.
#[derive(Clone)]
pub struct PeerClient {
    base_url: String,
    http: reqwest::Client,
}

impl PeerClient {
    /// Build a client for `host:port`. Does not probe the peer; callers
    /// typically follow construction with a [`PeerClient::status`] call.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{host}:{port}"),
            http: reqwest::Client::new(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<T, PeerClientError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| PeerClientError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PeerClientError::NotFound);
        }
        if resp.status().is_server_error() {
            return Err(PeerClientError::Network(format!(
                "peer returned {}",
                resp.status()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| PeerClientError::Parse(e.to_string()))
    }

    /// `GET /api/v2/status/`.
    pub async fn status(&self) -> Result<StatusResponse, PeerClientError> {
        self.get_json("/api/v2/status/", METADATA_TIMEOUT).await
    }

    /// `GET /api/v2/time/`.
    pub async fn time(&self) -> Result<TimeResponse, PeerClientError> {
        self.get_json("/api/v2/time/", METADATA_TIMEOUT).await
    }

    /// `GET /api/v2/headers?since=T`, returning parsed v2 headers.
    /// Entries that fail to parse are logged by the caller and dropped
    /// here rather than failing the whole batch.
    pub async fn headers_since(&self, since: u32) -> Result<Vec<MessageHeader>, PeerClientError> {
        let resp: HeaderListResponse = self
            .get_json(&format!("/api/v2/headers?since={since}"), BULK_TIMEOUT)
            .await?;
        let mut out = Vec::with_capacity(resp.header_list.len());
        for b64 in resp.header_list {
            match MessageHeader::parse(b64.as_bytes()) {
                Ok(h) => out.push(h),
                Err(e) => tracing::warn!(err = %e, "dropping unparsable header from peer"),
            }
        }
        Ok(out)
    }

    /// `GET /api/v2/headers/{hex-I}`.
    pub async fn header_info(&self, i: &[u8]) -> Result<MessageHeader, PeerClientError> {
        let json: serde_json::Value = self
            .get_json(
                &format!("/api/v2/headers/{}", hex::encode(i)),
                METADATA_TIMEOUT,
            )
            .await?;
        let b64 = json
            .get("b64_header")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PeerClientError::Parse("missing b64_header field".into()))?;
        MessageHeader::parse(b64.as_bytes())
            .map_err(|e| PeerClientError::Parse(e.to_string()))
    }

    /// `GET /api/v2/messages/{hex-I}`, returning the raw body bytes.
    pub async fn download_message(&self, i: &[u8]) -> Result<Vec<u8>, PeerClientError> {
        let resp = self
            .http
            .get(format!(
                "{}/api/v2/messages/{}",
                self.base_url,
                hex::encode(i)
            ))
            .timeout(BULK_TIMEOUT)
            .send()
            .await
            .map_err(|e| PeerClientError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PeerClientError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(PeerClientError::Network(format!(
                "peer returned {}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| PeerClientError::Network(e.to_string()))
    }
}
