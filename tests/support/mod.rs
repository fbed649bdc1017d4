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

//! An in-process mock peer: serves exactly the `/api/v2/*` surface
//! [`shardmesh::networking::peer_client::PeerClient`] expects, backed by
//! a handful of headers and bodies the test wires up directly. Used by
//! the federation scenario tests so they exercise the real HTTP client
//! and sync code paths instead of hand-rolled stand-ins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use shardmesh::core::header::MessageHeader;
use shardmesh::networking::peer_client::{
    HeaderListResponse, StatusResponse, StorageStatus, TimeResponse,
};

struct Inner {
    headers: Mutex<Vec<MessageHeader>>,
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    download_hits: Mutex<HashMap<String, u32>>,
    fail: AtomicBool,
    time: AtomicU32,
}

/// A running mock peer bound to a loopback port.
pub struct MockPeer {
    /// Loopback port the mock is listening on.
    pub port: u16,
    inner: Arc<Inner>,
}

impl MockPeer {
    /// Start the mock with an empty header/body set.
    pub async fn start() -> Self {
        let inner = Arc::new(Inner {
            headers: Mutex::new(Vec::new()),
            bodies: Mutex::new(HashMap::new()),
            download_hits: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            time: AtomicU32::new(1_000_000),
        });

        let app = Router::new()
            .route("/api/v2/status", get(status))
            .route("/api/v2/status/", get(status))
            .route("/api/v2/time", get(time))
            .route("/api/v2/time/", get(time))
            .route("/api/v2/headers", get(headers))
            .route("/api/v2/messages/:hex_i", get(download))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { port, inner }
    }

    /// Register a header this peer will report from `/headers` onward.
    pub fn add_header(&self, h: MessageHeader, body: Vec<u8>) {
        self.inner
            .bodies
            .lock()
            .unwrap()
            .insert(hex::encode(h.i), body);
        self.inner.headers.lock().unwrap().push(h);
    }

    /// Register a header this peer reports, without a body: every
    /// download attempt for it returns 404.
    pub fn add_header_without_body(&self, h: MessageHeader) {
        self.inner.headers.lock().unwrap().push(h);
    }

    /// Number of download attempts this peer has seen for `i`.
    pub fn download_hits(&self, i: &[u8]) -> u32 {
        self.inner
            .download_hits
            .lock()
            .unwrap()
            .get(&hex::encode(i))
            .copied()
            .unwrap_or(0)
    }

    /// Toggle whether `/time` (and thus every `sync()` round) fails.
    pub fn set_failing(&self, failing: bool) {
        self.inner.fail.store(failing, Ordering::SeqCst);
    }

    /// Advance the peer's advertised wall clock.
    pub fn advance_time(&self, secs: u32) {
        self.inner.time.fetch_add(secs, Ordering::SeqCst);
    }
}

async fn status(State(inner): State<Arc<Inner>>) -> Response {
    if inner.fail.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(StatusResponse {
        pubkey: "mock".to_string(),
        version: "test".to_string(),
        storage: StorageStatus {
            messages: inner.bodies.lock().unwrap().len() as u64,
            max_file_size: 1 << 20,
            capacity: 1 << 30,
            used: 0,
        },
    })
    .into_response()
}

async fn time(State(inner): State<Arc<Inner>>) -> Response {
    if inner.fail.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(TimeResponse {
        time: inner.time.load(Ordering::SeqCst),
    })
    .into_response()
}

async fn headers(State(inner): State<Arc<Inner>>, Query(_params): Query<HashMap<String, String>>) -> Response {
    if inner.fail.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let list = inner
        .headers
        .lock()
        .unwrap()
        .iter()
        .map(|h| h.serialize_v2_base64())
        .collect();
    Json(HeaderListResponse { header_list: list }).into_response()
}

async fn download(State(inner): State<Arc<Inner>>, Path(hex_i): Path<String>) -> Response {
    *inner
        .download_hits
        .lock()
        .unwrap()
        .entry(hex_i.clone())
        .or_insert(0) += 1;
    if inner.fail.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match inner.bodies.lock().unwrap().get(&hex_i) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Build a PoW-satisfying v2 header with the given bin prefix and
/// lifetime, plus its matching on-disk body bytes.
pub fn signed_header_and_body(i0: u8, i1: u8, blocklen: u32, expire: u32) -> (MessageHeader, Vec<u8>) {
    use shardmesh::core::header::HeaderVersion;

    let mut h = MessageHeader {
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
        blocklen,
        reserved: 0,
        r: [0u8; 32],
        s: [0u8; 32],
        nonce: 0,
    };
    let mut found = false;
    for nonce in 0..2_000_000u64 {
        h.nonce = nonce;
        if h.check_proof_of_work().is_ok() {
            found = true;
            break;
        }
    }
    assert!(found, "no PoW nonce found in search space");

    let mut body = h.serialize_v2_base64().into_bytes();
    body.extend(std::iter::repeat(0u8).take(256 * blocklen as usize));
    (h, body)
}
