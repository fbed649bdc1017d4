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

//! The federation-facing HTTP API: `/api/v2/status`, `/time`, `/headers`,
//! `/messages`, plus `/metrics`. Every handler is a thin adapter over
//! [`LocalHeaderCache`] and [`MessageStore`]; there is no business logic
//! here beyond query parsing and status-code mapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::monitoring::metrics::Metrics;
use crate::networking::local_cache::LocalHeaderCache;
use crate::networking::peer_client::{
    HeaderListResponse, MessageListResponse, MessageUploadResponse, StatusResponse,
    StorageStatus, TimeResponse,
};
use crate::store::message_store::MessageStore;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    /// Local index of every header known to the federation.
    pub lhc: Arc<LocalHeaderCache>,
    /// This node's own message bodies.
    pub ms: Arc<MessageStore>,
    /// Prometheus registry.
    pub metrics: Arc<Metrics>,
    /// Advertised public key, opaque to this layer.
    pub pubkey: String,
    /// Advertised software version string.
    pub version: String,
    /// Largest body size this node will accept on upload.
    pub max_file_size: u64,
    /// Total storage capacity this node advertises, in bytes.
    pub capacity: u64,
}

/// Build the router. Callers bind it to a listener in `main`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v2/status", get(status))
        .route("/api/v2/status/", get(status))
        .route("/api/v2/time", get(time))
        .route("/api/v2/time/", get(time))
        .route("/api/v2/headers", get(list_headers))
        .route("/api/v2/headers/:hex_i", get(header_info))
        .route(
            "/api/v2/messages",
            get(list_messages).post(upload_message),
        )
        .route("/api/v2/messages/:hex_i", get(download_message))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

fn decode_hex_i(hex_i: &str) -> Result<[u8; 33], Response> {
    let bytes = hex::decode(hex_i).map_err(|_| bad_request("I is not valid hex"))?;
    if bytes.len() != 33 {
        return Err(bad_request("I must decode to 33 bytes"));
    }
    let mut out = [0u8; 33];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, msg.to_string()).into_response()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn internal_error(context: &str, err: impl std::fmt::Display) -> Response {
    tracing::warn!(err = %err, context, "http handler failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: context.to_string(),
        }),
    )
        .into_response()
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        pubkey: state.pubkey.clone(),
        version: state.version.clone(),
        storage: StorageStatus {
            messages: state.ms.count(),
            max_file_size: state.max_file_size,
            capacity: state.capacity,
            used: 0,
        },
    })
}

async fn time() -> Json<TimeResponse> {
    Json(TimeResponse { time: now_secs() })
}

/// `GET /api/v2/headers?since=T`. `since` defaults to 0 (everything).
async fn list_headers(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let since: u32 = params
        .get("since")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    match state.lhc.find_since(since) {
        Ok(headers) => Json(HeaderListResponse {
            header_list: headers.iter().map(|h| h.serialize_v2_base64()).collect(),
        })
        .into_response(),
        Err(e) => internal_error("failed to list headers", e),
    }
}

async fn header_info(
    State(state): State<AppState>,
    AxumPath(hex_i): AxumPath<String>,
) -> Response {
    let i = match decode_hex_i(&hex_i) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    match state.lhc.find_by_i(&i) {
        Ok(Some(h)) => Json(h.to_json_view()).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("failed to look up header", e),
    }
}

/// `GET /api/v2/messages?since=T`: the hex-I of every body this node
/// currently holds with `servertime >= since`.
async fn list_messages(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let since: u32 = params
        .get("since")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    match state.ms.find_since(since) {
        Ok(headers) => Json(MessageListResponse {
            message_list: headers.iter().map(|h| hex::encode(h.i)).collect(),
        })
        .into_response(),
        Err(e) => internal_error("failed to list messages", e),
    }
}

async fn download_message(
    State(state): State<AppState>,
    AxumPath(hex_i): AxumPath<String>,
) -> Response {
    let i = match decode_hex_i(&hex_i) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let ms = Arc::clone(&state.ms);
    let result = tokio::task::spawn_blocking(move || ms.read_body(&i)).await;
    match result {
        Ok(Ok(Some(bytes))) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => internal_error("failed to read message body", e),
        Err(e) => internal_error("download task panicked", e),
    }
}

/// `POST /api/v2/messages`: multipart upload. Expects a single field
/// (any name) carrying the raw fixed-format message bytes.
async fn upload_message(
    State(state): State<AppState>,
    mut multipart: axum::extract::Multipart,
) -> Response {
    let field = match multipart.next_field().await {
        Ok(Some(f)) => f,
        Ok(None) => return bad_request("expected one multipart field with the message body"),
        Err(e) => return internal_error("failed to read multipart body", e),
    };
    let bytes = match field.bytes().await {
        Ok(b) => b,
        Err(e) => return internal_error("failed to read multipart body", e),
    };
    if bytes.len() as u64 > state.max_file_size {
        return (StatusCode::PAYLOAD_TOO_LARGE, "message exceeds max_file_size").into_response();
    }

    let ms = Arc::clone(&state.ms);
    let result = tokio::task::spawn_blocking(move || ms.ingest_upload(&bytes)).await;
    match result {
        Ok(Ok((header, servertime))) => Json(MessageUploadResponse {
            header: hex::encode(header.i),
            servertime,
        })
        .into_response(),
        Ok(Err(e)) => {
            state.metrics.ingest_rejected_total.inc();
            (StatusCode::BAD_REQUEST, format!("rejected: {e}")).into_response()
        }
        Err(e) => internal_error("upload task panicked", e),
    }
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => internal_error("failed to render metrics", e),
    }
}
