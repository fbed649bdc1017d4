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

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container exposed at `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Live peers in the local header cache.
    pub peers: IntGauge,
    /// Total network errors observed across all peers.
    pub network_errors_total: IntCounter,
    /// Peers dropped for crossing the consecutive-error threshold.
    pub peer_evictions_total: IntCounter,

    /// Headers currently indexed in the local header cache.
    pub lhc_headers: IntGauge,
    /// Messages currently indexed in the message store.
    pub ms_messages: IntGauge,
    /// Current depth of the message store's download retry queue.
    pub ms_queue_depth: IntGauge,

    /// Headers dropped by prune across all caches.
    pub pruned_total: IntCounter,
    /// Messages rejected on ingest (proof-of-work or size check failures).
    pub ingest_rejected_total: IntCounter,
    /// Completed sync rounds (RHC + LHC combined).
    pub sync_rounds_total: IntCounter,
    /// Wall-clock duration of each sync round, labeled by component
    /// (`lhc` or `ms`).
    pub sync_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers =
            IntGauge::new("shardmesh_peers", "Live peers in the local header cache")
                .map_err(|_| MetricsError::Prom)?;
        let network_errors_total = IntCounter::new(
            "shardmesh_network_errors_total",
            "Total network errors observed across all peers",
        )
        .map_err(|_| MetricsError::Prom)?;
        let peer_evictions_total = IntCounter::new(
            "shardmesh_peer_evictions_total",
            "Peers dropped for crossing the consecutive-error threshold",
        )
        .map_err(|_| MetricsError::Prom)?;

        let lhc_headers = IntGauge::new(
            "shardmesh_lhc_headers",
            "Headers currently indexed in the local header cache",
        )
        .map_err(|_| MetricsError::Prom)?;
        let ms_messages = IntGauge::new(
            "shardmesh_ms_messages",
            "Messages currently indexed in the message store",
        )
        .map_err(|_| MetricsError::Prom)?;
        let ms_queue_depth = IntGauge::new(
            "shardmesh_ms_queue_depth",
            "Current depth of the message store's download retry queue",
        )
        .map_err(|_| MetricsError::Prom)?;

        let pruned_total = IntCounter::new(
            "shardmesh_pruned_total",
            "Headers dropped by prune across all caches",
        )
        .map_err(|_| MetricsError::Prom)?;
        let ingest_rejected_total = IntCounter::new(
            "shardmesh_ingest_rejected_total",
            "Messages rejected on ingest (proof-of-work or size check failures)",
        )
        .map_err(|_| MetricsError::Prom)?;
        let sync_rounds_total = IntCounter::new(
            "shardmesh_sync_rounds_total",
            "Completed sync rounds (RHC + LHC combined)",
        )
        .map_err(|_| MetricsError::Prom)?;
        let sync_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "shardmesh_sync_duration_seconds",
                "Wall-clock duration of each sync round, by component",
            ),
            &["component"],
        )
        .map_err(|_| MetricsError::Prom)?;

        registry.register(Box::new(peers.clone())).map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(network_errors_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(peer_evictions_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(lhc_headers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(ms_messages.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(ms_queue_depth.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(pruned_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(ingest_rejected_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sync_rounds_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sync_duration_seconds.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            peers,
            network_errors_total,
            peer_evictions_total,
            lhc_headers,
            ms_messages,
            ms_queue_depth,
            pruned_total,
            ingest_rejected_total,
            sync_rounds_total,
            sync_duration_seconds,
        })
    }

    /// Render the current registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&metric_families, &mut buf)
            .map_err(|_| MetricsError::Prom)?;
        String::from_utf8(buf).map_err(|_| MetricsError::Prom)
    }
}
