#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! shardmesh node entrypoint.
//!
//! Loads [`shardmesh::config::NodeConfig`], opens the local header cache
//! and message store, registers seed peers, then serves the federation
//! HTTP API until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{info, warn};

use shardmesh::config::NodeConfig;
use shardmesh::core::sector::{ShardSector, MAX_RING, RING_HIGH, RING_LOW};
use shardmesh::http::api::{self, AppState};
use shardmesh::monitoring::metrics::Metrics;
use shardmesh::networking::local_cache::LocalHeaderCache;
use shardmesh::store::message_store::MessageStore;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn choose_start_bin(lhc: &LocalHeaderCache) -> u16 {
    match lhc.persisted_start_bin() {
        Ok(Some(bin)) => return bin,
        Ok(None) => {}
        Err(e) => warn!(err = %e, "failed reading persisted sector state, re-rolling"),
    }
    let bin = rand::thread_rng().gen_range(RING_LOW..=RING_HIGH);
    if let Err(e) = lhc.persist_start_bin(bin) {
        warn!(err = %e, "failed to persist chosen sector start bin");
    }
    bin
}

async fn sync_loop(lhc: Arc<LocalHeaderCache>, ms: Arc<MessageStore>, metrics: Arc<Metrics>, interval: Duration) {
    let mut prev_network_errors = 0u64;
    let mut prev_evictions = 0u64;

    loop {
        tokio::time::sleep(interval).await;

        let lhc_start = Instant::now();
        if let Err(e) = lhc.sync().await {
            warn!(err = %e, "local header cache sync round failed");
        }
        metrics
            .sync_duration_seconds
            .with_label_values(&["lhc"])
            .observe(lhc_start.elapsed().as_secs_f64());

        let ms_start = Instant::now();
        if let Err(e) = ms.sync().await {
            warn!(err = %e, "message store sync round failed");
        }
        metrics
            .sync_duration_seconds
            .with_label_values(&["ms"])
            .observe(ms_start.elapsed().as_secs_f64());

        match ms.prune_expired() {
            Ok(n) if n > 0 => metrics.pruned_total.inc_by(n as u64),
            Ok(_) => {}
            Err(e) => warn!(err = %e, "message store prune failed"),
        }

        let network_errors = lhc.total_network_errors().await;
        metrics
            .network_errors_total
            .inc_by(network_errors.saturating_sub(prev_network_errors));
        prev_network_errors = network_errors;

        let evictions = lhc.eviction_count();
        metrics
            .peer_evictions_total
            .inc_by(evictions.saturating_sub(prev_evictions));
        prev_evictions = evictions;

        metrics.peers.set(lhc.peer_count().await as i64);
        metrics.lhc_headers.set(lhc.count() as i64);
        metrics.ms_messages.set(ms.count() as i64);
        metrics.ms_queue_depth.set(ms.queue_depth() as i64);
        metrics.sync_rounds_total.inc();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let config_path = env("SHARDMESH_CONFIG", "./shardmesh.toml");
    let cfg = NodeConfig::load(&config_path)
        .with_context(|| format!("failed to load config at {config_path}"))?;

    let data_dir = Path::new(&cfg.node.data_dir);
    let lhc = Arc::new(
        LocalHeaderCache::open(data_dir.join("lhc")).context("failed to open local header cache")?,
    );

    for seed in &cfg.peers.seeds {
        lhc.add_peer(seed.host.clone(), seed.port);
    }

    let start_bin = choose_start_bin(&lhc);
    let initial_sector = ShardSector::new(start_bin, MAX_RING).expect("start bin validated by choose_start_bin");

    let ms = MessageStore::open(data_dir.join("msgstore"), Arc::clone(&lhc), initial_sector)
        .await
        .context("failed to open message store")?;

    let target_sector = ShardSector::new(start_bin, cfg.node.target_ring).expect("target_ring validated on load");
    if let Err(e) = ms.set_target(target_sector) {
        warn!(err = %e, "failed to schedule sector populate");
    }

    let metrics = Arc::new(Metrics::new().context("metrics registration failed")?);

    info!(
        node = %cfg.node.name,
        start_bin = format!("{start_bin:#06x}"),
        target_ring = cfg.node.target_ring,
        listen = %cfg.http.listen_addr,
        "shardmesh node starting"
    );

    tokio::spawn(sync_loop(
        Arc::clone(&lhc),
        Arc::clone(&ms),
        Arc::clone(&metrics),
        Duration::from_secs(cfg.peers.sync_interval_secs),
    ));

    let state = AppState {
        lhc: Arc::clone(&lhc),
        ms: Arc::clone(&ms),
        metrics,
        pubkey: cfg.node.pubkey.clone(),
        version: format!(
            "{}+{}",
            env!("CARGO_PKG_VERSION"),
            option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
        ),
        max_file_size: cfg.node.max_file_size,
        capacity: cfg.node.capacity,
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.http.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.listen_addr))?;

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    if let Err(e) = serve.await {
        warn!(err = %e, "http server exited with error");
    }

    info!("shutting down message store workers");
    ms.close().await;
    Ok(())
}
