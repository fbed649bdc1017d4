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

//! Node configuration: TOML on disk, deserialized with `serde`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file didn't parse as valid TOML for this shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_http_listen_addr() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_target_ring() -> u8 {
    0
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024
}

fn default_capacity() -> u64 {
    10 * 1024 * 1024 * 1024
}

/// Node configuration root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity and storage settings.
    pub node: NodeSettings,
    /// HTTP endpoints.
    #[serde(default = "HttpConfig::default")]
    pub http: HttpConfig,
    /// Peer federation settings.
    pub peers: PeerConfig,
}

impl NodeConfig {
    /// Load and parse a TOML config file from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&text)?;
        Ok(cfg)
    }
}

/// Node identity and storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable node name, used only in logs.
    pub name: String,
    /// Root data directory: holds the local header cache's KV store and
    /// the message store's `msgdb`/`store`/`receive` tree.
    pub data_dir: String,
    /// Opaque public key advertised in `/api/v2/status`. Not used by
    /// this crate to authenticate anything; federations define their
    /// own meaning for it.
    #[serde(default)]
    pub pubkey: String,
    /// Ring depth this node commits to owning once `populate` finishes
    /// descending from its initial single-bin sector. 0 covers the
    /// entire 512-bin ring; 9 covers a single bin.
    #[serde(default = "default_target_ring")]
    pub target_ring: u8,
    /// Largest message body accepted on upload, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Storage capacity advertised in `/api/v2/status`, in bytes.
    #[serde(default = "default_capacity")]
    pub capacity: u64,
}

/// HTTP listener config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address, e.g. `0.0.0.0:8765`.
    #[serde(default = "default_http_listen_addr")]
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_listen_addr(),
        }
    }
}

/// Peer federation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peers dialed at startup via `LocalHeaderCache::add_peer`.
    #[serde(default)]
    pub seeds: Vec<SeedPeer>,
    /// Interval between background `MessageStore::sync` ticks.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

/// One seed peer dialed at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedPeer {
    /// Peer hostname or IP.
    pub host: String,
    /// Peer port.
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let toml_text = r#"
            [node]
            name = "node-a"
            data_dir = "/var/lib/shardmesh"

            [peers]
            seeds = [{ host = "peer1.example", port = 8765 }]
        "#;
        let cfg: NodeConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.node.name, "node-a");
        assert_eq!(cfg.node.target_ring, 0);
        assert_eq!(cfg.node.max_file_size, 2 * 1024 * 1024);
        assert_eq!(cfg.peers.sync_interval_secs, 30);
        assert_eq!(cfg.http.listen_addr, "0.0.0.0:8765");
        assert_eq!(cfg.peers.seeds.len(), 1);
        assert_eq!(cfg.peers.seeds[0].host, "peer1.example");
    }
}
