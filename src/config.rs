//! # Configuration Management
//!
//! This module handles loading and managing configuration for a calendar
//! node. Configuration is loaded from TOML files and includes:
//! - This node's id and network binding (host/port)
//! - The fixed peer directory: every node in the group, including this one
//! - The snapshot file used for crash recovery
//! - Gossip transport timeouts
//!
//! The group membership is static: the peer list is read once at startup
//! and ids must form the contiguous range `0..n`.
//!
//! ## Example Configuration File (config.toml)
//! ```toml
//! node_id = 0
//! host = "127.0.0.1"
//! port = 9000
//! snapshot_path = "state.json"
//! sync_interval_seconds = 30
//!
//! [gossip]
//! connect_timeout_ms = 2000
//! write_timeout_ms = 2000
//!
//! [[peers]]
//! id = 0
//! host = "127.0.0.1"
//! port = 9000
//!
//! [[peers]]
//! id = 1
//! host = "127.0.0.1"
//! port = 9001
//! ```

use anyhow::{bail, Result};
use config::{Config as ConfigLib, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::appointment::NodeId;

/// One entry of the static peer directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

impl PeerConfig {
    /// The `host:port` address gossip connects to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timeouts for outbound gossip connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// How long to wait for a peer connection before giving up (ms).
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a frame write may take before the send is abandoned (ms).
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_sync_interval() -> u64 {
    30
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Main configuration structure for a calendar node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This node's id; must appear in the peer list.
    pub node_id: NodeId,

    /// IP address to bind the TCP listener to (e.g., "127.0.0.1" or "0.0.0.0")
    pub host: String,

    /// Port number for the TCP listener
    pub port: u16,

    /// File the node state is snapshotted to on `fail`/`quit` and restored
    /// from at startup
    pub snapshot_path: String,

    /// How often (in seconds) to run a routine anti-entropy round against
    /// every peer. Routine rounds are what carry acknowledgements back
    /// when there are no new events, letting peers truncate their logs.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,

    /// Gossip transport timeouts
    #[serde(default)]
    pub gossip: GossipConfig,

    /// The full, fixed peer directory
    pub peers: Vec<PeerConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ConfigLib::builder().add_source(File::from(path)).build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// A two-node loopback configuration suitable for development.
    pub fn default() -> Self {
        Self {
            node_id: 0,
            host: "127.0.0.1".to_string(),
            port: 9000,
            snapshot_path: "state.json".to_string(),
            sync_interval_seconds: default_sync_interval(),
            gossip: GossipConfig::default(),
            peers: vec![
                PeerConfig {
                    id: 0,
                    host: "127.0.0.1".to_string(),
                    port: 9000,
                },
                PeerConfig {
                    id: 1,
                    host: "127.0.0.1".to_string(),
                    port: 9001,
                },
            ],
        }
    }

    /// Total number of nodes in the group.
    pub fn node_count(&self) -> usize {
        self.peers.len()
    }

    /// Directory lookup for peer `k`.
    pub fn peer(&self, k: NodeId) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| p.id == k)
    }

    /// Check that the peer directory is usable: non-empty, ids covering
    /// the contiguous range `0..n` exactly once, and this node present.
    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            bail!("the peer directory is empty");
        }
        let n = self.peers.len();
        let mut seen = vec![false; n];
        for p in &self.peers {
            if p.id >= n {
                bail!("peer id {} out of range for a group of {}", p.id, n);
            }
            if seen[p.id] {
                bail!("peer id {} listed twice", p.id);
            }
            seen[p.id] = true;
        }
        if self.node_id >= n {
            bail!(
                "node_id {} is not in the peer directory of {} nodes",
                self.node_id,
                n
            );
        }
        Ok(())
    }
}
