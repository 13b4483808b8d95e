//! # Replicated Calendar Node
//!
//! Each running process is one peer of a fixed group, holding a local
//! calendar of appointments. Users schedule and cancel appointments on
//! their own node; the nodes converge through log-based anti-entropy
//! gossip even when messages are delayed, duplicated, or reordered and
//! nodes crash and restart from snapshots.
//!
//! ## Architecture Overview
//!
//! - **Replication engine**: event log, two-dimensional time table, and
//!   derived calendar view behind a single lock
//! - **TCP server**: accepts gossip frames from the peer group
//! - **Console loop**: parses user commands from standard input
//! - **Gossip transport**: short-lived TCP sends addressed via the static
//!   peer directory
//! - **Snapshot adapter**: whole-state file used for crash recovery
//!
//! Run with `RUST_LOG=info` to watch the protocol at work.

use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::Parser;
use log::info;

use gossip_calendar::{config, node::Node, server, snapshot};

/// Command line arguments. Anything given here overrides the config file.
#[derive(Debug, Parser)]
#[command(about = "A replicated distributed calendar node")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the node id from the config file
    #[arg(long)]
    id: Option<usize>,

    /// Override the listen port from the config file
    #[arg(long)]
    port: Option<u16>,

    /// Override the snapshot path from the config file
    #[arg(long)]
    snapshot_path: Option<String>,
}

fn main() -> Result<()> {
    // Use the RUST_LOG environment variable to control verbosity,
    // e.g. RUST_LOG=debug cargo run -- --config node0.toml
    env_logger::init();

    let args = Args::parse();
    let mut config = config::Config::load(&args.config)?;
    if let Some(id) = args.id {
        config.node_id = id;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.snapshot_path {
        config.snapshot_path = path;
    }
    config.validate()?;

    // A previous incarnation of this node may have left a snapshot; pick
    // up exactly where it stopped so peers still receive anything owed.
    let snapshot_path = PathBuf::from(&config.snapshot_path);
    let node = match snapshot::load(&snapshot_path)? {
        Some(node) => {
            ensure!(
                node.id() == config.node_id && node.node_count() == config.node_count(),
                "snapshot {} belongs to node {} of a {}-node group, not node {} of {}",
                snapshot_path.display(),
                node.id(),
                node.node_count(),
                config.node_id,
                config.node_count()
            );
            info!(
                "restored node {} from {} (clock {})",
                node.id(),
                snapshot_path.display(),
                node.clock()
            );
            node
        }
        None => Node::new(config.node_id, config.node_count()),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = server::Server::new(config, node);
        server.run().await
    })
}
