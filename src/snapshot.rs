//! # Snapshot Adapter
//!
//! Crash recovery for a node: the whole node value (id, clock, calendar,
//! log, and time table) is serialized to a single JSON file and restored
//! from it at startup, with no network contact needed.
//!
//! Writes go to a temporary file in the same directory followed by a
//! rename, so a crash mid-write leaves the previous snapshot intact.
//! Snapshot failures are surfaced to the caller; the node keeps running on
//! its in-memory state either way.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::node::Node;

/// Persist the node state to `path` atomically.
pub fn save(node: &Node, path: &Path) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(node).context("serializing node state")?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)
        .with_context(|| format!("writing snapshot to {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("publishing snapshot at {}", path.display()))?;
    Ok(())
}

/// Restore a node from `path`. Returns `Ok(None)` when no snapshot exists
/// yet, which is the normal first boot.
pub fn load(path: &Path) -> Result<Option<Node>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading snapshot {}", path.display()))
        }
    };
    let node = serde_json::from_slice(&bytes)
        .with_context(|| format!("decoding snapshot {}", path.display()))?;
    Ok(Some(node))
}
