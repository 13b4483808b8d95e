//! # Gossip Transport
//!
//! Outbound half of anti-entropy: deliver one sync message to one peer
//! over a short-lived TCP connection, addressed through the static peer
//! directory.
//!
//! ## How Gossip Flows
//!
//! 1. **Local writes**: a schedule or cancel appends to the log and names
//!    the participants to notify; the server builds one message per target
//!    and hands each to the replicator
//! 2. **Merge resolutions**: a receive that had to delete a conflicting
//!    appointment gossips the resulting tombstone the same way
//! 3. **Failure tolerance**: a send that cannot connect or write in time
//!    is logged and dropped; nothing local changes, and the peer catches
//!    up on a later round because knowledge only accumulates
//!
//! Sends run in spawned tasks and never hold the node lock: messages are
//! built under the lock by the caller, the bytes travel without it.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::appointment::NodeId;
use crate::config::Config;
use crate::wire::{self, SyncMessage};

/// Sends sync messages to peers by id. Cheap to clone; each clone shares
/// the same immutable directory.
#[derive(Debug, Clone)]
pub struct Replicator {
    peers: HashMap<NodeId, String>,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl Replicator {
    /// Build a replicator from the configured peer directory.
    pub fn new(config: &Config) -> Self {
        let peers = config
            .peers
            .iter()
            .filter(|p| p.id != config.node_id)
            .map(|p| (p.id, p.addr()))
            .collect();
        Self {
            peers,
            connect_timeout: Duration::from_millis(config.gossip.connect_timeout_ms),
            write_timeout: Duration::from_millis(config.gossip.write_timeout_ms),
        }
    }

    /// Fire-and-forget delivery of `msg` to `peer`. Failures are logged;
    /// the caller's state is already committed and must not be rolled
    /// back, so there is nothing else to do with them.
    pub fn spawn_send(&self, peer: NodeId, msg: SyncMessage) {
        let Some(addr) = self.peers.get(&peer).cloned() else {
            warn!("no directory entry for peer {}, dropping gossip", peer);
            return;
        };
        let connect_timeout = self.connect_timeout;
        let write_timeout = self.write_timeout;
        tokio::spawn(async move {
            match send_to(&addr, &msg, connect_timeout, write_timeout).await {
                Ok(()) => debug!(
                    "gossiped {} event(s) to peer {} at {}",
                    msg.events.len(),
                    peer,
                    addr
                ),
                Err(e) => warn!(
                    "gossip to peer {} at {} failed: {e:#}; it will catch up later",
                    peer, addr
                ),
            }
        });
    }
}

async fn send_to(
    addr: &str,
    msg: &SyncMessage,
    connect_timeout: Duration,
    write_timeout: Duration,
) -> anyhow::Result<()> {
    let mut stream = timeout(connect_timeout, TcpStream::connect(addr)).await??;
    let payload = msg.to_bincode()?;
    timeout(write_timeout, wire::write_frame(&mut stream, &payload)).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn delivers_a_frame_to_a_listening_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let node = Node::new(0, 2);
        let msg = node.sync_message_for(1);
        let expected = msg.to_bincode().unwrap();

        let send = tokio::spawn(async move {
            send_to(
                &addr,
                &msg,
                Duration::from_secs(1),
                Duration::from_secs(1),
            )
            .await
        });

        let (mut socket, _) = listener.accept().await.unwrap();
        let frame = wire::read_frame(&mut socket).await.unwrap().unwrap();
        assert_eq!(frame, expected);
        // The sender closes after one frame.
        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error_not_a_hang() {
        let node = Node::new(0, 2);
        let msg = node.sync_message_for(1);
        // A port from the discard range with nobody listening.
        let result = send_to(
            "127.0.0.1:9",
            &msg,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }
}
