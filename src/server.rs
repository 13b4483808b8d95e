//! # Node Server
//!
//! This module wires the replication engine to the outside world: a TCP
//! listener that accepts gossip frames from peers, and a console loop that
//! accepts user commands on standard input.
//!
//! ## Architecture
//!
//! - The main loop accepts incoming peer connections; each connection gets
//!   its own async task
//! - A console task reads command lines, parses them, and applies them
//! - Both paths funnel every state mutation through one `Mutex<Node>`, so
//!   a command and an inbound merge can never interleave
//!
//! ## Concurrency
//!
//! The node lock is held only while mutating state and building outbound
//! messages; actual socket writes happen in detached tasks without the
//! lock. Inbound frames are fully read and decoded before the lock is
//! taken.
//!
//! ## Error Handling
//!
//! - Malformed console commands are reported to the user and ignored
//! - Corrupt gossip frames close the offending connection
//! - Snapshot failures are logged; the node keeps its in-memory state

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::appointment::NodeId;
use crate::config::Config;
use crate::node::{InsertOutcome, Node};
use crate::protocol::{Command, Protocol};
use crate::replication::Replicator;
use crate::snapshot;
use crate::wire::{self, SyncMessage};

/// TCP server and console front end for one calendar node.
pub struct Server {
    config: Config,
    node: Arc<Mutex<Node>>,
    replicator: Replicator,
}

impl Server {
    /// Create a server around an already constructed (or restored) node.
    pub fn new(config: Config, node: Node) -> Self {
        let replicator = Replicator::new(&config);
        Self {
            config,
            node: Arc::new(Mutex::new(node)),
            replicator,
        }
    }

    /// Run the listener and the console loop until `quit`.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("node {} listening on {}", self.config.node_id, addr);

        // Console commands run beside the listener.
        {
            let node = Arc::clone(&self.node);
            let replicator = self.replicator.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                console_loop(config, node, replicator).await;
            });
        }

        // Routine anti-entropy: gossip to every peer at a fixed interval
        // even when nothing changed. An empty partial log still carries
        // the time table, which is how acknowledgements travel and how
        // everyone eventually truncates their logs.
        {
            let node = Arc::clone(&self.node);
            let replicator = self.replicator.clone();
            let everyone: Vec<NodeId> = self
                .config
                .peers
                .iter()
                .map(|p| p.id)
                .filter(|&id| id != self.config.node_id)
                .collect();
            let period = std::time::Duration::from_secs(self.config.sync_interval_seconds);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    let node = node.lock().await;
                    gossip(&node, &replicator, &everyone);
                }
            });
        }

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    debug!("accepted gossip connection from {}", peer_addr);
                    let node = Arc::clone(&self.node);
                    let replicator = self.replicator.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, peer_addr, node, replicator).await
                        {
                            error!("connection from {} failed: {e:#}", peer_addr);
                        }
                    });
                }
                Err(e) => {
                    error!("error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Build and dispatch one gossip message per target, under the node lock.
/// The messages are snapshots; the sends themselves run without the lock.
fn gossip(node: &Node, replicator: &Replicator, targets: &[NodeId]) {
    for &peer in targets {
        replicator.spawn_send(peer, node.sync_message_for(peer));
    }
}

/// Process gossip frames from one peer connection until it closes or
/// turns out to be corrupt.
async fn handle_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    node: Arc<Mutex<Node>>,
    replicator: Replicator,
) -> Result<()> {
    loop {
        let frame = match wire::read_frame(&mut socket).await? {
            Some(frame) => frame,
            None => break,
        };
        let msg = match SyncMessage::decode_any(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                error!("corrupt message from {}: {e:#}; closing connection", addr);
                break;
            }
        };

        let mut node = node.lock().await;
        let outcome = node.receive(&msg);
        debug!(
            "merged {} fresh event(s) from peer {}",
            outcome.fresh, msg.sender
        );
        for name in &outcome.resolved {
            info!("conflict resolved during merge: dropped {:?}", name);
        }
        // Resolution tombstones are gossiped right away so the rest of the
        // group converges without waiting for another local command.
        gossip(&node, &replicator, &outcome.notify);
    }
    Ok(())
}

/// Read command lines from standard input until end of input or `quit`.
async fn console_loop(config: Config, node: Arc<Mutex<Node>>, replicator: Replicator) {
    let protocol = Protocol::new();
    let snapshot_path = PathBuf::from(&config.snapshot_path);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match protocol.parse(&line) {
            Ok(command) => {
                handle_command(command, &config, &node, &replicator, &snapshot_path).await;
            }
            Err(e) => {
                println!("invalid command: {e:#}");
            }
        }
    }
}

async fn handle_command(
    command: Command,
    config: &Config,
    node: &Arc<Mutex<Node>>,
    replicator: &Replicator,
    snapshot_path: &std::path::Path,
) {
    match command {
        Command::Schedule { user, appointment } => {
            if user != config.node_id {
                warn!(
                    "command names user{} but this is node {}",
                    user, config.node_id
                );
            }
            let mut node = node.lock().await;
            match node.insert(appointment.clone()) {
                InsertOutcome::Scheduled { notify } => {
                    println!("scheduled {}", appointment);
                    gossip(&node, replicator, &notify);
                }
                InsertOutcome::Conflict { existing } => {
                    println!(
                        "cannot schedule {}: conflicts with {}",
                        appointment, existing
                    );
                }
            }
        }
        Command::Cancel { user, appointment } => {
            if user != config.node_id {
                warn!(
                    "command names user{} but this is node {}",
                    user, config.node_id
                );
            }
            let mut node = node.lock().await;
            match node.delete(appointment.name()) {
                Some(notify) => {
                    println!("cancelled {:?}", appointment.name());
                    gossip(&node, replicator, &notify);
                }
                None => {
                    // Unknown appointments are ignored without a word to
                    // the network; nothing was scheduled, nothing changes.
                    debug!("cancel of unknown appointment {:?}", appointment.name());
                }
            }
        }
        Command::Fail { .. } => {
            let node = node.lock().await;
            match snapshot::save(&node, snapshot_path) {
                Ok(()) => info!("state snapshotted to {}", snapshot_path.display()),
                Err(e) => error!("snapshot failed: {e:#}; continuing in memory"),
            }
        }
        Command::Quit => {
            let node = node.lock().await;
            if let Err(e) = snapshot::save(&node, snapshot_path) {
                error!("snapshot on shutdown failed: {e:#}");
            }
            info!("node {} shutting down", config.node_id);
            std::process::exit(0);
        }
        Command::Log => {
            let node = node.lock().await;
            println!("{}", node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::{Appointment, SlotTime, Weekday};

    fn two_node_config(port: u16, peer_port: u16) -> Config {
        let mut config = Config::default();
        config.port = port;
        config.peers[0].port = port;
        config.peers[1].port = peer_port;
        config
    }

    fn lunch() -> Appointment {
        Appointment::new(
            "lunch",
            Weekday::Friday,
            SlotTime::parse("12:00pm").unwrap(),
            SlotTime::parse("1:00pm").unwrap(),
            vec![0, 1],
        )
        .unwrap()
    }

    /// One insert at node 0 travels over a real socket into node 1's
    /// connection handler and lands on its calendar.
    #[tokio::test]
    async fn gossip_frame_reaches_the_peer_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_port = listener.local_addr().unwrap().port();

        // Node 1 behind its connection handler.
        let receiver = Arc::new(Mutex::new(Node::new(1, 2)));
        let receiver_config = {
            let mut c = two_node_config(peer_port, peer_port);
            c.node_id = 1;
            c
        };
        let handler_node = Arc::clone(&receiver);
        let handler_replicator = Replicator::new(&receiver_config);
        let accept = tokio::spawn(async move {
            let (socket, addr) = listener.accept().await.unwrap();
            handle_connection(socket, addr, handler_node, handler_replicator)
                .await
                .unwrap();
        });

        // Node 0 schedules and gossips.
        let sender_config = two_node_config(0, peer_port);
        let replicator = Replicator::new(&sender_config);
        let mut sender = Node::new(0, 2);
        match sender.insert(lunch()) {
            InsertOutcome::Scheduled { notify } => {
                gossip(&sender, &replicator, &notify);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        accept.await.unwrap();
        let receiver = receiver.lock().await;
        assert_eq!(receiver.lookup("lunch"), Some(&lunch()));
        assert_eq!(receiver.clock(), 0);
    }

    /// A connection that sends garbage is dropped without disturbing the
    /// node.
    #[tokio::test]
    async fn corrupt_frames_close_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let node = Arc::new(Mutex::new(Node::new(1, 2)));
        let config = {
            let mut c = two_node_config(addr.port(), addr.port());
            c.node_id = 1;
            c
        };
        let handler_node = Arc::clone(&node);
        let replicator = Replicator::new(&config);
        let accept = tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            handle_connection(socket, peer, handler_node, replicator)
                .await
                .unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        wire::write_frame(&mut client, b"definitely not a sync message")
            .await
            .unwrap();
        drop(client);

        accept.await.unwrap();
        let node = node.lock().await;
        assert_eq!(node.clock(), 0);
        assert!(node.log().is_empty());
    }
}
