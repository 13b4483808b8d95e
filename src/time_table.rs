//! # Two-Dimensional Time Table
//!
//! Each node keeps an N by N matrix of logical timestamps. Row `k` is what
//! this node knows about node k's knowledge: `T[k][j] = t` means "this node
//! knows that node k has learned of every event originated at node j up to
//! and including j's local time t".
//!
//! The table answers three questions for the replication engine:
//!
//! - `has_rec(e, k)`: does this node know that peer k has seen event e?
//!   Used to build the minimal partial log for a peer, to filter freshly
//!   received events, and to decide when a log entry can be discarded.
//! - `join`: fold a gossiping peer's table into ours. The direct step pulls
//!   the sender's own row into our row (what the sender knows, we now
//!   know); the indirect step takes the element-wise maximum of the whole
//!   matrix (what the sender knows about everyone else's knowledge).
//! - `known_by_all(e)`: once every row has seen an event, no peer will ever
//!   need it again and the log entry can be garbage-collected.
//!
//! Every operation only ever raises entries, so the table is monotonically
//! non-decreasing for the life of the node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::appointment::NodeId;
use crate::event::EventRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTable {
    rows: Vec<Vec<u64>>,
}

impl TimeTable {
    /// An all-zero table for a group of `n` nodes.
    pub fn new(n: usize) -> Self {
        Self {
            rows: vec![vec![0; n]; n],
        }
    }

    /// Number of nodes the table covers.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, k: NodeId, j: NodeId) -> u64 {
        self.rows[k][j]
    }

    /// Record that node `i` has produced a local event at time `t`.
    /// Entries never decrease, even if handed a stale timestamp.
    pub fn record_local(&mut self, i: NodeId, t: u64) {
        if self.rows[i][i] < t {
            self.rows[i][i] = t;
        }
    }

    /// True when this node knows that peer `k` has observed `event`.
    pub fn has_rec(&self, event: &EventRecord, k: NodeId) -> bool {
        self.rows[k][event.origin] >= event.time
    }

    /// True when every peer is known to have observed `event`, at which
    /// point the matching log entry is dead weight.
    pub fn known_by_all(&self, event: &EventRecord) -> bool {
        (0..self.len()).all(|j| self.has_rec(event, j))
    }

    /// Fold a peer's table into this one after receiving a gossip message.
    ///
    /// `local` is this node's id and `sender` the gossiping peer's. The
    /// direct step runs before the indirect step; the union is commutative
    /// either way, the ordering just keeps the derivation readable.
    pub fn join(&mut self, other: &TimeTable, local: NodeId, sender: NodeId) {
        let n = self.len();
        debug_assert_eq!(n, other.len());

        // Direct knowledge: everything the sender itself has seen, we have
        // now seen too.
        for j in 0..n {
            if self.rows[local][j] < other.rows[sender][j] {
                self.rows[local][j] = other.rows[sender][j];
            }
        }

        // Indirect knowledge: what the sender knows about everyone else.
        for a in 0..n {
            for b in 0..n {
                if self.rows[a][b] < other.rows[a][b] {
                    self.rows[a][b] = other.rows[a][b];
                }
            }
        }
    }

    /// Element-wise comparison used by tests to assert monotonicity.
    pub fn dominates(&self, other: &TimeTable) -> bool {
        self.rows
            .iter()
            .zip(&other.rows)
            .all(|(a, b)| a.iter().zip(b).all(|(x, y)| x >= y))
    }

    #[cfg(test)]
    pub(crate) fn from_rows(rows: Vec<Vec<u64>>) -> Self {
        Self { rows }
    }
}

impl fmt::Display for TimeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            write!(f, "\t[")?;
            for (j, v) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", v)?;
            }
            writeln!(f, "]")?;
        }
        Ok(())
    }
}
