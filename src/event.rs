//! # Event Records
//!
//! Every local schedule or cancel that actually changes the calendar is
//! recorded as an immutable event record. The log of these records is what
//! nodes exchange during gossip; the calendar itself is only a derived
//! view.
//!
//! A record's identity is the full `(op, origin, time, appointment)` tuple.
//! Because each node bumps its logical clock exactly once per record it
//! originates, the `(origin, time)` pair is already globally unique and
//! serves as the deduplication key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::appointment::{Appointment, NodeId};

/// The kind of calendar mutation an event record captures.
///
/// Message exchange itself is not an event: sending and receiving never
/// touch the causal history, so only these two variants exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    Insert,
    Delete,
}

/// An immutable causal event: who did what, when on their local clock, and
/// to which appointment.
///
/// Delete records carry the full appointment value rather than just a name,
/// so a tombstone can always be matched against candidate calendar entries
/// by name equality without consulting other state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub op: EventOp,
    pub origin: NodeId,
    pub time: u64,
    pub appointment: Appointment,
}

impl EventRecord {
    pub fn insert(origin: NodeId, time: u64, appointment: Appointment) -> Self {
        Self {
            op: EventOp::Insert,
            origin,
            time,
            appointment,
        }
    }

    pub fn delete(origin: NodeId, time: u64, appointment: Appointment) -> Self {
        Self {
            op: EventOp::Delete,
            origin,
            time,
            appointment,
        }
    }

    /// The `(origin, time)` pair identifying this record. Lexicographic
    /// order on dots is the total order used to pick conflict losers.
    pub fn dot(&self) -> (NodeId, u64) {
        (self.origin, self.time)
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            EventOp::Insert => "INSERT",
            EventOp::Delete => "DELETE",
        };
        write!(
            f,
            "{}({}) t={} by node{}",
            op,
            self.appointment.name(),
            self.time,
            self.origin
        )
    }
}
