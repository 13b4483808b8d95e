//! # Replication Engine
//!
//! The node core: one value holding the logical clock, the two-dimensional
//! time table, the event log, and the derived calendar view. All four are
//! mutated together under a single lock by the server layer; nothing in
//! this module touches the network.
//!
//! ## How State Converges
//!
//! Local commands enter through [`Node::insert`] and [`Node::delete`],
//! which append event records and report which peers should be gossiped
//! to. Outbound gossip is built by [`Node::sync_message_for`], which sends
//! a peer exactly the log suffix it is not yet known to have, plus a
//! snapshot of the time table. Inbound gossip lands in [`Node::receive`],
//! which filters genuinely new events, rebuilds the calendar with
//! tombstones winning over inserts, folds in the sender's time table, and
//! finally garbage-collects every log entry that all peers are now known
//! to have observed.
//!
//! Receiving is not itself a causal event: it never advances the clock and
//! never creates an event record, so replaying or reordering messages is
//! harmless. The merge is commutative and idempotent.
//!
//! ## Conflict Resolution
//!
//! Appointment conflicts are detected with the pure overlap predicate on
//! [`Appointment`]. A locally submitted appointment that conflicts is
//! rejected outright: no clock bump, no log entry, no calendar change. A
//! conflict discovered while merging remote events is resolved by deleting
//! the loser, chosen by lexicographic order on the originating
//! `(origin, time)` dot with the larger dot losing. Every node applies the
//! same rule to the same pair, so all replicas delete the same
//! appointment without coordinating.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::appointment::{Appointment, NodeId};
use crate::event::{EventOp, EventRecord};
use crate::time_table::TimeTable;
use crate::wire::SyncMessage;

/// A calendar slot together with the dot of the insert that created it.
/// The dot never leaves the node on its own; it exists so the merge
/// conflict hook can pick the same loser on every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    appointment: Appointment,
    origin: NodeId,
    time: u64,
}

impl CalendarEntry {
    pub fn appointment(&self) -> &Appointment {
        &self.appointment
    }

    fn dot(&self) -> (NodeId, u64) {
        (self.origin, self.time)
    }
}

/// Result of a local schedule attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The appointment was added; gossip should go to these peers.
    Scheduled { notify: Vec<NodeId> },
    /// The appointment collided with an existing one and was rejected
    /// without touching any state.
    Conflict { existing: Appointment },
}

/// Result of merging one inbound gossip message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// How many events in the message this node had not seen before.
    pub fresh: usize,
    /// Names deleted by the merge conflict hook during this receive.
    pub resolved: Vec<String>,
    /// Peers that should be gossiped the resolution tombstones.
    pub notify: Vec<NodeId>,
}

/// The complete replicated-calendar state of one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    clock: u64,
    calendar: HashMap<String, CalendarEntry>,
    log: Vec<EventRecord>,
    table: TimeTable,
}

impl Node {
    /// A fresh node in a group of `node_count` peers. Ids start at 0 and
    /// must be strictly less than the group size.
    pub fn new(id: NodeId, node_count: usize) -> Self {
        assert!(
            id < node_count,
            "node id {} out of range for a group of {}",
            id,
            node_count
        );
        Self {
            id,
            clock: 0,
            calendar: HashMap::new(),
            log: Vec::new(),
            table: TimeTable::new(node_count),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node_count(&self) -> usize {
        self.table.len()
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn table(&self) -> &TimeTable {
        &self.table
    }

    pub fn log(&self) -> &[EventRecord] {
        &self.log
    }

    /// The appointment currently stored under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<&Appointment> {
        self.calendar.get(name).map(|e| &e.appointment)
    }

    /// All appointments on the calendar, in name order.
    pub fn appointments(&self) -> Vec<&Appointment> {
        let mut names: Vec<&String> = self.calendar.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| &self.calendar[n].appointment)
            .collect()
    }

    /// True when this node knows that peer `k` has observed `event`.
    pub fn has_rec(&self, event: &EventRecord, k: NodeId) -> bool {
        self.table.has_rec(event, k)
    }

    /// Advance the clock for a new local event. The diagonal entry of the
    /// time table mirrors the clock after every bump.
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.table.record_local(self.id, self.clock);
        self.clock
    }

    /// Append to the log unless an identical record is already there.
    fn append(&mut self, event: EventRecord) {
        if !self.log.contains(&event) {
            self.log.push(event);
        }
    }

    /// Participants of `x` other than this node, deduplicated and ordered.
    fn gossip_targets(&self, x: &Appointment) -> Vec<NodeId> {
        x.participants()
            .iter()
            .copied()
            .filter(|p| *p != self.id)
            .collect()
    }

    /// The first calendar entry conflicting with `x`, by name order so the
    /// answer does not depend on map iteration order.
    fn find_conflict(&self, x: &Appointment) -> Option<&CalendarEntry> {
        let mut names: Vec<&String> = self
            .calendar
            .iter()
            .filter(|(_, e)| e.appointment.conflicts_with(x))
            .map(|(n, _)| n)
            .collect();
        names.sort();
        names.first().map(|n| &self.calendar[*n])
    }

    /// Schedule an appointment submitted by the local user.
    ///
    /// A conflicting submission is rejected before anything happens: the
    /// clock is not advanced and no record is produced, so a rejected
    /// command is invisible to the rest of the group.
    pub fn insert(&mut self, x: Appointment) -> InsertOutcome {
        if let Some(existing) = self.find_conflict(&x) {
            let existing = existing.appointment.clone();
            debug!(
                "[node{}] rejected {:?}: conflicts with {:?}",
                self.id,
                x.name(),
                existing.name()
            );
            return InsertOutcome::Conflict { existing };
        }

        let t = self.tick();
        self.append(EventRecord::insert(self.id, t, x.clone()));
        self.calendar.insert(
            x.name().to_string(),
            CalendarEntry {
                appointment: x.clone(),
                origin: self.id,
                time: t,
            },
        );
        InsertOutcome::Scheduled {
            notify: self.gossip_targets(&x),
        }
    }

    /// Cancel the appointment stored under `name`.
    ///
    /// Unknown names are a silent no-op: no clock bump, no record. The
    /// tombstone carries the full appointment value resolved from the
    /// calendar, so receivers can match it without any other context.
    pub fn delete(&mut self, name: &str) -> Option<Vec<NodeId>> {
        let entry = self.calendar.remove(name)?;
        let t = self.tick();
        self.append(EventRecord::delete(self.id, t, entry.appointment.clone()));
        Some(self.gossip_targets(&entry.appointment))
    }

    /// Build the gossip message for peer `k`: every log entry this node
    /// does not know `k` to have, in log order, plus a value snapshot of
    /// the time table. Read-only; an empty event list is still meaningful
    /// because the table carries indirect knowledge.
    pub fn sync_message_for(&self, k: NodeId) -> SyncMessage {
        let events = self
            .log
            .iter()
            .filter(|e| !self.table.has_rec(e, k))
            .cloned()
            .collect();
        SyncMessage {
            events,
            table: self.table.clone(),
            sender: self.id,
        }
    }

    /// Merge one inbound gossip message.
    ///
    /// Duplicated and reordered messages are tolerated: events already
    /// covered by the time table are filtered out up front, the calendar
    /// rebuild treats tombstones as final, and the table join only ever
    /// raises entries.
    pub fn receive(&mut self, msg: &SyncMessage) -> ReceiveOutcome {
        // Events this node genuinely has not seen yet.
        let ne: Vec<EventRecord> = msg
            .events
            .iter()
            .filter(|f| !self.table.has_rec(f, self.id))
            .cloned()
            .collect();
        let fresh = ne.len();

        let pre = self.calendar.clone();

        // Candidate entries: the current calendar plus incoming inserts,
        // keyed by name. If two origins ever insert the same name, the
        // earlier dot is kept so every replica resolves it identically.
        let mut candidates = self.calendar.clone();
        for e in ne.iter().filter(|e| e.op == EventOp::Insert) {
            let incoming = CalendarEntry {
                appointment: e.appointment.clone(),
                origin: e.origin,
                time: e.time,
            };
            match candidates.entry(e.appointment.name().to_string()) {
                Entry::Occupied(mut slot) => {
                    if incoming.dot() < slot.get().dot() {
                        slot.insert(incoming);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(incoming);
                }
            }
        }

        // Tombstones are final: any delete known here or arriving now
        // suppresses the name, regardless of the order events arrived in.
        {
            let tombstoned: HashSet<&str> = ne
                .iter()
                .chain(self.log.iter())
                .filter(|e| e.op == EventOp::Delete)
                .map(|e| e.appointment.name())
                .collect();
            candidates.retain(|name, _| !tombstoned.contains(name.as_str()));
        }
        self.calendar = candidates;

        // Appointments the merge just introduced may collide with what was
        // already booked. The loser of each pair is the entry with the
        // larger dot; deleting it produces a tombstone to gossip onward.
        let mut introduced: Vec<String> = self
            .calendar
            .keys()
            .filter(|n| !pre.contains_key(*n))
            .cloned()
            .collect();
        introduced.sort();

        let mut resolved = Vec::new();
        let mut notify = BTreeSet::new();
        for name in introduced {
            let Some(newcomer) = self.calendar.get(&name).cloned() else {
                continue;
            };
            let mut rivals: Vec<&CalendarEntry> = pre
                .values()
                .filter(|p| p.appointment.conflicts_with(&newcomer.appointment))
                .collect();
            rivals.sort_by(|a, b| a.appointment.name().cmp(b.appointment.name()));

            for rival in rivals {
                if !self.calendar.contains_key(rival.appointment.name()) {
                    // Already tombstoned or resolved earlier in this merge.
                    continue;
                }
                let newcomer_loses = newcomer.dot() > rival.dot();
                let loser = if newcomer_loses {
                    newcomer.appointment.name().to_string()
                } else {
                    rival.appointment.name().to_string()
                };
                if let Some(targets) = self.delete(&loser) {
                    debug!(
                        "[node{}] merge conflict between {:?} and {:?}, dropped {:?}",
                        self.id,
                        newcomer.appointment.name(),
                        rival.appointment.name(),
                        loser
                    );
                    notify.extend(targets);
                    resolved.push(loser);
                }
                if newcomer_loses {
                    break;
                }
            }
        }

        // Fold in what the sender knows, directly and indirectly.
        self.table.join(&msg.table, self.id, msg.sender);

        // Integrate the new events in arrival order, then drop every entry
        // the whole group is now known to have observed.
        for e in ne {
            self.append(e);
        }
        let table = &self.table;
        self.log.retain(|e| !table.known_by_all(e));

        ReceiveOutcome {
            fresh,
            resolved,
            notify: notify.into_iter().collect(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "node {}", self.id)?;
        writeln!(f, "clock: {}", self.clock)?;
        writeln!(f, "calendar:")?;
        for appt in self.appointments() {
            writeln!(f, "\t{}", appt)?;
        }
        writeln!(f, "log:")?;
        for e in &self.log {
            writeln!(f, "\t{}", e)?;
        }
        writeln!(f, "time table:")?;
        write!(f, "{}", self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::{SlotTime, Weekday};

    fn appt(name: &str, day: Weekday, start: &str, end: &str, parts: Vec<NodeId>) -> Appointment {
        Appointment::new(
            name,
            day,
            SlotTime::parse(start).unwrap(),
            SlotTime::parse(end).unwrap(),
            parts,
        )
        .unwrap()
    }

    fn lunch() -> Appointment {
        appt("lunch", Weekday::Friday, "12:00pm", "1:00pm", vec![0, 1])
    }

    #[test]
    fn first_insert_sets_clock_table_log_and_calendar() {
        let mut n0 = Node::new(0, 2);
        let outcome = n0.insert(lunch());
        assert_eq!(outcome, InsertOutcome::Scheduled { notify: vec![1] });

        assert_eq!(n0.clock(), 1);
        assert_eq!(n0.table().get(0, 0), 1);
        assert_eq!(n0.table().get(0, 1), 0);
        assert_eq!(n0.table().get(1, 0), 0);
        assert_eq!(n0.log(), &[EventRecord::insert(0, 1, lunch())]);
        assert_eq!(n0.lookup("lunch"), Some(&lunch()));
    }

    #[test]
    fn gossip_delivers_the_insert() {
        let mut n0 = Node::new(0, 2);
        let mut n1 = Node::new(1, 2);
        n0.insert(lunch());

        let msg = n0.sync_message_for(1);
        assert_eq!(msg.events.len(), 1);
        let outcome = n1.receive(&msg);

        assert_eq!(outcome.fresh, 1);
        assert_eq!(n1.clock(), 0, "receive must not advance the clock");
        assert_eq!(n1.table().get(1, 0), 1);
        assert_eq!(n1.log(), &[EventRecord::insert(0, 1, lunch())]);
        assert_eq!(n1.lookup("lunch"), Some(&lunch()));
    }

    #[test]
    fn conflicting_local_insert_changes_nothing() {
        let mut n0 = Node::new(0, 2);
        n0.insert(appt("a", Weekday::Friday, "1:00pm", "2:00pm", vec![0, 1]));
        let before = n0.clone();

        let outcome = n0.insert(appt("b", Weekday::Friday, "1:30pm", "2:30pm", vec![0, 1]));
        match outcome {
            InsertOutcome::Conflict { existing } => assert_eq!(existing.name(), "a"),
            other => panic!("expected a conflict, got {:?}", other),
        }
        assert_eq!(n0, before);
    }

    #[test]
    fn delete_of_unknown_name_is_a_silent_noop() {
        let mut n0 = Node::new(0, 2);
        assert_eq!(n0.delete("ghost"), None);
        assert_eq!(n0.clock(), 0);
        assert!(n0.log().is_empty());
    }

    #[test]
    fn delete_produces_a_tombstone_with_the_full_value() {
        let mut n0 = Node::new(0, 2);
        n0.insert(lunch());
        let notify = n0.delete("lunch").unwrap();
        assert_eq!(notify, vec![1]);
        assert_eq!(n0.clock(), 2);
        assert_eq!(n0.lookup("lunch"), None);
        assert_eq!(n0.log()[1], EventRecord::delete(0, 2, lunch()));
    }

    #[test]
    fn duplicate_events_in_a_message_are_suppressed() {
        let mut n0 = Node::new(0, 2);
        let mut n1 = Node::new(1, 2);
        n0.insert(lunch());

        let mut msg = n0.sync_message_for(1);
        let dup = msg.events[0].clone();
        msg.events.push(dup);
        n1.receive(&msg);
        assert_eq!(n1.log().len(), 1);
    }

    #[test]
    fn receive_is_idempotent() {
        let mut n0 = Node::new(0, 2);
        let mut n1 = Node::new(1, 2);
        n0.insert(lunch());

        let msg = n0.sync_message_for(1);
        n1.receive(&msg);
        let once = n1.clone();
        let again = n1.receive(&msg);
        assert_eq!(again.fresh, 0);
        assert_eq!(n1, once);
    }

    #[test]
    fn empty_gossip_still_carries_table_knowledge() {
        let mut n0 = Node::new(0, 2);
        let mut n1 = Node::new(1, 2);
        n0.insert(lunch());
        n1.receive(&n0.sync_message_for(1));

        // Node 1 has nothing new for node 0, but its table now shows that
        // it observed the insert; gossiping back lets node 0 truncate.
        let back = n1.sync_message_for(0);
        assert!(back.events.is_empty());
        n0.receive(&back);
        assert!(n0.table().get(1, 0) >= 1);
        assert!(n0.log().is_empty(), "fully acknowledged log must truncate");
    }

    #[test]
    fn tombstone_wins_over_a_concurrent_reinsert() {
        let mut n0 = Node::new(0, 2);
        let mut n1 = Node::new(1, 2);

        n0.insert(lunch());
        n1.receive(&n0.sync_message_for(1));

        // Node 1 cancels; node 0 concurrently reschedules the same name.
        n1.delete("lunch").unwrap();
        n0.delete("lunch").unwrap();
        n0.insert(appt("lunch", Weekday::Friday, "12:30pm", "1:30pm", vec![0, 1]));

        n0.receive(&n1.sync_message_for(0));
        n1.receive(&n0.sync_message_for(1));

        assert_eq!(n0.lookup("lunch"), None, "a known delete is final");
        assert_eq!(n1.lookup("lunch"), None);
    }

    #[test]
    fn merge_conflict_deletes_the_larger_dot_on_both_nodes() {
        let mut n0 = Node::new(0, 2);
        let mut n1 = Node::new(1, 2);

        // Same slot, different names, issued concurrently.
        let a = appt("a", Weekday::Friday, "1:00pm", "2:00pm", vec![0, 1]);
        let b = appt("b", Weekday::Friday, "1:00pm", "2:00pm", vec![0, 1]);
        n0.insert(a.clone());
        n1.insert(b.clone());

        let to_n1 = n0.sync_message_for(1);
        let to_n0 = n1.sync_message_for(0);

        let out0 = n0.receive(&to_n0);
        let out1 = n1.receive(&to_n1);

        // Dot (0, 1) < (1, 1): "b" loses everywhere.
        assert_eq!(out0.resolved, vec!["b".to_string()]);
        assert_eq!(out1.resolved, vec!["b".to_string()]);
        assert_eq!(out0.notify, vec![1]);
        assert_eq!(n0.lookup("a"), Some(&a));
        assert_eq!(n1.lookup("a"), Some(&a));
        assert_eq!(n0.lookup("b"), None);
        assert_eq!(n1.lookup("b"), None);

        // Cross-gossip the resolution tombstones; calendars stay equal.
        n1.receive(&n0.sync_message_for(1));
        n0.receive(&n1.sync_message_for(0));
        assert_eq!(n0.appointments(), n1.appointments());
    }

    #[test]
    fn tables_only_ever_grow() {
        let mut n0 = Node::new(0, 3);
        let mut n1 = Node::new(1, 3);
        let all = appt("x", Weekday::Monday, "9:00am", "10:00am", vec![0, 1, 2]);

        let mut before = n0.table().clone();
        n0.insert(all);
        assert!(n0.table().dominates(&before));

        before = n1.table().clone();
        n1.receive(&n0.sync_message_for(1));
        assert!(n1.table().dominates(&before));

        before = n1.table().clone();
        n1.delete("x").unwrap();
        assert!(n1.table().dominates(&before));
    }

    #[test]
    fn log_retains_only_events_someone_still_needs() {
        let mut n0 = Node::new(0, 3);
        let mut n1 = Node::new(1, 3);
        let all = appt("x", Weekday::Monday, "9:00am", "10:00am", vec![0, 1, 2]);
        n0.insert(all);

        n1.receive(&n0.sync_message_for(1));
        n0.receive(&n1.sync_message_for(0));

        // Node 2 has not acknowledged yet, so the record must survive.
        for e in n0.log() {
            assert!((0..3).any(|j| !n0.has_rec(e, j)));
        }
        assert_eq!(n0.log().len(), 1);
    }
}
