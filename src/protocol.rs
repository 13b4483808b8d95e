//! # Command Parser
//!
//! This module turns the single-line text commands typed at a node's
//! console into structured [`Command`] values.
//!
//! ## Command Format
//!
//! ```text
//! user<id> schedules <name> (user<a>,user<b>,...) (<start>,<end>) <Day>
//! user<id> cancels   <name> (user<a>,user<b>,...) (<start>,<end>) <Day>
//! user<id> fails | user<id> crashes | user<id> goes down
//! quit
//! log
//! ```
//!
//! Times use the 12-hour clock with an `am`/`pm` suffix and half-hour
//! granularity, for example `(4:00pm,6:00pm)`. Days are case-insensitive
//! weekday names.
//!
//! ## Example
//! ```text
//! user1 schedules lunch (user0,user1) (12:00pm,1:00pm) Friday
//! user1 cancels lunch (user0,user1) (12:00pm,1:00pm) Friday
//! user1 goes down
//! ```
//!
//! Malformed commands produce an error and never reach the replication
//! engine, so a typo cannot change any state.

use anyhow::{anyhow, Result};

use crate::appointment::{Appointment, NodeId, SlotTime, Weekday};

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Schedule a new appointment on behalf of `user`.
    Schedule {
        user: NodeId,
        appointment: Appointment,
    },

    /// Cancel an appointment on behalf of `user`. The full appointment is
    /// parsed for symmetry with scheduling; cancellation targets are
    /// resolved by name.
    Cancel {
        user: NodeId,
        appointment: Appointment,
    },

    /// Simulate a crash: snapshot state to disk, keep running.
    Fail { user: NodeId },

    /// Snapshot state and shut the node down cleanly.
    Quit,

    /// Dump the node's clock, calendar, log, and time table.
    Log,
}

/// Stateless parser for console commands. Safe to share across tasks.
pub struct Protocol;

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol {
    pub fn new() -> Self {
        Self
    }

    /// Parse one input line into a [`Command`].
    pub fn parse(&self, input: &str) -> Result<Command> {
        let input = input.trim();
        if input.is_empty() {
            return Err(anyhow!("empty command"));
        }

        match input.to_lowercase().as_str() {
            "quit" => return Ok(Command::Quit),
            "log" => return Ok(Command::Log),
            _ => {}
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        let user = parse_user(parts[0])?;

        match parts.get(1).copied() {
            Some("schedules") => {
                let appointment = parse_appointment(&parts)?;
                Ok(Command::Schedule { user, appointment })
            }
            Some("cancels") => {
                let appointment = parse_appointment(&parts)?;
                Ok(Command::Cancel { user, appointment })
            }
            Some("fails") | Some("crashes") if parts.len() == 2 => Ok(Command::Fail { user }),
            Some("goes") if parts.len() == 3 && parts[2] == "down" => Ok(Command::Fail { user }),
            Some(verb) => Err(anyhow!(
                "unknown action {:?}; use schedules, cancels, fails, crashes, or goes down",
                verb
            )),
            None => Err(anyhow!("missing action after {:?}", parts[0])),
        }
    }
}

/// Parse a `user<id>` token into a node id.
fn parse_user(token: &str) -> Result<NodeId> {
    let id = token
        .strip_prefix("user")
        .ok_or_else(|| anyhow!("expected user<id>, got {:?}", token))?;
    id.parse()
        .map_err(|_| anyhow!("expected user<id> with a numeric id, got {:?}", token))
}

/// Strip the surrounding parentheses from a `(...)` group.
fn strip_parens(token: &str) -> Result<&str> {
    token
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| anyhow!("expected a parenthesized group, got {:?}", token))
}

/// Parse the tail of a schedule/cancel command:
/// `<name> (participants) (times) <day>`.
fn parse_appointment(parts: &[&str]) -> Result<Appointment> {
    if parts.len() != 6 {
        return Err(anyhow!(
            "schedule and cancel commands take 6 fields, got {}",
            parts.len()
        ));
    }
    let name = parts[2];

    let mut participants = Vec::new();
    for token in strip_parens(parts[3])?.split(',') {
        participants.push(parse_user(token)?);
    }

    let times = strip_parens(parts[4])?;
    let (start_str, end_str) = times
        .split_once(',')
        .ok_or_else(|| anyhow!("expected (start,end) times, got {:?}", parts[4]))?;
    let start = SlotTime::parse(start_str)?;
    let end = SlotTime::parse(end_str)?;

    let day = Weekday::parse(parts[5])?;

    Ok(Appointment::new(name, day, start, end, participants)?)
}
