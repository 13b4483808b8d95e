//! # Appointment Value Type
//!
//! This module defines the appointment value that the calendar stores and
//! replicates, together with its validation rules and the pure overlap
//! predicate used for conflict detection.
//!
//! ## Validation Rules
//!
//! - Times are 12-hour clock strings of the form `H:MMam` / `H:MMpm` with
//!   hours 1-12 and minutes restricted to `00` or `30` (half-hour slots)
//! - The start time must come strictly before the end time
//! - The day must be a weekday name (case-insensitive)
//! - The participant list must name at least one node
//!
//! ## Conflict Semantics
//!
//! Two appointments conflict when they fall on the same day, share at least
//! one participant, and their half-open time ranges `[start, end)` overlap.
//! The predicate is pure and symmetric; the replication engine calls it but
//! never decides policy here.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a node in the fixed peer group. Ids start at 0 and are
/// strictly less than the configured node count.
pub type NodeId = usize;

/// Validation errors for appointment construction and time parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppointmentError {
    #[error("time must look like H:MMam or H:MMpm, got {0:?}")]
    BadTimeFormat(String),

    #[error("hour must be between 1 and 12, got {0}")]
    BadHour(u16),

    #[error("minutes must be 00 or 30, got {0}")]
    BadMinutes(u16),

    #[error("unknown day of the week: {0:?}")]
    BadDay(String),

    #[error("start time {start} must come strictly before end time {end}")]
    EmptyRange { start: SlotTime, end: SlotTime },

    #[error("an appointment needs at least one participant")]
    NoParticipants,

    #[error("appointment name cannot be empty")]
    EmptyName,
}

/// Day of the week an appointment falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    /// Parse a weekday name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, AppointmentError> {
        match s.to_lowercase().as_str() {
            "sunday" => Ok(Weekday::Sunday),
            "monday" => Ok(Weekday::Monday),
            "tuesday" => Ok(Weekday::Tuesday),
            "wednesday" => Ok(Weekday::Wednesday),
            "thursday" => Ok(Weekday::Thursday),
            "friday" => Ok(Weekday::Friday),
            "saturday" => Ok(Weekday::Saturday),
            _ => Err(AppointmentError::BadDay(s.to_string())),
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Weekday::Sunday => "Sunday",
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
        };
        write!(f, "{}", name)
    }
}

/// A time of day stored as minutes since midnight, restricted to half-hour
/// boundaries. Ordering on the wrapped value gives the natural ordering of
/// times within a day.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SlotTime(u16);

impl SlotTime {
    /// Parse a 12-hour clock string such as `4:00pm` or `11:30am`.
    ///
    /// `12:00am` is midnight and `12:00pm` is noon, following the usual
    /// 12-hour convention.
    pub fn parse(s: &str) -> Result<Self, AppointmentError> {
        let s = s.trim();
        let (body, pm) = if let Some(body) = s.strip_suffix("am") {
            (body, false)
        } else if let Some(body) = s.strip_suffix("pm") {
            (body, true)
        } else {
            return Err(AppointmentError::BadTimeFormat(s.to_string()));
        };

        let (hour_str, min_str) = body
            .split_once(':')
            .ok_or_else(|| AppointmentError::BadTimeFormat(s.to_string()))?;
        let hour: u16 = hour_str
            .parse()
            .map_err(|_| AppointmentError::BadTimeFormat(s.to_string()))?;
        let minutes: u16 = min_str
            .parse()
            .map_err(|_| AppointmentError::BadTimeFormat(s.to_string()))?;

        if !(1..=12).contains(&hour) {
            return Err(AppointmentError::BadHour(hour));
        }
        if minutes != 0 && minutes != 30 {
            return Err(AppointmentError::BadMinutes(minutes));
        }

        // Convert to a 24-hour minute offset.
        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        Ok(SlotTime(hour24 * 60 + minutes))
    }

    /// Minutes since midnight.
    pub fn minutes(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hour24 = self.0 / 60;
        let minutes = self.0 % 60;
        let (hour12, suffix) = match hour24 {
            0 => (12, "am"),
            12 => (12, "pm"),
            h if h < 12 => (h, "am"),
            h => (h - 12, "pm"),
        };
        write!(f, "{}:{:02}{}", hour12, minutes, suffix)
    }
}

/// An appointment on the replicated calendar.
///
/// Appointment names are assumed unique across all participants' intents,
/// so the calendar keys its entries by name and deletion targets are
/// identified by name equality. The participant list is sorted and
/// deduplicated at construction so that derived equality behaves like set
/// equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    name: String,
    day: Weekday,
    start: SlotTime,
    end: SlotTime,
    participants: Vec<NodeId>,
}

impl Appointment {
    /// Build a validated appointment.
    pub fn new(
        name: impl Into<String>,
        day: Weekday,
        start: SlotTime,
        end: SlotTime,
        participants: Vec<NodeId>,
    ) -> Result<Self, AppointmentError> {
        let name = name.into();
        if name.is_empty() {
            return Err(AppointmentError::EmptyName);
        }
        if start >= end {
            return Err(AppointmentError::EmptyRange { start, end });
        }
        if participants.is_empty() {
            return Err(AppointmentError::NoParticipants);
        }
        let mut participants = participants;
        participants.sort_unstable();
        participants.dedup();
        Ok(Self {
            name,
            day,
            start,
            end,
            participants,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn day(&self) -> Weekday {
        self.day
    }

    pub fn start(&self) -> SlotTime {
        self.start
    }

    pub fn end(&self) -> SlotTime {
        self.end
    }

    pub fn participants(&self) -> &[NodeId] {
        &self.participants
    }

    /// True when two appointments cannot coexist on a calendar: same day,
    /// at least one shared participant, and overlapping time ranges.
    pub fn conflicts_with(&self, other: &Appointment) -> bool {
        if self.day != other.day {
            return false;
        }
        if !self
            .participants
            .iter()
            .any(|p| other.participants.contains(p))
        {
            return false;
        }
        // Ranges are half-open, so back-to-back appointments do not overlap.
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Appointment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let users: Vec<String> = self
            .participants
            .iter()
            .map(|p| format!("user{}", p))
            .collect();
        write!(
            f,
            "\"{}\" on {} from {} to {} with {}",
            self.name,
            self.day,
            self.start,
            self.end,
            users.join(", ")
        )
    }
}
