//! Database models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Started,
    Finished,
    Scored,
    Tossout,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Started => "started",
            RunState::Finished => "finished",
            RunState::Scored => "scored",
            RunState::Tossout => "tossout",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(RunState::Started),
            "finished" => Ok(RunState::Finished),
            "scored" => Ok(RunState::Scored),
            "tossout" => Ok(RunState::Tossout),
            other => Err(Error::InvalidInput(format!("Unknown run state: {}", other))),
        }
    }
}

/// Why a scored run is excluded from its entry's total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropReason {
    /// Ranked beyond the event's `max_runs`
    Overflow,
    /// One of the event's configured worst `drop_runs`
    Worst,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Overflow => "overflow",
            DropReason::Worst => "worst",
        }
    }
}

/// Kind of entity the recalculation worker recomputes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Run,
    Entry,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Run => "run",
            EntityKind::Entry => "entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(EntityKind::Run),
            "entry" => Ok(EntityKind::Entry),
            other => Err(Error::InvalidInput(format!("Unknown entity kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub event_id: i64,
    pub name: String,
    pub event_date: Option<String>,
    pub max_runs: i64,
    pub min_runs: i64,
    pub drop_runs: i64,
    pub rule_set: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entry {
    pub entry_id: i64,
    pub event_id: i64,
    pub driver_id: Option<i64>,
    pub car_class: String,
    pub car_number: Option<i64>,
    pub card_number: Option<i64>,
    pub race_session: Option<String>,
    pub event_time_ms: Option<i64>,
    pub event_time: Option<String>,
    pub event_penalties: Option<String>,
    pub event_runs: i64,
    pub recalc: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Run {
    pub run_id: i64,
    pub event_id: i64,
    pub entry_id: Option<i64>,
    /// Positive timestamp, `0` for DNS, `None` while unrecorded
    pub start_time_ms: Option<i64>,
    /// Positive timestamp, `0` for DNF, `None` while unrecorded
    pub finish_time_ms: Option<i64>,
    pub split_1_time_ms: Option<i64>,
    pub split_2_time_ms: Option<i64>,
    pub cones: i64,
    pub gates: i64,
    pub state: String,
    pub raw_time_ms: Option<i64>,
    pub total_time_ms: Option<i64>,
    pub raw_time: Option<String>,
    pub total_time: Option<String>,
    pub run_number: Option<i64>,
    pub drop_run: bool,
    pub drop_reason: Option<String>,
    pub recalc: bool,
}

impl Run {
    /// Parsed run state
    pub fn run_state(&self) -> Result<RunState> {
        self.state.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Penalty {
    pub penalty_id: i64,
    pub entry_id: i64,
    pub time_ms: i64,
    pub penalty_note: Option<String>,
}

/// Raw timing record kept for audit
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeRecord {
    pub time_id: i64,
    pub event_id: i64,
    pub channel: String,
    pub time_ms: i64,
    pub invalid: bool,
}

/// Column list matching [`Run`]
pub const RUN_COLUMNS: &str = "run_id, event_id, entry_id, start_time_ms, finish_time_ms, \
     split_1_time_ms, split_2_time_ms, cones, gates, state, raw_time_ms, total_time_ms, \
     raw_time, total_time, run_number, drop_run, drop_reason, recalc";

/// Column list matching [`Entry`]
pub const ENTRY_COLUMNS: &str = "entry_id, event_id, driver_id, car_class, car_number, \
     card_number, race_session, event_time_ms, event_time, event_penalties, event_runs, recalc";

/// Column list matching [`Event`]
pub const EVENT_COLUMNS: &str =
    "event_id, name, event_date, max_runs, min_runs, drop_runs, rule_set";
