//! Timing event value types
//!
//! A [`TimingEvent`] is the decoded (channel, time, source) triple produced by a
//! timing console. It is transient: only the raw record in the `times` table is
//! persisted, for audit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical timing channel
///
/// Consoles label channels differently (`1`, `01`, `M1` for a manual start,
/// ...). All of them map onto the same four course positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Start,
    Finish,
    Split1,
    Split2,
    /// Channel label the course has no use for
    Other(String),
}

impl Channel {
    /// Map a console channel label onto a course position
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "1" | "01" | "M1" => Channel::Start,
            "2" | "02" | "M2" => Channel::Finish,
            "3" | "03" | "M3" => Channel::Split1,
            "4" | "04" | "M4" => Channel::Split2,
            other => Channel::Other(other.to_string()),
        }
    }

    /// Label stored in the raw `times` record
    pub fn label(&self) -> &str {
        match self {
            Channel::Start => "1",
            Channel::Finish => "2",
            Channel::Split1 => "3",
            Channel::Split2 => "4",
            Channel::Other(label) => label,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Start => write!(f, "start"),
            Channel::Finish => write!(f, "finish"),
            Channel::Split1 => write!(f, "split_1"),
            Channel::Split2 => write!(f, "split_2"),
            Channel::Other(label) => write!(f, "channel {:?}", label),
        }
    }
}

/// Where a timing event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingSource {
    /// Decoded from a timing console line
    Console,
    /// Injected by an operator or a test harness
    Manual,
}

/// One decoded timing event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingEvent {
    pub channel: Channel,
    /// Time of day reported by the console, in milliseconds
    pub time_ms: i64,
    pub source: TimingSource,
}

impl TimingEvent {
    pub fn new(channel: Channel, time_ms: i64, source: TimingSource) -> Self {
        Self {
            channel,
            time_ms,
            source,
        }
    }
}
