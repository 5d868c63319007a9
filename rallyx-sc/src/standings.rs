//! Event standings
//!
//! Ranking: more counted runs first, then faster event time, with DNF and
//! not-yet-timed entries last.

use crate::store;
use rallyx_common::db::Entry;
use rallyx_common::time::compare_times;
use rallyx_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::cmp::Ordering;

/// One ranked entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub position: usize,
    pub entry_id: i64,
    pub car_class: String,
    pub car_number: Option<i64>,
    pub event_time_ms: Option<i64>,
    pub event_time: Option<String>,
    pub event_penalties: Option<String>,
    pub event_runs: i64,
}

/// Standings order of two entries
pub fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    b.event_runs
        .cmp(&a.event_runs)
        .then_with(|| compare_times(a.event_time_ms, b.event_time_ms))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

/// Rank entries; positions start at 1
pub fn rank(mut entries: Vec<Entry>) -> Vec<Standing> {
    entries.sort_by(compare_entries);
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| Standing {
            position: i + 1,
            entry_id: entry.entry_id,
            car_class: entry.car_class,
            car_number: entry.car_number,
            event_time_ms: entry.event_time_ms,
            event_time: entry.event_time,
            event_penalties: entry.event_penalties,
            event_runs: entry.event_runs,
        })
        .collect()
}

/// Standings of an event, optionally for one class
pub async fn event_standings(
    db: &SqlitePool,
    event_id: i64,
    car_class: Option<&str>,
) -> Result<Vec<Standing>> {
    let entries = store::event_entries(db, event_id)
        .await?
        .into_iter()
        .filter(|e| car_class.map_or(true, |class| e.car_class == class))
        .collect();
    Ok(rank(entries))
}
