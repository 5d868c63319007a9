//! Test helpers for rallyx-sc integration tests
//!
//! - `TestDb`: temporary scoring database
//! - Seeding of events, entries, runs and penalties
//! - `RecordingAnnunciator`: collects alert cues

#![allow(dead_code)]

use rallyx_common::config::RulesConfig;
use rallyx_common::db::{init_database, registry, Entry, Run, ENTRY_COLUMNS, RUN_COLUMNS};
use rallyx_sc::propagator::RecalcHandle;
use rallyx_sc::{Annunciator, Cue, ScoringContext};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Temporary database kept alive for the test's duration
pub struct TestDb {
    _dir: TempDir,
    pub pool: SqlitePool,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&dir.path().join("scoring.db"))
            .await
            .expect("Failed to initialize database");
        Self { _dir: dir, pool }
    }
}

#[derive(Debug, Default)]
pub struct RecordingAnnunciator {
    cues: Mutex<Vec<Cue>>,
}

impl RecordingAnnunciator {
    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().unwrap().clone()
    }
}

impl Annunciator for RecordingAnnunciator {
    fn announce(&self, cue: Cue) {
        self.cues.lock().unwrap().push(cue);
    }
}

/// Context with no running worker; tests drain explicitly
pub fn context(pool: &SqlitePool) -> (ScoringContext, Arc<RecordingAnnunciator>) {
    let annunciator = Arc::new(RecordingAnnunciator::default());
    let ctx = ScoringContext::new(
        pool.clone(),
        Arc::new(RulesConfig::default()),
        RecalcHandle::detached(),
        annunciator.clone(),
    );
    (ctx, annunciator)
}

/// Insert an event and make it the active one
pub async fn seed_event(
    pool: &SqlitePool,
    max_runs: i64,
    min_runs: i64,
    drop_runs: i64,
    rule_set: &str,
) -> i64 {
    let event_id = sqlx::query(
        "INSERT INTO events (name, max_runs, min_runs, drop_runs, rule_set) VALUES (?, ?, ?, ?, ?)",
    )
    .bind("Test Event")
    .bind(max_runs)
    .bind(min_runs)
    .bind(drop_runs)
    .bind(rule_set)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid();

    registry::reg_set_value(pool, registry::ACTIVE_EVENT_ID, &event_id)
        .await
        .unwrap();
    event_id
}

pub async fn seed_entry(
    pool: &SqlitePool,
    event_id: i64,
    car_class: &str,
    card_number: Option<i64>,
    race_session: Option<&str>,
) -> i64 {
    sqlx::query(
        "INSERT INTO entries (event_id, car_class, card_number, race_session) VALUES (?, ?, ?, ?)",
    )
    .bind(event_id)
    .bind(car_class)
    .bind(card_number)
    .bind(race_session)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

/// Insert a run directly, dirty
pub async fn seed_run(
    pool: &SqlitePool,
    event_id: i64,
    entry_id: Option<i64>,
    start_time_ms: Option<i64>,
    finish_time_ms: Option<i64>,
    cones: i64,
    state: &str,
) -> i64 {
    sqlx::query(
        "INSERT INTO runs \
         (event_id, entry_id, start_time_ms, finish_time_ms, cones, state, recalc) \
         VALUES (?, ?, ?, ?, ?, ?, 1)",
    )
    .bind(event_id)
    .bind(entry_id)
    .bind(start_time_ms)
    .bind(finish_time_ms)
    .bind(cones)
    .bind(state)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

/// Insert a scored run timed `elapsed_ms` from a fixed start
pub async fn seed_scored(pool: &SqlitePool, event_id: i64, entry_id: i64, elapsed_ms: i64) -> i64 {
    seed_run(
        pool,
        event_id,
        Some(entry_id),
        Some(100_000),
        Some(100_000 + elapsed_ms),
        0,
        "scored",
    )
    .await
}

pub async fn seed_penalty(pool: &SqlitePool, entry_id: i64, time_ms: i64) {
    sqlx::query("INSERT INTO penalties (entry_id, time_ms, penalty_note) VALUES (?, ?, 'test')")
        .bind(entry_id)
        .bind(time_ms)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn run(pool: &SqlitePool, run_id: i64) -> Run {
    let sql = format!("SELECT {} FROM runs WHERE run_id = ?", RUN_COLUMNS);
    sqlx::query_as(&sql).bind(run_id).fetch_one(pool).await.unwrap()
}

pub async fn entry(pool: &SqlitePool, entry_id: i64) -> Entry {
    let sql = format!("SELECT {} FROM entries WHERE entry_id = ?", ENTRY_COLUMNS);
    sqlx::query_as(&sql).bind(entry_id).fetch_one(pool).await.unwrap()
}

pub async fn run_count(pool: &SqlitePool, event_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM runs WHERE event_id = ?")
        .bind(event_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Raw timing records as (channel, time_ms, invalid), oldest first
pub async fn time_records(pool: &SqlitePool, event_id: i64) -> Vec<(String, i64, bool)> {
    sqlx::query_as(
        "SELECT channel, time_ms, invalid FROM times WHERE event_id = ? ORDER BY time_id",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
    .unwrap()
}
