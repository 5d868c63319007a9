//! Operator corrections and event-wide actions
//!
//! Every change here only rewrites stored inputs and dirty flags; derived
//! fields are left to the recalculation worker.

use crate::store;
use crate::ScoringContext;
use rallyx_common::db::{EntityKind, ImmediateTx, Run, RunState};
use rallyx_common::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use tracing::info;

/// Upper bound on cones or gates an operator may record for one run
pub const MAX_PENALTY_COUNT: i64 = 999;

/// Field changes for [`edit_run`].
///
/// Outer `None` keeps the stored value. For nullable fields `Some(None)`
/// clears it (JSON `null`), `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEdit {
    #[serde(default, deserialize_with = "double_option")]
    pub entry_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_time_ms: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub finish_time_ms: Option<Option<i64>>,
    #[serde(default)]
    pub cones: Option<i64>,
    #[serde(default)]
    pub gates: Option<i64>,
    #[serde(default)]
    pub state: Option<RunState>,
}

fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Apply an operator correction to a run.
///
/// Marks the run, its previous and new entries, and the sibling runs whose
/// run numbers may shift, dirty; then queues them all.
pub async fn edit_run(ctx: &ScoringContext, run_id: i64, edit: &RunEdit) -> Result<Run> {
    let mut tx = ImmediateTx::begin(&ctx.db).await?;
    let outcome = apply_edit(&mut tx, run_id, edit).await;
    let dirtied = tx.finish(outcome).await?;

    info!(run_id, ?edit, "Run edited");
    for (kind, id) in dirtied {
        ctx.recalc.request(kind, id);
    }

    store::fetch_run(&ctx.db, run_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("run {}", run_id)))
}

/// Score a run as "did not start"
pub async fn force_dns(ctx: &ScoringContext, run_id: i64) -> Result<Run> {
    let edit = RunEdit {
        start_time_ms: Some(Some(0)),
        finish_time_ms: Some(None),
        state: Some(RunState::Scored),
        ..RunEdit::default()
    };
    edit_run(ctx, run_id, &edit).await
}

/// Score a run as "did not finish"
pub async fn force_dnf(ctx: &ScoringContext, run_id: i64) -> Result<Run> {
    let edit = RunEdit {
        start_time_ms: Some(None),
        finish_time_ms: Some(Some(0)),
        state: Some(RunState::Scored),
        ..RunEdit::default()
    };
    edit_run(ctx, run_id, &edit).await
}

async fn apply_edit(
    conn: &mut SqliteConnection,
    run_id: i64,
    edit: &RunEdit,
) -> Result<Vec<(EntityKind, i64)>> {
    let run = store::fetch_run(&mut *conn, run_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("run {}", run_id)))?;

    let entry_id = edit.entry_id.unwrap_or(run.entry_id);
    let start_time_ms = edit.start_time_ms.unwrap_or(run.start_time_ms);
    let finish_time_ms = edit.finish_time_ms.unwrap_or(run.finish_time_ms);
    let cones = edit.cones.unwrap_or(run.cones);
    let gates = edit.gates.unwrap_or(run.gates);
    let state = match edit.state {
        Some(state) => state,
        None => run.run_state()?,
    };

    if !(0..=MAX_PENALTY_COUNT).contains(&cones) || !(0..=MAX_PENALTY_COUNT).contains(&gates) {
        return Err(Error::InvalidInput(format!(
            "cones and gates must be between 0 and {}",
            MAX_PENALTY_COUNT
        )));
    }
    if start_time_ms.is_some_and(|t| t < 0) || finish_time_ms.is_some_and(|t| t < 0) {
        return Err(Error::InvalidInput("times cannot be negative".to_string()));
    }
    if let Some(entry_id) = entry_id {
        let entry = store::fetch_entry(&mut *conn, entry_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("entry {}", entry_id)))?;
        if entry.event_id != run.event_id {
            return Err(Error::InvalidInput(format!(
                "entry {} belongs to another event",
                entry_id
            )));
        }
    }

    sqlx::query(
        "UPDATE runs SET entry_id = ?, start_time_ms = ?, finish_time_ms = ?, cones = ?, \
         gates = ?, state = ?, recalc = 1 WHERE run_id = ?",
    )
    .bind(entry_id)
    .bind(start_time_ms)
    .bind(finish_time_ms)
    .bind(cones)
    .bind(gates)
    .bind(state.as_str())
    .bind(run_id)
    .execute(&mut *conn)
    .await?;

    let mut dirtied = BTreeSet::from([(EntityKind::Run, run_id)]);
    for entry_id in [run.entry_id, entry_id].into_iter().flatten() {
        store::set_dirty(&mut *conn, EntityKind::Entry, entry_id).await?;
        dirtied.insert((EntityKind::Entry, entry_id));

        // Later runs of the entrant may renumber
        let siblings: Vec<i64> = sqlx::query_scalar(
            "UPDATE runs SET recalc = 1 WHERE entry_id = ? AND run_id > ? AND deleted = 0 \
             RETURNING run_id",
        )
        .bind(entry_id)
        .bind(run_id)
        .fetch_all(&mut *conn)
        .await?;
        dirtied.extend(siblings.into_iter().map(|id| (EntityKind::Run, id)));
    }

    Ok(dirtied.into_iter().collect())
}

/// Mark every run and entry of an event dirty and wake the worker
pub async fn mark_event_dirty(ctx: &ScoringContext, event_id: i64) -> Result<EventMarked> {
    let mut tx = ImmediateTx::begin(&ctx.db).await?;
    let outcome = mark_event_locked(&mut tx, event_id).await;
    let marked = tx.finish(outcome).await?;

    info!(event_id, runs = marked.runs, entries = marked.entries, "Event marked for recalculation");
    ctx.recalc.wake();
    Ok(marked)
}

/// Rows flagged by [`mark_event_dirty`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventMarked {
    pub runs: u64,
    pub entries: u64,
}

async fn mark_event_locked(conn: &mut SqliteConnection, event_id: i64) -> Result<EventMarked> {
    store::require_event(&mut *conn, event_id).await?;

    let runs = sqlx::query("UPDATE runs SET recalc = 1 WHERE event_id = ? AND deleted = 0")
        .bind(event_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    let entries = sqlx::query("UPDATE entries SET recalc = 1 WHERE event_id = ? AND deleted = 0")
        .bind(event_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(EventMarked { runs, entries })
}

/// Close out an event: every entry short of `max_runs` non-tossout runs gets
/// scored DNS runs to make up the difference. Returns the number inserted.
pub async fn finalize_event(ctx: &ScoringContext, event_id: i64) -> Result<u64> {
    let mut tx = ImmediateTx::begin(&ctx.db).await?;
    let outcome = finalize_locked(&mut tx, event_id).await;
    let inserted = tx.finish(outcome).await?;

    info!(event_id, inserted, "Event finalized");
    mark_event_dirty(ctx, event_id).await?;
    Ok(inserted)
}

async fn finalize_locked(conn: &mut SqliteConnection, event_id: i64) -> Result<u64> {
    let event = store::require_event(&mut *conn, event_id).await?;
    let entries = store::event_entries(&mut *conn, event_id).await?;

    let mut inserted = 0;
    for entry in entries {
        let run_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM runs WHERE entry_id = ? AND state != 'tossout' AND deleted = 0",
        )
        .bind(entry.entry_id)
        .fetch_one(&mut *conn)
        .await?;

        for _ in run_count..event.max_runs {
            sqlx::query(
                "INSERT INTO runs (event_id, entry_id, start_time_ms, state, recalc) \
                 VALUES (?, ?, 0, 'scored', 1)",
            )
            .bind(event_id)
            .bind(entry.entry_id)
            .execute(&mut *conn)
            .await?;
            inserted += 1;
        }
    }

    Ok(inserted)
}
