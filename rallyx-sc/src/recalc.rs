//! Run and entry recomputation
//!
//! Both operations are pure functions of the stored fields: they read the
//! current row, ask the event's rule set for the derived values, write them
//! back and clear the dirty flag. Callers run them inside an immediate write
//! transaction so the flag clears atomically with the new values.

use crate::rules::{self, ClassField, RunTimes, ScoredRun};
use crate::store;
use rallyx_common::config::RulesConfig;
use rallyx_common::db::{EntityKind, RunState};
use rallyx_common::Result;
use sqlx::SqliteConnection;
use tracing::debug;

/// What a recomputation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecalcOutcome {
    /// Derived fields rewritten; lists entities dirtied as a consequence
    Updated { dirtied: Vec<(EntityKind, i64)> },
    /// The row does not exist (or is deleted)
    Missing,
}

/// Recompute a run's raw/total times and run number.
///
/// Marks the owning entry dirty. Under a rule set that scores DNFs from other
/// entrants' times, every entry of the same class is marked dirty as well.
pub async fn recalc_run(
    conn: &mut SqliteConnection,
    config: &RulesConfig,
    run_id: i64,
) -> Result<RecalcOutcome> {
    let Some(run) = store::fetch_run(&mut *conn, run_id).await? else {
        return Ok(RecalcOutcome::Missing);
    };
    let event = store::require_event(&mut *conn, run.event_id).await?;
    let rules = rules::for_event(&event, config);

    let score = rules.recalc_run(&RunTimes::from(&run));
    let run_number = match (run.entry_id, run.run_state()?) {
        (Some(_), RunState::Tossout) | (None, _) => None,
        (Some(entry_id), _) => Some(store::run_number(&mut *conn, entry_id, run_id).await?),
    };

    sqlx::query(
        "UPDATE runs SET raw_time_ms = ?, total_time_ms = ?, raw_time = ?, total_time = ?, \
         run_number = ?, recalc = 0 WHERE run_id = ?",
    )
    .bind(score.raw_time_ms)
    .bind(score.total_time_ms)
    .bind(&score.raw_time)
    .bind(&score.total_time)
    .bind(run_number)
    .bind(run_id)
    .execute(&mut *conn)
    .await?;

    debug!(
        run_id,
        total_time = score.total_time.as_deref().unwrap_or("-"),
        run_number,
        "Recalculated run"
    );

    let mut dirtied = Vec::new();
    if let Some(entry_id) = run.entry_id {
        if store::set_dirty(&mut *conn, EntityKind::Entry, entry_id).await? {
            dirtied.push((EntityKind::Entry, entry_id));
        }
        if rules.needs_class_field() {
            dirtied.extend(mark_class_dirty(conn, entry_id, run.event_id).await?);
        }
    }

    Ok(RecalcOutcome::Updated { dirtied })
}

/// Recompute an entry's event time, penalties, counted runs and drop flags
pub async fn recalc_entry(
    conn: &mut SqliteConnection,
    config: &RulesConfig,
    entry_id: i64,
) -> Result<RecalcOutcome> {
    let Some(entry) = store::fetch_entry(&mut *conn, entry_id).await? else {
        return Ok(RecalcOutcome::Missing);
    };
    let event = store::require_event(&mut *conn, entry.event_id).await?;
    let rules = rules::for_event(&event, config);

    let runs = store::scored_runs(&mut *conn, entry_id).await?;
    let scored: Vec<ScoredRun> = runs.iter().map(ScoredRun::from).collect();
    let penalty_ms = store::penalty_total(&mut *conn, entry_id).await?;
    let field = if rules.needs_class_field() {
        store::class_field(&mut *conn, entry.event_id, &entry.car_class).await?
    } else {
        ClassField::new()
    };

    let score = rules.recalc_entry(&scored, penalty_ms, &field);

    sqlx::query(
        "UPDATE entries SET event_time_ms = ?, event_time = ?, event_penalties = ?, \
         event_runs = ?, recalc = 0 WHERE entry_id = ?",
    )
    .bind(score.event_time_ms)
    .bind(&score.event_time)
    .bind(&score.event_penalties)
    .bind(score.event_runs)
    .bind(entry_id)
    .execute(&mut *conn)
    .await?;

    for run in &runs {
        let reason = score.drop_reason(run.run_id);
        sqlx::query("UPDATE runs SET drop_run = ?, drop_reason = ? WHERE run_id = ?")
            .bind(reason.is_some())
            .bind(reason.map(|r| r.as_str()))
            .bind(run.run_id)
            .execute(&mut *conn)
            .await?;
    }

    // Runs that left the scored state no longer carry a drop verdict
    sqlx::query(
        "UPDATE runs SET drop_run = 0, drop_reason = NULL \
         WHERE entry_id = ? AND state != 'scored' AND drop_run != 0",
    )
    .bind(entry_id)
    .execute(&mut *conn)
    .await?;

    debug!(
        entry_id,
        event_time = score.event_time.as_deref().unwrap_or("-"),
        event_runs = score.event_runs,
        dropped = score.dropped.len(),
        "Recalculated entry"
    );

    Ok(RecalcOutcome::Updated {
        dirtied: Vec::new(),
    })
}

/// Recompute one entity, dispatching on its kind
pub async fn recalc_entity(
    conn: &mut SqliteConnection,
    config: &RulesConfig,
    kind: EntityKind,
    id: i64,
) -> Result<RecalcOutcome> {
    match kind {
        EntityKind::Run => recalc_run(conn, config, id).await,
        EntityKind::Entry => recalc_entry(conn, config, id).await,
    }
}

async fn mark_class_dirty(
    conn: &mut SqliteConnection,
    entry_id: i64,
    event_id: i64,
) -> Result<Vec<(EntityKind, i64)>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "UPDATE entries SET recalc = 1 \
         WHERE event_id = ? AND deleted = 0 AND entry_id != ? \
           AND car_class = (SELECT car_class FROM entries WHERE entry_id = ?) \
         RETURNING entry_id",
    )
    .bind(event_id)
    .bind(entry_id)
    .bind(entry_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(|id| (EntityKind::Entry, id)).collect())
}
