//! Run state machine
//!
//! Attributes decoded timing events to runs of the active event:
//!
//! | channel | effect                                                        |
//! |---------|---------------------------------------------------------------|
//! | start   | new `started` run for the queued next entrant                 |
//! | finish  | earliest matching `started` run becomes `finished`            |
//! | split   | earliest matching `started` run records the split             |
//! | other   | raw record only, flagged invalid                              |
//!
//! "Matching" means a positive start time no later than the event's time;
//! candidates are ordered by start time, so out-of-order arrival from several
//! cars on course resolves to the car that started first.
//!
//! Every event of the active event leaves a raw `times` record. Events that
//! could not be attributed are flagged invalid there and change no run.

use crate::announce::Cue;
use crate::store;
use crate::ScoringContext;
use rallyx_common::db::{registry, EntityKind, ImmediateTx};
use rallyx_common::{Channel, Result, TimingEvent};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{error, info, warn};

/// What a timing event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TimingOutcome {
    Started { run_id: i64, entry_id: Option<i64> },
    Finished { run_id: i64 },
    Split { run_id: i64, split: u8 },
    /// Start ignored while starts are disabled
    StartDisabled,
    /// Finish ignored while finishes are disabled
    FinishDisabled,
    /// Finish with no car on course to attribute it to
    FalseFinish,
    /// Split with no car on course to attribute it to
    UnmatchedSplit { split: u8 },
    UnknownChannel { label: String },
    /// No event is active; nothing recorded
    NoActiveEvent,
}

impl TimingOutcome {
    /// Run whose stored inputs changed
    pub fn run_id(&self) -> Option<i64> {
        match self {
            TimingOutcome::Started { run_id, .. }
            | TimingOutcome::Finished { run_id }
            | TimingOutcome::Split { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }

    /// Operator alert for this outcome
    pub fn cue(&self) -> Option<Cue> {
        match self {
            TimingOutcome::Started { .. } => Some(Cue::Start),
            TimingOutcome::Finished { .. } => Some(Cue::Finish),
            TimingOutcome::StartDisabled => Some(Cue::FalseStart),
            TimingOutcome::FinishDisabled | TimingOutcome::FalseFinish => Some(Cue::FalseFinish),
            _ => None,
        }
    }
}

/// Ingest one timing event.
///
/// The attribution runs under an immediate write transaction; the touched run
/// is queued for recomputation after commit.
pub async fn record_timing_event(
    ctx: &ScoringContext,
    event: &TimingEvent,
) -> Result<TimingOutcome> {
    let mut tx = ImmediateTx::begin(&ctx.db).await?;
    let outcome = apply(&mut tx, event).await;
    let outcome = tx.finish(outcome).await?;

    match &outcome {
        TimingOutcome::NoActiveEvent => {
            error!(
                channel = %event.channel,
                time_ms = event.time_ms,
                "No active event, timing event dropped"
            );
        }
        TimingOutcome::Started { run_id, entry_id } => {
            info!(run_id, entry_id, time_ms = event.time_ms, "Run started");
        }
        TimingOutcome::Finished { run_id } => {
            info!(run_id, time_ms = event.time_ms, "Run finished");
        }
        TimingOutcome::Split { run_id, split } => {
            info!(run_id, split, time_ms = event.time_ms, "Split recorded");
        }
        other => {
            warn!(
                channel = %event.channel,
                time_ms = event.time_ms,
                ?other,
                "Timing event not attributed"
            );
        }
    }

    if let Some(run_id) = outcome.run_id() {
        ctx.recalc.request(EntityKind::Run, run_id);
    }
    if let Some(cue) = outcome.cue() {
        ctx.annunciator.announce(cue);
    }

    Ok(outcome)
}

async fn apply(conn: &mut SqliteConnection, event: &TimingEvent) -> Result<TimingOutcome> {
    let Some(event_id) = registry::reg_get_i64(&mut *conn, registry::ACTIVE_EVENT_ID).await? else {
        return Ok(TimingOutcome::NoActiveEvent);
    };

    let outcome = match &event.channel {
        Channel::Start => start(conn, event_id, event.time_ms).await?,
        Channel::Finish => finish(conn, event_id, event.time_ms).await?,
        Channel::Split1 => split(conn, event_id, event.time_ms, 1).await?,
        Channel::Split2 => split(conn, event_id, event.time_ms, 2).await?,
        Channel::Other(label) => TimingOutcome::UnknownChannel {
            label: label.clone(),
        },
    };

    let invalid = outcome.run_id().is_none();
    store::insert_time_record(&mut *conn, event_id, event.channel.label(), event.time_ms, invalid)
        .await?;

    Ok(outcome)
}

async fn start(conn: &mut SqliteConnection, event_id: i64, time_ms: i64) -> Result<TimingOutcome> {
    if registry::reg_get_flag(&mut *conn, registry::DISABLE_START).await? {
        return Ok(TimingOutcome::StartDisabled);
    }

    let mut entry_id = registry::reg_get_i64(&mut *conn, registry::NEXT_ENTRY_ID).await?;
    if let Some(queued) = entry_id {
        let entry = store::fetch_entry(&mut *conn, queued).await?;
        if entry.map(|e| e.event_id) != Some(event_id) {
            warn!(
                entry_id = queued,
                event_id,
                "Queued entrant not in active event, start unassigned"
            );
            entry_id = None;
        }
    }

    let result = sqlx::query(
        "INSERT INTO runs (event_id, entry_id, start_time_ms, state, recalc) \
         VALUES (?, ?, ?, 'started', 1)",
    )
    .bind(event_id)
    .bind(entry_id)
    .bind(time_ms)
    .execute(&mut *conn)
    .await?;

    // The queued entrant is consumed by this start
    registry::reg_set(&mut *conn, registry::NEXT_ENTRY_ID, None).await?;

    Ok(TimingOutcome::Started {
        run_id: result.last_insert_rowid(),
        entry_id,
    })
}

async fn finish(conn: &mut SqliteConnection, event_id: i64, time_ms: i64) -> Result<TimingOutcome> {
    if registry::reg_get_flag(&mut *conn, registry::DISABLE_FINISH).await? {
        return Ok(TimingOutcome::FinishDisabled);
    }

    let run_id: Option<i64> = sqlx::query_scalar(
        "SELECT run_id FROM runs \
         WHERE event_id = ? AND state = 'started' AND deleted = 0 \
           AND start_time_ms > 0 AND start_time_ms <= ? \
         ORDER BY start_time_ms, run_id LIMIT 1",
    )
    .bind(event_id)
    .bind(time_ms)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(run_id) = run_id else {
        return Ok(TimingOutcome::FalseFinish);
    };

    sqlx::query(
        "UPDATE runs SET finish_time_ms = ?, state = 'finished', recalc = 1 WHERE run_id = ?",
    )
    .bind(time_ms)
    .bind(run_id)
    .execute(&mut *conn)
    .await?;

    Ok(TimingOutcome::Finished { run_id })
}

async fn split(
    conn: &mut SqliteConnection,
    event_id: i64,
    time_ms: i64,
    split: u8,
) -> Result<TimingOutcome> {
    // Split 2 only follows split 1
    let (pending, column) = match split {
        1 => ("split_1_time_ms IS NULL", "split_1_time_ms"),
        _ => (
            "split_1_time_ms IS NOT NULL AND split_2_time_ms IS NULL",
            "split_2_time_ms",
        ),
    };

    let select = format!(
        "SELECT run_id FROM runs \
         WHERE event_id = ? AND state = 'started' AND deleted = 0 \
           AND start_time_ms > 0 AND start_time_ms <= ? AND {} \
         ORDER BY start_time_ms, run_id LIMIT 1",
        pending
    );
    let run_id: Option<i64> = sqlx::query_scalar(&select)
        .bind(event_id)
        .bind(time_ms)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(run_id) = run_id else {
        return Ok(TimingOutcome::UnmatchedSplit { split });
    };

    let update = format!("UPDATE runs SET {} = ? WHERE run_id = ?", column);
    sqlx::query(&update)
        .bind(time_ms)
        .bind(run_id)
        .execute(&mut *conn)
        .await?;

    Ok(TimingOutcome::Split { run_id, split })
}
