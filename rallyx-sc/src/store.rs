//! Row-level queries over runs, entries and events
//!
//! Every query excludes soft-deleted rows.

use crate::rules::ClassField;
use rallyx_common::db::{
    EntityKind, Entry, Event, Run, ENTRY_COLUMNS, EVENT_COLUMNS, RUN_COLUMNS,
};
use rallyx_common::{Error, Result};
use sqlx::SqliteExecutor;

pub async fn fetch_event<'e, E>(db: E, event_id: i64) -> Result<Option<Event>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM events WHERE event_id = ? AND deleted = 0",
        EVENT_COLUMNS
    );
    Ok(sqlx::query_as::<_, Event>(&sql)
        .bind(event_id)
        .fetch_optional(db)
        .await?)
}

/// Like [`fetch_event`], but a missing event is an error
pub async fn require_event<'e, E>(db: E, event_id: i64) -> Result<Event>
where
    E: SqliteExecutor<'e>,
{
    fetch_event(db, event_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("event {}", event_id)))
}

pub async fn fetch_run<'e, E>(db: E, run_id: i64) -> Result<Option<Run>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {} FROM runs WHERE run_id = ? AND deleted = 0", RUN_COLUMNS);
    Ok(sqlx::query_as::<_, Run>(&sql)
        .bind(run_id)
        .fetch_optional(db)
        .await?)
}

pub async fn fetch_entry<'e, E>(db: E, entry_id: i64) -> Result<Option<Entry>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM entries WHERE entry_id = ? AND deleted = 0",
        ENTRY_COLUMNS
    );
    Ok(sqlx::query_as::<_, Entry>(&sql)
        .bind(entry_id)
        .fetch_optional(db)
        .await?)
}

/// An entry's `scored` runs in creation order
pub async fn scored_runs<'e, E>(db: E, entry_id: i64) -> Result<Vec<Run>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM runs WHERE entry_id = ? AND state = 'scored' AND deleted = 0 \
         ORDER BY run_id",
        RUN_COLUMNS
    );
    Ok(sqlx::query_as::<_, Run>(&sql).bind(entry_id).fetch_all(db).await?)
}

/// All of an event's runs, newest first
pub async fn event_runs<'e, E>(db: E, event_id: i64) -> Result<Vec<Run>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM runs WHERE event_id = ? AND deleted = 0 ORDER BY run_id DESC",
        RUN_COLUMNS
    );
    Ok(sqlx::query_as::<_, Run>(&sql).bind(event_id).fetch_all(db).await?)
}

pub async fn event_entries<'e, E>(db: E, event_id: i64) -> Result<Vec<Entry>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM entries WHERE event_id = ? AND deleted = 0 ORDER BY entry_id",
        ENTRY_COLUMNS
    );
    Ok(sqlx::query_as::<_, Entry>(&sql).bind(event_id).fetch_all(db).await?)
}

/// Sum of an entry's penalty times
pub async fn penalty_total<'e, E>(db: E, entry_id: i64) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(time_ms), 0) FROM penalties WHERE entry_id = ? AND deleted = 0",
    )
    .bind(entry_id)
    .fetch_one(db)
    .await?;
    Ok(total)
}

/// Run number a run holds among its entrant's non-tossout runs
pub async fn run_number<'e, E>(db: E, entry_id: i64, run_id: i64) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM runs \
         WHERE entry_id = ? AND run_id <= ? AND state != 'tossout' AND deleted = 0",
    )
    .bind(entry_id)
    .bind(run_id)
    .fetch_one(db)
    .await?;
    Ok(count)
}

/// Slowest raw time per run number among an event class's scored runs
pub async fn class_field<'e, E>(db: E, event_id: i64, car_class: &str) -> Result<ClassField>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT r.run_number, MAX(r.raw_time_ms) FROM runs r \
         JOIN entries e ON e.entry_id = r.entry_id \
         WHERE e.event_id = ? AND e.car_class = ? AND e.deleted = 0 \
           AND r.state = 'scored' AND r.deleted = 0 \
           AND r.run_number IS NOT NULL AND r.raw_time_ms IS NOT NULL \
         GROUP BY r.run_number",
    )
    .bind(event_id)
    .bind(car_class)
    .fetch_all(db)
    .await?;

    let mut field = ClassField::new();
    for (run_number, raw_time_ms) in rows {
        field.record(run_number, raw_time_ms);
    }
    Ok(field)
}

/// Whether an entity's dirty flag is set; `None` if it does not exist
pub async fn is_dirty<'e, E>(db: E, kind: EntityKind, id: i64) -> Result<Option<bool>>
where
    E: SqliteExecutor<'e>,
{
    let sql = match kind {
        EntityKind::Run => "SELECT recalc FROM runs WHERE run_id = ? AND deleted = 0",
        EntityKind::Entry => "SELECT recalc FROM entries WHERE entry_id = ? AND deleted = 0",
    };
    let flag: Option<bool> = sqlx::query_scalar(sql).bind(id).fetch_optional(db).await?;
    Ok(flag)
}

/// Set an entity's dirty flag; returns whether the row exists
pub async fn set_dirty<'e, E>(db: E, kind: EntityKind, id: i64) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let sql = match kind {
        EntityKind::Run => "UPDATE runs SET recalc = 1 WHERE run_id = ? AND deleted = 0",
        EntityKind::Entry => "UPDATE entries SET recalc = 1 WHERE entry_id = ? AND deleted = 0",
    };
    let result = sqlx::query(sql).bind(id).execute(db).await?;
    Ok(result.rows_affected() > 0)
}

/// Ids of every dirty row of one kind, oldest first
pub async fn dirty_ids<'e, E>(db: E, kind: EntityKind) -> Result<Vec<i64>>
where
    E: SqliteExecutor<'e>,
{
    let sql = match kind {
        EntityKind::Run => {
            "SELECT run_id FROM runs WHERE recalc != 0 AND deleted = 0 ORDER BY run_id"
        }
        EntityKind::Entry => {
            "SELECT entry_id FROM entries WHERE recalc != 0 AND deleted = 0 ORDER BY entry_id"
        }
    };
    Ok(sqlx::query_scalar(sql).fetch_all(db).await?)
}

/// Number of dirty rows of one kind
pub async fn dirty_count<'e, E>(db: E, kind: EntityKind) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let sql = match kind {
        EntityKind::Run => "SELECT COUNT(*) FROM runs WHERE recalc != 0 AND deleted = 0",
        EntityKind::Entry => "SELECT COUNT(*) FROM entries WHERE recalc != 0 AND deleted = 0",
    };
    Ok(sqlx::query_scalar(sql).fetch_one(db).await?)
}

/// Write a raw timing record for audit
pub async fn insert_time_record<'e, E>(
    db: E,
    event_id: i64,
    channel: &str,
    time_ms: i64,
    invalid: bool,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let result =
        sqlx::query("INSERT INTO times (event_id, channel, time_ms, invalid) VALUES (?, ?, ?, ?)")
            .bind(event_id)
            .bind(channel)
            .bind(time_ms)
            .bind(invalid)
            .execute(db)
            .await?;
    Ok(result.last_insert_rowid())
}
