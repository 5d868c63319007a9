//! Database initialization
//!
//! Opens (or creates) the scoring database, creates the schema on first run
//! and refuses to start against a database stamped with a different schema
//! version.

use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Schema version this build reads and writes.
///
/// A database stamped with anything else is rejected at startup.
pub const SCHEMA_VERSION: i64 = 4;

/// Busy timeout tolerating cross-process writers holding the write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry keys created on first run
const DEFAULT_REGISTRY: &[(&str, Option<&str>)] = &[
    ("active_event_id", None),
    ("next_entry_id", None),
    ("next_entry_msg", None),
    ("race_session", None),
    ("disable_start", Some("0")),
    ("disable_finish", Some("0")),
    ("hardware_watchdog", Some("0")),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    match stored_schema_version(&pool).await? {
        None => {
            create_schema(&pool).await?;
            info!("Created schema v{}", SCHEMA_VERSION);
        }
        Some(found) if found == SCHEMA_VERSION => {
            info!("Database schema is v{}", found);
        }
        Some(found) => {
            pool.close().await;
            return Err(Error::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            });
        }
    }

    init_default_registry(&pool).await?;

    Ok(pool)
}

/// Get the stamped schema version, `None` for a database with no schema yet
pub async fn stored_schema_version(pool: &SqlitePool) -> Result<Option<i64>> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(None);
    }

    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version)
}

/// Create every table and stamp the version, all in one transaction
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Ensure default registry keys exist without overwriting current values
async fn init_default_registry(pool: &SqlitePool) -> Result<()> {
    for (key, value) in DEFAULT_REGISTRY {
        sqlx::query("INSERT OR IGNORE INTO registry (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS registry (
        key TEXT PRIMARY KEY,
        value TEXT,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        event_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        event_date TEXT,
        max_runs INTEGER NOT NULL DEFAULT 5 CHECK (max_runs > 0),
        min_runs INTEGER NOT NULL DEFAULT 0 CHECK (min_runs >= 0),
        drop_runs INTEGER NOT NULL DEFAULT 0 CHECK (drop_runs >= 0),
        rule_set TEXT NOT NULL DEFAULT 'default',
        deleted INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS drivers (
        driver_id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT,
        last_name TEXT,
        deleted INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(event_id),
        driver_id INTEGER REFERENCES drivers(driver_id),
        car_class TEXT NOT NULL,
        car_number INTEGER,
        card_number INTEGER,
        race_session TEXT,
        event_time_ms INTEGER,
        event_time TEXT,
        event_penalties TEXT,
        event_runs INTEGER NOT NULL DEFAULT 0,
        recalc INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entries_event ON entries(event_id)",
    "CREATE INDEX IF NOT EXISTS idx_entries_card ON entries(event_id, card_number)",
    "CREATE INDEX IF NOT EXISTS idx_entries_recalc ON entries(recalc) WHERE recalc != 0",
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        run_id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(event_id),
        entry_id INTEGER REFERENCES entries(entry_id),
        start_time_ms INTEGER,
        finish_time_ms INTEGER,
        split_1_time_ms INTEGER,
        split_2_time_ms INTEGER,
        cones INTEGER NOT NULL DEFAULT 0 CHECK (cones >= 0),
        gates INTEGER NOT NULL DEFAULT 0 CHECK (gates >= 0),
        state TEXT NOT NULL DEFAULT 'started'
            CHECK (state IN ('started', 'finished', 'scored', 'tossout')),
        raw_time_ms INTEGER,
        total_time_ms INTEGER,
        raw_time TEXT,
        total_time TEXT,
        run_number INTEGER,
        drop_run INTEGER NOT NULL DEFAULT 0,
        drop_reason TEXT CHECK (drop_reason IS NULL OR drop_reason IN ('overflow', 'worst')),
        recalc INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        deleted INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_event_state ON runs(event_id, state)",
    "CREATE INDEX IF NOT EXISTS idx_runs_entry ON runs(entry_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_recalc ON runs(recalc) WHERE recalc != 0",
    r#"
    CREATE TABLE IF NOT EXISTS penalties (
        penalty_id INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id INTEGER NOT NULL REFERENCES entries(entry_id),
        time_ms INTEGER NOT NULL,
        penalty_note TEXT,
        deleted INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_penalties_entry ON penalties(entry_id)",
    r#"
    CREATE TABLE IF NOT EXISTS times (
        time_id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(event_id),
        channel TEXT NOT NULL,
        time_ms INTEGER NOT NULL,
        invalid INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_times_event ON times(event_id)",
];
