//! Immediate write transactions
//!
//! `sqlx` begins SQLite transactions as `DEFERRED`, which upgrades to a write
//! lock on the first write and can fail with `SQLITE_BUSY` mid-transaction when
//! another process got there first. Recalculation and timing attribution take
//! the write lock up front with `BEGIN IMMEDIATE` instead, waiting out the
//! connection busy timeout.
//!
//! A transaction dropped without `commit`/`rollback` (its future was
//! cancelled) closes its connection instead of returning it to the pool.
//! SQLite rolls back on close, so the write lock is released and nothing
//! half-written is ever committed.

use crate::Result;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::ops::{Deref, DerefMut};
use tracing::warn;

/// A pooled connection holding an open `BEGIN IMMEDIATE` transaction
pub struct ImmediateTx {
    conn: PoolConnection<Sqlite>,
    /// Transaction still open on `conn`
    open: bool,
}

impl ImmediateTx {
    /// Acquire a connection and take the database write lock
    pub async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn, open: true })
    }

    pub async fn commit(mut self) -> Result<()> {
        if let Err(e) = sqlx::query("COMMIT").execute(&mut *self.conn).await {
            // A failed COMMIT leaves the transaction open
            self.rollback_quietly().await;
            return Err(e.into());
        }
        self.open = false;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.open = false;
        Ok(())
    }

    /// Commit on `Ok`, roll back on `Err`, passing the outcome through
    pub async fn finish<T>(mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback_quietly().await;
                Err(e)
            }
        }
    }

    async fn rollback_quietly(&mut self) {
        match sqlx::query("ROLLBACK").execute(&mut *self.conn).await {
            Ok(_) => self.open = false,
            Err(e) => warn!("Rollback failed: {}", e),
        }
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if self.open {
            warn!("Write transaction abandoned, closing its connection");
            self.conn.close_on_drop();
        }
    }
}

impl Deref for ImmediateTx {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ImmediateTx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
