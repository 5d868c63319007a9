//! Recalculation propagator
//!
//! Producers set an entity's dirty flag in the store and enqueue
//! `(kind, id)` on a [`RecalcHandle`]. A single [`RecalcWorker`] consumes the
//! queue: for each request it takes the write lock, re-reads the flag (duplicate
//! requests find it already clear), recomputes, clears the flag and commits.
//!
//! The queue is only a wake-up signal. The flag in the store is the source of
//! truth, so a lost message or a crashed worker just leaves the flag set and
//! the periodic sweep picks the entity up again. A failed recomputation is
//! logged and left dirty; it never stops the worker.

use crate::recalc::{self, RecalcOutcome};
use crate::store;
use rallyx_common::config::RulesConfig;
use rallyx_common::db::{EntityKind, ImmediateTx};
use rallyx_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Message understood by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcRequest {
    /// Recompute one entity (if still dirty)
    Entity(EntityKind, i64),
    /// Scan the store for every dirty entity
    Sweep,
}

/// Producer side of the recalculation queue
#[derive(Debug, Clone)]
pub struct RecalcHandle {
    tx: mpsc::UnboundedSender<RecalcRequest>,
}

impl RecalcHandle {
    /// A handle with no worker behind it.
    ///
    /// Requests are dropped; dirty flags still get written by the callers, so a
    /// later sweep (or an offline drain) processes them.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Queue one entity for recomputation
    pub fn request(&self, kind: EntityKind, id: i64) {
        self.send(RecalcRequest::Entity(kind, id));
    }

    /// Ask the worker to sweep every dirty entity
    pub fn wake(&self) {
        self.send(RecalcRequest::Sweep);
    }

    fn send(&self, request: RecalcRequest) {
        if self.tx.send(request).is_err() {
            debug!(?request, "Recalculation worker not running, flag left for sweep");
        }
    }
}

/// Set an entity's dirty flag and queue it for the worker
pub async fn mark_dirty(
    db: &SqlitePool,
    handle: &RecalcHandle,
    kind: EntityKind,
    id: i64,
) -> Result<()> {
    if !store::set_dirty(db, kind, id).await? {
        return Err(Error::NotFound(format!("{} {}", kind, id)));
    }
    handle.request(kind, id);
    Ok(())
}

/// Result of processing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Recomputed; lists the entities that became dirty as a result
    Recalculated(Vec<(EntityKind, i64)>),
    /// Flag already clear, nothing to do
    Clean,
    /// No such row
    Missing,
}

/// Recompute one entity under an immediate write transaction, if dirty
pub async fn process_entity(
    db: &SqlitePool,
    config: &RulesConfig,
    kind: EntityKind,
    id: i64,
) -> Result<ProcessOutcome> {
    let mut tx = ImmediateTx::begin(db).await?;
    let outcome = process_locked(&mut tx, config, kind, id).await;
    tx.finish(outcome).await
}

async fn process_locked(
    conn: &mut SqliteConnection,
    config: &RulesConfig,
    kind: EntityKind,
    id: i64,
) -> Result<ProcessOutcome> {
    match store::is_dirty(&mut *conn, kind, id).await? {
        None => Ok(ProcessOutcome::Missing),
        Some(false) => Ok(ProcessOutcome::Clean),
        Some(true) => match recalc::recalc_entity(conn, config, kind, id).await? {
            RecalcOutcome::Updated { dirtied } => Ok(ProcessOutcome::Recalculated(dirtied)),
            RecalcOutcome::Missing => Ok(ProcessOutcome::Missing),
        },
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub recalculated: usize,
    pub failed: usize,
}

/// Process every dirty run, then every dirty entry.
///
/// Entries dirtied by the run pass are picked up by the entry pass. Failures
/// are logged and counted; the failing entity keeps its flag.
pub async fn drain(db: &SqlitePool, config: &RulesConfig) -> Result<DrainStats> {
    let mut stats = DrainStats::default();

    for kind in [EntityKind::Run, EntityKind::Entry] {
        for id in store::dirty_ids(db, kind).await? {
            match process_entity(db, config, kind, id).await {
                Ok(ProcessOutcome::Recalculated(_)) => stats.recalculated += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(%kind, id, "Recalculation failed: {}", e);
                    stats.failed += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// Consumer side of the recalculation queue
pub struct RecalcWorker {
    db: SqlitePool,
    config: Arc<RulesConfig>,
    rx: mpsc::UnboundedReceiver<RecalcRequest>,
    sweep_interval: Duration,
}

/// Create a connected handle/worker pair
pub fn channel(
    db: SqlitePool,
    config: Arc<RulesConfig>,
    sweep_interval: Duration,
) -> (RecalcHandle, RecalcWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = RecalcWorker {
        db,
        config,
        rx,
        sweep_interval,
    };
    (RecalcHandle { tx }, worker)
}

impl RecalcWorker {
    /// Serve requests until cancelled or every handle is dropped.
    ///
    /// Sweeps once at startup and then every `sweep_interval`.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Recalculation worker started"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(RecalcRequest::Entity(kind, id)) => self.process_chain(kind, id).await,
                    Some(RecalcRequest::Sweep) => self.sweep().await,
                    None => break,
                },
                _ = sweep.tick() => self.sweep().await,
            }
        }

        info!("Recalculation worker stopped");
    }

    /// Process one entity and everything its recomputation dirtied
    async fn process_chain(&self, kind: EntityKind, id: i64) {
        let mut queue = VecDeque::from([(kind, id)]);
        while let Some((kind, id)) = queue.pop_front() {
            match process_entity(&self.db, &self.config, kind, id).await {
                Ok(ProcessOutcome::Recalculated(dirtied)) => queue.extend(dirtied),
                Ok(ProcessOutcome::Clean) => debug!(%kind, id, "Already clean"),
                Ok(ProcessOutcome::Missing) => {
                    warn!(%kind, id, "Recalculation requested for missing row")
                }
                Err(e) => error!(%kind, id, "Recalculation failed, left dirty: {}", e),
            }
        }
    }

    async fn sweep(&self) {
        match drain(&self.db, &self.config).await {
            Ok(stats) if stats.recalculated > 0 || stats.failed > 0 => {
                info!(
                    recalculated = stats.recalculated,
                    failed = stats.failed,
                    "Recalculation sweep finished"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Recalculation sweep failed: {}", e),
        }
    }
}
