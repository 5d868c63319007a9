//! Poller watchdog
//!
//! Pollers report in on every loop iteration. The watchdog writes the
//! heartbeat registry key only while every expected poller has reported
//! recently; collaborators treat a stale heartbeat as "hardware proxy down".
//! A timeout is logged once per unhealthy episode.

use rallyx_common::db::registry;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Last report time of each running poller
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    beats: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    fn beats(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        // A panicking poller cannot leave the map half-updated
        self.beats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn beat(&self, name: &str) {
        self.beats().insert(name.to_string(), Instant::now());
    }

    /// Poller stopped; it no longer counts as alive
    pub fn forget(&self, name: &str) {
        self.beats().remove(name);
    }

    /// Names that reported within `window` of `now`
    pub fn alive_at(&self, now: Instant, window: Duration) -> BTreeSet<String> {
        self.beats()
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) <= window)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn alive(&self, window: Duration) -> BTreeSet<String> {
        self.alive_at(Instant::now(), window)
    }
}

/// Result of one watchdog check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogCheck {
    /// Everyone alive; `recovered` on the first healthy check after a timeout
    Healthy { recovered: bool },
    /// First check of an unhealthy episode
    TimedOut { missing: Vec<String> },
    /// Still unhealthy, already reported
    StillDown,
}

/// Edge detection over successive health checks
#[derive(Debug)]
pub struct HealthTracker {
    expected: Vec<String>,
    healthy: bool,
}

impl HealthTracker {
    pub fn new(expected: Vec<String>) -> Self {
        Self {
            expected,
            healthy: true,
        }
    }

    pub fn check(&mut self, alive: &BTreeSet<String>) -> WatchdogCheck {
        let missing: Vec<String> = self
            .expected
            .iter()
            .filter(|name| !alive.contains(*name))
            .cloned()
            .collect();

        let was_healthy = self.healthy;
        self.healthy = missing.is_empty();
        match (was_healthy, self.healthy) {
            (_, true) => WatchdogCheck::Healthy {
                recovered: !was_healthy,
            },
            (true, false) => WatchdogCheck::TimedOut { missing },
            (false, false) => WatchdogCheck::StillDown,
        }
    }
}

pub struct Watchdog {
    db: SqlitePool,
    liveness: Liveness,
    tracker: HealthTracker,
    interval: Duration,
    liveness_timeout: Duration,
}

impl Watchdog {
    pub fn new(
        db: SqlitePool,
        liveness: Liveness,
        expected: Vec<String>,
        interval: Duration,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            db,
            liveness,
            tracker: HealthTracker::new(expected),
            interval,
            liveness_timeout,
        }
    }

    /// Check once, writing the heartbeat when healthy
    pub async fn tick(&mut self) -> WatchdogCheck {
        let alive = self.liveness.alive(self.liveness_timeout);
        let check = self.tracker.check(&alive);

        match &check {
            WatchdogCheck::Healthy { recovered } => {
                if *recovered {
                    info!("Watchdog: all pollers alive again");
                }
                let now = chrono::Utc::now().timestamp();
                let written =
                    registry::reg_set_value(&self.db, registry::HARDWARE_WATCHDOG, &now).await;
                if let Err(e) = written {
                    warn!("Watchdog heartbeat write failed: {}", e);
                }
            }
            WatchdogCheck::TimedOut { missing } => {
                error!(missing = ?missing, "WATCHDOG TIMEOUT");
            }
            WatchdogCheck::StillDown => {}
        }
        check
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("Watchdog stopped");
    }
}
