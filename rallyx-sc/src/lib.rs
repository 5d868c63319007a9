//! # RallyX Scoring Core (rallyx-sc)
//!
//! Turns timing events into scored runs and aggregated entry results:
//! - Run state machine attributing start/finish/split events to runs
//! - Pluggable scoring rule sets selected per event
//! - Dirty-flag recalculation propagator with a single background worker
//! - Next-entrant selection, operator overrides and standings

use rallyx_common::config::RulesConfig;
use sqlx::SqlitePool;
use std::sync::Arc;

pub mod announce;
pub mod entrants;
pub mod overrides;
pub mod propagator;
pub mod recalc;
pub mod rules;
pub mod standings;
pub mod store;
pub mod timing;

pub use announce::{Annunciator, Cue, LogAnnunciator, SoundAnnunciator};
pub use propagator::{RecalcHandle, RecalcWorker};
pub use timing::{record_timing_event, TimingOutcome};

/// Handles every scoring operation needs
#[derive(Clone)]
pub struct ScoringContext {
    pub db: SqlitePool,
    pub rules: Arc<RulesConfig>,
    pub recalc: RecalcHandle,
    pub annunciator: Arc<dyn Annunciator>,
}

impl ScoringContext {
    pub fn new(
        db: SqlitePool,
        rules: Arc<RulesConfig>,
        recalc: RecalcHandle,
        annunciator: Arc<dyn Annunciator>,
    ) -> Self {
        Self {
            db,
            rules,
            recalc,
            annunciator,
        }
    }
}
