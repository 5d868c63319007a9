//! Offline recalculation tool
//!
//! **Usage:**
//! ```bash
//! rallyx-recalc [--config <file>] [--database <file>] recalc [--event <id>]
//! rallyx-recalc finalize [--event <id>]
//! rallyx-recalc status [--event <id>] [--json]
//! ```
//!
//! Works directly against the scoring database and may run while the hardware
//! service is up; both sides serialise through immediate write transactions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rallyx_common::config::load_config;
use rallyx_common::db::{init_database, registry, EntityKind};
use rallyx_sc::propagator::{self, RecalcHandle};
use rallyx_sc::{overrides, standings, store, LogAnnunciator, ScoringContext};
use sqlx::SqlitePool;
use tracing::info;

/// Recalculate, finalize or inspect event scoring
#[derive(Parser, Debug)]
#[command(name = "rallyx-recalc")]
#[command(about = "Recalculate and inspect RallyX event scoring")]
#[command(version)]
struct Args {
    /// Bootstrap configuration file
    #[arg(short, long, env = "RALLYX_CONFIG")]
    config: Option<PathBuf>,

    /// Scoring database (overrides the configured path)
    #[arg(short, long, env = "RALLYX_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mark every run and entry of an event dirty and recompute them
    Recalc {
        /// Event id (defaults to the active event)
        #[arg(long)]
        event: Option<i64>,
    },
    /// Add DNS runs for missing runs, then recompute the event
    Finalize {
        #[arg(long)]
        event: Option<i64>,
    },
    /// Show pending recalculation work and current standings
    Status {
        #[arg(long)]
        event: Option<i64>,

        /// Print standings as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let db_path = args.database.unwrap_or_else(|| config.database_path.clone());
    info!("Database path: {}", db_path.display());
    let db = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let ctx = ScoringContext::new(
        db.clone(),
        Arc::new(config.rules.clone()),
        RecalcHandle::detached(),
        Arc::new(LogAnnunciator),
    );

    match args.command {
        Command::Recalc { event } => {
            let event_id = resolve_event(&db, event).await?;
            let marked = overrides::mark_event_dirty(&ctx, event_id).await?;
            let stats = propagator::drain(&db, &ctx.rules).await?;
            println!(
                "Event {}: marked {} runs / {} entries, recalculated {}, failed {}",
                event_id, marked.runs, marked.entries, stats.recalculated, stats.failed
            );
        }
        Command::Finalize { event } => {
            let event_id = resolve_event(&db, event).await?;
            let inserted = overrides::finalize_event(&ctx, event_id).await?;
            let stats = propagator::drain(&db, &ctx.rules).await?;
            println!(
                "Event {}: added {} DNS runs, recalculated {}, failed {}",
                event_id, inserted, stats.recalculated, stats.failed
            );
        }
        Command::Status { event, json } => {
            let event_id = resolve_event(&db, event).await?;
            print_status(&db, event_id, json).await?;
        }
    }

    db.close().await;
    Ok(())
}

async fn resolve_event(db: &SqlitePool, event: Option<i64>) -> Result<i64> {
    match event {
        Some(event_id) => Ok(event_id),
        None => registry::reg_get_i64(db, registry::ACTIVE_EVENT_ID)
            .await?
            .ok_or_else(|| anyhow!("No --event given and no active event set")),
    }
}

async fn print_status(db: &SqlitePool, event_id: i64, json: bool) -> Result<()> {
    let event = store::require_event(db, event_id).await?;
    let ranked = standings::event_standings(db, event_id, None).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    let dirty_runs = store::dirty_count(db, EntityKind::Run).await?;
    let dirty_entries = store::dirty_count(db, EntityKind::Entry).await?;

    println!("Event {} ({}), rule set {}", event.event_id, event.name, event.rule_set);
    println!(
        "Runs: max {}, min {}, drop {}",
        event.max_runs, event.min_runs, event.drop_runs
    );
    println!("Pending recalculation: {} runs, {} entries", dirty_runs, dirty_entries);
    println!();
    println!("{:>4}  {:<5} {:>6}  {:>4}  {:>12}", "Pos", "Class", "Car", "Runs", "Time");
    for s in ranked {
        println!(
            "{:>4}  {:<5} {:>6}  {:>4}  {:>12}",
            s.position,
            s.car_class,
            s.car_number.map(|n| n.to_string()).unwrap_or_default(),
            s.event_runs,
            s.event_time.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
