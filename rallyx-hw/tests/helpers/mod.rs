//! Test helpers for rallyx-hw integration tests
//!
//! - `TestDb`: temporary scoring database
//! - `ScriptedOpener` / scripted links: in-memory devices
//! - Seeding of events and entries

#![allow(dead_code)]

use async_trait::async_trait;
use rallyx_common::config::RulesConfig;
use rallyx_common::db::{init_database, registry};
use rallyx_hw::link::{Link, LinkOpener, ReadOutcome};
use rallyx_sc::propagator::RecalcHandle;
use rallyx_sc::{LogAnnunciator, ScoringContext};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Temporary database kept alive for the test's duration
pub struct TestDb {
    _dir: TempDir,
    pub pool: SqlitePool,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&dir.path().join("scoring.db"))
            .await
            .expect("Failed to initialize database");
        Self { _dir: dir, pool }
    }
}

/// Context with no running worker
pub fn context(pool: &SqlitePool) -> ScoringContext {
    ScoringContext::new(
        pool.clone(),
        Arc::new(RulesConfig::default()),
        RecalcHandle::detached(),
        Arc::new(LogAnnunciator),
    )
}

/// Insert an event and make it the active one
pub async fn seed_event(pool: &SqlitePool) -> i64 {
    let event_id = sqlx::query("INSERT INTO events (name, max_runs) VALUES ('Test Event', 5)")
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid();
    registry::reg_set_value(pool, registry::ACTIVE_EVENT_ID, &event_id)
        .await
        .unwrap();
    event_id
}

pub async fn seed_entry(pool: &SqlitePool, event_id: i64, card_number: Option<i64>) -> i64 {
    sqlx::query("INSERT INTO entries (event_id, car_class, card_number) VALUES (?, 'SA', ?)")
        .bind(event_id)
        .bind(card_number)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn reg(pool: &SqlitePool, key: &str) -> Option<String> {
    registry::reg_get(pool, key).await.unwrap()
}

/// One scripted read result
#[derive(Debug, Clone)]
pub enum Step {
    Data(Vec<u8>),
    Idle,
    Fault,
}

/// Link that plays back a script, then reports idle forever
pub struct ScriptedLink {
    script: VecDeque<Step>,
    written: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl Link for ScriptedLink {
    async fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> ReadOutcome {
        match self.script.pop_front() {
            Some(Step::Data(bytes)) => {
                assert!(bytes.len() <= buf.len(), "scripted chunk larger than read buffer");
                buf[..bytes.len()].copy_from_slice(&bytes);
                ReadOutcome::Data(bytes.len())
            }
            Some(Step::Fault) => {
                ReadOutcome::Fault(io::Error::new(io::ErrorKind::BrokenPipe, "scripted fault"))
            }
            Some(Step::Idle) | None => ReadOutcome::Idle,
        }
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }
}

/// Opens scripted links; addresses marked unavailable fail to open
#[derive(Default)]
pub struct ScriptedOpener {
    scripts: Mutex<HashMap<String, VecDeque<Vec<Step>>>>,
    unavailable: Mutex<HashSet<String>>,
    opened: Mutex<Vec<String>>,
    /// Bytes written to any link, in order
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script for the next open of `address`
    pub fn script(&self, address: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push_back(steps);
    }

    pub fn set_available(&self, address: &str, available: bool) {
        let mut unavailable = self.unavailable.lock().unwrap();
        if available {
            unavailable.remove(address);
        } else {
            unavailable.insert(address.to_string());
        }
    }

    /// Addresses successfully opened, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl LinkOpener for ScriptedOpener {
    async fn open(&self, address: &str) -> io::Result<Box<dyn Link>> {
        if self.unavailable.lock().unwrap().contains(address) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(address)
            .and_then(|scripts| scripts.pop_front())
            .unwrap_or_default();
        self.opened.lock().unwrap().push(address.to_string());
        Ok(Box::new(ScriptedLink {
            script: script.into(),
            written: self.written.clone(),
        }))
    }
}
