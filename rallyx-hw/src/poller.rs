//! Device poller
//!
//! One poller per hardware channel. Each owns its link and decoder and runs a
//! small state machine:
//!
//! ```text
//!            open ok                      read fault
//! Closed ──────────────► Open ──────────────────────► Reconnecting
//!   ▲   (via Opening)     │ address changed               │
//!   │                     ▼                               │ open fails
//!   └──────────────── Closed ◄────────────────────────────┘
//! ```
//!
//! The desired address is re-read from the registry every address poll
//! interval. Link status (`Open`/`Closed`) is published to the registry on
//! transitions only, so a device that stays unplugged does not flood the log.
//! Closing for an address change is a transition too.
//! Decoded values go to the dispatcher over the shared event channel; any
//! reply the decoder asks for is written back to the device.

use crate::decoder::FrameDecoder;
use crate::dispatch::{EventSender, HardwareEvent};
use crate::link::{Link, LinkOpener, ReadOutcome};
use crate::watchdog::Liveness;
use rallyx_common::config::TimingConfig;
use rallyx_common::db::registry;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 256;

/// Poller link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// No link; waiting for an address or retrying the open
    Closed,
    /// Open in progress
    Opening,
    Open,
    /// Link failed; reopen on the next iteration
    Reconnecting,
}

/// Status value published to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Open,
    Closed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Open => "Open",
            LinkStatus::Closed => "Closed",
        }
    }
}

/// Loop timings for one poller
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub address_poll: Duration,
    pub read_timeout: Duration,
    pub idle_sleep: Duration,
    pub reopen_sleep: Duration,
}

impl From<&TimingConfig> for PollerSettings {
    fn from(config: &TimingConfig) -> Self {
        Self {
            address_poll: Duration::from_millis(config.address_poll_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            idle_sleep: Duration::from_millis(config.idle_sleep_ms),
            reopen_sleep: Duration::from_millis(config.reopen_sleep_ms),
        }
    }
}

pub struct Poller<D: FrameDecoder> {
    device: String,
    db: SqlitePool,
    opener: Arc<dyn LinkOpener>,
    decoder: D,
    events: EventSender,
    liveness: Liveness,
    settings: PollerSettings,

    state: PollerState,
    link: Option<Box<dyn Link>>,
    /// Address the open link was opened with
    open_address: Option<String>,
    /// Address the registry currently asks for
    desired_address: Option<String>,
    next_address_poll: Instant,
    published: Option<LinkStatus>,
    buf: Vec<u8>,
}

impl<D> Poller<D>
where
    D: FrameDecoder,
    D::Output: Into<HardwareEvent>,
{
    pub fn new(
        device: impl Into<String>,
        db: SqlitePool,
        opener: Arc<dyn LinkOpener>,
        decoder: D,
        events: EventSender,
        liveness: Liveness,
        settings: PollerSettings,
    ) -> Self {
        Self {
            device: device.into(),
            db,
            opener,
            decoder,
            events,
            liveness,
            settings,
            state: PollerState::Closed,
            link: None,
            open_address: None,
            desired_address: None,
            next_address_poll: Instant::now(),
            published: None,
            buf: vec![0u8; READ_CHUNK],
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// One loop iteration; returns how long to pause before the next
    pub async fn step(&mut self) -> Duration {
        self.liveness.beat(&self.device);

        if Instant::now() >= self.next_address_poll {
            self.refresh_address().await;
            self.next_address_poll = Instant::now() + self.settings.address_poll;
        }

        if self.state == PollerState::Open && self.open_address != self.desired_address {
            info!(
                device = %self.device,
                from = ?self.open_address,
                to = ?self.desired_address,
                "Address changed, closing link"
            );
            self.close();
            self.state = PollerState::Closed;
            self.publish(LinkStatus::Closed).await;
        }

        match self.state {
            PollerState::Open => self.read_once().await,
            PollerState::Closed | PollerState::Reconnecting | PollerState::Opening => {
                self.try_open().await
            }
        }
    }

    async fn refresh_address(&mut self) {
        let key = registry::device_address_key(&self.device);
        match registry::reg_get(&self.db, &key).await {
            Ok(address) => {
                self.desired_address = address.filter(|a| !a.trim().is_empty());
            }
            Err(e) => warn!(device = %self.device, "Address lookup failed: {}", e),
        }
    }

    async fn read_once(&mut self) -> Duration {
        let Some(link) = self.link.as_mut() else {
            self.state = PollerState::Reconnecting;
            return Duration::ZERO;
        };

        match link.read(&mut self.buf, self.settings.read_timeout).await {
            ReadOutcome::Data(n) => {
                let mut reply = Vec::new();
                for &byte in &self.buf[..n] {
                    if let Some(output) = self.decoder.push(byte) {
                        if let Some(bytes) = self.decoder.reply(&output) {
                            reply.extend_from_slice(bytes);
                        }
                        self.emit(output.into());
                    }
                }
                if !reply.is_empty() {
                    self.send_reply(&reply).await;
                }
                Duration::ZERO
            }
            ReadOutcome::Idle => {
                if let Some(output) = self.decoder.on_idle() {
                    self.emit(output.into());
                }
                self.settings.idle_sleep
            }
            ReadOutcome::Fault(e) => {
                warn!(device = %self.device, "Link fault: {}", e);
                self.fault().await;
                Duration::ZERO
            }
        }
    }

    async fn send_reply(&mut self, bytes: &[u8]) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if let Err(e) = link.write(bytes).await {
            warn!(device = %self.device, "Link write failed: {}", e);
            self.fault().await;
        }
    }

    async fn fault(&mut self) {
        self.close();
        self.state = PollerState::Reconnecting;
        self.publish(LinkStatus::Closed).await;
    }

    async fn try_open(&mut self) -> Duration {
        let Some(address) = self.desired_address.clone() else {
            self.state = PollerState::Closed;
            self.publish(LinkStatus::Closed).await;
            return self.settings.reopen_sleep;
        };

        self.state = PollerState::Opening;
        match self.opener.open(&address).await {
            Ok(link) => {
                info!(device = %self.device, address = %address, "Link opened");
                self.link = Some(link);
                self.open_address = Some(address);
                self.decoder.reset();
                self.state = PollerState::Open;
                self.publish(LinkStatus::Open).await;
                Duration::ZERO
            }
            Err(e) => {
                debug!(device = %self.device, address = %address, "Open failed: {}", e);
                self.state = PollerState::Closed;
                self.publish(LinkStatus::Closed).await;
                self.settings.reopen_sleep
            }
        }
    }

    fn close(&mut self) {
        self.link = None;
        self.open_address = None;
        self.decoder.reset();
    }

    fn emit(&self, event: HardwareEvent) {
        debug!(device = %self.device, ?event, "Decoded");
        if self.events.send(event).is_err() {
            warn!(device = %self.device, "Dispatcher gone, event dropped");
        }
    }

    /// Write the status key if it differs from the last one written
    async fn publish(&mut self, status: LinkStatus) {
        if self.published == Some(status) {
            return;
        }
        match status {
            LinkStatus::Open => info!(device = %self.device, "Status: Open"),
            LinkStatus::Closed => warn!(device = %self.device, "Status: Closed"),
        }
        let key = registry::device_status_key(&self.device);
        match registry::reg_set(&self.db, &key, Some(status.as_str())).await {
            Ok(()) => self.published = Some(status),
            // Left unset so the next transition retries the write
            Err(e) => warn!(device = %self.device, "Status write failed: {}", e),
        }
    }

    /// Poll until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(device = %self.device, "Poller started");
        loop {
            let pause = tokio::select! {
                _ = cancel.cancelled() => break,
                pause = self.step() => pause,
            };
            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        self.close();
        self.liveness.forget(&self.device);
        self.publish(LinkStatus::Closed).await;
        info!(device = %self.device, "Poller stopped");
    }
}
