//! Hardware event dispatcher
//!
//! Single consumer of everything the pollers decode. Timing events go to the
//! run state machine; tag reads and barcodes are card scans that pick the next
//! entrant, except licence barcodes which are only stored for the
//! registration desk.

use crate::decoder::{decode_license, BarcodeScan, TagRead};
use rallyx_common::db::registry;
use rallyx_common::{Result, TimingEvent};
use rallyx_sc::{entrants, record_timing_event, ScoringContext, TimingOutcome};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Something a device produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    Timing(TimingEvent),
    Tag(TagRead),
    Barcode(BarcodeScan),
}

impl From<TimingEvent> for HardwareEvent {
    fn from(event: TimingEvent) -> Self {
        HardwareEvent::Timing(event)
    }
}

impl From<TagRead> for HardwareEvent {
    fn from(read: TagRead) -> Self {
        HardwareEvent::Tag(read)
    }
}

impl From<BarcodeScan> for HardwareEvent {
    fn from(scan: BarcodeScan) -> Self {
        HardwareEvent::Barcode(scan)
    }
}

pub type EventSender = mpsc::UnboundedSender<HardwareEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<HardwareEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// What the dispatcher did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Timing(TimingOutcome),
    /// Card scan; the entry it selected, if any
    Scan(Option<i64>),
    /// Same tag held against the reader
    RepeatedTag,
    LicenseStored,
    LicenseRejected,
}

/// Suppresses a tag that is read again within a short window
#[derive(Debug)]
pub struct RepeatFilter {
    window: Duration,
    last: Option<(u64, Instant)>,
}

impl RepeatFilter {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True when `value` should be acted on
    pub fn admit(&mut self, value: u64, now: Instant) -> bool {
        if let Some((last_value, at)) = self.last {
            if last_value == value && now.saturating_duration_since(at) < self.window {
                return false;
            }
        }
        self.last = Some((value, now));
        true
    }
}

pub struct Dispatcher {
    ctx: ScoringContext,
    repeats: RepeatFilter,
}

impl Dispatcher {
    pub fn new(ctx: ScoringContext, tag_repeat_window: Duration) -> Self {
        Self {
            ctx,
            repeats: RepeatFilter::new(tag_repeat_window),
        }
    }

    pub async fn handle(&mut self, event: HardwareEvent) -> Result<Dispatched> {
        match event {
            HardwareEvent::Timing(event) => {
                let outcome = record_timing_event(&self.ctx, &event).await?;
                Ok(Dispatched::Timing(outcome))
            }
            HardwareEvent::Tag(read) => self.handle_tag(read).await,
            HardwareEvent::Barcode(scan) => self.handle_barcode(scan).await,
        }
    }

    async fn handle_tag(&mut self, read: TagRead) -> Result<Dispatched> {
        let card = read.card_number();
        if !self.repeats.admit(card, Instant::now()) {
            debug!(card, "Repeated tag ignored");
            return Ok(Dispatched::RepeatedTag);
        }
        info!(card, version = read.version, serial = read.serial, "Tag read");

        let card = card.to_string();
        registry::reg_set(&self.ctx.db, registry::RFID_DATA, Some(&card)).await?;
        let selected = entrants::handle_card_scan(&self.ctx, &card).await?;
        Ok(Dispatched::Scan(selected))
    }

    async fn handle_barcode(&mut self, scan: BarcodeScan) -> Result<Dispatched> {
        let text = scan.text();
        debug!(kind = ?scan.kind, len = scan.payload.len(), "Barcode scan");

        if text.starts_with('@') {
            return match decode_license(&text) {
                Ok(license) => {
                    let json = serde_json::to_string(&license)
                        .map_err(|e| rallyx_common::Error::Internal(e.to_string()))?;
                    registry::reg_set(&self.ctx.db, registry::LICENSE_DATA, Some(&json)).await?;
                    info!(iin = %license.iin, elements = license.elements.len(), "Licence scanned");
                    Ok(Dispatched::LicenseStored)
                }
                Err(e) => {
                    warn!("Licence barcode rejected: {}", e);
                    Ok(Dispatched::LicenseRejected)
                }
            };
        }

        let data = text.trim();
        info!(barcode = %data, "Barcode read");
        registry::reg_set(&self.ctx.db, registry::BARCODE_DATA, Some(data)).await?;
        let selected = entrants::handle_card_scan(&self.ctx, data).await?;
        Ok(Dispatched::Scan(selected))
    }

    /// Consume events until cancelled or every poller has gone
    pub async fn run(mut self, mut events: EventReceiver, cancel: CancellationToken) {
        info!("Hardware dispatcher started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let Err(e) = self.handle(event).await {
                error!("Hardware event not processed: {}", e);
            }
        }
        info!("Hardware dispatcher stopped");
    }
}
