//! Barcode scanner frames
//!
//! The scanner prefixes every scan with `0xFF` and a symbology byte. In NUL
//! framing the payload ends at a `0x00`; in idle framing the scan is whatever
//! arrived before a read timed out. Both produce the same [`BarcodeScan`].

use super::{FrameDecoder, FrameError};
use serde::Serialize;
use tracing::debug;

/// Scan prefix byte
pub const PREFIX: u8 = 0xFF;
/// Payload terminator in NUL framing
pub const TERMINATOR: u8 = 0x00;

/// Longest payload kept; anything longer is discarded as line noise
const MAX_PAYLOAD: usize = 4096;

/// Symbology reported by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeKind {
    Pdf417,
    DataMatrix,
    Qr,
    Other(u8),
}

impl From<u8> for BarcodeKind {
    fn from(code: u8) -> Self {
        match code {
            b'r' => BarcodeKind::Pdf417,
            b'w' => BarcodeKind::DataMatrix,
            b's' => BarcodeKind::Qr,
            other => BarcodeKind::Other(other),
        }
    }
}

/// One complete scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarcodeScan {
    pub kind: BarcodeKind,
    pub payload: Vec<u8>,
}

impl BarcodeScan {
    /// Payload as text, with undecodable bytes replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// How a scan's end is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarcodeFraming {
    #[default]
    Nul,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitPrefix,
    AwaitKind,
    Payload(BarcodeKind),
}

#[derive(Debug)]
pub struct BarcodeDecoder {
    framing: BarcodeFraming,
    phase: Phase,
    buf: Vec<u8>,
}

impl BarcodeDecoder {
    pub fn new(framing: BarcodeFraming) -> Self {
        Self {
            framing,
            phase: Phase::AwaitPrefix,
            buf: Vec::new(),
        }
    }

    pub fn framing(&self) -> BarcodeFraming {
        self.framing
    }

    fn push_nul(&mut self, byte: u8) -> Option<BarcodeScan> {
        match self.phase {
            Phase::AwaitPrefix => {
                if byte == PREFIX {
                    self.phase = Phase::AwaitKind;
                }
                None
            }
            Phase::AwaitKind => {
                self.phase = Phase::Payload(BarcodeKind::from(byte));
                None
            }
            Phase::Payload(kind) if byte == TERMINATOR => {
                self.phase = Phase::AwaitPrefix;
                Some(BarcodeScan {
                    kind,
                    payload: std::mem::take(&mut self.buf),
                })
            }
            Phase::Payload(_) => {
                self.buf.push(byte);
                if self.buf.len() > MAX_PAYLOAD {
                    debug!("Barcode scan discarded: {}", FrameError::Overlong(MAX_PAYLOAD));
                    self.reset();
                }
                None
            }
        }
    }

    fn push_idle(&mut self, byte: u8) -> Option<BarcodeScan> {
        self.buf.push(byte);
        if self.buf.len() > MAX_PAYLOAD + 2 {
            debug!("Barcode scan discarded: {}", FrameError::Overlong(MAX_PAYLOAD));
            self.buf.clear();
        }
        None
    }
}

/// Split an idle-framed burst into symbology and payload
fn parse_burst(burst: &[u8]) -> Result<BarcodeScan, FrameError> {
    let start = burst
        .iter()
        .position(|&b| b == PREFIX)
        .ok_or(FrameError::Delimiter)?;
    let frame = &burst[start..];
    if frame.len() < 2 {
        return Err(FrameError::Short(frame.len()));
    }

    let mut payload = &frame[2..];
    if let Some(end) = payload.iter().position(|&b| b == TERMINATOR) {
        payload = &payload[..end];
    }
    Ok(BarcodeScan {
        kind: BarcodeKind::from(frame[1]),
        payload: payload.to_vec(),
    })
}

impl FrameDecoder for BarcodeDecoder {
    type Output = BarcodeScan;

    fn push(&mut self, byte: u8) -> Option<BarcodeScan> {
        match self.framing {
            BarcodeFraming::Nul => self.push_nul(byte),
            BarcodeFraming::Idle => self.push_idle(byte),
        }
    }

    fn on_idle(&mut self) -> Option<BarcodeScan> {
        if self.framing != BarcodeFraming::Idle || self.buf.is_empty() {
            return None;
        }
        let burst = std::mem::take(&mut self.buf);
        match parse_burst(&burst) {
            Ok(scan) => Some(scan),
            Err(e) => {
                debug!("Barcode burst discarded: {}", e);
                None
            }
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::AwaitPrefix;
        self.buf.clear();
    }
}
