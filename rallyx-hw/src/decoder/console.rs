//! Timing console lines
//!
//! Each time is a 30-byte record terminated by `\r`:
//!
//! ```text
//! 0         1         2
//! 0123456789012345678901234567890
//! T 0012      M1 14:05:07.25300
//! ```
//!
//! Bytes 12..14 hold the channel, 15..17 hours, 18..20 minutes and 21.. the
//! seconds with fraction. Blank or unreadable time fields count as zero.

use super::{FrameDecoder, FrameError};
use rallyx_common::events::TimingSource;
use rallyx_common::{Channel, TimingEvent};
use tracing::debug;

pub const RECORD_LEN: usize = 30;
const TERMINATOR: u8 = b'\r';
const RECORD_TAG: &[u8] = b"T ";

/// Longest line buffered while waiting for a terminator
const MAX_LINE: usize = 128;

/// Integer field; blank or garbage reads as zero
fn int_field(field: &str) -> i64 {
    field.trim().parse().unwrap_or(0)
}

/// `SS.fffff` to milliseconds, truncating below a millisecond
fn seconds_field_ms(field: &str) -> i64 {
    let field = field.trim();
    let (whole, fraction) = field.split_once('.').unwrap_or((field, ""));
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return 0;
    }
    let Ok(whole) = (if whole.is_empty() { Ok(0) } else { whole.parse::<i64>() }) else {
        return 0;
    };
    let millis: String = fraction.chars().chain("000".chars()).take(3).collect();
    whole * 1000 + millis.parse::<i64>().unwrap_or(0)
}

/// Parse one complete record (without its terminator)
fn parse_record(line: &[u8]) -> Result<TimingEvent, FrameError> {
    if line.len() != RECORD_LEN || !line.starts_with(RECORD_TAG) {
        return Err(FrameError::Layout(line.len()));
    }
    let line = std::str::from_utf8(line).map_err(|_| FrameError::Layout(line.len()))?;
    let field = |range: std::ops::Range<usize>| line.get(range).unwrap_or("");

    let channel = Channel::from_label(field(12..14));
    let hours = int_field(field(15..17));
    let minutes = int_field(field(18..20));
    let seconds_ms = seconds_field_ms(field(21..RECORD_LEN));

    let time_ms = hours * 3_600_000 + minutes * 60_000 + seconds_ms;
    Ok(TimingEvent::new(channel, time_ms, TimingSource::Console))
}

/// Line decoder for the timing console
#[derive(Debug, Default)]
pub struct ConsoleDecoder {
    line: Vec<u8>,
}

impl ConsoleDecoder {
    pub fn new() -> Self {
        Self {
            line: Vec::with_capacity(RECORD_LEN),
        }
    }
}

impl FrameDecoder for ConsoleDecoder {
    type Output = TimingEvent;

    fn push(&mut self, byte: u8) -> Option<TimingEvent> {
        match byte {
            TERMINATOR => {
                let line = std::mem::take(&mut self.line);
                match parse_record(&line) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        let line = String::from_utf8_lossy(&line);
                        debug!(line = %line, "Console line discarded: {}", e);
                        None
                    }
                }
            }
            // Some consoles send CR LF
            b'\n' => None,
            _ => {
                self.line.push(byte);
                if self.line.len() > MAX_LINE {
                    debug!("Console line discarded: {}", FrameError::Overlong(MAX_LINE));
                    self.line.clear();
                }
                None
            }
        }
    }

    fn reset(&mut self) {
        self.line.clear();
    }
}
