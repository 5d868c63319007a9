//! RFID tag reader frames
//!
//! ```text
//! STX | 10 hex digits | 2 hex digits | ETX
//! 0x02| VV SS SS SS SS| CC           | 0x03
//! ```
//!
//! `VV` is the version/type byte and `SSSSSSSS` the serial number. `CC` is
//! the XOR of the five bytes spelled by the ten data digits.
//!
//! The reader's piezo hangs off its receive line: every byte of
//! `0b1100_1100` sent to it sounds for about a millisecond. Each good read is
//! acknowledged with a short beep.

use super::{FrameDecoder, FrameError};
use serde::Serialize;
use tracing::debug;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const FRAME_LEN: usize = 14;

const DATA_DIGITS: usize = 10;

/// Beep sent back after each decoded tag
pub const ACK_BEEP: &[u8] = &[0b1100_1100; 2];

/// One decoded tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TagRead {
    pub version: u8,
    pub serial: u32,
}

impl TagRead {
    /// All ten data digits as one number; this is the card number entries
    /// are registered under
    pub fn card_number(&self) -> u64 {
        (u64::from(self.version) << 32) | u64::from(self.serial)
    }
}

fn hex_value(digit: u8) -> Result<u8, FrameError> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        other => Err(FrameError::NotHex(other)),
    }
}

fn hex_byte(pair: &[u8]) -> Result<u8, FrameError> {
    Ok(hex_value(pair[0])? << 4 | hex_value(pair[1])?)
}

/// XOR of the five bytes spelled by ten hex digits
pub(crate) fn checksum(digits: &[u8]) -> Result<u8, FrameError> {
    digits
        .chunks(2)
        .try_fold(0u8, |acc, pair| Ok(acc ^ hex_byte(pair)?))
}

/// Build the wire frame for a tag; used to drive readers in tests
pub fn encode_frame(read: TagRead) -> [u8; FRAME_LEN] {
    let text = format!("{:02X}{:08X}", read.version, read.serial);
    let data = text.as_bytes();
    // Digits come from the formatter above and are always hex
    let check = format!("{:02X}", checksum(data).unwrap_or(0));

    let mut frame = [0u8; FRAME_LEN];
    frame[0] = STX;
    frame[1..11].copy_from_slice(data);
    frame[11..13].copy_from_slice(check.as_bytes());
    frame[13] = ETX;
    frame
}

fn parse_frame(frame: &[u8]) -> Result<TagRead, FrameError> {
    if frame.len() != FRAME_LEN || frame[0] != STX || frame[FRAME_LEN - 1] != ETX {
        return Err(FrameError::Delimiter);
    }
    let data = &frame[1..1 + DATA_DIGITS];
    let computed = checksum(data)?;
    let received = hex_byte(&frame[11..13])?;
    if computed != received {
        return Err(FrameError::Checksum { computed, received });
    }

    let version = hex_byte(&data[0..2])?;
    let serial = data[2..]
        .chunks(2)
        .try_fold(0u32, |acc, pair| Ok::<_, FrameError>(acc << 8 | u32::from(hex_byte(pair)?)))?;
    Ok(TagRead { version, serial })
}

/// Rolling 14-byte frame decoder
#[derive(Debug, Default)]
pub struct TagDecoder {
    buf: Vec<u8>,
}

impl TagDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_LEN),
        }
    }

    /// Drop leading bytes until the buffer starts at a frame start
    fn resync(&mut self) {
        match self.buf.iter().position(|&b| b == STX) {
            Some(start) => {
                self.buf.drain(..start);
            }
            None => self.buf.clear(),
        }
    }
}

impl FrameDecoder for TagDecoder {
    type Output = TagRead;

    fn push(&mut self, byte: u8) -> Option<TagRead> {
        if self.buf.is_empty() && byte != STX {
            return None;
        }
        self.buf.push(byte);
        if self.buf.len() < FRAME_LEN {
            return None;
        }

        match parse_frame(&self.buf) {
            Ok(read) => {
                self.buf.clear();
                Some(read)
            }
            Err(e) => {
                debug!("Tag frame discarded: {}", e);
                self.buf.remove(0);
                self.resync();
                None
            }
        }
    }

    fn reply(&self, _read: &TagRead) -> Option<&'static [u8]> {
        Some(ACK_BEEP)
    }

    fn reset(&mut self) {
        self.buf.clear();
    }
}
