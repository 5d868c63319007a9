//! Wire protocol decoders
//!
//! Each decoder owns the rolling buffer of one channel and is fed one byte at
//! a time. Decoders do no I/O. Malformed input is logged at debug level and
//! dropped; the decoder resynchronises on later bytes and never waits forever
//! on bad data.

pub mod barcode;
pub mod console;
pub mod license;
pub mod tag;

pub use barcode::{BarcodeDecoder, BarcodeFraming, BarcodeKind, BarcodeScan};
pub use console::ConsoleDecoder;
pub use license::{decode_license, License, LicenseError};
pub use tag::{TagDecoder, TagRead};

use thiserror::Error;

/// Byte-at-a-time frame decoder for one hardware channel
pub trait FrameDecoder: Send {
    type Output: Send;

    /// Feed one byte; returns a decoded value when it completes a frame
    fn push(&mut self, byte: u8) -> Option<Self::Output>;

    /// A read timed out with no data
    fn on_idle(&mut self) -> Option<Self::Output> {
        None
    }

    /// Bytes to send back to the device once `output` was decoded
    fn reply(&self, _output: &Self::Output) -> Option<&'static [u8]> {
        None
    }

    /// Drop any partial frame (link closed)
    fn reset(&mut self);
}

/// Why a candidate frame was discarded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum FrameError {
    #[error("bad frame delimiter")]
    Delimiter,

    #[error("non-hex digit {0:#04x}")]
    NotHex(u8),

    #[error("checksum mismatch: computed {computed:02X}, frame says {received:02X}")]
    Checksum { computed: u8, received: u8 },

    #[error("unexpected record layout ({0} bytes)")]
    Layout(usize),

    #[error("frame longer than {0} bytes")]
    Overlong(usize),

    #[error("frame too short ({0} bytes)")]
    Short(usize),
}
