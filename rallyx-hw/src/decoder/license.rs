//! AAMVA driver licence barcodes
//!
//! Layout after the leading `@`:
//!
//! ```text
//! \n \x1e \r | file type (5) | IIN (6) | version (2) | [jurisdiction version (2)] | entries (2)
//! entries x { subfile type (2) | offset (4) | length (4) }
//! entries x { subfile type (2) | element \n element \n ... \r }
//! ```
//!
//! Version 01 cards omit the jurisdiction version. Each element is a
//! three-letter id followed by its value (`DCSSMITH`).

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

const COMPLIANCE: &str = "@\n\x1e\r";
const SEGMENT_TERMINATOR: char = '\r';
const ELEMENT_SEPARATOR: char = '\n';
const DIRECTORY_ENTRY_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    #[error("not an AAMVA licence barcode")]
    NotLicense,

    #[error("malformed header field {0}")]
    Header(&'static str),

    #[error("truncated subfile directory")]
    Directory,
}

/// One subfile directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subfile {
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

/// Decoded licence, stored as JSON for the registration desk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct License {
    pub file_type: String,
    pub iin: String,
    pub version: u8,
    pub jurisdiction_version: Option<u8>,
    pub subfiles: Vec<Subfile>,
    /// Element id to value, across every subfile
    pub elements: BTreeMap<String, String>,
}

/// Take `len` bytes from the front of `rest`
fn take<'a>(rest: &mut &'a str, len: usize, field: &'static str) -> Result<&'a str, LicenseError> {
    let text: &'a str = *rest;
    let head = text.get(..len).ok_or(LicenseError::Header(field))?;
    *rest = &text[len..];
    Ok(head)
}

fn digits<T: std::str::FromStr>(text: &str, field: &'static str) -> Result<T, LicenseError> {
    if !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(LicenseError::Header(field));
    }
    text.parse().map_err(|_| LicenseError::Header(field))
}

/// Parse a licence payload
pub fn decode_license(data: &str) -> Result<License, LicenseError> {
    let mut rest = data.strip_prefix(COMPLIANCE).ok_or(LicenseError::NotLicense)?;

    let file_type = take(&mut rest, 5, "file type")?;
    if !file_type.chars().all(|c| c.is_ascii_alphabetic() || c == ' ') {
        return Err(LicenseError::Header("file type"));
    }
    let iin = take(&mut rest, 6, "IIN")?;
    digits::<u32>(iin, "IIN")?;
    let version: u8 = digits(take(&mut rest, 2, "version")?, "version")?;
    let jurisdiction_version = if version >= 2 {
        Some(digits(take(&mut rest, 2, "jurisdiction version")?, "jurisdiction version")?)
    } else {
        None
    };
    let entries: usize = digits(take(&mut rest, 2, "entries")?, "entries")?;

    let mut subfiles = Vec::with_capacity(entries);
    for _ in 0..entries {
        let entry = rest.get(..DIRECTORY_ENTRY_LEN).ok_or(LicenseError::Directory)?;
        rest = &rest[DIRECTORY_ENTRY_LEN..];
        let field = |range: std::ops::Range<usize>| entry.get(range).ok_or(LicenseError::Directory);
        subfiles.push(Subfile {
            kind: field(0..2)?.to_string(),
            offset: digits(field(2..6)?, "subfile offset")?,
            length: digits(field(6..10)?, "subfile length")?,
        });
    }

    // Subfiles follow the directory in order, each ending at a segment
    // terminator. Offsets are frequently wrong on real cards, so they are
    // reported but not trusted.
    let mut elements = BTreeMap::new();
    let mut segments = rest.split(SEGMENT_TERMINATOR);
    for _ in 0..entries {
        let Some(segment) = segments.next() else {
            break;
        };
        let body = segment.trim_start_matches(ELEMENT_SEPARATOR).get(2..).unwrap_or("");
        for element in body.split(ELEMENT_SEPARATOR) {
            if element.len() > 3 && element.is_char_boundary(3) {
                elements.insert(element[..3].to_string(), element[3..].trim_end().to_string());
            }
        }
    }

    Ok(License {
        file_type: file_type.to_string(),
        iin: iin.to_string(),
        version,
        jurisdiction_version,
        subfiles,
        elements,
    })
}
