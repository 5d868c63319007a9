//! Run and event time formatting
//!
//! Provides the clock-style strings shown on timing sheets and the scoreboard,
//! and the inverse parser used for operator-entered corrections.

use crate::{Error, Result};
use std::cmp::Ordering;

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

/// Format milliseconds as a clock string.
///
/// Format selection by magnitude:
/// - under a minute: `S.mmm`
/// - under an hour: `M:SS.mmm`
/// - otherwise: `H:MM:SS.mmm`
///
/// Negative durations render as `NEG` (they only arise from bad edits).
///
/// # Examples
///
/// ```
/// use rallyx_common::time::format_time;
///
/// assert_eq!(format_time(7000), "7.000");
/// assert_eq!(format_time(65_432), "1:05.432");
/// assert_eq!(format_time(3_723_004), "1:02:03.004");
/// ```
pub fn format_time(time_ms: i64) -> String {
    if time_ms < 0 {
        return "NEG".to_string();
    }

    let ms = time_ms % MS_PER_SECOND;
    let s = (time_ms / MS_PER_SECOND) % 60;
    let m = (time_ms / MS_PER_MINUTE) % 60;
    let h = time_ms / MS_PER_HOUR;

    if h > 0 {
        format!("{}:{:02}:{:02}.{:03}", h, m, s, ms)
    } else if m > 0 {
        format!("{}:{:02}.{:03}", m, s, ms)
    } else {
        format!("{}.{:03}", s, ms)
    }
}

/// Parse an operator-entered time.
///
/// Accepts `H:MM:SS[.mmm]`, `M:SS[.mmm]` and `S[.mmm]`. `DNF`/`DNS`
/// (any case) parse to the `0` sentinel, blank input to `None`.
///
/// # Examples
///
/// ```
/// use rallyx_common::time::parse_time;
///
/// assert_eq!(parse_time("1:05.4").unwrap(), Some(65_400));
/// assert_eq!(parse_time("dnf").unwrap(), Some(0));
/// assert_eq!(parse_time("  ").unwrap(), None);
/// ```
pub fn parse_time(input: &str) -> Result<Option<i64>> {
    let text = input.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if text.eq_ignore_ascii_case("dnf") || text.eq_ignore_ascii_case("dns") {
        return Ok(Some(0));
    }

    let invalid = || Error::InvalidInput(format!("Invalid time: {:?}", input));

    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };

    let parts: Vec<&str> = whole.split(':').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(invalid());
    }
    // Leading field is unbounded, the rest are two-digit clock fields
    for p in parts.iter().skip(1) {
        if p.len() > 2 {
            return Err(invalid());
        }
    }

    let mut numbers = Vec::with_capacity(parts.len());
    for p in &parts {
        if !p.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        numbers.push(p.parse::<i64>().map_err(|_| invalid())?);
    }

    let (h, m, s) = match numbers.as_slice() {
        [s] => (0, 0, *s),
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };
    let millis = match fraction {
        Some(fraction) => parse_millis(fraction).ok_or_else(invalid)?,
        None => 0,
    };

    // Values past the i64 millisecond range are rejected, not wrapped
    let time_ms = h
        .checked_mul(MS_PER_HOUR)
        .zip(m.checked_mul(MS_PER_MINUTE))
        .zip(s.checked_mul(MS_PER_SECOND))
        .and_then(|((h, m), s)| h.checked_add(m)?.checked_add(s)?.checked_add(millis))
        .ok_or_else(invalid)?;

    Ok(Some(time_ms))
}

/// Parse up to three fractional digits as milliseconds (`"4"` is 400 ms)
fn parse_millis(fraction: &str) -> Option<i64> {
    if fraction.len() > 3 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if fraction.is_empty() {
        return Some(0);
    }
    let padded = format!("{:0<3}", fraction);
    padded.parse().ok()
}

/// Order two optional times with missing or zero (DNF/DNS) times last.
///
/// Finite times compare numerically; two missing times are equal.
pub fn compare_times(a: Option<i64>, b: Option<i64>) -> Ordering {
    let a = a.filter(|t| *t != 0);
    let b = b.filter(|t| *t != 0);
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}
