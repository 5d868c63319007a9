//! Registry access
//!
//! Key/value store shared by every process attached to the scoring database.
//! Values are nullable text; typed getters treat unparsable values as absent.

use crate::Result;
use sqlx::SqliteExecutor;
use std::str::FromStr;

/// Registry key holding the event every timing event is attributed to
pub const ACTIVE_EVENT_ID: &str = "active_event_id";
/// Entry to attribute the next start to
pub const NEXT_ENTRY_ID: &str = "next_entry_id";
/// Operator-facing message about the last scan
pub const NEXT_ENTRY_MSG: &str = "next_entry_msg";
/// Run group currently on course
pub const RACE_SESSION: &str = "race_session";
/// Non-zero while start events must not create runs
pub const DISABLE_START: &str = "disable_start";
/// Non-zero while finish events must not finish runs
pub const DISABLE_FINISH: &str = "disable_finish";
/// Heartbeat written by the watchdog (unix seconds)
pub const HARDWARE_WATCHDOG: &str = "hardware_watchdog";
/// Last raw barcode payload
pub const BARCODE_DATA: &str = "barcode_data";
/// Last decoded licence, as JSON
pub const LICENSE_DATA: &str = "license_data";
/// Last tag serial number read
pub const RFID_DATA: &str = "rfid_data";

/// Registry key holding a device's desired channel address
pub fn device_address_key(device: &str) -> String {
    format!("serial_port_{}", device)
}

/// Registry key holding a device's published link status
pub fn device_status_key(device: &str) -> String {
    format!("{}_status", device)
}

/// Read a raw registry value (missing key and NULL both yield `None`)
pub async fn reg_get<'e, E>(db: E, key: &str) -> Result<Option<String>>
where
    E: SqliteExecutor<'e>,
{
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM registry WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;
    Ok(value.flatten())
}

/// Read and parse a registry value; unparsable values read as `None`
pub async fn reg_get_parsed<'e, E, T>(db: E, key: &str) -> Result<Option<T>>
where
    E: SqliteExecutor<'e>,
    T: FromStr,
{
    Ok(reg_get(db, key)
        .await?
        .and_then(|value| value.trim().parse::<T>().ok()))
}

/// Read an integer registry value
pub async fn reg_get_i64<'e, E>(db: E, key: &str) -> Result<Option<i64>>
where
    E: SqliteExecutor<'e>,
{
    reg_get_parsed(db, key).await
}

/// Read a flag: `1`/`true` are set, anything else (or nothing) is clear
pub async fn reg_get_flag<'e, E>(db: E, key: &str) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    Ok(match reg_get(db, key).await? {
        Some(value) => {
            let value = value.trim();
            value.eq_ignore_ascii_case("true")
                || value.parse::<i64>().map(|v| v != 0).unwrap_or(false)
        }
        None => false,
    })
}

/// Write a registry value (`None` stores NULL)
pub async fn reg_set<'e, E>(db: E, key: &str, value: Option<&str>) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT OR REPLACE INTO registry (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
    )
    .bind(key)
    .bind(value)
    .execute(db)
    .await?;
    Ok(())
}

/// Write any displayable value
pub async fn reg_set_value<'e, E, T>(db: E, key: &str, value: &T) -> Result<()>
where
    E: SqliteExecutor<'e>,
    T: ToString + ?Sized,
{
    reg_set(db, key, Some(&value.to_string())).await
}
