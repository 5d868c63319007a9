//! Next-entrant selection
//!
//! The entrant for the next start is queued in the registry (`next_entry_id`),
//! either directly by an operator or from a card scan at the start line.

use crate::announce::Cue;
use crate::store;
use crate::ScoringContext;
use rallyx_common::db::registry;
use rallyx_common::{Error, Result};
use tracing::{info, warn};

/// Operator message left in `next_entry_msg` when a scan selects nobody
pub const REJECTED_SCAN_MSG: &str = "Invalid card number or wrong session!";

/// Queue (or clear, with `None`) the entrant for the next start
pub async fn set_next_entrant(ctx: &ScoringContext, entry_id: Option<i64>) -> Result<()> {
    if let Some(entry_id) = entry_id {
        let entry = store::fetch_entry(&ctx.db, entry_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("entry {}", entry_id)))?;
        let active = registry::reg_get_i64(&ctx.db, registry::ACTIVE_EVENT_ID).await?;
        if active != Some(entry.event_id) {
            return Err(Error::InvalidInput(format!(
                "entry {} is not in the active event",
                entry_id
            )));
        }
    }

    let value = entry_id.map(|id| id.to_string());
    registry::reg_set(&ctx.db, registry::NEXT_ENTRY_ID, value.as_deref()).await?;
    registry::reg_set(&ctx.db, registry::NEXT_ENTRY_MSG, None).await?;

    info!(entry_id, "Next entrant set");
    Ok(())
}

/// Find the active event's entry holding a card.
///
/// An entry in the current race session wins; otherwise an entry allowed in
/// any session (`*`, `-1` or unset) is taken.
pub async fn entry_for_card(ctx: &ScoringContext, card_number: i64) -> Result<Option<i64>> {
    let Some(event_id) = registry::reg_get_i64(&ctx.db, registry::ACTIVE_EVENT_ID).await? else {
        return Ok(None);
    };
    let session = registry::reg_get(&ctx.db, registry::RACE_SESSION).await?;

    let entry_id: Option<i64> = sqlx::query_scalar(
        "SELECT entry_id FROM entries \
         WHERE event_id = ? AND card_number = ? AND deleted = 0 \
           AND (race_session = ? OR race_session IS NULL OR race_session IN ('*', '-1')) \
         ORDER BY CASE WHEN race_session = ? THEN 0 ELSE 1 END, entry_id \
         LIMIT 1",
    )
    .bind(event_id)
    .bind(card_number)
    .bind(&session)
    .bind(&session)
    .fetch_optional(&ctx.db)
    .await?;

    Ok(entry_id)
}

/// Select the next entrant from a scanned card number (tag serial or barcode).
///
/// Anything that is not a number, or matches no entry, clears the queued
/// entrant and leaves [`REJECTED_SCAN_MSG`] for the operator.
pub async fn handle_card_scan(ctx: &ScoringContext, data: &str) -> Result<Option<i64>> {
    let entry_id = match data.trim().parse::<i64>() {
        Ok(card_number) => entry_for_card(ctx, card_number).await?,
        Err(_) => {
            warn!(data, "Scan is not a card number");
            None
        }
    };

    match entry_id {
        Some(entry_id) => {
            registry::reg_set_value(&ctx.db, registry::NEXT_ENTRY_ID, &entry_id).await?;
            registry::reg_set(&ctx.db, registry::NEXT_ENTRY_MSG, None).await?;
            info!(card = data.trim(), entry_id, "Next entrant selected by scan");
            ctx.annunciator.announce(Cue::GoodScan);
        }
        None => {
            registry::reg_set(&ctx.db, registry::NEXT_ENTRY_ID, None).await?;
            registry::reg_set(&ctx.db, registry::NEXT_ENTRY_MSG, Some(REJECTED_SCAN_MSG)).await?;
            warn!(card = data.trim(), "No entrant for scanned card in this session");
            ctx.annunciator.announce(Cue::BadScan);
        }
    }

    Ok(entry_id)
}
