use std::sync::Arc;
use tracing::Instrument;

use super::{drive_schedule, ArmedSlot, ManagerContext, ManagerHandle};
use crate::error::PostboxError;
use crate::models::StoryExpirationEntry;
use crate::store::{Postbox, PostboxView, ViewKey};

const SUBSYSTEM: &str = "Autoexpire stories";

/// Start the story expiry manager. When the earliest story is due, every
/// story expiring within `slack_secs` of the corrected clock goes in the same
/// transaction. Must be called from within a Tokio runtime.
pub fn managed_autoexpire_story_operations(context: ManagerContext, slack_secs: i32) -> ManagerHandle {
    let span = context.span.clone();
    let armed = Arc::new(ArmedSlot::default());
    let slot = armed.clone();
    let task = tokio::spawn(
        async move {
            tracing::info!(subsystem = SUBSYSTEM, slack_secs, "Starting");
            drive_schedule(
                context,
                SUBSYSTEM,
                slot,
                ViewKey::StoryExpirationTimeItems,
                |view: PostboxView| match view {
                    PostboxView::StoryExpirationTimeItems(view) => Some(view.top_entry),
                    _ => None,
                },
                move |context: ManagerContext, entry: StoryExpirationEntry, offset: i32| async move {
                    let below = (context.corrected_now(offset) as i32).saturating_add(slack_secs);
                    // The head itself is due even if the clock lags its timestamp by a fraction.
                    let below = below.max(entry.expiration_timestamp);
                    match expire_stories(&context.postbox, below).await {
                        Ok(removed) => tracing::debug!(subsystem = SUBSYSTEM, removed, below, "Performed"),
                        Err(e) => tracing::warn!(subsystem = SUBSYSTEM, "Failed to expire stories: {}", e),
                    }
                },
            )
            .await;
        }
        .instrument(span),
    );
    ManagerHandle::new("autoexpire_stories", task, armed)
}

/// Remove every story expiring at or before `below_timestamp`. Returns the
/// number of removed items.
pub async fn expire_stories(postbox: &Postbox, below_timestamp: i32) -> Result<usize, PostboxError> {
    tracing::info!(subsystem = SUBSYSTEM, below_timestamp, "Performing");
    postbox
        .transaction(move |txn| {
            let expired = txn.get_expired_story_ids(below_timestamp)?;
            if expired.is_empty() {
                return Ok(0);
            }
            txn.remove_story_items(&expired)
        })
        .await
}
