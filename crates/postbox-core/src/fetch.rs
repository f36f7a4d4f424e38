//! Filling history holes from a remote source.

use futures::future::BoxFuture;
use std::ops::RangeInclusive;

use crate::error::PostboxError;
use crate::models::{Message, MessageHistoryHole};
use crate::store::Postbox;

/// Result of fetching a slice of history. `filled_range` is the id range the
/// remote vouches is now complete locally; it may be smaller than the hole.
#[derive(Debug, Clone)]
pub struct FetchedHistory {
    pub messages: Vec<Message>,
    pub filled_range: RangeInclusive<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum FillHoleError {
    #[error("Failed to fetch hole: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Postbox(#[from] PostboxError),
}

/// Remote collaborator that loads messages for a hole.
pub trait HoleFetcher: Send + Sync {
    fn fetch(&self, hole: &MessageHistoryHole) -> BoxFuture<'static, Result<FetchedHistory, FetchError>>;
}

/// Fetch `hole` and, in one transaction, store the messages and remove exactly
/// the filled range from the hole's space. A fetch error leaves the hole in
/// place so the caller can retry.
pub async fn fill_hole(
    postbox: &Postbox,
    fetcher: &dyn HoleFetcher,
    hole: MessageHistoryHole,
) -> Result<RangeInclusive<i32>, FillHoleError> {
    tracing::debug!(
        peer = %hole.peer_id,
        namespace = hole.namespace.0,
        lower = *hole.range.start(),
        upper = *hole.range.end(),
        "Fetching hole"
    );

    let fetched = match fetcher.fetch(&hole).await {
        Ok(fetched) => fetched,
        Err(error) => {
            tracing::warn!(peer = %hole.peer_id, "Hole fetch failed: {}", error);
            return Err(error.into());
        }
    };

    let filled = fetched.filled_range.clone();
    let stored = fetched.messages.len();
    postbox
        .transaction(move |txn| {
            txn.add_messages(fetched.messages)?;
            txn.remove_message_hole(hole.peer_id, hole.namespace, fetched.filled_range, hole.space)
        })
        .await?;

    tracing::debug!(
        stored,
        filled_lower = *filled.start(),
        filled_upper = *filled.end(),
        "Hole filled"
    );
    Ok(filled)
}
