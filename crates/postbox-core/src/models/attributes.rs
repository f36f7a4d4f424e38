use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::message::{MessageId, MessageIndex};

/// Scheduled action on a message (self-destruct, auto-clear), due at
/// `timestamp`. Ordered by due time, then message id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampBasedMessageAttributesEntry {
    pub tag: u16,
    pub timestamp: i32,
    pub message_id: MessageId,
}

impl TimestampBasedMessageAttributesEntry {
    pub fn index(&self) -> MessageIndex {
        MessageIndex::new(self.message_id, self.timestamp)
    }
}

impl Ord for TimestampBasedMessageAttributesEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.message_id.cmp(&other.message_id))
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

impl PartialOrd for TimestampBasedMessageAttributesEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
