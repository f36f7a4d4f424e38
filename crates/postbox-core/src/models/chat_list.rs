use serde::{Deserialize, Serialize};

use super::message::{MessageId, MessageIndex, MessageNamespace};
use super::peer::{PeerId, PeerNamespace};

/// Chat list folder. `ROOT` is the top-level list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerGroupId(pub i32);

impl PeerGroupId {
    pub const ROOT: PeerGroupId = PeerGroupId(0);
}

/// The chat list below `index` is not fully loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatListHole {
    pub index: MessageIndex,
}

impl ChatListHole {
    pub const fn new(index: MessageIndex) -> Self {
        Self { index }
    }

    /// Hole covering the whole list.
    pub const fn upper_bound() -> Self {
        Self {
            index: MessageIndex::new(
                MessageId::new(
                    PeerId::new(PeerNamespace(i32::MAX), i64::MAX),
                    MessageNamespace(i32::MAX),
                    i32::MAX,
                ),
                i32::MAX,
            ),
        }
    }
}

/// A peer together with the index of its latest message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatListEntry {
    pub peer_id: PeerId,
    pub index: MessageIndex,
}
