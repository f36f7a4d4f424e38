use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use super::message::MessageNamespace;
use super::peer::PeerId;
use super::tags::MessageTags;

/// Which index a hole applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoleSpace {
    /// The full history, and every hole-tracked tag set of it
    Everywhere,
    /// Only the sub-history of messages carrying this tag set
    Tag(MessageTags),
}

impl HoleSpace {
    /// Stored key: `0` for `Everywhere`, the tag bits otherwise.
    pub(crate) fn key(self) -> u32 {
        match self {
            HoleSpace::Everywhere => 0,
            HoleSpace::Tag(tags) => tags.bits(),
        }
    }

    pub(crate) fn from_key(key: u32) -> Self {
        if key == 0 {
            HoleSpace::Everywhere
        } else {
            HoleSpace::Tag(MessageTags(key))
        }
    }
}

/// A range of message ids whose local history is possibly incomplete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHistoryHole {
    pub peer_id: PeerId,
    pub namespace: MessageNamespace,
    pub space: HoleSpace,
    pub range: RangeInclusive<i32>,
}
