use serde::{Deserialize, Serialize};

use super::media::Media;
use super::peer::PeerId;

/// Ephemeral story posted by a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryItem {
    pub id: i32,
    pub timestamp: i32,
    pub expiration_timestamp: i32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media: Option<Media>,
}

impl StoryItem {
    pub fn new(id: i32, timestamp: i32, expiration_timestamp: i32) -> Self {
        Self {
            id,
            timestamp,
            expiration_timestamp,
            text: String::new(),
            media: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoryId {
    pub peer_id: PeerId,
    pub id: i32,
}

/// Row of the global story expiration index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoryExpirationEntry {
    pub id: StoryId,
    pub expiration_timestamp: i32,
}
