use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::peer_namespaces;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerNamespace(pub i32);

/// Namespaced identifier of a conversation participant or channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId {
    pub namespace: PeerNamespace,
    pub id: i64,
}

impl PeerId {
    pub const fn new(namespace: PeerNamespace, id: i64) -> Self {
        Self { namespace, id }
    }

    /// Secret chats never keep tombstones: expiring content is always deleted.
    pub fn is_secret_chat(&self) -> bool {
        self.namespace == peer_namespaces::SECRET_CHAT
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.0, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerKind {
    User {
        #[serde(default)]
        is_contact: bool,
        #[serde(default)]
        is_bot: bool,
    },
    Group,
    Channel {
        broadcast: bool,
    },
    SecretChat {
        regular_peer_id: PeerId,
    },
}

/// Mutable peer record, owned by the store and handed out as snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub title: String,
    pub kind: PeerKind,
}

impl Peer {
    pub fn new(id: PeerId, title: impl Into<String>, kind: PeerKind) -> Self {
        Self {
            id,
            title: title.into(),
            kind,
        }
    }
}
