//! Store-wide constants
//!
//! Centralized location for namespaces, timestamp attribute tags and
//! scheduling defaults that are used across multiple modules.

use std::time::Duration;

/// Peer id namespaces of the stock messenger schema
pub mod peer_namespaces {
    use crate::models::PeerNamespace;

    pub const CLOUD_USER: PeerNamespace = PeerNamespace(0);
    pub const CLOUD_GROUP: PeerNamespace = PeerNamespace(1);
    pub const CLOUD_CHANNEL: PeerNamespace = PeerNamespace(2);
    pub const SECRET_CHAT: PeerNamespace = PeerNamespace(3);
}

/// Message id namespaces of the stock messenger schema
pub mod message_namespaces {
    use crate::models::MessageNamespace;

    /// Server-assigned history
    pub const CLOUD: MessageNamespace = MessageNamespace(0);
    /// Locally created, not yet acknowledged by the server
    pub const LOCAL: MessageNamespace = MessageNamespace(1);
    /// Scheduled messages
    pub const SCHEDULED_CLOUD: MessageNamespace = MessageNamespace(2);
}

/// Tags of the timestamp-based message attribute index
pub mod timestamp_attribute_tags {
    /// Message is deleted when the entry becomes due
    pub const AUTOREMOVE: u16 = 0;
    /// Message media is replaced by tombstones when the entry becomes due
    pub const AUTOCLEAR: u16 = 1;
}

/// How often the network time offset is re-read
pub const TIME_OFFSET_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest single sleep while waiting for a deadline; the wall clock is
/// re-checked after every slice so a suspended device catches up.
pub const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

/// Stories expiring within this many seconds of "now" are removed together
pub const STORY_EXPIRATION_SLACK_SECS: i32 = 3;

/// Default database file name inside the data directory
pub const DATABASE_FILE: &str = "postbox.sqlite";

/// Optional JSON config file inside the data directory
pub const CONFIG_FILE: &str = "postbox.json";

/// Media payload directory inside the data directory
pub const MEDIA_DIR: &str = "media";
