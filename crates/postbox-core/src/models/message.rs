use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::media::Media;
use super::peer::PeerId;
use super::tags::{GlobalMessageTags, MessageFlags, MessageTags};
use crate::constants::timestamp_attribute_tags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageNamespace(pub i32);

/// Position of a message inside its peer+namespace history.
/// Ordered by peer, then namespace, then sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId {
    pub peer_id: PeerId,
    pub namespace: MessageNamespace,
    pub id: i32,
}

impl MessageId {
    pub const fn new(peer_id: PeerId, namespace: MessageNamespace, id: i32) -> Self {
        Self {
            peer_id,
            namespace,
            id,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.peer_id, self.namespace.0, self.id)
    }
}

/// Message id paired with its timestamp; ordered by time first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageIndex {
    pub id: MessageId,
    pub timestamp: i32,
}

impl MessageIndex {
    pub const fn new(id: MessageId, timestamp: i32) -> Self {
        Self { id, timestamp }
    }
}

impl Ord for MessageIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for MessageIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Provenance of a forwarded message. Kept verbatim when content is cleared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardInfo {
    pub author_id: Option<PeerId>,
    pub source_id: Option<PeerId>,
    pub source_message_id: Option<MessageId>,
    pub date: i32,
    pub author_signature: Option<String>,
    pub psa_type: Option<String>,
    #[serde(default)]
    pub flags: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageAttribute {
    /// Delete the message `timeout` seconds after the countdown begins
    AutoremoveTimeout {
        timeout: i32,
        countdown_begin: Option<i32>,
    },
    /// Replace the message media with tombstones `timeout` seconds after the
    /// countdown begins
    AutoclearTimeout {
        timeout: i32,
        countdown_begin: Option<i32>,
    },
    ReplyTo {
        message_id: MessageId,
    },
    Edited {
        date: i32,
    },
    Reactions {
        reactions: Vec<(String, i32)>,
    },
}

impl MessageAttribute {
    /// `(tag, timestamp)` of the timestamp-based index entry this attribute
    /// produces, once its countdown has begun.
    pub fn automatic_timestamp_based_attribute(&self) -> Option<(u16, i32)> {
        match self {
            MessageAttribute::AutoremoveTimeout {
                timeout,
                countdown_begin: Some(begin),
            } => Some((
                timestamp_attribute_tags::AUTOREMOVE,
                begin.saturating_add(*timeout),
            )),
            MessageAttribute::AutoclearTimeout {
                timeout,
                countdown_begin: Some(begin),
            } => Some((
                timestamp_attribute_tags::AUTOCLEAR,
                begin.saturating_add(*timeout),
            )),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub globally_unique_id: Option<i64>,
    pub grouping_key: Option<i64>,
    pub thread_id: Option<i64>,
    pub timestamp: i32,
    #[serde(default)]
    pub flags: MessageFlags,
    #[serde(default)]
    pub tags: MessageTags,
    #[serde(default)]
    pub global_tags: GlobalMessageTags,
    pub forward_info: Option<ForwardInfo>,
    pub author_id: Option<PeerId>,
    pub text: String,
    #[serde(default)]
    pub attributes: Vec<MessageAttribute>,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl Message {
    /// Plain text message with no tags, attributes or media.
    pub fn new(id: MessageId, timestamp: i32, text: impl Into<String>) -> Self {
        Self {
            id,
            globally_unique_id: None,
            grouping_key: None,
            thread_id: None,
            timestamp,
            flags: MessageFlags::empty(),
            tags: MessageTags::empty(),
            global_tags: GlobalMessageTags::empty(),
            forward_info: None,
            author_id: None,
            text: text.into(),
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    pub fn index(&self) -> MessageIndex {
        MessageIndex::new(self.id, self.timestamp)
    }

    /// Timestamp-based index entries derived from the attributes.
    pub fn timestamp_based_attributes(&self) -> Vec<(u16, i32)> {
        self.attributes
            .iter()
            .filter_map(MessageAttribute::automatic_timestamp_based_attribute)
            .collect()
    }

    pub fn media_resource_ids(&self) -> impl Iterator<Item = &String> {
        self.media.iter().flat_map(|media| media.resource_ids().iter())
    }

    /// Copy of this message with media replaced by tombstones and the
    /// auto-clear timeouts removed. Every other field is kept.
    pub fn with_expired_content(&self) -> Message {
        let mut updated = self.clone();
        updated.media = self
            .media
            .iter()
            .map(|media| media.expired_placeholder().unwrap_or_else(|| media.clone()))
            .collect();
        updated
            .attributes
            .retain(|attribute| !matches!(attribute, MessageAttribute::AutoclearTimeout { .. }));
        updated
    }
}

/// Result of an `update_message` transform.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageUpdate {
    Update(Message),
    Skip,
}
