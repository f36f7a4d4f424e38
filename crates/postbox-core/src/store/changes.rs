use std::collections::HashSet;

use crate::models::{MessageId, MessageNamespace, PeerGroupId, PeerId};

/// Everything a committed transaction touched. Views decide from this whether
/// they need to be recomputed.
#[derive(Debug, Default, Clone)]
pub struct CommitChanges {
    pub updated_peers: HashSet<PeerId>,
    pub inserted_messages: HashSet<MessageId>,
    pub updated_messages: HashSet<MessageId>,
    pub removed_messages: HashSet<MessageId>,
    /// Tags of the timestamp-based attribute index that gained or lost entries
    pub timestamp_attribute_tags: HashSet<u16>,
    pub updated_tag_summaries: HashSet<(PeerId, MessageNamespace)>,
    pub updated_story_peers: HashSet<PeerId>,
    pub story_expiration_changed: bool,
    pub chat_list_changed: bool,
    pub updated_chat_list_holes: HashSet<PeerGroupId>,
    pub updated_holes: HashSet<(PeerId, MessageNamespace)>,
    /// Resources whose last referencing message was removed
    pub(crate) orphan_candidates: HashSet<String>,
    /// Resources no longer referenced after commit; their files are removed
    pub orphaned_media: Vec<String>,
}

impl CommitChanges {
    pub fn is_empty(&self) -> bool {
        self.updated_peers.is_empty()
            && self.inserted_messages.is_empty()
            && self.updated_messages.is_empty()
            && self.removed_messages.is_empty()
            && self.timestamp_attribute_tags.is_empty()
            && self.updated_tag_summaries.is_empty()
            && self.updated_story_peers.is_empty()
            && !self.story_expiration_changed
            && !self.chat_list_changed
            && self.updated_chat_list_holes.is_empty()
            && self.updated_holes.is_empty()
    }
}
