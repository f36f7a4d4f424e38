pub mod attributes;
pub mod chat_list;
pub mod hole;
pub mod media;
pub mod message;
pub mod peer;
pub mod story;
pub mod tags;

pub use attributes::TimestampBasedMessageAttributesEntry;
pub use chat_list::{ChatListEntry, ChatListHole, PeerGroupId};
pub use hole::{HoleSpace, MessageHistoryHole};
pub use media::{ExpiredContentKind, FileKind, Media};
pub use message::{
    ForwardInfo, Message, MessageAttribute, MessageId, MessageIndex, MessageNamespace,
    MessageUpdate,
};
pub use peer::{Peer, PeerId, PeerKind, PeerNamespace};
pub use story::{StoryExpirationEntry, StoryId, StoryItem};
pub use tags::{GlobalMessageTags, MessageFlags, MessageTags, PeerSummaryCounterTags};
