pub mod changes;
mod chat_list;
pub mod db;
mod holes;
mod indexes;
pub mod media_box;
mod messages;
mod peers;
pub mod postbox;
mod stories;
pub mod transaction;
pub mod views;

pub use changes::CommitChanges;
pub use db::Database;
pub use media_box::MediaBox;
pub use postbox::Postbox;
pub use transaction::Transaction;
pub use views::{
    ChatListView, MessageTagSummaryView, PeerStoryItemsView, PostboxView,
    StoryExpirationTimeItemsView, TimestampBasedMessageAttributesView, ViewDisposer, ViewKey,
    ViewSubscription, ViewUpdate,
};
