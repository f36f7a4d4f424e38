//! Observable snapshots recomputed on the writer thread after every commit
//! that touches them.

use futures::Stream;
use rusqlite::Connection;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::changes::CommitChanges;
use super::postbox::PostboxCommand;
use super::{chat_list, indexes, stories};
use crate::error::StorageError;
use crate::models::{
    ChatListEntry, MessageNamespace, PeerId, StoryExpirationEntry, StoryItem,
    TimestampBasedMessageAttributesEntry,
};
use crate::seed::SeedConfiguration;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewKey {
    /// Soonest-due entry of one timestamp-based attribute tag
    TimestampBasedAttributes { tag: u16 },
    /// Soonest-expiring story across all peers
    StoryExpirationTimeItems,
    PeerStoryItems(PeerId),
    MessageTagSummary {
        peer_id: PeerId,
        namespace: MessageNamespace,
    },
    /// Top `count` peers by latest message
    ChatList { count: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampBasedMessageAttributesView {
    pub tag: u16,
    pub head: Option<TimestampBasedMessageAttributesEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryExpirationTimeItemsView {
    pub top_entry: Option<StoryExpirationEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerStoryItemsView {
    pub peer_id: PeerId,
    pub items: Vec<StoryItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageTagSummaryView {
    pub peer_id: PeerId,
    pub namespace: MessageNamespace,
    pub count: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatListView {
    pub entries: Vec<ChatListEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostboxView {
    TimestampBasedAttributes(TimestampBasedMessageAttributesView),
    StoryExpirationTimeItems(StoryExpirationTimeItemsView),
    PeerStoryItems(PeerStoryItemsView),
    MessageTagSummary(MessageTagSummaryView),
    ChatList(ChatListView),
}

impl ViewKey {
    pub fn is_affected_by(&self, changes: &CommitChanges) -> bool {
        match self {
            ViewKey::TimestampBasedAttributes { tag } => changes.timestamp_attribute_tags.contains(tag),
            ViewKey::StoryExpirationTimeItems => changes.story_expiration_changed,
            ViewKey::PeerStoryItems(peer_id) => changes.updated_story_peers.contains(peer_id),
            ViewKey::MessageTagSummary { peer_id, namespace } => changes
                .updated_tag_summaries
                .contains(&(*peer_id, *namespace)),
            ViewKey::ChatList { .. } => changes.chat_list_changed,
        }
    }

    /// Derive the snapshot from the index tables. Head views always re-read
    /// the minimum so removing the previous head yields its successor.
    pub(crate) fn compute(
        &self,
        conn: &Connection,
        seed: &SeedConfiguration,
    ) -> Result<PostboxView, StorageError> {
        let view = match self {
            ViewKey::TimestampBasedAttributes { tag } => {
                PostboxView::TimestampBasedAttributes(TimestampBasedMessageAttributesView {
                    tag: *tag,
                    head: indexes::timestamp_attributes_head(conn, *tag)?,
                })
            }
            ViewKey::StoryExpirationTimeItems => {
                PostboxView::StoryExpirationTimeItems(StoryExpirationTimeItemsView {
                    top_entry: stories::story_expiration_head(conn)?,
                })
            }
            ViewKey::PeerStoryItems(peer_id) => PostboxView::PeerStoryItems(PeerStoryItemsView {
                peer_id: *peer_id,
                items: stories::get_story_items(conn, *peer_id)?,
            }),
            ViewKey::MessageTagSummary { peer_id, namespace } => {
                let count = match seed.summary_tag() {
                    Some(tag) => indexes::message_tag_summary(conn, *peer_id, *namespace, tag)?,
                    None => 0,
                };
                PostboxView::MessageTagSummary(MessageTagSummaryView {
                    peer_id: *peer_id,
                    namespace: *namespace,
                    count,
                })
            }
            ViewKey::ChatList { count } => PostboxView::ChatList(ChatListView {
                entries: chat_list::chat_list(conn, seed, *count)?,
            }),
        };
        Ok(view)
    }
}

/// One published snapshot. `version` is the commit sequence number it reflects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewUpdate {
    pub version: u64,
    pub view: PostboxView,
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<ViewUpdate>,
}

struct RegisteredView {
    current: PostboxView,
    subscribers: Vec<Subscriber>,
}

/// Writer-owned table of live views and their subscribers.
#[derive(Default)]
pub(crate) struct ViewRegistry {
    views: HashMap<ViewKey, RegisteredView>,
}

impl ViewRegistry {
    pub(crate) fn subscribe(
        &mut self,
        conn: &Connection,
        seed: &SeedConfiguration,
        key: ViewKey,
        id: u64,
        sender: mpsc::UnboundedSender<ViewUpdate>,
        version: u64,
    ) -> Result<(), StorageError> {
        let registered = match self.views.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let current = entry.key().compute(conn, seed)?;
                entry.insert(RegisteredView {
                    current,
                    subscribers: Vec::new(),
                })
            }
        };

        let initial = ViewUpdate {
            version,
            view: registered.current.clone(),
        };
        if sender.send(initial).is_ok() {
            registered.subscribers.push(Subscriber { id, sender });
        }
        Ok(())
    }

    pub(crate) fn unsubscribe(&mut self, key: &ViewKey, id: u64) {
        if let Some(registered) = self.views.get_mut(key) {
            registered.subscribers.retain(|subscriber| subscriber.id != id);
            if registered.subscribers.is_empty() {
                self.views.remove(key);
            }
        }
    }

    /// Recompute every view touched by `changes` and publish snapshots that
    /// differ from the previous one. Returns how many views published.
    pub(crate) fn refresh(
        &mut self,
        conn: &Connection,
        seed: &SeedConfiguration,
        changes: &CommitChanges,
        version: u64,
    ) -> Result<usize, StorageError> {
        let mut published = 0;
        for (key, registered) in self.views.iter_mut() {
            if !key.is_affected_by(changes) {
                continue;
            }
            let view = key.compute(conn, seed)?;
            if view == registered.current {
                continue;
            }
            registered.current = view.clone();
            registered.subscribers.retain(|subscriber| {
                subscriber
                    .sender
                    .send(ViewUpdate {
                        version,
                        view: view.clone(),
                    })
                    .is_ok()
            });
            published += 1;
        }
        self.views
            .retain(|_, registered| !registered.subscribers.is_empty());
        Ok(published)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.views.len()
    }
}

struct DisposeState {
    disposed: AtomicBool,
    id: u64,
    key: ViewKey,
    commands: Sender<PostboxCommand>,
}

impl DisposeState {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The writer may already be gone; the receiver is closed either way.
        let _ = self.commands.send(PostboxCommand::Unsubscribe {
            key: self.key.clone(),
            id: self.id,
        });
    }
}

/// Cloneable handle that disposes a subscription from any thread.
#[derive(Clone)]
pub struct ViewDisposer {
    state: Arc<DisposeState>,
}

impl ViewDisposer {
    pub fn dispose(&self) {
        self.state.dispose();
    }
}

/// Ordered stream of snapshots for one view key. The first update is the
/// snapshot current at subscription time.
pub struct ViewSubscription {
    receiver: mpsc::UnboundedReceiver<ViewUpdate>,
    state: Arc<DisposeState>,
}

impl ViewSubscription {
    pub(crate) fn new(
        key: ViewKey,
        id: u64,
        receiver: mpsc::UnboundedReceiver<ViewUpdate>,
        commands: Sender<PostboxCommand>,
    ) -> Self {
        Self {
            receiver,
            state: Arc::new(DisposeState {
                disposed: AtomicBool::new(false),
                id,
                key,
                commands,
            }),
        }
    }

    pub fn key(&self) -> &ViewKey {
        &self.state.key
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// Next snapshot, or `None` once disposed or the postbox is gone.
    pub async fn recv(&mut self) -> Option<ViewUpdate> {
        if self.is_disposed() {
            return None;
        }
        let update = self.receiver.recv().await?;
        if self.is_disposed() {
            return None;
        }
        Some(update)
    }

    /// Non-blocking variant of `recv`.
    pub fn try_next(&mut self) -> Option<ViewUpdate> {
        if self.is_disposed() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    pub fn disposer(&self) -> ViewDisposer {
        ViewDisposer {
            state: self.state.clone(),
        }
    }

    pub fn dispose(&mut self) {
        self.state.dispose();
        self.receiver.close();
    }
}

impl Drop for ViewSubscription {
    fn drop(&mut self) {
        self.state.dispose();
    }
}

impl Stream for ViewSubscription {
    type Item = ViewUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_disposed() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{message_namespaces, peer_namespaces, timestamp_attribute_tags};
    use crate::models::{Message, MessageAttribute, MessageId};
    use crate::store::db::Database;
    use crate::store::transaction::Transaction;

    fn expiring_message(id: i32, at: i32) -> Message {
        let mut message = Message::new(
            MessageId::new(
                PeerId::new(peer_namespaces::CLOUD_USER, 1),
                message_namespaces::CLOUD,
                id,
            ),
            at,
            "",
        );
        message.attributes.push(MessageAttribute::AutoremoveTimeout {
            timeout: 0,
            countdown_begin: Some(at),
        });
        message
    }

    #[test]
    fn test_refresh_publishes_changed_views_only() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let mut registry = ViewRegistry::default();
        let tag = timestamp_attribute_tags::AUTOREMOVE;

        let (head_tx, mut head_rx) = mpsc::unbounded_channel();
        let (stories_tx, mut stories_rx) = mpsc::unbounded_channel();
        registry
            .subscribe(db.connection(), &seed, ViewKey::TimestampBasedAttributes { tag }, 1, head_tx, 0)
            .unwrap();
        registry
            .subscribe(db.connection(), &seed, ViewKey::StoryExpirationTimeItems, 2, stories_tx, 0)
            .unwrap();

        let initial = head_rx.try_recv().unwrap();
        assert_eq!(initial.version, 0);
        assert_eq!(
            initial.view,
            PostboxView::TimestampBasedAttributes(TimestampBasedMessageAttributesView { tag, head: None })
        );
        assert!(stories_rx.try_recv().is_ok());

        let mut changes = CommitChanges::default();
        {
            let mut txn = Transaction::new(db.connection(), &seed, &mut changes);
            txn.add_messages([expiring_message(1, 500)]).unwrap();
        }
        let published = registry.refresh(db.connection(), &seed, &changes, 1).unwrap();
        assert_eq!(published, 1);

        let update = head_rx.try_recv().unwrap();
        assert_eq!(update.version, 1);
        match update.view {
            PostboxView::TimestampBasedAttributes(view) => {
                assert_eq!(view.head.unwrap().timestamp, 500)
            }
            other => panic!("unexpected view: {other:?}"),
        }
        assert!(stories_rx.try_recv().is_err());
    }

    #[test]
    fn test_views_without_subscribers_are_discarded() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let mut registry = ViewRegistry::default();
        let key = ViewKey::ChatList { count: 10 };

        let (tx, rx) = mpsc::unbounded_channel();
        registry.subscribe(db.connection(), &seed, key.clone(), 7, tx, 0).unwrap();
        assert_eq!(registry.len(), 1);

        registry.unsubscribe(&key, 7);
        assert_eq!(registry.len(), 0);
        drop(rx);
    }

    #[test]
    fn test_closed_receivers_are_pruned_on_refresh() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let mut registry = ViewRegistry::default();
        let key = ViewKey::ChatList { count: 10 };

        let (tx, rx) = mpsc::unbounded_channel();
        registry.subscribe(db.connection(), &seed, key, 7, tx, 0).unwrap();
        drop(rx);

        let mut changes = CommitChanges::default();
        {
            let mut txn = Transaction::new(db.connection(), &seed, &mut changes);
            txn.add_messages([expiring_message(1, 500)]).unwrap();
        }
        registry.refresh(db.connection(), &seed, &changes, 1).unwrap();
        assert_eq!(registry.len(), 0);
    }
}
