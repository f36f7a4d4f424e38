use rusqlite::Connection;
use std::collections::HashMap;
use std::ops::RangeInclusive;

use super::changes::CommitChanges;
use super::indexes::{self, run_insert_hooks, run_remove_hooks, HookContext};
use super::{chat_list, holes, messages, peers, stories};
use crate::error::StorageError;
use crate::models::{
    ChatListEntry, ChatListHole, GlobalMessageTags, HoleSpace, Message, MessageHistoryHole,
    MessageId, MessageIndex, MessageNamespace, MessageTags, MessageUpdate, Peer, PeerGroupId,
    PeerId, PeerSummaryCounterTags, StoryExpirationEntry, StoryId, StoryItem,
    TimestampBasedMessageAttributesEntry,
};
use crate::seed::SeedConfiguration;

/// Mutable access to the store for the duration of one job on the writer
/// thread. Every change is recorded so views can be refreshed after commit.
pub struct Transaction<'a> {
    conn: &'a Connection,
    seed: &'a SeedConfiguration,
    changes: &'a mut CommitChanges,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        seed: &'a SeedConfiguration,
        changes: &'a mut CommitChanges,
    ) -> Self {
        Self {
            conn,
            seed,
            changes,
        }
    }

    fn hook_context(&self) -> HookContext<'a> {
        HookContext {
            conn: self.conn,
            seed: self.seed,
        }
    }

    pub fn seed(&self) -> &SeedConfiguration {
        self.seed
    }

    // ===== Peers =====

    pub fn get_peer(&self, id: PeerId) -> Result<Option<Peer>, StorageError> {
        peers::get_peer(self.conn, id)
    }

    pub fn update_peers(&mut self, updated: impl IntoIterator<Item = Peer>) -> Result<(), StorageError> {
        for peer in updated {
            let counter_tags = self.seed.peer_summary_counter_tags(&peer);
            peers::put_peer(self.conn, &peer, counter_tags)?;
            self.changes.updated_peers.insert(peer.id);
        }
        Ok(())
    }

    // ===== Messages =====

    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        messages::get_message(self.conn, id)
    }

    /// Insert or replace messages. Histories seen for the first time are
    /// initialized (with a hole where configured) before the insert.
    pub fn add_messages(&mut self, added: impl IntoIterator<Item = Message>) -> Result<(), StorageError> {
        let ctx = self.hook_context();
        for message in added {
            let id = message.id;
            holes::ensure_history_initialized(
                self.conn,
                self.seed,
                id.peer_id,
                id.namespace,
                self.changes,
            )?;

            match messages::get_message(self.conn, id)? {
                Some(previous) => {
                    run_remove_hooks(&ctx, &previous, self.changes)?;
                    self.changes.updated_messages.insert(id);
                }
                None => {
                    self.changes.inserted_messages.insert(id);
                }
            }
            self.changes.removed_messages.remove(&id);

            messages::put_message(self.conn, &message)?;
            run_insert_hooks(&ctx, &message, self.changes)?;
        }
        Ok(())
    }

    /// Transform a stored message in place. Returns whether the message was
    /// rewritten. A replacement carrying a different id is ignored.
    pub fn update_message<F>(&mut self, id: MessageId, update: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&Message) -> MessageUpdate,
    {
        let Some(current) = messages::get_message(self.conn, id)? else {
            return Ok(false);
        };

        let updated = match update(&current) {
            MessageUpdate::Skip => return Ok(false),
            MessageUpdate::Update(updated) if updated.id != id => {
                tracing::warn!(
                    message_id = %id,
                    replacement_id = %updated.id,
                    "Ignoring message update that changes the message id"
                );
                return Ok(false);
            }
            MessageUpdate::Update(updated) => updated,
        };

        let ctx = self.hook_context();
        run_remove_hooks(&ctx, &current, self.changes)?;
        messages::put_message(self.conn, &updated)?;
        run_insert_hooks(&ctx, &updated, self.changes)?;
        if !self.changes.inserted_messages.contains(&id) {
            self.changes.updated_messages.insert(id);
        }
        Ok(true)
    }

    /// Remove messages and all of their index entries. Returns the media
    /// resource ids no longer referenced by any stored message.
    pub fn delete_messages(&mut self, ids: &[MessageId]) -> Result<Vec<String>, StorageError> {
        let ctx = self.hook_context();
        let mut released = Vec::new();

        for &id in ids {
            let Some(message) = messages::get_message(self.conn, id)? else {
                continue;
            };
            run_remove_hooks(&ctx, &message, self.changes)?;
            messages::remove_message(self.conn, id)?;

            self.changes.inserted_messages.remove(&id);
            self.changes.updated_messages.remove(&id);
            self.changes.removed_messages.insert(id);
            released.extend(message.media_resource_ids().cloned());
        }

        released.sort();
        released.dedup();
        let mut unreferenced = Vec::new();
        for resource_id in released {
            if indexes::media_reference_count(self.conn, &resource_id)? == 0 {
                unreferenced.push(resource_id);
            }
        }
        Ok(unreferenced)
    }

    /// Messages of one history starting at `from_id`, ascending.
    pub fn message_history(
        &self,
        peer_id: PeerId,
        namespace: MessageNamespace,
        from_id: i32,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        messages::message_history(self.conn, peer_id, namespace, from_id..=i32::MAX, limit)
    }

    pub fn message_count(&self) -> Result<i64, StorageError> {
        messages::message_count(self.conn)
    }

    pub fn peer_count(&self) -> Result<i64, StorageError> {
        peers::peer_count(self.conn)
    }

    // ===== Timestamp-based attributes =====

    pub fn clear_timestamp_based_attribute(&mut self, id: MessageId, tag: u16) -> Result<(), StorageError> {
        if indexes::clear_timestamp_attribute(self.conn, id, tag)? {
            self.changes.timestamp_attribute_tags.insert(tag);
        }
        Ok(())
    }

    pub fn timestamp_based_attributes_head(
        &self,
        tag: u16,
    ) -> Result<Option<TimestampBasedMessageAttributesEntry>, StorageError> {
        indexes::timestamp_attributes_head(self.conn, tag)
    }

    // ===== Tags and summaries =====

    pub fn message_ids_with_tag(
        &self,
        peer_id: PeerId,
        namespace: MessageNamespace,
        tag: MessageTags,
        limit: usize,
    ) -> Result<Vec<MessageIndex>, StorageError> {
        indexes::message_ids_with_tag(self.conn, peer_id, namespace, tag, limit)
    }

    /// Count of messages carrying the summary tag, `0` when none is configured.
    pub fn message_tag_summary(&self, peer_id: PeerId, namespace: MessageNamespace) -> Result<i32, StorageError> {
        match self.seed.summary_tag() {
            Some(tag) => indexes::message_tag_summary(self.conn, peer_id, namespace, tag),
            None => Ok(0),
        }
    }

    pub fn summary_count_for_counter_tags(&self, counter_tags: PeerSummaryCounterTags) -> Result<i32, StorageError> {
        match self.seed.summary_tag() {
            Some(tag) => indexes::summary_count_for_counter_tags(self.conn, tag, counter_tags),
            None => Ok(0),
        }
    }

    pub fn messages_with_global_tag(
        &self,
        tag: GlobalMessageTags,
        limit: usize,
    ) -> Result<Vec<MessageIndex>, StorageError> {
        indexes::messages_with_global_tag(self.conn, tag, limit)
    }

    pub fn message_by_global_id(&self, global_id: i32) -> Result<Option<Message>, StorageError> {
        match indexes::message_id_by_global_id(self.conn, global_id)? {
            Some(id) => messages::get_message(self.conn, id),
            None => Ok(None),
        }
    }

    pub fn search_messages(&self, text: &str, limit: usize) -> Result<Vec<Message>, StorageError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for id in indexes::search_text(self.conn, text.trim(), limit)? {
            if let Some(message) = messages::get_message(self.conn, id)? {
                found.push(message);
            }
        }
        Ok(found)
    }

    // ===== Stories =====

    pub fn get_story_items(&self, peer_id: PeerId) -> Result<Vec<StoryItem>, StorageError> {
        stories::get_story_items(self.conn, peer_id)
    }

    pub fn set_story_items(&mut self, peer_id: PeerId, items: Vec<StoryItem>) -> Result<(), StorageError> {
        stories::set_story_items(self.conn, peer_id, &items, self.changes)
    }

    /// Stories expiring at or before `below_timestamp`.
    pub fn get_expired_story_ids(&self, below_timestamp: i32) -> Result<Vec<StoryId>, StorageError> {
        stories::get_expired_story_ids(self.conn, below_timestamp)
    }

    pub fn story_expiration_head(&self) -> Result<Option<StoryExpirationEntry>, StorageError> {
        stories::story_expiration_head(self.conn)
    }

    /// Drop the given stories, one list rewrite per peer. Returns how many
    /// items were removed.
    pub fn remove_story_items(&mut self, ids: &[StoryId]) -> Result<usize, StorageError> {
        let mut by_peer: HashMap<PeerId, Vec<i32>> = HashMap::new();
        for id in ids {
            by_peer.entry(id.peer_id).or_default().push(id.id);
        }

        let mut removed = 0;
        for (peer_id, expired) in by_peer {
            let items = stories::get_story_items(self.conn, peer_id)?;
            let before = items.len();
            let kept: Vec<StoryItem> = items
                .into_iter()
                .filter(|item| !expired.contains(&item.id))
                .collect();
            if kept.len() == before {
                continue;
            }
            removed += before - kept.len();
            stories::set_story_items(self.conn, peer_id, &kept, self.changes)?;
        }
        Ok(removed)
    }

    // ===== Holes =====

    pub fn add_message_hole(
        &mut self,
        peer_id: PeerId,
        namespace: MessageNamespace,
        range: RangeInclusive<i32>,
        space: HoleSpace,
    ) -> Result<(), StorageError> {
        holes::add_message_hole(self.conn, self.seed, peer_id, namespace, range, space, self.changes)
    }

    pub fn remove_message_hole(
        &mut self,
        peer_id: PeerId,
        namespace: MessageNamespace,
        range: RangeInclusive<i32>,
        space: HoleSpace,
    ) -> Result<(), StorageError> {
        holes::remove_message_hole(self.conn, self.seed, peer_id, namespace, range, space, self.changes)
    }

    pub fn message_holes_overlapping(
        &self,
        peer_id: PeerId,
        namespace: MessageNamespace,
        space: HoleSpace,
        range: RangeInclusive<i32>,
    ) -> Result<Vec<MessageHistoryHole>, StorageError> {
        holes::message_holes_overlapping(self.conn, self.seed, peer_id, namespace, space, range)
    }

    pub fn all_message_holes(
        &self,
        peer_id: PeerId,
        namespace: MessageNamespace,
    ) -> Result<Vec<MessageHistoryHole>, StorageError> {
        holes::all_message_holes(self.conn, peer_id, namespace)
    }

    // ===== Chat list =====

    pub fn ensure_chat_list_group(&mut self, group_id: PeerGroupId) -> Result<(), StorageError> {
        chat_list::ensure_chat_list_group(self.conn, self.seed, group_id, self.changes)
    }

    pub fn chat_list_holes(&self, group_id: PeerGroupId) -> Result<Vec<ChatListHole>, StorageError> {
        chat_list::chat_list_holes(self.conn, group_id)
    }

    pub fn replace_chat_list_hole(
        &mut self,
        group_id: PeerGroupId,
        hole: ChatListHole,
        next: Option<ChatListHole>,
    ) -> Result<(), StorageError> {
        chat_list::replace_chat_list_hole(self.conn, group_id, hole, next, self.changes)
    }

    pub fn chat_list(&self, count: usize) -> Result<Vec<ChatListEntry>, StorageError> {
        chat_list::chat_list(self.conn, self.seed, count)
    }

    /// Resolve which released media resources are still unreferenced once
    /// the job is done.
    pub(crate) fn finalize(&mut self) -> Result<(), StorageError> {
        let mut candidates: Vec<String> = self.changes.orphan_candidates.drain().collect();
        candidates.sort();
        for resource_id in candidates {
            if indexes::media_reference_count(self.conn, &resource_id)? == 0 {
                self.changes.orphaned_media.push(resource_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{message_namespaces, peer_namespaces, timestamp_attribute_tags};
    use crate::models::{FileKind, Media, MessageAttribute, PeerKind};
    use crate::store::db::Database;

    fn peer() -> PeerId {
        PeerId::new(peer_namespaces::CLOUD_USER, 42)
    }

    fn id(n: i32) -> MessageId {
        MessageId::new(peer(), message_namespaces::CLOUD, n)
    }

    fn with_txn<R>(db: &Database, seed: &SeedConfiguration, f: impl FnOnce(&mut Transaction<'_>) -> R) -> (R, CommitChanges) {
        let mut changes = CommitChanges::default();
        let result = {
            let mut txn = Transaction::new(db.connection(), seed, &mut changes);
            let result = f(&mut txn);
            txn.finalize().unwrap();
            result
        };
        (result, changes)
    }

    fn expiring(n: i32, begin: i32, timeout: i32) -> Message {
        let mut message = Message::new(id(n), begin, format!("message {n}"));
        message.attributes.push(MessageAttribute::AutoremoveTimeout {
            timeout,
            countdown_begin: Some(begin),
        });
        message
    }

    #[test]
    fn test_add_and_get_message() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();

        let (_, changes) = with_txn(&db, &seed, |txn| {
            txn.add_messages([Message::new(id(1), 100, "hello")]).unwrap();
            assert_eq!(txn.get_message(id(1)).unwrap().unwrap().text, "hello");
            assert_eq!(txn.get_message(id(2)).unwrap(), None);
        });
        assert!(changes.inserted_messages.contains(&id(1)));
        assert!(changes.chat_list_changed);

        // First touch of a cloud history records the initial hole.
        let (holes, _) = with_txn(&db, &seed, |txn| {
            txn.message_holes_overlapping(peer(), message_namespaces::CLOUD, HoleSpace::Everywhere, 1..=10)
                .unwrap()
        });
        assert_eq!(holes.len(), 1);
    }

    #[test]
    fn test_history_and_peers() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let alice = Peer::new(peer(), "alice", PeerKind::Group);

        with_txn(&db, &seed, |txn| {
            txn.update_peers([alice.clone()]).unwrap();
            txn.add_messages((1..=5).map(|n| Message::new(id(n), 100 + n, format!("m{n}"))))
                .unwrap();
        });

        let (result, _) = with_txn(&db, &seed, |txn| {
            let history: Vec<i32> = txn
                .message_history(peer(), message_namespaces::CLOUD, 2, 3)
                .unwrap()
                .iter()
                .map(|message| message.id.id)
                .collect();
            (history, txn.get_peer(peer()).unwrap(), txn.peer_count().unwrap())
        });
        assert_eq!(result.0, vec![2, 3, 4]);
        assert_eq!(result.1, Some(alice));
        assert_eq!(result.2, 1);
    }

    #[test]
    fn test_head_moves_to_successor_on_delete() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let tag = timestamp_attribute_tags::AUTOREMOVE;

        with_txn(&db, &seed, |txn| {
            txn.add_messages([expiring(1, 100, 10), expiring(2, 100, 50)]).unwrap();
        });

        let (head, _) = with_txn(&db, &seed, |txn| txn.timestamp_based_attributes_head(tag).unwrap());
        let head = head.unwrap();
        assert_eq!(head.message_id, id(1));
        assert_eq!(head.timestamp, 110);

        let (_, changes) = with_txn(&db, &seed, |txn| {
            txn.delete_messages(&[id(1)]).unwrap();
        });
        assert!(changes.timestamp_attribute_tags.contains(&tag));

        let (head, _) = with_txn(&db, &seed, |txn| txn.timestamp_based_attributes_head(tag).unwrap());
        assert_eq!(head.unwrap().message_id, id(2));
    }

    #[test]
    fn test_update_with_different_id_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();

        with_txn(&db, &seed, |txn| {
            txn.add_messages([Message::new(id(1), 100, "a")]).unwrap();
        });
        let (updated, _) = with_txn(&db, &seed, |txn| {
            txn.update_message(id(1), |message| {
                let mut moved = message.clone();
                moved.id = id(2);
                MessageUpdate::Update(moved)
            })
            .unwrap()
        });
        assert!(!updated);

        let (stored, _) = with_txn(&db, &seed, |txn| {
            (txn.get_message(id(1)).unwrap(), txn.get_message(id(2)).unwrap())
        });
        assert!(stored.0.is_some());
        assert!(stored.1.is_none());
    }

    #[test]
    fn test_summary_counters_follow_tags() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let alice = Peer::new(
            peer(),
            "alice",
            PeerKind::User {
                is_contact: true,
                is_bot: false,
            },
        );

        with_txn(&db, &seed, |txn| {
            txn.update_peers([alice]).unwrap();
            let mut unseen = Message::new(id(1), 100, "ping");
            unseen.tags = MessageTags::UNSEEN_PERSONAL_MESSAGE;
            let mut unseen_too = Message::new(id(2), 101, "ping again");
            unseen_too.tags = MessageTags::UNSEEN_PERSONAL_MESSAGE;
            txn.add_messages([unseen, unseen_too]).unwrap();
        });

        let (counts, _) = with_txn(&db, &seed, |txn| {
            (
                txn.message_tag_summary(peer(), message_namespaces::CLOUD).unwrap(),
                txn.summary_count_for_counter_tags(PeerSummaryCounterTags::CONTACT).unwrap(),
                txn.summary_count_for_counter_tags(PeerSummaryCounterTags::BOT).unwrap(),
            )
        });
        assert_eq!(counts, (2, 2, 0));

        let (_, changes) = with_txn(&db, &seed, |txn| {
            txn.update_message(id(1), |message| {
                let mut seen = message.clone();
                seen.tags = MessageTags::empty();
                MessageUpdate::Update(seen)
            })
            .unwrap();
        });
        assert!(changes
            .updated_tag_summaries
            .contains(&(peer(), message_namespaces::CLOUD)));

        let (count, _) = with_txn(&db, &seed, |txn| {
            txn.message_tag_summary(peer(), message_namespaces::CLOUD).unwrap()
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_delete_reports_unreferenced_media() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let photo = |resource: &str| Media::Image {
            id: 1,
            resource_ids: vec![resource.to_string()],
        };

        with_txn(&db, &seed, |txn| {
            let mut first = Message::new(id(1), 100, "");
            first.media = vec![photo("shared"), photo("own")];
            let mut second = Message::new(id(2), 101, "");
            second.media = vec![photo("shared")];
            txn.add_messages([first, second]).unwrap();
        });

        let (unreferenced, changes) = with_txn(&db, &seed, |txn| txn.delete_messages(&[id(1)]).unwrap());
        assert_eq!(unreferenced, vec!["own".to_string()]);
        assert_eq!(changes.orphaned_media, vec!["own".to_string()]);
    }

    #[test]
    fn test_global_ids_and_search() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();

        with_txn(&db, &seed, |txn| {
            let mut voice = Message::new(id(7), 100, "Meeting at NOON");
            voice.media = vec![Media::File {
                id: 3,
                kind: FileKind::Voice,
                mime_type: "audio/ogg".to_string(),
                size: None,
                resource_ids: vec![],
            }];
            voice.global_tags = GlobalMessageTags::CALLS;
            txn.add_messages([voice, Message::new(id(8), 200, "lunch")]).unwrap();
        });

        let (found, _) = with_txn(&db, &seed, |txn| {
            (
                txn.message_by_global_id(7).unwrap().map(|m| m.id),
                txn.search_messages("noon", 10).unwrap().len(),
                txn.search_messages("100%", 10).unwrap().len(),
                txn.messages_with_global_tag(GlobalMessageTags::CALLS, 10).unwrap(),
            )
        });
        assert_eq!(found.0, Some(id(7)));
        assert_eq!(found.1, 1);
        assert_eq!(found.2, 0);
        assert_eq!(found.3, vec![MessageIndex::new(id(7), 100)]);
    }

    #[test]
    fn test_remove_story_items_groups_by_peer() {
        let db = Database::open_in_memory().unwrap();
        let seed = SeedConfiguration::messenger_default();
        let other = PeerId::new(peer_namespaces::CLOUD_USER, 43);

        with_txn(&db, &seed, |txn| {
            txn.set_story_items(peer(), vec![StoryItem::new(1, 0, 10), StoryItem::new(2, 0, 20)])
                .unwrap();
            txn.set_story_items(other, vec![StoryItem::new(1, 0, 15)]).unwrap();
        });

        let (removed, changes) = with_txn(&db, &seed, |txn| {
            let expired = txn.get_expired_story_ids(15).unwrap();
            txn.remove_story_items(&expired).unwrap()
        });
        assert_eq!(removed, 2);
        assert!(changes.updated_story_peers.contains(&peer()));
        assert!(changes.updated_story_peers.contains(&other));

        let (left, _) = with_txn(&db, &seed, |txn| {
            (txn.get_story_items(peer()).unwrap(), txn.get_story_items(other).unwrap())
        });
        assert_eq!(left.0, vec![StoryItem::new(2, 0, 20)]);
        assert!(left.1.is_empty());
    }
}
