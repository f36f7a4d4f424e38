//! Secondary message indexes and the hook list that keeps them in sync.
//!
//! Every insert, update and delete of a message runs the fixed
//! `MESSAGE_INDEX_HOOKS` list; nothing else writes these tables. An update is
//! a removal of the old representation followed by an insertion of the new one.

use rusqlite::{params, Connection, OptionalExtension};

use super::changes::CommitChanges;
use super::db::message_id_from_row;
use crate::error::StorageError;
use crate::models::{
    GlobalMessageTags, Message, MessageId, MessageIndex, MessageNamespace, MessageTags, PeerId,
    PeerSummaryCounterTags, TimestampBasedMessageAttributesEntry,
};
use crate::seed::SeedConfiguration;

pub(crate) struct HookContext<'a> {
    pub conn: &'a Connection,
    pub seed: &'a SeedConfiguration,
}

pub(crate) trait MessageIndexHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError>;

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError>;
}

pub(crate) const MESSAGE_INDEX_HOOKS: &[&dyn MessageIndexHook] = &[
    &TagIndexHook,
    &TagSummaryHook,
    &TimestampAttributesHook,
    &GlobalTagIndexHook,
    &GlobalIdIndexHook,
    &TextIndexHook,
    &MediaReferencesHook,
    &ChatListIndexHook,
];

pub(crate) fn run_insert_hooks(
    ctx: &HookContext<'_>,
    message: &Message,
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    for hook in MESSAGE_INDEX_HOOKS {
        hook.on_insert(ctx, message, changes)?;
    }
    Ok(())
}

pub(crate) fn run_remove_hooks(
    ctx: &HookContext<'_>,
    message: &Message,
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    for hook in MESSAGE_INDEX_HOOKS {
        hook.on_remove(ctx, message, changes)?;
    }
    Ok(())
}

fn delete_for_message(conn: &Connection, table: &str, id: MessageId) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "DELETE FROM {table}
             WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND id = ?4"
        ),
        params![id.peer_id.namespace.0, id.peer_id.id, id.namespace.0, id.id],
    )?;
    Ok(())
}

// ===== Tag index =====

struct TagIndexHook;

impl MessageIndexHook for TagIndexHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        let tags = message.tags & ctx.seed.existing_message_tags();
        for tag in tags.iter() {
            ctx.conn.execute(
                "INSERT OR REPLACE INTO message_tag_index
                 (peer_namespace, peer_id, namespace, tag, id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.peer_id.namespace.0,
                    id.peer_id.id,
                    id.namespace.0,
                    tag.bits(),
                    id.id,
                    message.timestamp
                ],
            )?;
        }
        Ok(())
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        delete_for_message(ctx.conn, "message_tag_index", message.id)
    }
}

/// Latest-first indexes of messages carrying a single `tag`.
pub(crate) fn message_ids_with_tag(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    tag: MessageTags,
    limit: usize,
) -> Result<Vec<MessageIndex>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, timestamp FROM message_tag_index
         WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND tag = ?4
         ORDER BY id DESC
         LIMIT ?5",
    )?;
    let rows = stmt.query_map(
        params![peer_id.namespace.0, peer_id.id, namespace.0, tag.bits(), limit as i64],
        |row| {
            Ok(MessageIndex::new(
                MessageId::new(peer_id, namespace, row.get(0)?),
                row.get(1)?,
            ))
        },
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ===== Summary counters =====

struct TagSummaryHook;

impl TagSummaryHook {
    fn adjust(
        ctx: &HookContext<'_>,
        message: &Message,
        delta: i32,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let Some(tag) = ctx.seed.summary_tag() else {
            return Ok(());
        };
        if !message.tags.contains(tag) {
            return Ok(());
        }

        let id = message.id;
        ctx.conn.execute(
            "INSERT INTO message_tag_summaries (peer_namespace, peer_id, namespace, tag, count)
             VALUES (?1, ?2, ?3, ?4, MAX(?5, 0))
             ON CONFLICT (peer_namespace, peer_id, namespace, tag)
             DO UPDATE SET count = MAX(count + ?5, 0)",
            params![
                id.peer_id.namespace.0,
                id.peer_id.id,
                id.namespace.0,
                tag.bits(),
                delta
            ],
        )?;
        changes
            .updated_tag_summaries
            .insert((id.peer_id, id.namespace));
        Ok(())
    }
}

impl MessageIndexHook for TagSummaryHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        Self::adjust(ctx, message, 1, changes)
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        Self::adjust(ctx, message, -1, changes)
    }
}

pub(crate) fn message_tag_summary(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    tag: MessageTags,
) -> Result<i32, StorageError> {
    let count = conn
        .query_row(
            "SELECT count FROM message_tag_summaries
             WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND tag = ?4",
            params![peer_id.namespace.0, peer_id.id, namespace.0, tag.bits()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

/// Summary counts summed over every peer whose counter tags intersect `counter_tags`.
pub(crate) fn summary_count_for_counter_tags(
    conn: &Connection,
    tag: MessageTags,
    counter_tags: PeerSummaryCounterTags,
) -> Result<i32, StorageError> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(s.count), 0)
         FROM message_tag_summaries s
         JOIN peers p ON p.namespace = s.peer_namespace AND p.id = s.peer_id
         WHERE s.tag = ?1 AND (p.summary_counter_tags & ?2) != 0",
        params![tag.bits(), counter_tags.bits()],
        |row| row.get(0),
    )?;
    Ok(i32::try_from(total).unwrap_or(i32::MAX))
}

// ===== Timestamp-based attributes =====

struct TimestampAttributesHook;

impl MessageIndexHook for TimestampAttributesHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        for (tag, timestamp) in message.timestamp_based_attributes() {
            ctx.conn.execute(
                "INSERT OR REPLACE INTO timestamp_attributes
                 (tag, timestamp, peer_namespace, peer_id, namespace, id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tag,
                    timestamp,
                    id.peer_id.namespace.0,
                    id.peer_id.id,
                    id.namespace.0,
                    id.id
                ],
            )?;
            changes.timestamp_attribute_tags.insert(tag);
        }
        Ok(())
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        let tags = {
            let mut stmt = ctx.conn.prepare_cached(
                "SELECT tag FROM timestamp_attributes
                 WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND id = ?4",
            )?;
            let rows = stmt.query_map(
                params![id.peer_id.namespace.0, id.peer_id.id, id.namespace.0, id.id],
                |row| row.get::<_, u16>(0),
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        if tags.is_empty() {
            return Ok(());
        }

        delete_for_message(ctx.conn, "timestamp_attributes", id)?;
        changes.timestamp_attribute_tags.extend(tags);
        Ok(())
    }
}

/// Soonest-due entry for `tag`.
pub(crate) fn timestamp_attributes_head(
    conn: &Connection,
    tag: u16,
) -> Result<Option<TimestampBasedMessageAttributesEntry>, StorageError> {
    let entry = conn
        .query_row(
            "SELECT timestamp, peer_namespace, peer_id, namespace, id FROM timestamp_attributes
             WHERE tag = ?1
             ORDER BY timestamp ASC, peer_namespace ASC, peer_id ASC, namespace ASC, id ASC
             LIMIT 1",
            params![tag],
            |row| {
                Ok(TimestampBasedMessageAttributesEntry {
                    tag,
                    timestamp: row.get(0)?,
                    message_id: message_id_from_row(row, 1)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

/// Returns whether an entry was removed.
pub(crate) fn clear_timestamp_attribute(
    conn: &Connection,
    id: MessageId,
    tag: u16,
) -> Result<bool, StorageError> {
    let removed = conn.execute(
        "DELETE FROM timestamp_attributes
         WHERE tag = ?1 AND peer_namespace = ?2 AND peer_id = ?3 AND namespace = ?4 AND id = ?5",
        params![tag, id.peer_id.namespace.0, id.peer_id.id, id.namespace.0, id.id],
    )?;
    Ok(removed > 0)
}

// ===== Global tags =====

struct GlobalTagIndexHook;

impl MessageIndexHook for GlobalTagIndexHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        let tags = message.global_tags & ctx.seed.existing_global_message_tags();
        for tag in tags.iter() {
            ctx.conn.execute(
                "INSERT OR REPLACE INTO global_tag_index
                 (tag, timestamp, peer_namespace, peer_id, namespace, id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tag.bits(),
                    message.timestamp,
                    id.peer_id.namespace.0,
                    id.peer_id.id,
                    id.namespace.0,
                    id.id
                ],
            )?;
        }
        Ok(())
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        delete_for_message(ctx.conn, "global_tag_index", message.id)
    }
}

/// Latest-first indexes across all peers carrying a single global `tag`.
pub(crate) fn messages_with_global_tag(
    conn: &Connection,
    tag: GlobalMessageTags,
    limit: usize,
) -> Result<Vec<MessageIndex>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT timestamp, peer_namespace, peer_id, namespace, id FROM global_tag_index
         WHERE tag = ?1
         ORDER BY timestamp DESC, peer_namespace DESC, peer_id DESC, namespace DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![tag.bits(), limit as i64], |row| {
        Ok(MessageIndex::new(message_id_from_row(row, 1)?, row.get(0)?))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ===== Global message ids =====

struct GlobalIdIndexHook;

impl MessageIndexHook for GlobalIdIndexHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        if !ctx
            .seed
            .is_global_message_ids_namespace(id.peer_id.namespace, id.namespace)
        {
            return Ok(());
        }
        ctx.conn.execute(
            "INSERT OR REPLACE INTO global_message_ids (global_id, peer_namespace, peer_id, namespace)
             VALUES (?1, ?2, ?3, ?4)",
            params![id.id, id.peer_id.namespace.0, id.peer_id.id, id.namespace.0],
        )?;
        Ok(())
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        ctx.conn.execute(
            "DELETE FROM global_message_ids
             WHERE global_id = ?1 AND peer_namespace = ?2 AND peer_id = ?3 AND namespace = ?4",
            params![id.id, id.peer_id.namespace.0, id.peer_id.id, id.namespace.0],
        )?;
        Ok(())
    }
}

pub(crate) fn message_id_by_global_id(
    conn: &Connection,
    global_id: i32,
) -> Result<Option<MessageId>, StorageError> {
    let id = conn
        .query_row(
            "SELECT peer_namespace, peer_id, namespace, global_id FROM global_message_ids
             WHERE global_id = ?1",
            params![global_id],
            |row| message_id_from_row(row, 0),
        )
        .optional()?;
    Ok(id)
}

// ===== Text index =====

struct TextIndexHook;

impl MessageIndexHook for TextIndexHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        if !ctx.seed.requires_text_index(id.peer_id.namespace) || message.text.trim().is_empty() {
            return Ok(());
        }
        ctx.conn.execute(
            "INSERT OR REPLACE INTO message_text_index (peer_namespace, peer_id, namespace, id, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.peer_id.namespace.0,
                id.peer_id.id,
                id.namespace.0,
                id.id,
                message.text.to_lowercase()
            ],
        )?;
        Ok(())
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        _changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        delete_for_message(ctx.conn, "message_text_index", message.id)
    }
}

/// Case-insensitive substring search, latest messages first.
pub(crate) fn search_text(
    conn: &Connection,
    query: &str,
    limit: usize,
) -> Result<Vec<MessageId>, StorageError> {
    let escaped = query
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");

    let mut stmt = conn.prepare_cached(
        "SELECT t.peer_namespace, t.peer_id, t.namespace, t.id
         FROM message_text_index t
         JOIN messages m USING (peer_namespace, peer_id, namespace, id)
         WHERE t.text LIKE ?1 ESCAPE '\\'
         ORDER BY m.timestamp DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![pattern, limit as i64], |row| message_id_from_row(row, 0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ===== Media references =====

struct MediaReferencesHook;

impl MessageIndexHook for MediaReferencesHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        let id = message.id;
        for resource_id in message.media_resource_ids() {
            ctx.conn.execute(
                "INSERT OR IGNORE INTO media_references (resource_id, peer_namespace, peer_id, namespace, id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    resource_id,
                    id.peer_id.namespace.0,
                    id.peer_id.id,
                    id.namespace.0,
                    id.id
                ],
            )?;
            changes.orphan_candidates.remove(resource_id);
        }
        Ok(())
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        delete_for_message(ctx.conn, "media_references", message.id)?;
        changes
            .orphan_candidates
            .extend(message.media_resource_ids().cloned());
        Ok(())
    }
}

pub(crate) fn media_reference_count(conn: &Connection, resource_id: &str) -> Result<i64, StorageError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM media_references WHERE resource_id = ?1",
        params![resource_id],
        |row| row.get(0),
    )?)
}

// ===== Chat list =====

struct ChatListIndexHook;

impl ChatListIndexHook {
    fn mark(ctx: &HookContext<'_>, message: &Message, changes: &mut CommitChanges) {
        if ctx
            .seed
            .chat_list_index_namespaces()
            .contains(&message.id.namespace)
        {
            changes.chat_list_changed = true;
        }
    }
}

impl MessageIndexHook for ChatListIndexHook {
    fn on_insert(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        Self::mark(ctx, message, changes);
        Ok(())
    }

    fn on_remove(
        &self,
        ctx: &HookContext<'_>,
        message: &Message,
        changes: &mut CommitChanges,
    ) -> Result<(), StorageError> {
        Self::mark(ctx, message, changes);
        Ok(())
    }
}
