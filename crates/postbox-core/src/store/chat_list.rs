use rusqlite::{params, Connection, OptionalExtension};

use super::changes::CommitChanges;
use super::db::{get_meta, message_id_from_row, set_meta};
use crate::error::StorageError;
use crate::models::{ChatListEntry, ChatListHole, MessageIndex, PeerGroupId};
use crate::seed::SeedConfiguration;

const CHAT_LIST_INITIALIZED: &str = "chat_list_initialized";

/// Create the top-level list on first open of a store.
pub(crate) fn initialize_chat_list(conn: &Connection, seed: &SeedConfiguration) -> Result<(), StorageError> {
    if get_meta(conn, CHAT_LIST_INITIALIZED)?.is_some() {
        return Ok(());
    }

    conn.execute(
        "INSERT OR IGNORE INTO chat_list_groups (group_id) VALUES (?1)",
        params![PeerGroupId::ROOT.0],
    )?;
    if let Some(hole) = seed.initialize_chat_list_with_hole().0 {
        insert_hole(conn, PeerGroupId::ROOT, hole)?;
    }
    set_meta(conn, CHAT_LIST_INITIALIZED, "1")?;
    tracing::debug!("Chat list initialized");
    Ok(())
}

/// Create a folder list the first time it is referenced.
pub(crate) fn ensure_chat_list_group(
    conn: &Connection,
    seed: &SeedConfiguration,
    group_id: PeerGroupId,
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    let exists: Option<i32> = conn
        .query_row(
            "SELECT group_id FROM chat_list_groups WHERE group_id = ?1",
            params![group_id.0],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Ok(());
    }

    conn.execute(
        "INSERT INTO chat_list_groups (group_id) VALUES (?1)",
        params![group_id.0],
    )?;
    if let Some(hole) = seed.initialize_chat_list_with_hole().1 {
        insert_hole(conn, group_id, hole)?;
        changes.updated_chat_list_holes.insert(group_id);
    }
    Ok(())
}

fn insert_hole(conn: &Connection, group_id: PeerGroupId, hole: ChatListHole) -> Result<(), StorageError> {
    let id = hole.index.id;
    conn.execute(
        "INSERT OR REPLACE INTO chat_list_holes
         (group_id, timestamp, peer_namespace, peer_id, namespace, id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            group_id.0,
            hole.index.timestamp,
            id.peer_id.namespace.0,
            id.peer_id.id,
            id.namespace.0,
            id.id
        ],
    )?;
    Ok(())
}

/// Holes of a list, highest index first.
pub(crate) fn chat_list_holes(conn: &Connection, group_id: PeerGroupId) -> Result<Vec<ChatListHole>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT timestamp, peer_namespace, peer_id, namespace, id FROM chat_list_holes
         WHERE group_id = ?1
         ORDER BY timestamp DESC, peer_namespace DESC, peer_id DESC, namespace DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![group_id.0], |row| {
        Ok(ChatListHole::new(MessageIndex::new(
            message_id_from_row(row, 1)?,
            row.get(0)?,
        )))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Replace `hole` by `next` (the remaining unloaded part, if any).
pub(crate) fn replace_chat_list_hole(
    conn: &Connection,
    group_id: PeerGroupId,
    hole: ChatListHole,
    next: Option<ChatListHole>,
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    let id = hole.index.id;
    let removed = conn.execute(
        "DELETE FROM chat_list_holes
         WHERE group_id = ?1 AND timestamp = ?2 AND peer_namespace = ?3 AND peer_id = ?4
           AND namespace = ?5 AND id = ?6",
        params![
            group_id.0,
            hole.index.timestamp,
            id.peer_id.namespace.0,
            id.peer_id.id,
            id.namespace.0,
            id.id
        ],
    )?;
    if removed == 0 {
        tracing::debug!(group = group_id.0, "Chat list hole to replace is not recorded");
    }
    if let Some(next) = next {
        insert_hole(conn, group_id, next)?;
    }
    changes.updated_chat_list_holes.insert(group_id);
    Ok(())
}

/// Peers ordered by their latest message in the chat list namespaces, newest first.
pub(crate) fn chat_list(
    conn: &Connection,
    seed: &SeedConfiguration,
    count: usize,
) -> Result<Vec<ChatListEntry>, StorageError> {
    let namespaces = seed
        .chat_list_index_namespaces()
        .iter()
        .map(|namespace| namespace.0.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    // Bare columns next to MAX() come from the row holding the maximum.
    let sql = format!(
        "SELECT peer_namespace, peer_id, namespace, id, MAX(timestamp) AS latest
         FROM messages
         WHERE namespace IN ({namespaces})
         GROUP BY peer_namespace, peer_id
         ORDER BY latest DESC, peer_namespace DESC, peer_id DESC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![count as i64], |row| {
        let id = message_id_from_row(row, 0)?;
        Ok(ChatListEntry {
            peer_id: id.peer_id,
            index: MessageIndex::new(id, row.get(4)?),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
