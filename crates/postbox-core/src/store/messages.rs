use rusqlite::{params, Connection, OptionalExtension};
use std::ops::RangeInclusive;

use crate::error::StorageError;
use crate::models::{Message, MessageId, MessageNamespace, PeerId};

pub(crate) fn get_message(conn: &Connection, id: MessageId) -> Result<Option<Message>, StorageError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM messages
             WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND id = ?4",
            params![id.peer_id.namespace.0, id.peer_id.id, id.namespace.0, id.id],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

pub(crate) fn put_message(conn: &Connection, message: &Message) -> Result<(), StorageError> {
    let data = serde_json::to_string(message)?;
    let id = message.id;
    conn.execute(
        "INSERT OR REPLACE INTO messages
         (peer_namespace, peer_id, namespace, id, timestamp, tags, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.peer_id.namespace.0,
            id.peer_id.id,
            id.namespace.0,
            id.id,
            message.timestamp,
            message.tags.bits(),
            data
        ],
    )?;
    Ok(())
}

pub(crate) fn remove_message(conn: &Connection, id: MessageId) -> Result<(), StorageError> {
    conn.execute(
        "DELETE FROM messages
         WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND id = ?4",
        params![id.peer_id.namespace.0, id.peer_id.id, id.namespace.0, id.id],
    )?;
    Ok(())
}

/// Messages of one history with ids in `range`, ascending by id.
pub(crate) fn message_history(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    range: RangeInclusive<i32>,
    limit: usize,
) -> Result<Vec<Message>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT data FROM messages
         WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3
           AND id >= ?4 AND id <= ?5
         ORDER BY id ASC
         LIMIT ?6",
    )?;
    let rows = stmt.query_map(
        params![
            peer_id.namespace.0,
            peer_id.id,
            namespace.0,
            *range.start(),
            *range.end(),
            limit as i64
        ],
        |row| row.get::<_, String>(0),
    )?;

    let mut messages = Vec::new();
    for data in rows {
        messages.push(serde_json::from_str(&data?)?);
    }
    Ok(messages)
}

pub(crate) fn message_count(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
}
