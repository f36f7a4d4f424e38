use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::StorageError;
use crate::models::{MessageId, MessageNamespace, PeerId, PeerNamespace};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS peers (
    namespace INTEGER NOT NULL,
    id INTEGER NOT NULL,
    summary_counter_tags INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (namespace, id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS messages (
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    tags INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (peer_namespace, peer_id, namespace, id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS messages_by_timestamp
    ON messages (namespace, timestamp);

CREATE TABLE IF NOT EXISTS message_tag_index (
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    tag INTEGER NOT NULL,
    id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (peer_namespace, peer_id, namespace, tag, id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS message_tag_summaries (
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    tag INTEGER NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (peer_namespace, peer_id, namespace, tag)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS global_tag_index (
    tag INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    id INTEGER NOT NULL,
    PRIMARY KEY (tag, timestamp, peer_namespace, peer_id, namespace, id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS global_message_ids (
    global_id INTEGER PRIMARY KEY,
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS message_text_index (
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    id INTEGER NOT NULL,
    text TEXT NOT NULL,
    PRIMARY KEY (peer_namespace, peer_id, namespace, id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS timestamp_attributes (
    tag INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    id INTEGER NOT NULL,
    PRIMARY KEY (tag, peer_namespace, peer_id, namespace, id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS timestamp_attributes_by_time
    ON timestamp_attributes (tag, timestamp, peer_namespace, peer_id, namespace, id);

CREATE TABLE IF NOT EXISTS media_references (
    resource_id TEXT NOT NULL,
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    id INTEGER NOT NULL,
    PRIMARY KEY (resource_id, peer_namespace, peer_id, namespace, id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS message_holes (
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    space INTEGER NOT NULL,
    lower INTEGER NOT NULL,
    upper INTEGER NOT NULL,
    PRIMARY KEY (peer_namespace, peer_id, namespace, space, lower)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS initialized_histories (
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    PRIMARY KEY (peer_namespace, peer_id, namespace)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS story_items (
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (peer_namespace, peer_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS story_expiration_index (
    expiration INTEGER NOT NULL,
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    id INTEGER NOT NULL,
    PRIMARY KEY (expiration, peer_namespace, peer_id, id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS story_expiration_by_peer
    ON story_expiration_index (peer_namespace, peer_id);

CREATE TABLE IF NOT EXISTS chat_list_groups (
    group_id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS chat_list_holes (
    group_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    peer_namespace INTEGER NOT NULL,
    peer_id INTEGER NOT NULL,
    namespace INTEGER NOT NULL,
    id INTEGER NOT NULL,
    PRIMARY KEY (group_id, timestamp, peer_namespace, peer_id, namespace, id)
) WITHOUT ROWID;
"#;

/// SQLite file exclusively owned by the postbox writer thread.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// Used in tests and by tools that never persist
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

pub(crate) fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, StorageError> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

pub(crate) fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Decode a `(peer_namespace, peer_id, namespace, id)` column run starting at `start`.
pub(crate) fn message_id_from_row(
    row: &rusqlite::Row<'_>,
    start: usize,
) -> rusqlite::Result<MessageId> {
    Ok(MessageId::new(
        PeerId::new(PeerNamespace(row.get(start)?), row.get(start + 1)?),
        MessageNamespace(row.get(start + 2)?),
        row.get(start + 3)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_creation() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("nested").join("postbox.sqlite")).unwrap();

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reopen_keeps_meta() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("postbox.sqlite");
        {
            let db = Database::open(&path).unwrap();
            set_meta(db.connection(), "k", "v").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(get_meta(db.connection(), "k").unwrap().as_deref(), Some("v"));
        assert_eq!(get_meta(db.connection(), "missing").unwrap(), None);
    }
}
