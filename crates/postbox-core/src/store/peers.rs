use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::models::{Peer, PeerId, PeerSummaryCounterTags};

pub(crate) fn get_peer(conn: &Connection, id: PeerId) -> Result<Option<Peer>, StorageError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM peers WHERE namespace = ?1 AND id = ?2",
            params![id.namespace.0, id.id],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

pub(crate) fn put_peer(
    conn: &Connection,
    peer: &Peer,
    counter_tags: PeerSummaryCounterTags,
) -> Result<(), StorageError> {
    let data = serde_json::to_string(peer)?;
    conn.execute(
        "INSERT OR REPLACE INTO peers (namespace, id, summary_counter_tags, data)
         VALUES (?1, ?2, ?3, ?4)",
        params![peer.id.namespace.0, peer.id.id, counter_tags.bits(), data],
    )?;
    Ok(())
}

pub(crate) fn peer_count(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM peers", [], |row| row.get(0))?)
}
