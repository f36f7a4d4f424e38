use rusqlite::{params, Connection, OptionalExtension};

use super::changes::CommitChanges;
use crate::error::StorageError;
use crate::models::{PeerId, PeerNamespace, StoryExpirationEntry, StoryId, StoryItem};

pub(crate) fn get_story_items(conn: &Connection, peer_id: PeerId) -> Result<Vec<StoryItem>, StorageError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM story_items WHERE peer_namespace = ?1 AND peer_id = ?2",
            params![peer_id.namespace.0, peer_id.id],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(data) => Ok(serde_json::from_str(&data)?),
        None => Ok(Vec::new()),
    }
}

/// Replace the peer's story list and rebuild its expiration index rows.
pub(crate) fn set_story_items(
    conn: &Connection,
    peer_id: PeerId,
    items: &[StoryItem],
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    if items.is_empty() {
        conn.execute(
            "DELETE FROM story_items WHERE peer_namespace = ?1 AND peer_id = ?2",
            params![peer_id.namespace.0, peer_id.id],
        )?;
    } else {
        conn.execute(
            "INSERT OR REPLACE INTO story_items (peer_namespace, peer_id, data) VALUES (?1, ?2, ?3)",
            params![peer_id.namespace.0, peer_id.id, serde_json::to_string(items)?],
        )?;
    }

    conn.execute(
        "DELETE FROM story_expiration_index WHERE peer_namespace = ?1 AND peer_id = ?2",
        params![peer_id.namespace.0, peer_id.id],
    )?;
    for item in items {
        conn.execute(
            "INSERT OR REPLACE INTO story_expiration_index (expiration, peer_namespace, peer_id, id)
             VALUES (?1, ?2, ?3, ?4)",
            params![item.expiration_timestamp, peer_id.namespace.0, peer_id.id, item.id],
        )?;
    }

    changes.updated_story_peers.insert(peer_id);
    changes.story_expiration_changed = true;
    Ok(())
}

fn story_id_from_row(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<StoryId> {
    Ok(StoryId {
        peer_id: PeerId::new(PeerNamespace(row.get(start)?), row.get(start + 1)?),
        id: row.get(start + 2)?,
    })
}

/// Stories whose expiration is at or before `below_timestamp`.
pub(crate) fn get_expired_story_ids(
    conn: &Connection,
    below_timestamp: i32,
) -> Result<Vec<StoryId>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT peer_namespace, peer_id, id FROM story_expiration_index
         WHERE expiration <= ?1
         ORDER BY expiration ASC, peer_namespace ASC, peer_id ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![below_timestamp], |row| story_id_from_row(row, 0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn story_expiration_head(conn: &Connection) -> Result<Option<StoryExpirationEntry>, StorageError> {
    let entry = conn
        .query_row(
            "SELECT expiration, peer_namespace, peer_id, id FROM story_expiration_index
             ORDER BY expiration ASC, peer_namespace ASC, peer_id ASC, id ASC
             LIMIT 1",
            [],
            |row| {
                Ok(StoryExpirationEntry {
                    expiration_timestamp: row.get(0)?,
                    id: story_id_from_row(row, 1)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::peer_namespaces;
    use crate::store::db::Database;

    #[test]
    fn test_expired_story_cutoff_is_inclusive() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let peer = PeerId::new(peer_namespaces::CLOUD_USER, 5);

        set_story_items(
            conn,
            peer,
            &[
                StoryItem::new(1, 0, 100),
                StoryItem::new(2, 0, 200),
                StoryItem::new(3, 0, 300),
            ],
            &mut changes,
        )
        .unwrap();

        let expired = get_expired_story_ids(conn, 200).unwrap();
        assert_eq!(
            expired,
            vec![StoryId { peer_id: peer, id: 1 }, StoryId { peer_id: peer, id: 2 }]
        );
        assert!(changes.story_expiration_changed);
    }

    #[test]
    fn test_head_follows_rewrites() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let peer = PeerId::new(peer_namespaces::CLOUD_USER, 5);

        assert_eq!(story_expiration_head(conn).unwrap(), None);

        set_story_items(
            conn,
            peer,
            &[StoryItem::new(1, 0, 100), StoryItem::new(2, 0, 50)],
            &mut changes,
        )
        .unwrap();
        let head = story_expiration_head(conn).unwrap().unwrap();
        assert_eq!(head.id.id, 2);
        assert_eq!(head.expiration_timestamp, 50);

        set_story_items(conn, peer, &[StoryItem::new(1, 0, 100)], &mut changes).unwrap();
        assert_eq!(story_expiration_head(conn).unwrap().unwrap().id.id, 1);
        assert_eq!(get_story_items(conn, peer).unwrap().len(), 1);

        set_story_items(conn, peer, &[], &mut changes).unwrap();
        assert_eq!(story_expiration_head(conn).unwrap(), None);
        assert!(get_story_items(conn, peer).unwrap().is_empty());
    }
}
