//! Message history holes.
//!
//! Holes are stored per (peer, namespace, space) as disjoint, non-adjacent
//! inclusive id ranges. Space `0` is the untagged history; every other space
//! key is the bits of one hole-tracked tag set.

use rusqlite::{params, Connection, OptionalExtension};
use std::ops::RangeInclusive;

use super::changes::CommitChanges;
use crate::error::StorageError;
use crate::models::{HoleSpace, MessageHistoryHole, MessageNamespace, PeerId};
use crate::seed::SeedConfiguration;

/// Space keys a hole operation applies to, or `None` when the history or the
/// tag set is not hole-tracked.
fn target_spaces(
    seed: &SeedConfiguration,
    peer_id: PeerId,
    namespace: MessageNamespace,
    space: HoleSpace,
) -> Option<Vec<u32>> {
    let tag_sets = seed.hole_tag_sets(peer_id.namespace, namespace)?;
    let spaces = match space {
        HoleSpace::Everywhere => {
            let mut keys: Vec<u32> = std::iter::once(HoleSpace::Everywhere.key())
                .chain(tag_sets.iter().map(|tags| HoleSpace::Tag(*tags).key()))
                .collect();
            keys.sort_unstable();
            keys.dedup();
            keys
        }
        // The empty set would alias the untagged space.
        HoleSpace::Tag(tags) if tags.is_empty() || !tag_sets.contains(&tags) => return None,
        HoleSpace::Tag(tags) => vec![HoleSpace::Tag(tags).key()],
    };
    Some(spaces)
}

fn ranges_touching(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    space: u32,
    lower: i64,
    upper: i64,
) -> Result<Vec<(i32, i32)>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT lower, upper FROM message_holes
         WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND space = ?4
           AND lower <= ?6 AND upper >= ?5
         ORDER BY lower ASC",
    )?;
    let rows = stmt.query_map(
        params![peer_id.namespace.0, peer_id.id, namespace.0, space, lower, upper],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn delete_range(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    space: u32,
    lower: i32,
) -> Result<(), StorageError> {
    conn.execute(
        "DELETE FROM message_holes
         WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3 AND space = ?4 AND lower = ?5",
        params![peer_id.namespace.0, peer_id.id, namespace.0, space, lower],
    )?;
    Ok(())
}

fn insert_range(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    space: u32,
    lower: i32,
    upper: i32,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO message_holes (peer_namespace, peer_id, namespace, space, lower, upper)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![peer_id.namespace.0, peer_id.id, namespace.0, space, lower, upper],
    )?;
    Ok(())
}

/// Merge `range` into a single space, absorbing overlapping and adjacent holes.
fn add_to_space(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    space: u32,
    range: &RangeInclusive<i32>,
) -> Result<(), StorageError> {
    let (start, end) = (*range.start(), *range.end());
    let touching = ranges_touching(
        conn,
        peer_id,
        namespace,
        space,
        i64::from(start) - 1,
        i64::from(end) + 1,
    )?;

    let mut lower = start;
    let mut upper = end;
    for (existing_lower, existing_upper) in touching {
        lower = lower.min(existing_lower);
        upper = upper.max(existing_upper);
        delete_range(conn, peer_id, namespace, space, existing_lower)?;
    }
    insert_range(conn, peer_id, namespace, space, lower, upper)
}

/// Subtract `range` from a single space, shrinking or splitting holes.
fn remove_from_space(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
    space: u32,
    range: &RangeInclusive<i32>,
) -> Result<bool, StorageError> {
    let (start, end) = (*range.start(), *range.end());
    let overlapping = ranges_touching(
        conn,
        peer_id,
        namespace,
        space,
        i64::from(start),
        i64::from(end),
    )?;
    if overlapping.is_empty() {
        return Ok(false);
    }

    for (lower, upper) in overlapping {
        delete_range(conn, peer_id, namespace, space, lower)?;
        if lower < start {
            insert_range(conn, peer_id, namespace, space, lower, start - 1)?;
        }
        if upper > end {
            insert_range(conn, peer_id, namespace, space, end + 1, upper)?;
        }
    }
    Ok(true)
}

fn stored_spaces(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
) -> Result<Vec<u32>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT space FROM message_holes
         WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3",
    )?;
    let rows = stmt.query_map(params![peer_id.namespace.0, peer_id.id, namespace.0], |row| {
        row.get(0)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn add_message_hole(
    conn: &Connection,
    seed: &SeedConfiguration,
    peer_id: PeerId,
    namespace: MessageNamespace,
    range: RangeInclusive<i32>,
    space: HoleSpace,
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    if range.is_empty() {
        return Ok(());
    }
    let Some(spaces) = target_spaces(seed, peer_id, namespace, space) else {
        return Ok(());
    };

    for key in spaces {
        add_to_space(conn, peer_id, namespace, key, &range)?;
    }
    changes.updated_holes.insert((peer_id, namespace));
    Ok(())
}

pub(crate) fn remove_message_hole(
    conn: &Connection,
    seed: &SeedConfiguration,
    peer_id: PeerId,
    namespace: MessageNamespace,
    range: RangeInclusive<i32>,
    space: HoleSpace,
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    if range.is_empty() {
        return Ok(());
    }
    let Some(mut spaces) = target_spaces(seed, peer_id, namespace, space) else {
        return Ok(());
    };
    if space == HoleSpace::Everywhere {
        spaces.extend(stored_spaces(conn, peer_id, namespace)?);
        spaces.sort_unstable();
        spaces.dedup();
    }

    let mut removed = false;
    for key in spaces {
        removed |= remove_from_space(conn, peer_id, namespace, key, &range)?;
    }
    if removed {
        changes.updated_holes.insert((peer_id, namespace));
    }
    Ok(())
}

/// Recorded holes of one space intersecting `range`, clipped to it.
pub(crate) fn message_holes_overlapping(
    conn: &Connection,
    seed: &SeedConfiguration,
    peer_id: PeerId,
    namespace: MessageNamespace,
    space: HoleSpace,
    range: RangeInclusive<i32>,
) -> Result<Vec<MessageHistoryHole>, StorageError> {
    if range.is_empty() || target_spaces(seed, peer_id, namespace, space).is_none() {
        return Ok(Vec::new());
    }

    let (start, end) = (*range.start(), *range.end());
    let holes = ranges_touching(
        conn,
        peer_id,
        namespace,
        space.key(),
        i64::from(start),
        i64::from(end),
    )?
    .into_iter()
    .map(|(lower, upper)| MessageHistoryHole {
        peer_id,
        namespace,
        space,
        range: lower.max(start)..=upper.min(end),
    })
    .collect();
    Ok(holes)
}

/// Every recorded hole of a history across all spaces.
pub(crate) fn all_message_holes(
    conn: &Connection,
    peer_id: PeerId,
    namespace: MessageNamespace,
) -> Result<Vec<MessageHistoryHole>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT space, lower, upper FROM message_holes
         WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3
         ORDER BY space ASC, lower ASC",
    )?;
    let rows = stmt.query_map(params![peer_id.namespace.0, peer_id.id, namespace.0], |row| {
        let space: u32 = row.get(0)?;
        let lower: i32 = row.get(1)?;
        let upper: i32 = row.get(2)?;
        Ok(MessageHistoryHole {
            peer_id,
            namespace,
            space: HoleSpace::from_key(space),
            range: lower..=upper,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Record the first touch of a history. Histories configured to start with a
/// hole get `1..=i32::MAX` in every space.
pub(crate) fn ensure_history_initialized(
    conn: &Connection,
    seed: &SeedConfiguration,
    peer_id: PeerId,
    namespace: MessageNamespace,
    changes: &mut CommitChanges,
) -> Result<(), StorageError> {
    let known: Option<i32> = conn
        .query_row(
            "SELECT 1 FROM initialized_histories
             WHERE peer_namespace = ?1 AND peer_id = ?2 AND namespace = ?3",
            params![peer_id.namespace.0, peer_id.id, namespace.0],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_some() {
        return Ok(());
    }

    conn.execute(
        "INSERT INTO initialized_histories (peer_namespace, peer_id, namespace) VALUES (?1, ?2, ?3)",
        params![peer_id.namespace.0, peer_id.id, namespace.0],
    )?;

    if seed.initializes_with_hole(peer_id.namespace, namespace) {
        tracing::debug!(peer = %peer_id, namespace = namespace.0, "Initializing history with hole");
        add_message_hole(
            conn,
            seed,
            peer_id,
            namespace,
            1..=i32::MAX,
            HoleSpace::Everywhere,
            changes,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{message_namespaces, peer_namespaces};
    use crate::models::MessageTags;
    use crate::store::db::Database;

    fn seed() -> SeedConfiguration {
        SeedConfiguration::builder()
            .existing_message_tags(MessageTags::PHOTO | MessageTags::FILE)
            .message_holes(
                peer_namespaces::CLOUD_USER,
                message_namespaces::CLOUD,
                [MessageTags::PHOTO, MessageTags::FILE].into_iter().collect(),
            )
            .initialize_message_namespace_with_holes(
                peer_namespaces::CLOUD_USER,
                message_namespaces::CLOUD,
            )
            .build()
            .unwrap()
    }

    fn peer() -> PeerId {
        PeerId::new(peer_namespaces::CLOUD_USER, 1)
    }

    fn ranges(holes: &[MessageHistoryHole]) -> Vec<(i32, i32)> {
        holes
            .iter()
            .map(|hole| (*hole.range.start(), *hole.range.end()))
            .collect()
    }

    #[test]
    fn test_adjacent_and_overlapping_holes_merge() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        add_message_hole(conn, &seed, peer(), ns, 1..=10, HoleSpace::Everywhere, &mut changes).unwrap();
        add_message_hole(conn, &seed, peer(), ns, 11..=20, HoleSpace::Everywhere, &mut changes).unwrap();
        add_message_hole(conn, &seed, peer(), ns, 30..=40, HoleSpace::Everywhere, &mut changes).unwrap();
        add_message_hole(conn, &seed, peer(), ns, 35..=50, HoleSpace::Everywhere, &mut changes).unwrap();

        let holes = message_holes_overlapping(
            conn,
            &seed,
            peer(),
            ns,
            HoleSpace::Everywhere,
            1..=100,
        )
        .unwrap();
        assert_eq!(ranges(&holes), vec![(1, 20), (30, 50)]);

        let photo = message_holes_overlapping(
            conn,
            &seed,
            peer(),
            ns,
            HoleSpace::Tag(MessageTags::PHOTO),
            1..=100,
        )
        .unwrap();
        assert_eq!(ranges(&photo), vec![(1, 20), (30, 50)]);
        assert!(changes.updated_holes.contains(&(peer(), ns)));
    }

    #[test]
    fn test_partial_fill_splits_hole() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        add_message_hole(conn, &seed, peer(), ns, 1..=100, HoleSpace::Everywhere, &mut changes).unwrap();
        remove_message_hole(conn, &seed, peer(), ns, 40..=60, HoleSpace::Everywhere, &mut changes).unwrap();

        let holes = message_holes_overlapping(
            conn,
            &seed,
            peer(),
            ns,
            HoleSpace::Everywhere,
            1..=100,
        )
        .unwrap();
        assert_eq!(ranges(&holes), vec![(1, 39), (61, 100)]);
    }

    #[test]
    fn test_tag_fill_leaves_other_spaces() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        add_message_hole(conn, &seed, peer(), ns, 1..=100, HoleSpace::Everywhere, &mut changes).unwrap();
        remove_message_hole(
            conn,
            &seed,
            peer(),
            ns,
            1..=100,
            HoleSpace::Tag(MessageTags::PHOTO),
            &mut changes,
        )
        .unwrap();

        let overlapping = |space| {
            message_holes_overlapping(conn, &seed, peer(), ns, space, 1..=100).unwrap()
        };
        assert!(overlapping(HoleSpace::Tag(MessageTags::PHOTO)).is_empty());
        assert_eq!(ranges(&overlapping(HoleSpace::Tag(MessageTags::FILE))), vec![(1, 100)]);
        assert_eq!(ranges(&overlapping(HoleSpace::Everywhere)), vec![(1, 100)]);
    }

    #[test]
    fn test_untracked_tag_set_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        add_message_hole(conn, &seed, peer(), ns, 1..=10, HoleSpace::Tag(MessageTags::GIF), &mut changes)
            .unwrap();
        assert!(changes.updated_holes.is_empty());

        let holes = message_holes_overlapping(
            conn,
            &seed,
            peer(),
            ns,
            HoleSpace::Tag(MessageTags::GIF),
            1..=10,
        )
        .unwrap();
        assert!(holes.is_empty());
        assert!(all_message_holes(conn, peer(), ns).unwrap().is_empty());
    }

    #[test]
    fn test_empty_tag_set_leaves_untagged_history() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        add_message_hole(conn, &seed, peer(), ns, 100..=200, HoleSpace::Everywhere, &mut changes).unwrap();
        remove_message_hole(
            conn,
            &seed,
            peer(),
            ns,
            100..=200,
            HoleSpace::Tag(MessageTags::empty()),
            &mut changes,
        )
        .unwrap();

        let holes = message_holes_overlapping(
            conn,
            &seed,
            peer(),
            ns,
            HoleSpace::Everywhere,
            1..=300,
        )
        .unwrap();
        assert_eq!(ranges(&holes), vec![(100, 200)]);
        assert!(message_holes_overlapping(
            conn,
            &seed,
            peer(),
            ns,
            HoleSpace::Tag(MessageTags::empty()),
            1..=300,
        )
        .unwrap()
        .is_empty());
    }

    #[test]
    fn test_overlapping_is_clipped() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        add_message_hole(conn, &seed, peer(), ns, 10..=90, HoleSpace::Everywhere, &mut changes).unwrap();
        let holes = message_holes_overlapping(
            conn,
            &seed,
            peer(),
            ns,
            HoleSpace::Everywhere,
            50..=200,
        )
        .unwrap();
        assert_eq!(ranges(&holes), vec![(50, 90)]);
    }

    #[test]
    fn test_untracked_history_has_no_holes() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let secret = PeerId::new(peer_namespaces::SECRET_CHAT, 1);
        let ns = message_namespaces::CLOUD;

        add_message_hole(conn, &seed, secret, ns, 1..=10, HoleSpace::Everywhere, &mut changes).unwrap();
        assert!(changes.updated_holes.is_empty());
        assert!(message_holes_overlapping(
            conn,
            &seed,
            secret,
            ns,
            HoleSpace::Everywhere,
            1..=10
        )
        .unwrap()
        .is_empty());
    }

    #[test]
    fn test_history_initialized_once() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        ensure_history_initialized(conn, &seed, peer(), ns, &mut changes).unwrap();
        remove_message_hole(conn, &seed, peer(), ns, 1..=i32::MAX, HoleSpace::Everywhere, &mut changes)
            .unwrap();
        ensure_history_initialized(conn, &seed, peer(), ns, &mut changes).unwrap();

        assert!(all_message_holes(conn, peer(), ns).unwrap().is_empty());
    }

    #[test]
    fn test_initial_hole_covers_all_spaces() {
        let db = Database::open_in_memory().unwrap();
        let seed = seed();
        let conn = db.connection();
        let mut changes = CommitChanges::default();
        let ns = message_namespaces::CLOUD;

        ensure_history_initialized(conn, &seed, peer(), ns, &mut changes).unwrap();
        let holes = all_message_holes(conn, peer(), ns).unwrap();
        assert_eq!(holes.len(), 3);
        assert!(holes.iter().all(|hole| hole.range == (1..=i32::MAX)));
    }
}
