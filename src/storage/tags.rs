//! Tag dedup.
//!
//! A tag row is identified by its name alone: the first write of a name wins
//! and later tags with that name reuse the row, whatever value they carry.
//! The unique index on `tags(name)` keeps concurrent ingests from creating
//! duplicates; the losing insert re-reads the winner.

use rusqlite::{Connection, OptionalExtension, params};

use super::Storage;
use crate::models::Tag;
use crate::{Error, Result};

/// Find the tag called `name`, or create it with `value`.
///
/// `value` is only stored when the name is new. Calling this twice with the
/// same name, inside or across transactions, yields the same tag id.
pub fn resolve_tag(conn: &Connection, name: &str, value: Option<&str>) -> Result<Tag> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("tag name must not be empty".to_string()));
    }

    if let Some(tag) = find_tag(conn, name)? {
        return Ok(tag);
    }

    let inserted = conn.execute(
        "INSERT INTO tags (name, value) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
        params![name, value],
    )?;
    if inserted == 0 {
        tracing::debug!(name, "tag created concurrently, reusing");
    }

    find_tag(conn, name)?
        .ok_or_else(|| Error::NotFound(format!("Tag not found after insert: {}", name)))
}

fn find_tag(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let tag = conn
        .query_row(
            "SELECT id, name, value FROM tags WHERE name = ?1",
            params![name],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(tag)
}

impl Storage {
    /// Resolve a single tag outside of ingest.
    pub fn resolve_tag(&mut self, name: &str, value: Option<&str>) -> Result<Tag> {
        resolve_tag(&self.conn, name, value)
    }

    /// All known tags by name.
    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, value FROM tags ORDER BY name, id")?;
        let tags = stmt
            .query_map([], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::test_utils::new_run;

    #[test]
    fn test_resolve_same_tag_twice() {
        let mut storage = Storage::open_in_memory().unwrap();
        let first = storage.resolve_tag("owner", Some("amy")).unwrap();
        let second = storage.resolve_tag("owner", Some("amy")).unwrap();
        assert_eq!(first, second);
        assert_eq!(storage.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_within_one_transaction() {
        let mut storage = Storage::open_in_memory().unwrap();
        let (a, b) = storage
            .run_in_transaction("resolve_twice", &CancellationToken::new(), |tx| {
                let a = resolve_tag(tx, "component", Some("ui"))?;
                let b = resolve_tag(tx, "component", Some("ui"))?;
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_first_value_wins_for_a_name() {
        let mut storage = Storage::open_in_memory().unwrap();
        let amy = storage.resolve_tag("owner", Some("amy")).unwrap();
        let bob = storage.resolve_tag("owner", Some("bob")).unwrap();
        let bare = storage.resolve_tag(" owner ", None).unwrap();
        assert_eq!(amy, bob);
        assert_eq!(amy, bare);
        assert_eq!(bob.value.as_deref(), Some("amy"));
        assert_eq!(storage.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn test_later_ingest_reuses_first_written_tag() {
        let mut storage = Storage::open_in_memory().unwrap();
        let token = CancellationToken::new();
        let first = storage
            .ingest_test_run(&new_run(None, &[("passed", &[("owner", "amy")])]), &token)
            .unwrap();
        let second = storage
            .ingest_test_run(&new_run(None, &[("failed", &[("owner", "bob")])]), &token)
            .unwrap();

        let tags = storage.list_tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value.as_deref(), Some("amy"));

        let first_tag = &first.spec_runs().next().unwrap().tags[0];
        let second_tag = &second.spec_runs().next().unwrap().tags[0];
        assert_eq!(first_tag.id, second_tag.id);
        assert_eq!(second_tag.value.as_deref(), Some("amy"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut storage = Storage::open_in_memory().unwrap();
        assert!(matches!(
            storage.resolve_tag("  ", Some("x")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ingests_share_tag_rows() {
        let mut storage = Storage::open_in_memory().unwrap();
        let token = CancellationToken::new();
        let tags: &[(&str, &str)] = &[("owner", "amy"), ("priority", "high")];
        let first = storage
            .ingest_test_run(&new_run(None, &[("passed", tags)]), &token)
            .unwrap();
        let second = storage
            .ingest_test_run(&new_run(None, &[("failed", tags), ("passed", tags)]), &token)
            .unwrap();

        assert_eq!(storage.list_tags().unwrap().len(), 2);
        let first_ids: Vec<i64> = first.spec_runs().flat_map(|s| s.tags.iter().map(|t| t.id)).collect();
        let second_ids: Vec<i64> = second
            .spec_runs()
            .take(1)
            .flat_map(|s| s.tags.iter().map(|t| t.id))
            .collect();
        assert_eq!(first_ids, second_ids);
    }
}
