use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::errors::{FavError, Result};
use super::models::{
    ClipMetadata, ClipQuery, ClipRecord, IndexStats, KeywordRange, Tag, TagsRelation,
};
use super::schema;
use super::{ClipIndex, TagVocabulary};

const BASE_SELECT: &str = "
    SELECT c.key, c.video_name, c.clip_text, c.context_text, c.created_at, c.updated_at
    FROM video_clip c
";

// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const KEY_CHUNK: usize = 500;

pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

fn row_to_record(row: &Row) -> rusqlite::Result<ClipRecord> {
    Ok(ClipRecord {
        key: row.get(0)?,
        video_name: row.get(1)?,
        clip_text: row.get(2)?,
        context_text: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

fn upsert_clip_on(conn: &Connection, clip: &ClipMetadata) -> Result<()> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO video_clip (key, video_name, clip_text, context_text, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
            video_name = excluded.video_name,
            clip_text = excluded.clip_text,
            context_text = excluded.context_text,
            updated_at = excluded.updated_at",
        params![
            clip.key,
            clip.video_name,
            clip.clip_text,
            clip.context_text,
            clip.created_at,
            now,
        ],
    )?;
    Ok(())
}

fn resolve_or_create_on(conn: &Connection, name: &str) -> Result<Tag> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FavError::InvalidInput("tag name must not be blank".into()));
    }
    let now = Utc::now();
    conn.execute(
        "INSERT OR IGNORE INTO tag (name, created_at, updated_at) VALUES (?, ?, ?)",
        params![name, now, now],
    )?;
    let tag = conn.query_row(
        "SELECT id, name FROM tag WHERE name = ?",
        params![name],
        row_to_tag,
    )?;
    Ok(tag)
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn bind_on(conn: &Connection, key: &str, tag_id: i64) -> Result<()> {
    let now = Utc::now();
    conn.execute(
        "INSERT OR IGNORE INTO clip_tag_relation (clip_key, tag_id, created_at, updated_at)
         VALUES (?, ?, ?, ?)",
        params![key, tag_id, now, now],
    )?;
    Ok(())
}

impl SqliteIndex {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute(schema::CREATE_CLIPS_TABLE, [])?;
        conn.execute(schema::CREATE_TAGS_TABLE, [])?;
        conn.execute(schema::CREATE_CLIP_TAG_TABLE, [])?;
        conn.execute(schema::CREATE_INDEX_CREATED_AT, [])?;
        conn.execute(schema::CREATE_INDEX_RELATION_TAG, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_clip(conn: &Connection, key: &str) -> Result<()> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM video_clip WHERE key = ?", params![key], |row| row.get(0))
            .optional()?;
        match found {
            Some(_) => Ok(()),
            None => Err(FavError::NotFound(format!("Clip {} not found", key))),
        }
    }

    #[cfg(test)]
    pub fn count(&self, table: &str) -> i64 {
        self.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }
}

impl TagVocabulary for SqliteIndex {
    fn resolve_or_create(&self, name: &str) -> Result<Tag> {
        resolve_or_create_on(&self.conn(), name)
    }

    fn rename(&self, id: i64, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FavError::InvalidInput("tag name must not be blank".into()));
        }
        let changes = self
            .conn()
            .execute(
                "UPDATE tag SET name = ?, updated_at = ? WHERE id = ?",
                params![name, Utc::now(), id],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    FavError::InvalidInput(format!("tag \"{}\" already exists", name))
                } else {
                    FavError::Storage(e)
                }
            })?;
        if changes == 0 {
            return Err(FavError::NotFound(format!("Tag with id {} not found", id)));
        }
        Ok(())
    }

    fn get_tag(&self, id: i64) -> Result<Tag> {
        self.conn()
            .query_row("SELECT id, name FROM tag WHERE id = ?", params![id], row_to_tag)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    FavError::NotFound(format!("Tag with id {} not found", id))
                }
                other => FavError::Storage(other),
            })
    }

    fn list_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM tag ORDER BY name")?;
        let tags = stmt
            .query_map([], row_to_tag)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }
}

impl ClipIndex for SqliteIndex {
    fn contains(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row("SELECT 1 FROM video_clip WHERE key = ?", params![key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn existing_keys(&self, keys: &[String]) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut found = HashSet::new();
        for chunk in keys.chunks(KEY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT key FROM video_clip WHERE key IN ({})", placeholders);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            for key in rows {
                found.insert(key?);
            }
        }
        Ok(found)
    }

    fn get(&self, key: &str) -> Result<Option<ClipRecord>> {
        let sql = format!("{} WHERE c.key = ?", BASE_SELECT);
        let record = self
            .conn()
            .query_row(&sql, params![key], row_to_record)
            .optional()?;
        Ok(record)
    }

    fn upsert_clip(&self, clip: &ClipMetadata) -> Result<()> {
        upsert_clip_on(&self.conn(), clip)
    }

    fn delete_clip(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let tag_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT tag_id FROM clip_tag_relation WHERE clip_key = ?")?;
            let ids = stmt
                .query_map(params![key], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        tx.execute("DELETE FROM clip_tag_relation WHERE clip_key = ?", params![key])?;
        let changes = tx.execute("DELETE FROM video_clip WHERE key = ?", params![key])?;

        for tag_id in tag_ids {
            tx.execute(
                "DELETE FROM tag WHERE id = ?
                 AND NOT EXISTS (SELECT 1 FROM clip_tag_relation WHERE tag_id = ?)",
                params![tag_id, tag_id],
            )?;
        }

        tx.commit()?;
        Ok(changes > 0)
    }

    fn clip_tags(&self, key: &str) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name FROM clip_tag_relation r
             INNER JOIN tag t ON t.id = r.tag_id
             WHERE r.clip_key = ?
             ORDER BY r.created_at, t.id",
        )?;
        let tags = stmt
            .query_map(params![key], row_to_tag)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    fn bind_tag(&self, key: &str, tag_id: i64) -> Result<()> {
        let conn = self.conn();
        Self::require_clip(&conn, key)?;
        let tag_exists: Option<i64> = conn
            .query_row("SELECT 1 FROM tag WHERE id = ?", params![tag_id], |row| row.get(0))
            .optional()?;
        if tag_exists.is_none() {
            return Err(FavError::NotFound(format!("Tag with id {} not found", tag_id)));
        }
        bind_on(&conn, key, tag_id)
    }

    fn bind_tag_name(&self, key: &str, name: &str) -> Result<Tag> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        Self::require_clip(&tx, key)?;
        let tag = resolve_or_create_on(&tx, name)?;
        bind_on(&tx, key, tag.id)?;
        tx.commit()?;
        Ok(tag)
    }

    fn unbind_tag(&self, key: &str, tag_id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM clip_tag_relation WHERE clip_key = ? AND tag_id = ?",
            params![key, tag_id],
        )?;
        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM clip_tag_relation WHERE tag_id = ?",
            params![tag_id],
            |row| row.get(0),
        )?;
        let tag_deleted = if remaining == 0 {
            tx.execute("DELETE FROM tag WHERE id = ?", params![tag_id])? > 0
        } else {
            false
        };
        tx.commit()?;
        Ok(tag_deleted)
    }

    fn clips_with_tag(&self, tag_id: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.clip_key FROM clip_tag_relation r
             INNER JOIN video_clip c ON c.key = r.clip_key
             WHERE r.tag_id = ?",
        )?;
        let keys = stmt
            .query_map(params![tag_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn search(&self, query: &ClipQuery, limit: i64) -> Result<Vec<ClipRecord>> {
        let mut conditions = Vec::new();
        let mut having = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut having_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(keyword) = query.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            let column = match query.keyword_range {
                KeywordRange::Clip => "c.clip_text",
                KeywordRange::Context => "c.context_text",
            };
            conditions.push(format!("{} LIKE '%' || ? || '%' ESCAPE '\\'", column));
            param_values.push(Box::new(escape_like(keyword)));
        }
        if let Some(from) = query.date.from {
            conditions.push("c.created_at >= ?".to_string());
            param_values.push(Box::new(from));
        }
        if let Some(to) = query.date.to {
            conditions.push("c.created_at <= ?".to_string());
            param_values.push(Box::new(to));
        }

        let widen_untagged = query.tags_relation == TagsRelation::Or && !query.tags.is_empty();
        if query.include_no_tag && !widen_untagged {
            conditions.push("r.tag_id IS NULL".to_string());
        } else if !query.tags.is_empty() {
            for id in &query.tags {
                param_values.push(Box::new(*id));
            }
            let filter = format!("r.tag_id IN ({})", vec!["?"; query.tags.len()].join(", "));
            if query.include_no_tag {
                conditions.push(format!("({} OR r.tag_id IS NULL)", filter));
            } else {
                conditions.push(filter);
            }
            if query.tags_relation == TagsRelation::And {
                having.push("COUNT(*) = ?".to_string());
                having_values.push(Box::new(query.tags.len() as i64));
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let having_clause = if having.is_empty() {
            String::new()
        } else {
            format!("HAVING {}", having.join(" AND "))
        };

        let sql = format!(
            "{} LEFT JOIN clip_tag_relation r ON r.clip_key = c.key
             {} GROUP BY c.key {} ORDER BY c.created_at DESC LIMIT ?",
            BASE_SELECT, where_clause, having_clause
        );

        param_values.extend(having_values);
        param_values.push(Box::new(limit));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(param_refs.as_slice(), row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn rebuild(&self, clips: &[ClipMetadata]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM clip_tag_relation", [])?;
        tx.execute("DELETE FROM tag", [])?;
        tx.execute("DELETE FROM video_clip", [])?;

        for clip in clips {
            upsert_clip_on(&tx, clip)?;
            for name in clip.tags.iter().filter(|n| !n.trim().is_empty()) {
                let tag = resolve_or_create_on(&tx, name)?;
                bind_on(&tx, &clip.key, tag.id)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn stats(&self) -> Result<IndexStats> {
        self.conn()
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM video_clip),
                    (SELECT COUNT(*) FROM tag),
                    (SELECT COUNT(*) FROM clip_tag_relation),
                    (SELECT MIN(created_at) FROM video_clip),
                    (SELECT MAX(created_at) FROM video_clip)",
                [],
                |row| {
                    Ok(IndexStats {
                        total_clips: row.get(0)?,
                        total_tags: row.get(1)?,
                        total_bindings: row.get(2)?,
                        oldest: row.get(3)?,
                        newest: row.get(4)?,
                    })
                },
            )
            .map_err(FavError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::DateRange;
    use chrono::{DateTime, Duration, Utc};

    fn test_index() -> SqliteIndex {
        SqliteIndex::in_memory().unwrap()
    }

    fn meta(key: &str, clip_text: &str, created_at: DateTime<Utc>) -> ClipMetadata {
        ClipMetadata {
            key: key.to_string(),
            video_name: "/videos/show.mp4".to_string(),
            created_at,
            start_time: 1.0,
            end_time: 9.0,
            clip_text: clip_text.to_string(),
            clip_text_with_time: String::new(),
            context_text: format!("before\n{}\nafter", clip_text),
            context_text_with_time: String::new(),
            tags: Vec::new(),
        }
    }

    fn insert(index: &SqliteIndex, key: &str, text: &str, minutes_ago: i64) {
        index
            .upsert_clip(&meta(key, text, Utc::now() - Duration::minutes(minutes_ago)))
            .unwrap();
    }

    fn keys(records: &[ClipRecord]) -> Vec<&str> {
        records.iter().map(|r| r.key.as_str()).collect()
    }

    // --- Schema ---

    #[test]
    fn test_in_memory_creates_tables() {
        let index = test_index();
        let count: i64 = index
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
                 AND name IN ('video_clip', 'tag', 'clip_tag_relation')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }

    // --- Rows ---

    #[test]
    fn test_upsert_and_contains() {
        let index = test_index();
        assert!(!index.contains("k1").unwrap());
        insert(&index, "k1", "hello", 0);
        assert!(index.contains("k1").unwrap());
    }

    #[test]
    fn test_upsert_updates_stale_row() {
        let index = test_index();
        insert(&index, "k1", "old text", 5);
        let before = index.get("k1").unwrap().unwrap();
        insert(&index, "k1", "new text", 0);
        let after = index.get("k1").unwrap().unwrap();
        assert_eq!(after.clip_text, "new text");
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(index.count("video_clip"), 1);
    }

    #[test]
    fn test_existing_keys() {
        let index = test_index();
        insert(&index, "k1", "a", 0);
        insert(&index, "k3", "c", 0);
        let wanted = vec!["k1".to_string(), "k2".to_string(), "k3".to_string()];
        let found = index.existing_keys(&wanted).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains("k1"));
        assert!(found.contains("k3"));
    }

    #[test]
    fn test_existing_keys_empty_input() {
        let index = test_index();
        assert!(index.existing_keys(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_delete_clip_collects_orphan_tags() {
        let index = test_index();
        insert(&index, "a", "a", 0);
        insert(&index, "b", "b", 0);
        let only_a = index.resolve_or_create("only-a").unwrap();
        let shared = index.resolve_or_create("shared").unwrap();
        index.bind_tag("a", only_a.id).unwrap();
        index.bind_tag("a", shared.id).unwrap();
        index.bind_tag("b", shared.id).unwrap();

        assert!(index.delete_clip("a").unwrap());
        assert!(!index.contains("a").unwrap());
        assert!(matches!(index.get_tag(only_a.id), Err(FavError::NotFound(_))));
        assert_eq!(index.get_tag(shared.id).unwrap().name, "shared");
        assert_eq!(index.count("clip_tag_relation"), 1);
    }

    #[test]
    fn test_delete_missing_clip() {
        let index = test_index();
        assert!(!index.delete_clip("nope").unwrap());
    }

    // --- Tags ---

    #[test]
    fn test_resolve_or_create_is_idempotent() {
        let index = test_index();
        let t1 = index.resolve_or_create("idiom").unwrap();
        let t2 = index.resolve_or_create("  idiom ").unwrap();
        assert_eq!(t1, t2);
        assert_eq!(index.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_or_create_rejects_blank() {
        let index = test_index();
        assert!(matches!(index.resolve_or_create("   "), Err(FavError::InvalidInput(_))));
    }

    #[test]
    fn test_bind_is_insert_or_ignore() {
        let index = test_index();
        insert(&index, "k", "x", 0);
        let tag = index.resolve_or_create("t").unwrap();
        index.bind_tag("k", tag.id).unwrap();
        index.bind_tag("k", tag.id).unwrap();
        assert_eq!(index.clip_tags("k").unwrap(), vec![tag]);
    }

    #[test]
    fn test_bind_requires_clip_and_tag() {
        let index = test_index();
        let tag = index.resolve_or_create("t").unwrap();
        assert!(matches!(index.bind_tag("ghost", tag.id), Err(FavError::NotFound(_))));
        insert(&index, "k", "x", 0);
        assert!(matches!(index.bind_tag("k", 999), Err(FavError::NotFound(_))));
    }

    #[test]
    fn test_bind_tag_name_creates_and_binds() {
        let index = test_index();
        insert(&index, "k", "x", 0);
        let tag = index.bind_tag_name("k", "  idiom ").unwrap();
        assert_eq!(tag.name, "idiom");
        assert_eq!(index.clip_tags("k").unwrap(), vec![tag.clone()]);
        assert_eq!(index.bind_tag_name("k", "idiom").unwrap(), tag);
        assert_eq!(index.count("clip_tag_relation"), 1);
    }

    #[test]
    fn test_bind_tag_name_unknown_clip_creates_nothing() {
        let index = test_index();
        assert!(matches!(index.bind_tag_name("ghost", "idiom"), Err(FavError::NotFound(_))));
        assert!(index.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_bind_tag_name_races_with_last_unbind() {
        let index = std::sync::Arc::new(test_index());
        insert(&index, "a", "a", 0);
        insert(&index, "b", "b", 0);

        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|key| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let tag = index.bind_tag_name(key, "idiom").unwrap();
                        index.unbind_tag(key, tag.id).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(index.count("clip_tag_relation"), 0);
        assert!(index.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_unbind_reference_counting() {
        let index = test_index();
        insert(&index, "a", "a", 0);
        insert(&index, "b", "b", 0);
        let tag = index.resolve_or_create("t").unwrap();
        index.bind_tag("a", tag.id).unwrap();
        index.bind_tag("b", tag.id).unwrap();

        assert!(!index.unbind_tag("a", tag.id).unwrap());
        assert_eq!(index.get_tag(tag.id).unwrap().name, "t");
        assert!(index.unbind_tag("b", tag.id).unwrap());
        assert!(matches!(index.get_tag(tag.id), Err(FavError::NotFound(_))));
    }

    #[test]
    fn test_rename_tag() {
        let index = test_index();
        let tag = index.resolve_or_create("old").unwrap();
        index.rename(tag.id, "new").unwrap();
        assert_eq!(index.get_tag(tag.id).unwrap().name, "new");
    }

    #[test]
    fn test_rename_conflict_and_missing() {
        let index = test_index();
        let a = index.resolve_or_create("a").unwrap();
        index.resolve_or_create("b").unwrap();
        assert!(matches!(index.rename(a.id, "b"), Err(FavError::InvalidInput(_))));
        assert!(matches!(index.rename(999, "c"), Err(FavError::NotFound(_))));
    }

    #[test]
    fn test_clips_with_tag() {
        let index = test_index();
        insert(&index, "a", "a", 0);
        insert(&index, "b", "b", 0);
        let tag = index.resolve_or_create("t").unwrap();
        index.bind_tag("b", tag.id).unwrap();
        assert_eq!(index.clips_with_tag(tag.id).unwrap(), vec!["b".to_string()]);
    }

    // --- Search ---

    #[test]
    fn test_search_keyword_in_clip_newest_first() {
        let index = test_index();
        insert(&index, "old", "hello there", 30);
        insert(&index, "new", "say Hello again", 1);
        insert(&index, "other", "goodbye", 2);
        let query = ClipQuery {
            keyword: Some("hello".to_string()),
            ..Default::default()
        };
        let results = index.search(&query, 1000).unwrap();
        assert_eq!(keys(&results), vec!["new", "old"]);
    }

    #[test]
    fn test_search_keyword_wildcards_are_literal() {
        let index = test_index();
        insert(&index, "pct", "100% sure", 1);
        insert(&index, "plain", "100 times sure", 2);
        insert(&index, "under", "snake_case", 3);
        insert(&index, "nounder", "snakeXcase", 4);

        let percent = ClipQuery {
            keyword: Some("100%".to_string()),
            ..Default::default()
        };
        assert_eq!(keys(&index.search(&percent, 1000).unwrap()), vec!["pct"]);

        let underscore = ClipQuery {
            keyword: Some("e_c".to_string()),
            ..Default::default()
        };
        assert_eq!(keys(&index.search(&underscore, 1000).unwrap()), vec!["under"]);
    }

    #[test]
    fn test_search_keyword_in_context() {
        let index = test_index();
        insert(&index, "k", "middle", 0);
        let clip_only = ClipQuery {
            keyword: Some("before".to_string()),
            keyword_range: KeywordRange::Clip,
            ..Default::default()
        };
        assert!(index.search(&clip_only, 1000).unwrap().is_empty());
        let context = ClipQuery {
            keyword_range: KeywordRange::Context,
            ..clip_only
        };
        assert_eq!(index.search(&context, 1000).unwrap().len(), 1);
    }

    #[test]
    fn test_search_date_range() {
        let index = test_index();
        insert(&index, "recent", "x", 5);
        insert(&index, "ancient", "x", 60 * 24 * 10);
        let query = ClipQuery {
            date: DateRange {
                from: Some(Utc::now() - Duration::days(1)),
                to: Some(Utc::now()),
            },
            ..Default::default()
        };
        assert_eq!(keys(&index.search(&query, 1000).unwrap()), vec!["recent"]);
    }

    #[test]
    fn test_search_tags_or_and() {
        let index = test_index();
        insert(&index, "both", "x", 1);
        insert(&index, "one", "x", 2);
        insert(&index, "none", "x", 3);
        let t1 = index.resolve_or_create("t1").unwrap();
        let t2 = index.resolve_or_create("t2").unwrap();
        index.bind_tag("both", t1.id).unwrap();
        index.bind_tag("both", t2.id).unwrap();
        index.bind_tag("one", t1.id).unwrap();

        let or = ClipQuery {
            tags: vec![t1.id, t2.id],
            tags_relation: TagsRelation::Or,
            ..Default::default()
        };
        assert_eq!(keys(&index.search(&or, 1000).unwrap()), vec!["both", "one"]);

        let and = ClipQuery {
            tags_relation: TagsRelation::And,
            ..or.clone()
        };
        assert_eq!(keys(&index.search(&and, 1000).unwrap()), vec!["both"]);

        let or_with_untagged = ClipQuery {
            include_no_tag: true,
            ..or
        };
        assert_eq!(
            keys(&index.search(&or_with_untagged, 1000).unwrap()),
            vec!["both", "one", "none"]
        );
    }

    #[test]
    fn test_search_only_untagged() {
        let index = test_index();
        insert(&index, "tagged", "x", 1);
        insert(&index, "bare", "x", 2);
        let t = index.resolve_or_create("t").unwrap();
        index.bind_tag("tagged", t.id).unwrap();
        let query = ClipQuery {
            include_no_tag: true,
            ..Default::default()
        };
        assert_eq!(keys(&index.search(&query, 1000).unwrap()), vec!["bare"]);

        let and_untagged = ClipQuery {
            tags: vec![t.id],
            tags_relation: TagsRelation::And,
            include_no_tag: true,
            ..Default::default()
        };
        assert_eq!(keys(&index.search(&and_untagged, 1000).unwrap()), vec!["bare"]);
    }

    #[test]
    fn test_search_groups_by_clip() {
        let index = test_index();
        insert(&index, "k", "x", 0);
        for name in ["a", "b", "c"] {
            let t = index.resolve_or_create(name).unwrap();
            index.bind_tag("k", t.id).unwrap();
        }
        assert_eq!(index.search(&ClipQuery::default(), 1000).unwrap().len(), 1);
    }

    #[test]
    fn test_search_respects_limit() {
        let index = test_index();
        for i in 0..5 {
            insert(&index, &format!("k{}", i), "match", i);
        }
        assert_eq!(index.search(&ClipQuery::default(), 3).unwrap().len(), 3);
    }

    // --- Rebuild ---

    #[test]
    fn test_rebuild_replaces_everything() {
        let index = test_index();
        insert(&index, "stale", "x", 0);
        let t = index.resolve_or_create("stale-tag").unwrap();
        index.bind_tag("stale", t.id).unwrap();

        let mut k1 = meta("k1", "one", Utc::now());
        k1.tags = vec!["idiom".to_string()];
        let k2 = meta("k2", "two", Utc::now());
        index.rebuild(&[k1, k2]).unwrap();

        assert_eq!(index.count("video_clip"), 2);
        assert_eq!(index.count("tag"), 1);
        assert_eq!(index.count("clip_tag_relation"), 1);
        assert!(!index.contains("stale").unwrap());
        assert_eq!(index.clip_tags("k1").unwrap()[0].name, "idiom");
    }

    // --- Stats ---

    #[test]
    fn test_stats() {
        let index = test_index();
        let empty = index.stats().unwrap();
        assert_eq!(empty.total_clips, 0);
        assert!(empty.oldest.is_none());

        insert(&index, "a", "x", 10);
        insert(&index, "b", "x", 0);
        let t = index.resolve_or_create("t").unwrap();
        index.bind_tag("a", t.id).unwrap();
        let stats = index.stats().unwrap();
        assert_eq!(stats.total_clips, 2);
        assert_eq!(stats.total_tags, 1);
        assert_eq!(stats.total_bindings, 1);
        assert!(stats.oldest.unwrap() < stats.newest.unwrap());
    }
}
