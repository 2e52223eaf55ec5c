pub mod models;
pub mod object;
pub mod schema;
pub mod sqlite;

use std::collections::HashSet;

use crate::errors::Result;
use models::{ClipMetadata, ClipQuery, ClipRecord, IndexStats, Tag};

pub trait TagVocabulary: Send + Sync {
    fn resolve_or_create(&self, name: &str) -> Result<Tag>;
    fn rename(&self, id: i64, name: &str) -> Result<()>;
    fn get_tag(&self, id: i64) -> Result<Tag>;
    fn list_tags(&self) -> Result<Vec<Tag>>;
}

pub trait ClipIndex: TagVocabulary {
    fn contains(&self, key: &str) -> Result<bool>;
    fn existing_keys(&self, keys: &[String]) -> Result<HashSet<String>>;
    fn get(&self, key: &str) -> Result<Option<ClipRecord>>;
    fn upsert_clip(&self, clip: &ClipMetadata) -> Result<()>;
    // Also deletes tags left without bindings.
    fn delete_clip(&self, key: &str) -> Result<bool>;
    fn clip_tags(&self, key: &str) -> Result<Vec<Tag>>;
    fn bind_tag(&self, key: &str, tag_id: i64) -> Result<()>;
    // Resolves (or creates) the tag and binds it in one transaction.
    fn bind_tag_name(&self, key: &str, name: &str) -> Result<Tag>;
    // true when the tag lost its last binding and was deleted
    fn unbind_tag(&self, key: &str, tag_id: i64) -> Result<bool>;
    fn clips_with_tag(&self, tag_id: i64) -> Result<Vec<String>>;
    fn search(&self, query: &ClipQuery, limit: i64) -> Result<Vec<ClipRecord>>;
    fn rebuild(&self, clips: &[ClipMetadata]) -> Result<()>;
    fn stats(&self) -> Result<IndexStats>;
}
