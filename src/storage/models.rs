use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMetadata {
    pub key: String,
    pub video_name: String,
    pub created_at: DateTime<Utc>,
    pub start_time: f64,
    pub end_time: f64,
    pub clip_text: String,
    pub clip_text_with_time: String,
    pub context_text: String,
    pub context_text_with_time: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredClip {
    pub clip_file: PathBuf,
    #[serde(flatten)]
    pub metadata: ClipMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipRecord {
    pub key: String,
    pub video_name: String,
    pub clip_text: String,
    pub context_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordRange {
    #[default]
    Clip,
    Context,
}

impl KeywordRange {
    pub fn parse(s: &str) -> Option<KeywordRange> {
        match s {
            "clip" => Some(KeywordRange::Clip),
            "context" => Some(KeywordRange::Context),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagsRelation {
    And,
    #[default]
    Or,
}

impl TagsRelation {
    pub fn parse(s: &str) -> Option<TagsRelation> {
        match s {
            "and" => Some(TagsRelation::And),
            "or" => Some(TagsRelation::Or),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClipQuery {
    pub keyword: Option<String>,
    pub keyword_range: KeywordRange,
    // tag ids
    pub tags: Vec<i64>,
    pub tags_relation: TagsRelation,
    pub date: DateRange,
    pub include_no_tag: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub total_clips: i64,
    pub total_tags: i64,
    pub total_bindings: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}
