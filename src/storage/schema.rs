pub const CREATE_CLIPS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS video_clip (
        key TEXT PRIMARY KEY NOT NULL,
        video_name TEXT NOT NULL,
        clip_text TEXT NOT NULL,
        context_text TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const CREATE_TAGS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS tag (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const CREATE_CLIP_TAG_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS clip_tag_relation (
        clip_key TEXT NOT NULL,
        tag_id INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (clip_key, tag_id),
        FOREIGN KEY (clip_key) REFERENCES video_clip(key) ON DELETE CASCADE,
        FOREIGN KEY (tag_id) REFERENCES tag(id) ON DELETE CASCADE
    )
";

pub const CREATE_INDEX_CREATED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_video_clip_created_at ON video_clip(created_at)";

pub const CREATE_INDEX_RELATION_TAG: &str =
    "CREATE INDEX IF NOT EXISTS idx_clip_tag_relation_tag_id ON clip_tag_relation(tag_id)";
