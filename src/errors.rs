use thiserror::Error;

#[derive(Debug, Error)]
pub enum FavError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Subtitle source not cached: {0}")]
    SourceNotCached(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Temporary storage error: {0}")]
    TemporaryStorage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, FavError>;
