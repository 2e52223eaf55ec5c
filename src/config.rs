use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{FavError, Result};

pub struct AppPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub store_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub config_file: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let base = dirs::home_dir()
            .ok_or_else(|| FavError::Config("could not determine home directory".into()))?
            .join(".favclip");
        Ok(Self::from_base(base))
    }

    pub fn from_base(base: PathBuf) -> Self {
        Self {
            db_path: base.join("favclip.db"),
            store_dir: base.join("clips"),
            temp_dir: base.join("tmp"),
            config_file: base.join("config.toml"),
            base_dir: base,
        }
    }
}

/// What to do when a retracted clip's object could not be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetractFailurePolicy {
    /// Log and move on; a later resync reconciles the orphan.
    #[default]
    Ignore,
    /// Keep the key and retry the object delete at the start of every tick.
    Retry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tick_interval_ms: u64,
    pub retract_failure: RetractFailurePolicy,
    pub search_limit: i64,
    pub ffmpeg: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            retract_failure: RetractFailurePolicy::Ignore,
            search_limit: 1000,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl Settings {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(FavError::Io(e)),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| FavError::Config(e.to_string()))?;
        if settings.tick_interval_ms == 0 {
            return Err(FavError::Config("tick_interval_ms must be positive".into()));
        }
        if settings.search_limit <= 0 {
            return Err(FavError::Config("search_limit must be positive".into()));
        }
        Ok(settings)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
