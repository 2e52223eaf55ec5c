use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{FavError, Result};
use super::models::{ClipMetadata, StoredClip};

const CLIP_FILE: &str = "clip.mp4";
const METADATA_FILE: &str = "metadata.json";

pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, binary: &Path, metadata: &ClipMetadata) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<StoredClip>>;
    // Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<String>>;
    fn update_tags(&self, key: &str, tags: &[String]) -> Result<()>;
}

pub struct LocalObjectStore {
    root: PathBuf,
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(FavError::InvalidInput(format!("invalid object key: {:?}", key)));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn dir(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn read_metadata(&self, dir: &Path) -> Result<Option<ClipMetadata>> {
        match fs::read(dir.join(METADATA_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FavError::Io(e)),
        }
    }

    fn write_metadata(&self, dir: &Path, metadata: &ClipMetadata) -> Result<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&dir.join(METADATA_FILE), &json)
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &str, binary: &Path, metadata: &ClipMetadata) -> Result<()> {
        let dir = self.dir(key)?;
        fs::create_dir_all(&dir)?;
        let clip_path = dir.join(CLIP_FILE);
        let partial = clip_path.with_extension("part");
        fs::copy(binary, &partial)?;
        fs::rename(&partial, &clip_path)?;
        // Metadata last: a key without metadata.json is invisible to get() and list().
        self.write_metadata(&dir, metadata)
    }

    fn get(&self, key: &str) -> Result<Option<StoredClip>> {
        let dir = self.dir(key)?;
        Ok(self.read_metadata(&dir)?.map(|metadata| StoredClip {
            clip_file: dir.join(CLIP_FILE),
            metadata,
        }))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_dir_all(self.dir(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FavError::Io(e)),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || !entry.path().join(METADATA_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn update_tags(&self, key: &str, tags: &[String]) -> Result<()> {
        let dir = self.dir(key)?;
        let mut metadata = self
            .read_metadata(&dir)?
            .ok_or_else(|| FavError::NotFound(format!("Object {} not found", key)))?;
        metadata.tags = tags.to_vec();
        self.write_metadata(&dir, &metadata)
    }
}
