use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::errors::Result;
use crate::storage::models::Tag;

use super::{FavouriteClips, Inner};

/// One mutex per clip key, created on demand and dropped once nobody holds it.
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_key<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let entry = Arc::clone(self.map().entry(key.to_string()).or_default());
        let result = {
            let _held = entry.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        let mut map = self.map();
        // Clones are only taken under the map lock, so two owners means nobody is waiting.
        if Arc::strong_count(&entry) == 2 {
            map.remove(key);
        }
        drop(entry);
        drop(map);
        result
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }
}

impl Inner {
    /// Pushes the clip's current tag names into its object metadata. Callers hold the key lock.
    fn sync_tags(&self, key: &str) {
        let names: Vec<String> = match self.index.clip_tags(key) {
            Ok(tags) => tags.into_iter().map(|t| t.name).collect(),
            Err(e) => {
                warn!(%key, error = %e, "could not read tags for object sync");
                return;
            }
        };
        match self.objects.update_tags(key, &names) {
            Ok(()) => debug!(%key, ?names, "synced tags to object store"),
            Err(e) => warn!(%key, error = %e, "tag sync to object store failed"),
        }
    }
}

impl FavouriteClips {
    pub fn bind_tag(&self, key: &str, tag_id: i64) -> Result<()> {
        let inner = &self.inner;
        inner.key_locks.with_key(key, || -> Result<()> {
            inner.index.bind_tag(key, tag_id)?;
            inner.sync_tags(key);
            Ok(())
        })
    }

    pub fn bind_tag_name(&self, key: &str, name: &str) -> Result<Tag> {
        let inner = &self.inner;
        inner.key_locks.with_key(key, || -> Result<Tag> {
            let tag = inner.index.bind_tag_name(key, name)?;
            inner.sync_tags(key);
            Ok(tag)
        })
    }

    /// Returns true when this was the tag's last binding and the tag was deleted.
    pub fn unbind_tag(&self, key: &str, tag_id: i64) -> Result<bool> {
        let inner = &self.inner;
        inner.key_locks.with_key(key, || -> Result<bool> {
            let tag_deleted = inner.index.unbind_tag(key, tag_id)?;
            inner.sync_tags(key);
            Ok(tag_deleted)
        })
    }

    pub fn rename_tag(&self, tag_id: i64, name: &str) -> Result<()> {
        let inner = &self.inner;
        inner.index.rename(tag_id, name)?;
        for key in inner.index.clips_with_tag(tag_id)? {
            inner.key_locks.with_key(&key, || inner.sync_tags(&key));
        }
        Ok(())
    }

    pub fn clip_tags(&self, key: &str) -> Result<Vec<Tag>> {
        self.inner.index.clip_tags(key)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.inner.index.list_tags()
    }
}
