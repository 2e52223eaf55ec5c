//! The favourite clip engine.
//!
//! Intent calls (`add_clip`, `cancel_add_clip`) only touch the in-memory
//! queue. A [`Ticker`] drives [`FavouriteClips::reconcile`], which compares
//! the queued intents with the relational index and materializes or retracts
//! clips. The object store is authoritative; the index can always be rebuilt
//! from it with [`FavouriteClips::resync_from_object_store`].

mod materialize;
mod tags;
pub mod ticker;


use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{FavError, Result};
use crate::hash::{context_key, derive_key};
use crate::queue::{ClipTask, Operation, TaskQueue};
use crate::storage::ClipIndex;
use crate::storage::models::{ClipMetadata, ClipQuery, IndexStats, StoredClip};
use crate::storage::object::ObjectStore;
use crate::subtitle::SubtitleCache;
use crate::transcode::Transcoder;

pub use materialize::clip_metadata;
use materialize::Materialized;
use tags::KeyLocks;
use ticker::Ticker;

#[derive(Clone)]
pub struct Collaborators {
    pub subtitles: Arc<dyn SubtitleCache>,
    pub transcoder: Arc<dyn Transcoder>,
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn ClipIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum ClipStatus {
    Pending(PendingOperation),
    Persisted(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOperation {
    Add,
    Cancel,
}

impl From<Operation> for PendingOperation {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Add => PendingOperation::Add,
            Operation::Cancel => PendingOperation::Cancel,
        }
    }
}

impl ClipStatus {
    /// What the user should see: a pending cancel already reads as "not favourite".
    pub fn is_favourite(&self) -> bool {
        match self {
            ClipStatus::Pending(op) => *op == PendingOperation::Add,
            ClipStatus::Persisted(exists) => *exists,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub materialized: usize,
    pub retracted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub clips: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub index: IndexStats,
    pub pending_tasks: usize,
    pub orphaned_objects: usize,
}

pub(crate) struct Inner {
    subtitles: Arc<dyn SubtitleCache>,
    transcoder: Arc<dyn Transcoder>,
    objects: Arc<dyn ObjectStore>,
    index: Arc<dyn ClipIndex>,
    settings: Settings,
    temp_dir: PathBuf,
    queue: TaskQueue,
    reconcile_lock: Mutex<()>,
    key_locks: KeyLocks,
    orphans: Mutex<HashSet<String>>,
}

pub struct FavouriteClips {
    inner: Arc<Inner>,
    ticker: Mutex<Option<Ticker>>,
}

impl FavouriteClips {
    /// Builds an engine without a background ticker; call [`reconcile`](Self::reconcile) manually.
    pub fn new(collaborators: Collaborators, settings: Settings, temp_dir: PathBuf) -> Self {
        let Collaborators {
            subtitles,
            transcoder,
            objects,
            index,
        } = collaborators;
        Self {
            inner: Arc::new(Inner {
                subtitles,
                transcoder,
                objects,
                index,
                settings,
                temp_dir,
                queue: TaskQueue::new(),
                reconcile_lock: Mutex::new(()),
                key_locks: KeyLocks::default(),
                orphans: Mutex::new(HashSet::new()),
            }),
            ticker: Mutex::new(None),
        }
    }

    pub fn spawn(collaborators: Collaborators, settings: Settings, temp_dir: PathBuf) -> Result<Self> {
        let engine = Self::new(collaborators, settings, temp_dir);
        engine.start()?;
        Ok(engine)
    }

    pub fn start(&self) -> Result<()> {
        let mut slot = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let ticker = Ticker::spawn(
            "favclip-reconcile",
            self.inner.settings.tick_interval(),
            move || {
                if let Err(e) = inner.reconcile() {
                    warn!(error = %e, "reconcile pass failed");
                }
            },
        )?;
        *slot = Some(ticker);
        info!(interval_ms = self.inner.settings.tick_interval_ms, "favourite clip reconciler started");
        Ok(())
    }

    /// Stops the background ticker after any in-flight pass finishes. Queued intents stay queued.
    pub fn shutdown(&self) {
        let ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut ticker) = ticker {
            ticker.stop();
            info!(pending = self.pending_task_count(), "favourite clip reconciler stopped");
        }
    }

    pub fn add_clip(&self, video_path: &str, source_key: &str, line_index: usize) -> Result<String> {
        self.enqueue(video_path, source_key, line_index, Operation::Add)
    }

    pub fn cancel_add_clip(&self, source_key: &str, line_index: usize) -> Result<String> {
        self.enqueue("", source_key, line_index, Operation::Cancel)
    }

    fn enqueue(
        &self,
        video_path: &str,
        source_key: &str,
        line_index: usize,
        operation: Operation,
    ) -> Result<String> {
        let key = derive_key(self.inner.subtitles.as_ref(), source_key, line_index)?;
        let seq = self.inner.queue.put(ClipTask {
            video_path: video_path.to_string(),
            source_key: source_key.to_string(),
            line_index,
            key: key.clone(),
            operation,
            seq: 0,
        });
        debug!(%key, ?operation, seq, "queued clip intent");
        Ok(key)
    }

    pub fn query_pending_or_persisted(
        &self,
        source_key: &str,
        line_indices: &[usize],
    ) -> Result<BTreeMap<usize, ClipStatus>> {
        let lines = self
            .inner
            .subtitles
            .get(source_key)
            .ok_or_else(|| FavError::SourceNotCached(source_key.to_string()))?;
        let mut result = BTreeMap::new();
        for &line_index in line_indices {
            let key = context_key(&lines, line_index)?;
            let status = match self.inner.queue.operation(&key) {
                Some(op) => ClipStatus::Pending(op.into()),
                None => ClipStatus::Persisted(self.inner.index.contains(&key)?),
            };
            result.insert(line_index, status);
        }
        Ok(result)
    }

    pub fn reconcile(&self) -> Result<ReconcileReport> {
        self.inner.reconcile()
    }

    pub fn pending_task_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Polls until the queue is empty or `timeout` elapses. Returns whether it drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.inner.queue.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        // Let a pass that just emptied the queue finish its last sub-step.
        drop(self.inner.reconcile_lock.lock().unwrap_or_else(PoisonError::into_inner));
        true
    }

    /// Resolves indexed matches to their stored clips; rows whose object vanished are skipped.
    pub fn search(&self, query: &ClipQuery) -> Result<Vec<StoredClip>> {
        let records = self.inner.index.search(query, self.inner.settings.search_limit)?;
        let mut clips = Vec::with_capacity(records.len());
        for record in records {
            match self.inner.objects.get(&record.key) {
                Ok(Some(clip)) => clips.push(clip),
                Ok(None) => warn!(key = %record.key, "indexed clip missing from object store"),
                Err(e) => warn!(key = %record.key, error = %e, "failed to load clip object"),
            }
        }
        Ok(clips)
    }

    pub fn resync_from_object_store(&self) -> Result<ResyncReport> {
        let _pass = self.inner.reconcile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let keys = self.inner.objects.list()?;
        let mut report = ResyncReport::default();
        let mut clips: Vec<ClipMetadata> = Vec::with_capacity(keys.len());

        for key in keys {
            match self.inner.objects.get(&key) {
                Ok(Some(clip)) => {
                    let mut metadata = clip.metadata;
                    if metadata.key != key {
                        warn!(%key, recorded = %metadata.key, "object metadata key mismatch, using object key");
                        metadata.key = key;
                    }
                    clips.push(metadata);
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(%key, error = %e, "skipping unreadable object during resync");
                    report.skipped += 1;
                }
            }
        }

        self.inner.index.rebuild(&clips)?;
        report.clips = clips.len();
        info!(clips = report.clips, skipped = report.skipped, "rebuilt index from object store");
        Ok(report)
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            index: self.inner.index.stats()?,
            pending_tasks: self.pending_task_count(),
            orphaned_objects: self.inner.orphans.lock().unwrap_or_else(PoisonError::into_inner).len(),
        })
    }
}

impl Drop for FavouriteClips {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn reconcile(&self) -> Result<ReconcileReport> {
        let _pass = self.reconcile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = ReconcileReport::default();

        self.retry_orphans();

        let mut snapshot: Vec<ClipTask> = self.queue.snapshot().into_values().collect();
        if snapshot.is_empty() {
            return Ok(report);
        }
        snapshot.sort_by_key(|task| task.seq);

        let keys: Vec<String> = snapshot.iter().map(|task| task.key.clone()).collect();
        let existing = self.index.existing_keys(&keys)?;

        for task in snapshot {
            let exists = existing.contains(&task.key);
            match (exists, task.operation) {
                (false, Operation::Add) => match self.materialize(&task) {
                    Ok(Materialized::Created) => report.materialized += 1,
                    Ok(outcome) => {
                        debug!(key = %task.key, ?outcome, "materialize skipped");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        warn!(key = %task.key, error = %e, "materialize failed, dropping task");
                        report.failed += 1;
                    }
                },
                (true, Operation::Cancel) => match self.retract(&task.key) {
                    Ok(()) => report.retracted += 1,
                    Err(e) => {
                        warn!(key = %task.key, error = %e, "retract failed, dropping task");
                        report.failed += 1;
                    }
                },
                (exists, operation) => {
                    debug!(key = %task.key, exists, ?operation, "intent already satisfied");
                    report.skipped += 1;
                }
            }
            if !self.queue.remove_if_current(&task.key, task.seq) {
                debug!(key = %task.key, "newer intent arrived during reconcile, keeping it");
            }
        }

        info!(
            materialized = report.materialized,
            retracted = report.retracted,
            skipped = report.skipped,
            failed = report.failed,
            "reconcile pass finished"
        );
        Ok(report)
    }
}
