use std::fs;
use std::path::Path;
use std::sync::PoisonError;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::RetractFailurePolicy;
use crate::errors::{FavError, Result};
use crate::hash::context_key;
use crate::queue::ClipTask;
use crate::storage::models::ClipMetadata;
use crate::subtitle::{to_srt, window_around, SubtitleLine, CONTEXT_LINES};

use super::Inner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Materialized {
    Created,
    AlreadyIndexed,
    SourceExpired,
}

/// Metadata for the clip centred on `line_index`. The clip spans the whole context window.
pub fn clip_metadata(video_path: &str, lines: &[SubtitleLine], line_index: usize) -> Result<ClipMetadata> {
    let key = context_key(lines, line_index)?;
    let window = window_around(lines, line_index, CONTEXT_LINES);
    let line = &lines[line_index];

    let context_text = window
        .iter()
        .map(|l| l.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(ClipMetadata {
        key,
        video_name: video_path.to_string(),
        created_at: Utc::now(),
        start_time: window[0].start,
        end_time: window[window.len() - 1].end,
        clip_text: line.text.clone(),
        clip_text_with_time: to_srt(std::slice::from_ref(line)),
        context_text,
        context_text_with_time: to_srt(window),
        tags: Vec::new(),
    })
}

impl Inner {
    pub(super) fn materialize(&self, task: &ClipTask) -> Result<Materialized> {
        let Some(lines) = self.subtitles.get(&task.source_key) else {
            debug!(key = %task.key, source = %task.source_key, "subtitle source expired");
            return Ok(Materialized::SourceExpired);
        };
        let metadata = clip_metadata(&task.video_path, &lines, task.line_index)?;
        if metadata.key != task.key {
            // The cached source was replaced after the intent was recorded.
            debug!(key = %task.key, now = %metadata.key, "subtitle source changed since enqueue");
            return Ok(Materialized::SourceExpired);
        }

        if self.index.contains(&metadata.key)? {
            return Ok(Materialized::AlreadyIndexed);
        }

        fs::create_dir_all(&self.temp_dir).map_err(|e| {
            FavError::TemporaryStorage(format!("{}: {}", self.temp_dir.display(), e))
        })?;
        // Removed on drop, whichever way this function returns.
        let temp = tempfile::Builder::new()
            .prefix("clip-")
            .suffix(".mp4")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| FavError::TemporaryStorage(e.to_string()))?
            .into_temp_path();

        self.transcoder.extract_range(
            Path::new(&task.video_path),
            metadata.start_time,
            metadata.end_time,
            &temp,
        )?;

        self.objects.put(&metadata.key, &temp, &metadata)?;
        // A pending orphan delete for this key would now remove the fresh object.
        self.orphans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&metadata.key);

        if let Err(e) = self.index.upsert_clip(&metadata) {
            warn!(key = %metadata.key, "clip stored but not indexed; a resync will pick it up");
            return Err(e);
        }

        info!(key = %metadata.key, video = %metadata.video_name, "materialized favourite clip");
        Ok(Materialized::Created)
    }

    pub(super) fn retract(&self, key: &str) -> Result<()> {
        self.index.delete_clip(key)?;

        if let Err(e) = self.objects.delete(key) {
            match self.settings.retract_failure {
                RetractFailurePolicy::Ignore => {
                    warn!(%key, error = %e, "object delete failed, leaving orphan for resync");
                }
                RetractFailurePolicy::Retry => {
                    warn!(%key, error = %e, "object delete failed, will retry next tick");
                    self.orphans
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key.to_string());
                }
            }
            return Ok(());
        }

        info!(%key, "retracted favourite clip");
        Ok(())
    }

    pub(super) fn retry_orphans(&self) {
        let pending: Vec<String> = self
            .orphans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        for key in pending {
            let done = match self.index.contains(&key) {
                // Favourited again since; the object is live.
                Ok(true) => true,
                Ok(false) => match self.objects.delete(&key) {
                    Ok(()) => {
                        info!(%key, "deleted orphaned clip object");
                        true
                    }
                    Err(e) => {
                        debug!(%key, error = %e, "orphaned object delete still failing");
                        false
                    }
                },
                Err(e) => {
                    debug!(%key, error = %e, "could not check orphan against index");
                    false
                }
            };
            if done {
                self.orphans
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: u32) -> Vec<SubtitleLine> {
        (1..=n)
            .map(|i| SubtitleLine {
                index: i,
                start: i as f64 * 3.0,
                end: i as f64 * 3.0 + 2.0,
                text: if i == 4 { "   ".to_string() } else { format!("text {}", i) },
            })
            .collect()
    }

    #[test]
    fn test_clip_metadata_spans_window() {
        let l = lines(20);
        let meta = clip_metadata("/v.mp4", &l, 9).unwrap();
        assert_eq!(meta.start_time, l[4].start);
        assert_eq!(meta.end_time, l[14].end);
        assert_eq!(meta.clip_text, "text 10");
        assert_eq!(meta.video_name, "/v.mp4");
        assert!(meta.tags.is_empty());
        assert_eq!(meta.key, context_key(&l, 9).unwrap());
    }

    #[test]
    fn test_clip_metadata_skips_blank_context() {
        let l = lines(8);
        let meta = clip_metadata("/v.mp4", &l, 2).unwrap();
        assert_eq!(meta.context_text, "text 1\ntext 2\ntext 3\ntext 5\ntext 6\ntext 7\ntext 8");
        assert!(meta.context_text_with_time.contains("00:00:03,000 --> 00:00:05,000"));
        assert!(meta.clip_text_with_time.starts_with("3\n"));
    }

    #[test]
    fn test_clip_metadata_out_of_range() {
        let l = lines(3);
        assert!(matches!(clip_metadata("/v.mp4", &l, 5), Err(FavError::InvalidInput(_))));
    }
}
