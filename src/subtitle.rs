use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use crate::errors::{FavError, Result};

/// Lines kept on each side of the target line when building a clip window.
pub const CONTEXT_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleLine {
    pub index: u32,
    // seconds
    pub start: f64,
    pub end: f64,
    pub text: String,
}

pub trait SubtitleCache: Send + Sync {
    fn get(&self, source_key: &str) -> Option<Arc<Vec<SubtitleLine>>>;
}

#[derive(Debug, Default)]
pub struct MemorySubtitleCache {
    entries: RwLock<HashMap<String, Arc<Vec<SubtitleLine>>>>,
}

impl MemorySubtitleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source_key: &str, lines: Vec<SubtitleLine>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_key.to_string(), Arc::new(lines));
    }

    pub fn remove(&self, source_key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source_key);
    }

    pub fn load_srt_file(&self, path: &Path) -> Result<String> {
        let content = fs::read_to_string(path)?;
        let lines = parse_srt(&content)?;
        let key = path.to_string_lossy().to_string();
        self.insert(&key, lines);
        Ok(key)
    }
}

impl SubtitleCache for MemorySubtitleCache {
    fn get(&self, source_key: &str) -> Option<Arc<Vec<SubtitleLine>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_key)
            .cloned()
    }
}

pub fn window_around(lines: &[SubtitleLine], index: usize, radius: usize) -> &[SubtitleLine] {
    if lines.is_empty() {
        return lines;
    }
    let index = index.min(lines.len() - 1);
    let start = index.saturating_sub(radius);
    let end = (index + radius + 1).min(lines.len());
    &lines[start..end]
}

pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        ms
    )
}

pub fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim().replace('.', ",");
    let (hms, ms) = s.split_once(',')?;
    let mut parts = hms.split(':');
    let h: u64 = parts.next()?.trim().parse().ok()?;
    let m: u64 = parts.next()?.trim().parse().ok()?;
    let sec: u64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let ms: u64 = ms.trim().parse().ok()?;
    Some(((h * 3600 + m * 60 + sec) * 1000 + ms) as f64 / 1000.0)
}

/// Canonical SRT text for a run of lines. Clip keys are hashed from this form.
pub fn to_srt(lines: &[SubtitleLine]) -> String {
    lines
        .iter()
        .map(|line| {
            format!(
                "{}\n{} --> {}\n{}\n",
                line.index,
                format_timestamp(line.start),
                format_timestamp(line.end),
                line.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// Any whitespace-only line ends an entry.
fn blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for row in content.lines() {
        if row.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(row);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

pub fn parse_srt(content: &str) -> Result<Vec<SubtitleLine>> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut lines = Vec::new();

    for block in blocks(&content) {
        let mut rows = block.into_iter();
        let Some(first) = rows.next() else {
            continue;
        };

        // The numeric counter is optional in the wild; accept blocks that start with timing.
        let (index, timing) = match first.trim().parse::<u32>() {
            Ok(i) => match rows.next() {
                Some(t) => (i, t),
                None => continue,
            },
            Err(_) => (lines.len() as u32 + 1, first),
        };

        let (start, end) = timing
            .split_once("-->")
            .and_then(|(a, b)| Some((parse_timestamp(a)?, parse_timestamp(b)?)))
            .ok_or_else(|| FavError::InvalidInput(format!("bad SRT timing line: {}", timing)))?;

        let text = rows.map(str::trim).collect::<Vec<_>>().join("\n");
        lines.push(SubtitleLine { index, start, end, text });
    }

    Ok(lines)
}
