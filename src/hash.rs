use sha2::{Digest, Sha256};

use crate::errors::{FavError, Result};
use crate::subtitle::{to_srt, window_around, SubtitleCache, SubtitleLine, CONTEXT_LINES};

pub fn hash_content(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub fn context_key(lines: &[SubtitleLine], line_index: usize) -> Result<String> {
    if line_index >= lines.len() {
        return Err(FavError::InvalidInput(format!(
            "line {} out of range ({} subtitle lines)",
            line_index,
            lines.len()
        )));
    }
    let window = window_around(lines, line_index, CONTEXT_LINES);
    Ok(hash_content(to_srt(window).as_bytes()))
}

pub fn derive_key(cache: &dyn SubtitleCache, source_key: &str, line_index: usize) -> Result<String> {
    let lines = cache
        .get(source_key)
        .ok_or_else(|| FavError::SourceNotCached(source_key.to_string()))?;
    context_key(&lines, line_index)
}
