use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::errors::{FavError, Result};
use crate::subtitle::format_timestamp;

pub trait Transcoder: Send + Sync {
    fn extract_range(&self, input: &Path, start: f64, end: f64, output: &Path) -> Result<()>;
}

pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(input: &Path, start: f64, end: f64, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            format_timestamp(start).replace(',', "."),
            "-to".into(),
            format_timestamp(end).replace(',', "."),
            "-i".into(),
            input.to_string_lossy().to_string(),
            "-c".into(),
            "copy".into(),
            "-avoid_negative_ts".into(),
            "make_zero".into(),
            "-f".into(),
            "mp4".into(),
            output.to_string_lossy().to_string(),
        ]
    }
}

impl Transcoder for FfmpegTranscoder {
    fn extract_range(&self, input: &Path, start: f64, end: f64, output: &Path) -> Result<()> {
        if end <= start {
            return Err(FavError::Transcode(format!(
                "empty range {:.3}..{:.3}",
                start, end
            )));
        }
        if !input.is_file() {
            return Err(FavError::Transcode(format!(
                "input video not found: {}",
                input.display()
            )));
        }

        let args = Self::args(input, start, end, output);
        debug!(program = %self.program, ?args, "running transcoder");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| FavError::Transcode(format!("failed to start {}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(FavError::Transcode(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_args_layout() {
        let args = FfmpegTranscoder::args(
            &PathBuf::from("/in.mkv"),
            61.5,
            70.25,
            &PathBuf::from("/out.mp4"),
        );
        assert_eq!(args[3], "-ss");
        assert_eq!(args[4], "00:01:01.500");
        assert_eq!(args[6], "00:01:10.250");
        assert_eq!(args[8], "/in.mkv");
        assert_eq!(args.last().unwrap(), "/out.mp4");
    }

    #[test]
    fn test_rejects_empty_range() {
        let t = FfmpegTranscoder::new("ffmpeg");
        let result = t.extract_range(Path::new("/in.mkv"), 5.0, 5.0, Path::new("/out.mp4"));
        assert!(matches!(result, Err(FavError::Transcode(_))));
    }

    #[test]
    fn test_missing_input() {
        let dir = TempDir::new().unwrap();
        let t = FfmpegTranscoder::new("ffmpeg");
        let result = t.extract_range(
            &dir.path().join("missing.mp4"),
            0.0,
            1.0,
            &dir.path().join("out.mp4"),
        );
        assert!(matches!(result, Err(FavError::Transcode(_))));
    }

    #[test]
    fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"x").unwrap();
        let t = FfmpegTranscoder::new("definitely-not-a-real-ffmpeg-binary");
        let result = t.extract_range(&input, 0.0, 1.0, &dir.path().join("out.mp4"));
        assert!(matches!(result, Err(FavError::Transcode(_))));
    }
}
