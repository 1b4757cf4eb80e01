//! Audio validation, extraction, and chunk planning
//!
//! Video recordings are converted to mono 16 kHz audio via the external
//! ffmpeg collaborator before upload; long audio is split into overlapping
//! chunks that the orchestrator submits serially.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

/// Sample rate the ASR engine expects
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Maximum audio file size accepted for upload (500 MB)
pub const MAX_FILE_SIZE_BYTES: u64 = 500 * 1024 * 1024;

/// Minimum and maximum audio duration in seconds
pub const MIN_DURATION_SECS: f64 = 1.0;
pub const MAX_DURATION_SECS: f64 = 7200.0;

/// Maximum chunk duration in seconds (30 minutes)
pub const MAX_CHUNK_DURATION_SECS: f64 = 1800.0;

/// Overlap between chunks in seconds
pub const CHUNK_OVERLAP_SECS: f64 = 2.0;

const SUPPORTED_FORMATS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "aac", "wma", "mp4"];

const VIDEO_FORMATS: &[&str] = &["mp4", "mov", "webm", "mkv"];

/// One planned chunk window within the audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkWindow {
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Validate an on-disk media file before any upload
pub fn validate_media(path: &Path, duration_secs: f64) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| Error::InvalidInput(format!("Media file missing: {}", path.display())))?;

    if metadata.len() == 0 {
        return Err(Error::InvalidInput(format!(
            "Media file is empty: {}",
            path.display()
        )));
    }

    if metadata.len() > MAX_FILE_SIZE_BYTES {
        return Err(Error::InvalidInput(format!(
            "Media file exceeds {} MB: {}",
            MAX_FILE_SIZE_BYTES / (1024 * 1024),
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_FORMATS.contains(&extension.as_str()) {
        return Err(Error::InvalidInput(format!(
            "Unsupported media format: .{extension}"
        )));
    }

    if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration_secs) {
        return Err(Error::InvalidInput(format!(
            "Duration {duration_secs:.1}s outside [{MIN_DURATION_SECS}, {MAX_DURATION_SECS}]"
        )));
    }

    Ok(())
}

/// Whether this file needs audio extraction before transcription
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_FORMATS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Plan chunk windows for audio longer than the chunk bound
///
/// Consecutive windows overlap by `CHUNK_OVERLAP_SECS` so no words are
/// lost at the boundary; the count works out to
/// ceil(duration / (MAX_CHUNK_DURATION - overlap)).
pub fn plan_chunks(duration_secs: f64) -> Vec<ChunkWindow> {
    if duration_secs <= MAX_CHUNK_DURATION_SECS {
        return vec![ChunkWindow {
            start_secs: 0.0,
            end_secs: duration_secs,
        }];
    }

    let mut windows = Vec::new();
    let mut start = 0.0;

    loop {
        let end = (start + MAX_CHUNK_DURATION_SECS).min(duration_secs);
        windows.push(ChunkWindow {
            start_secs: start,
            end_secs: end,
        });

        if end >= duration_secs {
            break;
        }
        start = end - CHUNK_OVERLAP_SECS;
    }

    windows
}

/// Media tooling backed by the external ffmpeg collaborator
pub struct MediaTool {
    /// Scratch space for extracted and sliced audio; removed on drop
    workdir: TempDir,
}

impl MediaTool {
    pub fn new() -> Result<Self> {
        Ok(Self {
            workdir: TempDir::new()?,
        })
    }

    /// Extract mono 16 kHz WAV audio from a video container
    pub async fn extract_audio(&self, video_path: &Path) -> Result<PathBuf> {
        let out_path = self.workdir.path().join(format!(
            "{}.wav",
            video_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("extracted")
        ));

        let status = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(video_path)
            .args(["-vn", "-ar", &TARGET_SAMPLE_RATE.to_string(), "-ac", "1", "-f", "wav", "-y"])
            .arg(&out_path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Transcription(format!("ffmpeg not available: {e}")))?;

        if !status.success() {
            return Err(Error::InvalidInput(format!(
                "ffmpeg failed to extract audio from {}",
                video_path.display()
            )));
        }

        Ok(out_path)
    }

    /// Slice one chunk window out of an audio file
    pub async fn slice_chunk(&self, audio_path: &Path, window: ChunkWindow, index: usize) -> Result<PathBuf> {
        let out_path = self.workdir.path().join(format!("chunk_{index:03}.wav"));

        let status = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(audio_path)
            .args([
                "-ss",
                &window.start_secs.to_string(),
                "-t",
                &(window.end_secs - window.start_secs).to_string(),
                "-ar",
                &TARGET_SAMPLE_RATE.to_string(),
                "-ac",
                "1",
                "-f",
                "wav",
                "-y",
            ])
            .arg(&out_path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Transcription(format!("ffmpeg not available: {e}")))?;

        if !status.success() {
            return Err(Error::Transcription(format!(
                "ffmpeg failed to slice chunk {index} from {}",
                audio_path.display()
            )));
        }

        Ok(out_path)
    }

    /// Probe media duration in seconds via ffprobe
    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::Transcription(format!("ffprobe not available: {e}")))?;

        if !output.status.success() {
            return Err(Error::InvalidInput(format!(
                "ffprobe could not read {}",
                path.display()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::InvalidInput(format!("Unreadable duration for {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_media_missing_file() {
        let result = validate_media(Path::new("/nonexistent/audio.mp3"), 60.0);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_media_empty_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::File::create(&path).unwrap();

        assert!(matches!(
            validate_media(&path, 60.0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_media_unsupported_format() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audio.xyz");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"data").unwrap();

        assert!(matches!(
            validate_media(&path, 60.0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_media_duration_bounds() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audio.mp3");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"data").unwrap();

        assert!(validate_media(&path, 0.5).is_err());
        assert!(validate_media(&path, 7200.5).is_err());
        assert!(validate_media(&path, 1.0).is_ok());
        assert!(validate_media(&path, 7200.0).is_ok());
    }

    #[test]
    fn test_is_video() {
        assert!(is_video(Path::new("meeting.mp4")));
        assert!(is_video(Path::new("meeting.MOV")));
        assert!(!is_video(Path::new("call.mp3")));
    }

    #[test]
    fn test_plan_chunks_single_shot() {
        let windows = plan_chunks(MAX_CHUNK_DURATION_SECS - 0.1);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start_secs, 0.0);
    }

    #[test]
    fn test_plan_chunks_just_over_bound() {
        let duration = MAX_CHUNK_DURATION_SECS + 1.0;
        let windows = plan_chunks(duration);

        let stride = MAX_CHUNK_DURATION_SECS - CHUNK_OVERLAP_SECS;
        let expected = (duration / stride).ceil() as usize;
        assert_eq!(windows.len(), expected);
        assert_eq!(windows.len(), 2);

        // Consecutive windows overlap by exactly the configured amount
        assert!(
            (windows[0].end_secs - windows[1].start_secs - CHUNK_OVERLAP_SECS).abs() < 1e-9
        );
        assert!((windows[1].end_secs - duration).abs() < 1e-9);
    }

    #[test]
    fn test_plan_chunks_count_formula() {
        let stride = MAX_CHUNK_DURATION_SECS - CHUNK_OVERLAP_SECS;
        for duration in [3600.0, 5400.0, 7200.0] {
            let windows = plan_chunks(duration);
            let expected = (duration / stride).ceil() as usize;
            assert_eq!(windows.len(), expected, "for duration {duration}");

            // Full coverage without gaps
            for pair in windows.windows(2) {
                assert!(pair[1].start_secs < pair[0].end_secs);
            }
            assert_eq!(windows.last().unwrap().end_secs, duration);
        }
    }
}
