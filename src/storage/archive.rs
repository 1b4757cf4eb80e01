//! Archive layout and transcript artefact rendering
//!
//! Local tree:
//!   data/transcriptions/json/<YYYY>/<MM>/<DD>/<recording_id>.json
//!   data/transcriptions/md/<YYYY>/<MM>/<DD>/<recording_id>.md
//!   data/transcriptions/insights/<recording_id>_insights.json
//!
//! Remote folders follow `Y/MM-Mon/{Audio|Metadata|Transcripts}`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use crate::database::models::{Recording, Transcript};
use crate::error::Result;

const MONTH_ABBREV: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Remote archive folder categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCategory {
    Audio,
    Metadata,
    Transcripts,
}

impl ArchiveCategory {
    fn folder(&self) -> &'static str {
        match self {
            ArchiveCategory::Audio => "Audio",
            ArchiveCategory::Metadata => "Metadata",
            ArchiveCategory::Transcripts => "Transcripts",
        }
    }
}

/// Remote object key: `<YYYY>/<MM>-<Mon>/<Category>/<name>`
pub fn remote_key(date: DateTime<Utc>, category: ArchiveCategory, name: &str) -> String {
    let month = date.month() as usize;
    format!(
        "{}/{:02}-{}/{}/{}",
        date.year(),
        month,
        MONTH_ABBREV[month - 1],
        category.folder(),
        name
    )
}

/// Paths in the local transcript archive tree
#[derive(Clone)]
pub struct ArchiveLayout {
    transcriptions_dir: PathBuf,
}

impl ArchiveLayout {
    pub fn new(transcriptions_dir: impl Into<PathBuf>) -> Self {
        Self {
            transcriptions_dir: transcriptions_dir.into(),
        }
    }

    fn dated(&self, kind: &str, date: DateTime<Utc>, file_name: &str) -> PathBuf {
        self.transcriptions_dir
            .join(kind)
            .join(format!("{}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(file_name)
    }

    pub fn json_path(&self, recording_id: &str, date: DateTime<Utc>) -> PathBuf {
        self.dated("json", date, &format!("{recording_id}.json"))
    }

    pub fn markdown_path(&self, recording_id: &str, date: DateTime<Utc>) -> PathBuf {
        self.dated("md", date, &format!("{recording_id}.md"))
    }

    pub fn insights_path(&self, recording_id: &str) -> PathBuf {
        self.transcriptions_dir
            .join("insights")
            .join(format!("{recording_id}_insights.json"))
    }

    /// Write content, creating parent directories as needed
    pub async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Render the human-readable Markdown report for a transcript
pub fn render_markdown(recording: &Recording, transcript: &Transcript) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Call Transcript: {}\n\n", recording.recording_id));
    out.push_str("## Call Details\n\n");
    out.push_str(&format!(
        "- **Start time:** {}\n",
        recording.start_time.to_rfc3339()
    ));
    out.push_str(&format!("- **Duration:** {} s\n", recording.duration));
    if let Some(direction) = recording.direction {
        out.push_str(&format!("- **Direction:** {}\n", direction));
    }
    out.push_str(&format!(
        "- **From:** {} {}\n",
        recording.from_number.as_deref().unwrap_or("unknown"),
        recording.from_name.as_deref().unwrap_or("")
    ));
    out.push_str(&format!(
        "- **To:** {} {}\n",
        recording.to_number.as_deref().unwrap_or("unknown"),
        recording.to_name.as_deref().unwrap_or("")
    ));

    out.push_str("\n## Transcription\n\n");
    out.push_str(&format!("- **Language:** {}\n", transcript.language));
    out.push_str(&format!("- **Words:** {}\n", transcript.word_count));
    out.push_str(&format!(
        "- **Confidence:** {:.1}%\n",
        transcript.confidence * 100.0
    ));

    out.push_str("\n## Transcript\n\n");
    out.push_str(&transcript.text);
    out.push('\n');

    if !transcript.segments.is_empty() {
        out.push_str("\n## Segments\n\n");
        out.push_str("| Start | End | Text |\n|---|---|---|\n");
        for segment in &transcript.segments {
            out.push_str(&format!(
                "| {:.1}s | {:.1}s | {} |\n",
                segment.start,
                segment.end,
                segment.text.trim().replace('|', "\\|")
            ));
        }
    }

    out
}

/// Render segments as an SRT subtitle document
pub fn render_srt(transcript: &Transcript) -> String {
    let mut out = String::new();

    for (i, segment) in transcript.segments.iter().enumerate() {
        out.push_str(&format!("{}\n", i + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            srt_timestamp(segment.start),
            srt_timestamp(segment.end)
        ));
        out.push_str(segment.text.trim());
        out.push_str("\n\n");
    }

    out
}

fn srt_timestamp(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    let millis = ((seconds % 1.0) * 1000.0) as u64;

    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TranscriptSegment;

    fn date(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_remote_key_layout() {
        let when = date("2025-09-21T15:30:00Z");
        assert_eq!(
            remote_key(when, ArchiveCategory::Transcripts, "REC-1.json"),
            "2025/09-Sep/Transcripts/REC-1.json"
        );
        assert_eq!(
            remote_key(when, ArchiveCategory::Audio, "REC-1.mp3"),
            "2025/09-Sep/Audio/REC-1.mp3"
        );
    }

    #[test]
    fn test_local_layout() {
        let layout = ArchiveLayout::new("data/transcriptions");
        let when = date("2025-01-05T00:10:00Z");

        assert_eq!(
            layout.json_path("REC-1", when),
            PathBuf::from("data/transcriptions/json/2025/01/05/REC-1.json")
        );
        assert_eq!(
            layout.markdown_path("REC-1", when),
            PathBuf::from("data/transcriptions/md/2025/01/05/REC-1.md")
        );
        assert_eq!(
            layout.insights_path("REC-1"),
            PathBuf::from("data/transcriptions/insights/REC-1_insights.json")
        );
    }

    #[test]
    fn test_srt_timestamp() {
        assert_eq!(srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(srt_timestamp(3661.25), "01:01:01,250");
    }

    #[test]
    fn test_render_srt() {
        let transcript = Transcript {
            recording_id: "REC-1".into(),
            text: "Hello there.".into(),
            language: "en".into(),
            language_probability: 0.99,
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 1.5,
                text: "Hello there.".into(),
                avg_logprob: -0.1,
                compression_ratio: 1.2,
                no_speech_prob: 0.01,
                tokens: vec![],
            }],
            word_count: 2,
            confidence: 0.95,
            duration_seconds: 1.5,
            processing_time_seconds: 0.4,
            customer_name: None,
            employee_name: None,
        };

        let srt = render_srt(&transcript);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nHello there.\n"));
    }
}
