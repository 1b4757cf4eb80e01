//! Persistence models and status enums

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-stage processing status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::InProgress => write!(f, "in_progress"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Failed => write!(f, "failed"),
            ProcessingStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "in_progress" => Ok(ProcessingStatus::InProgress),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            "skipped" => Ok(ProcessingStatus::Skipped),
            _ => Err(format!("Invalid processing status: {}", s)),
        }
    }
}

/// Pipeline stage of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcription,
    Upload,
}

impl Stage {
    /// Database column prefix for this stage
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Transcription => "transcription",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column_prefix())
    }
}

/// Call direction as reported by the telephony provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
    Internal,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Inbound => write!(f, "inbound"),
            CallDirection::Outbound => write!(f, "outbound"),
            CallDirection::Internal => write!(f, "internal"),
        }
    }
}

impl std::str::FromStr for CallDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inbound" => Ok(CallDirection::Inbound),
            "outbound" => Ok(CallDirection::Outbound),
            "internal" => Ok(CallDirection::Internal),
            _ => Err(format!("Invalid call direction: {}", s)),
        }
    }
}

/// Provenance of a row in the analysis (`meetings`) table
///
/// Plain calls get a `TelephonyCall` row once their transcript is
/// archived, so every recording flows through the same layered cascade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum MeetingSource {
    TelephonyCall,
    TelephonyVideo,
    Notetaker,
}

impl fmt::Display for MeetingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeetingSource::TelephonyCall => write!(f, "telephony_call"),
            MeetingSource::TelephonyVideo => write!(f, "telephony_video"),
            MeetingSource::Notetaker => write!(f, "notetaker"),
        }
    }
}

/// Closed meeting-type classification
///
/// Layer 1 output is clamped to this set; anything else maps to `Other`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum MeetingType {
    Sales,
    Support,
    Training,
    Interview,
    Internal,
    External,
    Other,
}

impl fmt::Display for MeetingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeetingType::Sales => write!(f, "sales"),
            MeetingType::Support => write!(f, "support"),
            MeetingType::Training => write!(f, "training"),
            MeetingType::Interview => write!(f, "interview"),
            MeetingType::Internal => write!(f, "internal"),
            MeetingType::External => write!(f, "external"),
            MeetingType::Other => write!(f, "other"),
        }
    }
}

impl MeetingType {
    /// Map an arbitrary string (e.g. raw LLM output) onto the closed set
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "sales" | "demo" => MeetingType::Sales,
            "support" => MeetingType::Support,
            "training" => MeetingType::Training,
            "interview" => MeetingType::Interview,
            "internal" => MeetingType::Internal,
            "external" => MeetingType::External,
            _ => MeetingType::Other,
        }
    }
}

/// One telephony call recording and its per-stage progress
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recording {
    pub id: i64,

    // Provider identifiers
    pub call_id: String,
    pub recording_id: String,
    pub session_id: Option<String>,

    // Call facts
    pub start_time: DateTime<Utc>,
    pub duration: i32,
    pub direction: Option<CallDirection>,
    pub from_number: Option<String>,
    pub from_name: Option<String>,
    pub from_extension: Option<String>,
    pub to_number: Option<String>,
    pub to_name: Option<String>,
    pub to_extension: Option<String>,
    pub recording_type: Option<String>,
    pub content_uri: Option<String>,

    // Download stage
    pub download_status: ProcessingStatus,
    pub download_attempts: i32,
    pub download_completed_at: Option<DateTime<Utc>>,
    pub download_error: Option<String>,
    pub local_file_path: Option<String>,

    // Transcription stage
    pub transcription_status: ProcessingStatus,
    pub transcription_attempts: i32,
    pub transcription_completed_at: Option<DateTime<Utc>>,
    pub transcription_error: Option<String>,
    pub transcript_word_count: Option<i32>,
    pub transcript_confidence: Option<f64>,
    pub language_detected: Option<String>,

    // Upload/archive stage
    pub upload_status: ProcessingStatus,
    pub upload_attempts: i32,
    pub upload_completed_at: Option<DateTime<Utc>>,
    pub upload_error: Option<String>,
    pub archive_file_id: Option<String>,

    // Secure deletion
    pub audio_deleted: bool,
    pub audio_deletion_time: Option<DateTime<Utc>>,

    pub retry_count: i32,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Candidate recording discovered by the telephony adapter, before queueing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredRecording {
    pub call_id: String,
    pub recording_id: String,
    pub session_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration: i32,
    pub direction: Option<CallDirection>,
    pub from_number: Option<String>,
    pub from_name: Option<String>,
    pub from_extension: Option<String>,
    pub to_number: Option<String>,
    pub to_name: Option<String>,
    pub to_extension: Option<String>,
    pub recording_type: Option<String>,
    pub content_uri: Option<String>,
}

/// One analysis row: a video meeting, notetaker meeting, or archived call
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Meeting {
    pub id: i64,
    pub recording_id: String,
    pub source: MeetingSource,
    pub content_hash: String,

    pub title: Option<String>,
    pub meeting_type: MeetingType,
    pub platform: Option<String>,
    pub host_name: Option<String>,
    pub host_email: Option<String>,
    pub host_extension_id: Option<String>,
    pub host_phone: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i32>,
    pub participant_count: Option<i32>,
    pub has_recording: bool,

    pub transcript_text: Option<String>,
    pub transcript_missing: bool,
    pub summary: Option<String>,

    pub participants_json: serde_json::Value,
    pub action_items_json: serde_json::Value,
    pub crm_deals_json: serde_json::Value,
    pub raw_payload: serde_json::Value,

    pub layer1_complete: bool,
    pub layer2_complete: bool,
    pub layer3_complete: bool,
    pub layer4_complete: bool,
    pub layer5_complete: bool,
    pub layer6_complete: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Resumable state for a historical batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_id: String,
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    pub current_date: chrono::NaiveDate,
    #[serde(default)]
    pub total_processed: i64,
    #[serde(default)]
    pub total_failed: i64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub error_count: i64,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl BatchState {
    pub fn new(
        batch_id: String,
        start_date: chrono::NaiveDate,
        end_date: chrono::NaiveDate,
    ) -> Self {
        Self {
            batch_id,
            start_date,
            end_date,
            current_date: start_date,
            total_processed: 0,
            total_failed: 0,
            completed: false,
            error_count: 0,
            last_error: None,
        }
    }

    /// A batch is finished when the cursor has walked past its end date
    pub fn is_finished(&self) -> bool {
        self.current_date > self.end_date
    }
}

/// Durable key-value processing state row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessingState {
    pub id: i64,
    pub state_key: String,
    pub state_value: serde_json::Value,
    pub is_active: bool,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal-failure record for a recording past its retry budget
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FailedItem {
    pub id: i64,
    pub call_id: String,
    pub recording_id: String,
    pub failure_reason: String,
    pub last_error: Option<String>,
    pub attempt_count: i32,
    pub first_attempted_at: Option<DateTime<Utc>>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One transcript segment with confidence signals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub avg_logprob: f64,
    pub compression_ratio: f64,
    pub no_speech_prob: f64,
    #[serde(default)]
    pub tokens: Vec<i64>,
}

/// A persisted transcript for one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub recording_id: String,
    pub text: String,
    pub language: String,
    pub language_probability: f64,
    pub segments: Vec<TranscriptSegment>,
    pub word_count: i32,
    pub confidence: f64,
    pub duration_seconds: f64,
    pub processing_time_seconds: f64,
    pub customer_name: Option<String>,
    pub employee_name: Option<String>,
}

/// Audit-trail row for a processing action
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessingHistory {
    pub id: i64,
    pub recording_id: String,
    pub action: String,
    pub status: String,
    pub details: serde_json::Value,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
}

// Custom TryFrom implementations for sqlx type conversion
impl TryFrom<String> for ProcessingStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for CallDirection {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_status_round_trip() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::InProgress,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
            ProcessingStatus::Skipped,
        ] {
            let parsed: ProcessingStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_meeting_type_clamps_to_closed_set() {
        assert_eq!(MeetingType::from_label("sales"), MeetingType::Sales);
        assert_eq!(MeetingType::from_label("Demo"), MeetingType::Sales);
        assert_eq!(MeetingType::from_label("quarterly sync-up"), MeetingType::Other);
        assert_eq!(MeetingType::from_label(""), MeetingType::Other);
    }

    #[test]
    fn test_batch_state_finished() {
        let start = chrono::NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let end = chrono::NaiveDate::from_ymd_opt(2025, 9, 3).unwrap();
        let mut batch = BatchState::new("b1".into(), start, end);

        assert!(!batch.is_finished());
        batch.current_date = end;
        assert!(!batch.is_finished());
        batch.current_date = end + chrono::Duration::days(1);
        assert!(batch.is_finished());
    }

    #[test]
    fn test_batch_state_survives_json_round_trip() {
        let start = chrono::NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let end = chrono::NaiveDate::from_ymd_opt(2025, 9, 30).unwrap();
        let batch = BatchState::new("b2".into(), start, end);

        let value = serde_json::to_value(&batch).unwrap();
        let restored: BatchState = serde_json::from_value(value).unwrap();
        assert_eq!(restored.batch_id, "b2");
        assert_eq!(restored.current_date, start);
        assert!(!restored.completed);
    }
}
