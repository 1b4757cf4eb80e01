//! Analysis-row repository
//!
//! The `meetings` table holds one analysis row per conversation: video
//! meetings, notetaker meetings, and plain calls (which get a row once
//! their transcript is archived). Rows are deduplicated by (source,
//! provider recording id) and by a content hash over the stable facts,
//! so one conversation reported twice lands exactly once.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use super::models::{Meeting, MeetingSource, MeetingType, Recording};
use crate::error::Result;

/// Meeting facts captured by an ingestion adapter, before persistence
#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub recording_id: String,
    pub source: MeetingSource,
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
    pub participants_json: serde_json::Value,
    pub action_items_json: serde_json::Value,
    pub crm_deals_json: serde_json::Value,
    pub raw_payload: serde_json::Value,
}

impl NewMeeting {
    /// Analysis row for a plain call recording
    ///
    /// Calls own their per-layer insight rows the same way meetings do:
    /// once a call's transcript is archived, the worker upserts this row
    /// (keyed by the provider recording id, source `telephony_call`) and
    /// the cascade picks it up like any other transcript.
    pub fn from_call(recording: &Recording) -> Self {
        let from = recording.from_number.as_deref().unwrap_or("unknown");
        let to = recording.to_number.as_deref().unwrap_or("unknown");

        Self {
            recording_id: recording.recording_id.clone(),
            source: MeetingSource::TelephonyCall,
            title: Some(format!("Call from {from} to {to}")),
            meeting_type: MeetingType::Other,
            platform: Some("telephony".to_string()),
            host_name: recording.to_name.clone(),
            host_email: None,
            host_extension_id: recording.to_extension.clone(),
            host_phone: recording.to_number.clone(),
            started_at: Some(recording.start_time),
            ended_at: Some(
                recording.start_time + chrono::Duration::seconds(recording.duration as i64),
            ),
            duration_seconds: Some(recording.duration),
            participant_count: Some(2),
            has_recording: true,
            participants_json: serde_json::json!([
                {
                    "name": recording.from_name,
                    "phone": recording.from_number,
                    "is_internal": false,
                },
                {
                    "name": recording.to_name,
                    "phone": recording.to_number,
                    "is_internal": true,
                },
            ]),
            action_items_json: serde_json::json!([]),
            crm_deals_json: serde_json::json!({}),
            raw_payload: serde_json::json!({
                "call_id": recording.call_id,
                "direction": recording.direction,
            }),
        }
    }

    /// Deterministic content hash over the stable meeting facts
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.title.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        if let Some(started) = self.started_at {
            hasher.update(started.timestamp().to_string().as_bytes());
        }
        hasher.update(b"|");
        hasher.update(
            self.duration_seconds
                .map(|d| d.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update(b"|");
        hasher.update(self.host_email.as_deref().unwrap_or("").as_bytes());

        hex::encode(hasher.finalize())
    }
}

#[derive(Clone)]
pub struct MeetingStore {
    pool: PgPool,
}

impl MeetingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn exists(&self, source: MeetingSource, recording_id: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM meetings WHERE source = $1 AND recording_id = $2)",
        )
        .bind(source.to_string())
        .bind(recording_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    pub async fn exists_by_content_hash(&self, content_hash: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM meetings WHERE content_hash = $1)",
        )
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Insert a meeting; returns the row id, or None on duplicate
    pub async fn insert(&self, meeting: &NewMeeting) -> Result<Option<i64>> {
        if self.exists(meeting.source, &meeting.recording_id).await? {
            tracing::debug!(
                recording_id = %meeting.recording_id,
                "Skipping duplicate meeting (same source id)"
            );
            return Ok(None);
        }

        let content_hash = meeting.content_hash();
        if self.exists_by_content_hash(&content_hash).await? {
            tracing::debug!(
                recording_id = %meeting.recording_id,
                "Skipping duplicate meeting (same content hash)"
            );
            return Ok(None);
        }

        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO meetings (
                recording_id, source, content_hash, title, meeting_type, platform,
                host_name, host_email, host_extension_id, host_phone,
                started_at, ended_at, duration_seconds, participant_count, has_recording,
                participants_json, action_items_json, crm_deals_json, raw_payload
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            ON CONFLICT (source, recording_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&meeting.recording_id)
        .bind(meeting.source.to_string())
        .bind(&content_hash)
        .bind(&meeting.title)
        .bind(meeting.meeting_type.to_string())
        .bind(&meeting.platform)
        .bind(&meeting.host_name)
        .bind(&meeting.host_email)
        .bind(&meeting.host_extension_id)
        .bind(&meeting.host_phone)
        .bind(meeting.started_at)
        .bind(meeting.ended_at)
        .bind(meeting.duration_seconds)
        .bind(meeting.participant_count)
        .bind(meeting.has_recording)
        .bind(&meeting.participants_json)
        .bind(&meeting.action_items_json)
        .bind(&meeting.crm_deals_json)
        .bind(&meeting.raw_payload)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Meeting>> {
        let meeting = sqlx::query_as::<_, Meeting>("SELECT * FROM meetings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(meeting)
    }

    /// Store the transcript (or flag it missing when the provider 404s)
    pub async fn set_transcript(
        &self,
        id: i64,
        transcript: Option<&str>,
        summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE meetings
            SET transcript_text = $2,
                transcript_missing = $3,
                summary = COALESCE($4, summary),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(transcript)
        .bind(transcript.is_none())
        .bind(summary)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Meetings ready for a layer: transcript present, layer N incomplete,
    /// and for N > 1 the previous layer complete.
    pub async fn pending_for_layer(&self, layer: u8, limit: i64) -> Result<Vec<Meeting>> {
        debug_assert!((1..=6).contains(&layer));

        let query = if layer == 1 {
            "SELECT * FROM meetings
             WHERE transcript_text IS NOT NULL AND layer1_complete = FALSE
             ORDER BY created_at DESC
             LIMIT $1"
                .to_string()
        } else {
            format!(
                "SELECT * FROM meetings
                 WHERE layer{}_complete = TRUE AND layer{}_complete = FALSE
                 ORDER BY created_at DESC
                 LIMIT $1",
                layer - 1,
                layer
            )
        };

        let meetings = sqlx::query_as::<_, Meeting>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(meetings)
    }

    pub async fn set_layer_complete(&self, id: i64, layer: u8, complete: bool) -> Result<()> {
        debug_assert!((1..=6).contains(&layer));

        let query = format!(
            "UPDATE meetings SET layer{layer}_complete = $2, updated_at = NOW() WHERE id = $1"
        );

        sqlx::query(&query)
            .bind(id)
            .bind(complete)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Layer 1 writes back onto the meeting row itself
    pub async fn apply_entity_results(
        &self,
        id: i64,
        meeting_type: MeetingType,
        crm_matches: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE meetings
            SET meeting_type = $2, crm_deals_json = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(meeting_type.to_string())
        .bind(crm_matches)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a layer's structured output into its table
    pub async fn save_layer_row(
        &self,
        meeting_id: i64,
        layer: u8,
        results: &serde_json::Value,
    ) -> Result<()> {
        let (table, columns): (&str, &[(&str, &str)]) = match layer {
            2 => (
                "meeting_insights",
                &[
                    ("nps_score", "/nps_score"),
                    ("nps_confidence", "/nps_confidence"),
                    ("churn_risk_level", "/churn_risk_level"),
                    ("churn_risk_score", "/churn_risk_score"),
                    ("customer_health_score", "/customer_health_score"),
                    ("sentiment_positive", "/sentiment_positive"),
                    ("sentiment_negative", "/sentiment_negative"),
                    ("sentiment_neutral", "/sentiment_neutral"),
                    ("meeting_quality_score", "/meeting_quality_score"),
                ],
            ),
            3 => (
                "meeting_resolutions",
                &[
                    ("objectives_met_score", "/objectives_met_score"),
                    ("fcr_achieved", "/fcr_achieved"),
                    ("escalation_required", "/escalation_required"),
                    ("loop_closure_score", "/loop_closure_score"),
                    ("action_item_quality_score", "/action_item_quality_score"),
                ],
            ),
            4 => (
                "meeting_recommendations",
                &[("follow_up_priority", "/follow_up_priority")],
            ),
            5 => (
                "meeting_advanced_metrics",
                &[
                    ("blueprint_score", "/blueprint_score"),
                    ("deal_value", "/deal_value"),
                    ("deal_currency", "/deal_currency"),
                    ("contract_length_months", "/contract_length"),
                ],
            ),
            6 => (
                "meeting_learning_analysis",
                &[
                    ("learning_score", "/learning_score"),
                    ("learning_state", "/learning_state"),
                    ("knowledge_transfer_rate", "/knowledge_transfer_rate"),
                ],
            ),
            _ => {
                return Err(crate::error::Error::Other(format!(
                    "Layer {layer} has no output table"
                )))
            }
        };

        // Scalar columns come from JSON pointers into the layer output; the
        // whole object is stored alongside in details_json.
        let mut column_names = vec!["meeting_id".to_string()];
        let mut placeholders = vec!["$1".to_string()];
        let mut updates = Vec::new();
        let mut binds: Vec<serde_json::Value> = Vec::new();

        for (i, (column, pointer)) in columns.iter().enumerate() {
            column_names.push(column.to_string());
            placeholders.push(format!("${}", i + 2));
            updates.push(format!("{column} = EXCLUDED.{column}"));
            binds.push(results.pointer(pointer).cloned().unwrap_or(serde_json::Value::Null));
        }

        column_names.push("details_json".to_string());
        placeholders.push(format!("${}", columns.len() + 2));
        updates.push("details_json = EXCLUDED.details_json".to_string());

        let query = format!(
            "INSERT INTO {table} ({}) VALUES ({})
             ON CONFLICT (meeting_id) DO UPDATE SET {}, updated_at = NOW()",
            column_names.join(", "),
            placeholders.join(", "),
            updates.join(", "),
        );

        let mut q = sqlx::query(&query).bind(meeting_id);
        for value in &binds {
            q = bind_json_scalar(q, value);
        }
        q = q.bind(results);
        q.execute(&self.pool).await?;

        Ok(())
    }

    /// Stored details object for a layer's row, or an empty object
    pub async fn layer_details(&self, meeting_id: i64, layer: u8) -> Result<serde_json::Value> {
        let table = match layer {
            2 => "meeting_insights",
            3 => "meeting_resolutions",
            4 => "meeting_recommendations",
            5 => "meeting_advanced_metrics",
            6 => "meeting_learning_analysis",
            _ => return Ok(serde_json::json!({})),
        };

        let query = format!("SELECT details_json FROM {table} WHERE meeting_id = $1");
        let row = sqlx::query_as::<_, (serde_json::Value,)>(&query)
            .bind(meeting_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(v,)| v).unwrap_or_else(|| serde_json::json!({})))
    }

    /// Does layer N's output table hold a row for this meeting
    pub async fn layer_row_exists(&self, meeting_id: i64, layer: u8) -> Result<bool> {
        let table = match layer {
            1 => return Ok(true), // layer 1 writes onto the meeting row
            2 => "meeting_insights",
            3 => "meeting_resolutions",
            4 => "meeting_recommendations",
            5 => "meeting_advanced_metrics",
            6 => "meeting_learning_analysis",
            _ => return Ok(false),
        };

        let query = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE meeting_id = $1)");
        let row = sqlx::query_as::<_, (bool,)>(&query)
            .bind(meeting_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }
}

/// Bind a JSON scalar as the SQL type the column expects
fn bind_json_scalar<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q serde_json::Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        serde_json::Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meeting() -> NewMeeting {
        NewMeeting {
            recording_id: "vm-100".into(),
            source: MeetingSource::TelephonyVideo,
            title: Some("Quarterly review".into()),
            meeting_type: MeetingType::Other,
            platform: Some("video".into()),
            host_name: Some("Ada".into()),
            host_email: Some("ada@example.com".into()),
            host_extension_id: None,
            host_phone: None,
            started_at: chrono::DateTime::parse_from_rfc3339("2025-09-21T15:30:00Z")
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            ended_at: None,
            duration_seconds: Some(1800),
            participant_count: Some(4),
            has_recording: true,
            participants_json: serde_json::json!([]),
            action_items_json: serde_json::json!([]),
            crm_deals_json: serde_json::json!({}),
            raw_payload: serde_json::json!({}),
        }
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = sample_meeting();
        let b = sample_meeting();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_differs_on_facts() {
        let a = sample_meeting();
        let mut b = sample_meeting();
        b.duration_seconds = Some(1801);
        assert_ne!(a.content_hash(), b.content_hash());

        let mut c = sample_meeting();
        c.host_email = Some("grace@example.com".into());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    fn sample_recording() -> Recording {
        Recording {
            id: 1,
            call_id: "call-1".into(),
            recording_id: "REC-1".into(),
            session_id: Some("sess-1".into()),
            start_time: chrono::DateTime::parse_from_rfc3339("2025-09-21T15:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            duration: 120,
            direction: Some(crate::database::models::CallDirection::Inbound),
            from_number: Some("+15550001111".into()),
            from_name: Some("Caller".into()),
            from_extension: None,
            to_number: Some("+15550002222".into()),
            to_name: Some("Agent".into()),
            to_extension: Some("101".into()),
            recording_type: Some("Automatic".into()),
            content_uri: None,
            download_status: crate::database::models::ProcessingStatus::Completed,
            download_attempts: 1,
            download_completed_at: None,
            download_error: None,
            local_file_path: None,
            transcription_status: crate::database::models::ProcessingStatus::Completed,
            transcription_attempts: 1,
            transcription_completed_at: None,
            transcription_error: None,
            transcript_word_count: Some(40),
            transcript_confidence: Some(0.9),
            language_detected: Some("en".into()),
            upload_status: crate::database::models::ProcessingStatus::Completed,
            upload_attempts: 1,
            upload_completed_at: None,
            upload_error: None,
            archive_file_id: None,
            audio_deleted: false,
            audio_deletion_time: None,
            retry_count: 0,
            last_updated: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_from_call_builds_analysis_row() {
        let row = NewMeeting::from_call(&sample_recording());

        assert_eq!(row.source, MeetingSource::TelephonyCall);
        assert_eq!(row.recording_id, "REC-1");
        assert_eq!(row.duration_seconds, Some(120));
        assert_eq!(row.participant_count, Some(2));
        assert!(row.title.as_deref().unwrap().contains("+15550001111"));
    }

    #[test]
    fn test_from_call_hash_distinguishes_parties() {
        let a = NewMeeting::from_call(&sample_recording());

        let mut other = sample_recording();
        other.recording_id = "REC-2".into();
        other.from_number = Some("+15550009999".into());
        let b = NewMeeting::from_call(&other);

        // Same start and duration, different parties: distinct rows
        assert_ne!(a.content_hash(), b.content_hash());

        // The same call re-discovered hashes identically
        let again = NewMeeting::from_call(&sample_recording());
        assert_eq!(a.content_hash(), again.content_hash());
    }
}
