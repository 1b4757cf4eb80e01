//! Recording repository
//!
//! All stage transitions go through conditional UPDATEs so two workers can
//! never claim the same recording: `pending -> in_progress` only succeeds
//! for the single worker whose UPDATE matched a row.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::models::{
    DiscoveredRecording, FailedItem, ProcessingStatus, Recording, Stage, Transcript,
};
use crate::error::{Error, Result};

/// Slim row returned by pending-selection queries
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingRecording {
    pub recording_id: String,
    pub retry_count: i32,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate counts over the recordings table
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProcessingSummary {
    pub total_recordings: i64,
    pub completed: i64,
    pub pending_download: i64,
    pub pending_transcription: i64,
    pub pending_upload: i64,
    pub failed_download: i64,
    pub failed_transcription: i64,
    pub failed_upload: i64,
    pub active_batches: i64,
}

#[derive(Clone)]
pub struct RecordingStore {
    pool: PgPool,
}

impl RecordingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Queue a newly discovered recording with all stages pending
    ///
    /// Returns false when a row with the same recording id already exists
    /// (the unique constraint is belt-and-braces behind the explicit dedup
    /// checks in the ingestion adapter).
    pub async fn queue(&self, discovered: &DiscoveredRecording) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO recordings (
                call_id, recording_id, session_id, start_time, duration, direction,
                from_number, from_name, from_extension,
                to_number, to_name, to_extension,
                recording_type, content_uri,
                download_status, transcription_status, upload_status
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                'pending', 'pending', 'pending'
            )
            ON CONFLICT (recording_id) DO NOTHING
            "#,
        )
        .bind(&discovered.call_id)
        .bind(&discovered.recording_id)
        .bind(&discovered.session_id)
        .bind(discovered.start_time)
        .bind(discovered.duration)
        .bind(discovered.direction.map(|d| d.to_string()))
        .bind(&discovered.from_number)
        .bind(&discovered.from_name)
        .bind(&discovered.from_extension)
        .bind(&discovered.to_number)
        .bind(&discovered.to_name)
        .bind(&discovered.to_extension)
        .bind(&discovered.recording_type)
        .bind(&discovered.content_uri)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_by_recording_id(&self, recording_id: &str) -> Result<Option<Recording>> {
        let recording = sqlx::query_as::<_, Recording>(
            "SELECT * FROM recordings WHERE recording_id = $1",
        )
        .bind(recording_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recording)
    }

    pub async fn exists_by_recording_id(&self, recording_id: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM recordings WHERE recording_id = $1)",
        )
        .bind(recording_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    pub async fn exists_by_session_id(&self, session_id: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM recordings WHERE session_id = $1)",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Detail-tuple duplicate check: same parties and duration within a
    /// five-second start window catches one call reported under two ids.
    pub async fn exists_by_call_details(
        &self,
        start_time: DateTime<Utc>,
        from_number: Option<&str>,
        to_number: Option<&str>,
        duration: i32,
    ) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM recordings
                WHERE start_time >= $1 AND start_time <= $2
                  AND from_number IS NOT DISTINCT FROM $3
                  AND to_number IS NOT DISTINCT FROM $4
                  AND duration = $5
            )
            "#,
        )
        .bind(start_time - Duration::seconds(5))
        .bind(start_time + Duration::seconds(5))
        .bind(from_number)
        .bind(to_number)
        .bind(duration)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Recording ids created in the last `days` days, for the advisory
    /// in-memory dedup cache loaded at adapter startup.
    pub async fn recent_recording_ids(&self, days: i64) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT recording_id FROM recordings WHERE created_at >= $1",
        )
        .bind(Utc::now() - Duration::days(days))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Of the given ids, which already finished the upload stage
    pub async fn ids_with_completed_upload(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT recording_id FROM recordings WHERE recording_id = ANY($1) AND upload_status = 'completed'",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Claim a stage for exclusive processing
    ///
    /// Returns true when this caller won the claim; false means the row is
    /// not pending (another worker owns it, or it already ran).
    pub async fn claim_stage(&self, recording_id: &str, stage: Stage) -> Result<bool> {
        let p = stage.column_prefix();
        let query = format!(
            "UPDATE recordings
             SET {p}_status = 'in_progress', {p}_attempts = {p}_attempts + 1, last_updated = NOW()
             WHERE recording_id = $1 AND {p}_status = 'pending'"
        );

        let result = sqlx::query(&query)
            .bind(recording_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record the outcome of a stage
    pub async fn save_checkpoint(
        &self,
        recording_id: &str,
        stage: Stage,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        let p = stage.column_prefix();
        let query = if success {
            format!(
                "UPDATE recordings
                 SET {p}_status = 'completed', {p}_completed_at = NOW(), {p}_error = NULL,
                     last_updated = NOW()
                 WHERE recording_id = $1"
            )
        } else {
            format!(
                "UPDATE recordings
                 SET {p}_status = 'failed', {p}_error = $2, last_updated = NOW()
                 WHERE recording_id = $1"
            )
        };

        let mut q = sqlx::query(&query).bind(recording_id);
        if !success {
            q = q.bind(error.unwrap_or("unknown error"));
        }
        q.execute(&self.pool).await?;

        tracing::debug!(
            recording_id = %recording_id,
            stage = %stage,
            success,
            "Saved recording checkpoint"
        );

        Ok(())
    }

    /// Recordings pending for a stage, oldest first
    ///
    /// Stage preconditions follow the pipeline order, and anything already
    /// promoted to the failed-items table is excluded.
    pub async fn pending(&self, stage: Stage, limit: i64) -> Result<Vec<PendingRecording>> {
        let condition = match stage {
            Stage::Download => "download_status = 'pending'",
            Stage::Transcription => {
                "download_status = 'completed' AND transcription_status = 'pending'"
            }
            Stage::Upload => "transcription_status = 'completed' AND upload_status = 'pending'",
        };

        let query = format!(
            "SELECT recording_id, retry_count, last_updated
             FROM recordings
             WHERE {condition}
               AND recording_id NOT IN (SELECT recording_id FROM failed_items)
             ORDER BY last_updated ASC
             LIMIT $1"
        );

        let rows = sqlx::query_as::<_, PendingRecording>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Recordings for one calendar day that have not finished the pipeline
    ///
    /// Upload-completed rows are excluded (the dedup rule for re-walked
    /// dates), as are failed items awaiting manual reset.
    pub async fn incomplete_for_date(&self, date: chrono::NaiveDate) -> Result<Vec<String>> {
        let day_start = date
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();
        let day_end = day_start + Duration::days(1);

        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT recording_id FROM recordings
            WHERE start_time >= $1 AND start_time < $2
              AND upload_status != 'completed'
              AND recording_id NOT IN (SELECT recording_id FROM failed_items)
            ORDER BY start_time ASC
            "#,
        )
        .bind(day_start)
        .bind(day_end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Reset eligible failed recordings back to pending for another pass
    ///
    /// Only the failed stage moves back to pending; completed stages are
    /// untouched so the monotonic walk is preserved.
    pub async fn reset_failed(&self, max_age_hours: i64, max_retries: i32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);

        let candidates = sqlx::query_as::<_, (String, String, String, String)>(
            r#"
            SELECT recording_id, download_status, transcription_status, upload_status
            FROM recordings
            WHERE retry_count < $1
              AND last_updated < $2
              AND (download_status = 'failed'
                   OR transcription_status = 'failed'
                   OR upload_status = 'failed')
            "#,
        )
        .bind(max_retries)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        let mut reset_count = 0u64;

        for (recording_id, download, transcription, _upload) in &candidates {
            let stage = if download == "failed" {
                Stage::Download
            } else if transcription == "failed" {
                Stage::Transcription
            } else {
                Stage::Upload
            };

            let p = stage.column_prefix();
            let query = format!(
                "UPDATE recordings
                 SET {p}_status = 'pending', {p}_error = NULL,
                     retry_count = retry_count + 1, last_updated = NOW()
                 WHERE recording_id = $1 AND {p}_status = 'failed'"
            );

            let result = sqlx::query(&query)
                .bind(recording_id)
                .execute(&mut *tx)
                .await?;
            reset_count += result.rows_affected();
        }

        tx.commit().await?;

        tracing::info!("Reset {} failed recordings for retry", reset_count);
        Ok(reset_count)
    }

    /// Promote a recording to the failed-items table once its retry budget
    /// is exhausted; future pending selections skip it until manual reset.
    pub async fn promote_to_failed_item(
        &self,
        recording_id: &str,
        failure_reason: &str,
        last_error: Option<&str>,
    ) -> Result<()> {
        let recording = self
            .find_by_recording_id(recording_id)
            .await?
            .ok_or_else(|| Error::Database(format!("Recording {recording_id} not found")))?;

        let attempts = recording
            .download_attempts
            .max(recording.transcription_attempts)
            .max(recording.upload_attempts);

        sqlx::query(
            r#"
            INSERT INTO failed_items (
                call_id, recording_id, failure_reason, last_error,
                attempt_count, first_attempted_at, last_attempted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (recording_id) DO UPDATE SET
                failure_reason = EXCLUDED.failure_reason,
                last_error = EXCLUDED.last_error,
                attempt_count = EXCLUDED.attempt_count,
                last_attempted_at = NOW()
            "#,
        )
        .bind(&recording.call_id)
        .bind(recording_id)
        .bind(failure_reason)
        .bind(last_error)
        .bind(attempts)
        .bind(recording.created_at)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            recording_id = %recording_id,
            attempts,
            "Recording moved to failed items"
        );

        Ok(())
    }

    pub async fn failed_items(&self, limit: i64) -> Result<Vec<FailedItem>> {
        let rows = sqlx::query_as::<_, FailedItem>(
            "SELECT * FROM failed_items ORDER BY last_attempted_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn is_failed_item(&self, recording_id: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM failed_items WHERE recording_id = $1)",
        )
        .bind(recording_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Remove a failed item so the recording becomes eligible again
    pub async fn clear_failed_item(&self, recording_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM failed_items WHERE recording_id = $1")
            .bind(recording_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_local_file(&self, recording_id: &str, path: &str) -> Result<()> {
        sqlx::query(
            "UPDATE recordings SET local_file_path = $2, last_updated = NOW() WHERE recording_id = $1",
        )
        .bind(recording_id)
        .bind(path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a transcript and its statistics in one transaction
    pub async fn save_transcript(&self, transcript: &Transcript) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO transcripts (
                recording_id, transcript_text, language, language_probability,
                segments, word_count, confidence, duration_seconds,
                processing_time_seconds, customer_name, employee_name
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (recording_id) DO UPDATE SET
                transcript_text = EXCLUDED.transcript_text,
                language = EXCLUDED.language,
                language_probability = EXCLUDED.language_probability,
                segments = EXCLUDED.segments,
                word_count = EXCLUDED.word_count,
                confidence = EXCLUDED.confidence,
                duration_seconds = EXCLUDED.duration_seconds,
                processing_time_seconds = EXCLUDED.processing_time_seconds,
                updated_at = NOW()
            "#,
        )
        .bind(&transcript.recording_id)
        .bind(&transcript.text)
        .bind(&transcript.language)
        .bind(transcript.language_probability)
        .bind(serde_json::to_value(&transcript.segments)?)
        .bind(transcript.word_count)
        .bind(transcript.confidence)
        .bind(transcript.duration_seconds)
        .bind(transcript.processing_time_seconds)
        .bind(&transcript.customer_name)
        .bind(&transcript.employee_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE recordings
            SET transcript_word_count = $2, transcript_confidence = $3,
                language_detected = $4, last_updated = NOW()
            WHERE recording_id = $1
            "#,
        )
        .bind(&transcript.recording_id)
        .bind(transcript.word_count)
        .bind(transcript.confidence)
        .bind(&transcript.language)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_transcript(&self, recording_id: &str) -> Result<Option<Transcript>> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                f64,
                serde_json::Value,
                i32,
                f64,
                f64,
                f64,
                Option<String>,
                Option<String>,
            ),
        >(
            r#"
            SELECT recording_id, transcript_text, language, language_probability,
                   segments, word_count, confidence, duration_seconds,
                   processing_time_seconds, customer_name, employee_name
            FROM transcripts WHERE recording_id = $1
            "#,
        )
        .bind(recording_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((
            recording_id,
            text,
            language,
            language_probability,
            segments,
            word_count,
            confidence,
            duration_seconds,
            processing_time_seconds,
            customer_name,
            employee_name,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(Transcript {
            recording_id,
            text,
            language,
            language_probability,
            segments: serde_json::from_value(segments)?,
            word_count,
            confidence,
            duration_seconds,
            processing_time_seconds,
            customer_name,
            employee_name,
        }))
    }

    /// Mark the audio deleted and link the remote archive artefact
    pub async fn mark_audio_deleted(&self, recording_id: &str, archive_file_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recordings
            SET audio_deleted = TRUE, audio_deletion_time = NOW(),
                archive_file_id = $2, local_file_path = NULL, last_updated = NOW()
            WHERE recording_id = $1
            "#,
        )
        .bind(recording_id)
        .bind(archive_file_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a processing-history audit row
    pub async fn append_history(
        &self,
        recording_id: &str,
        action: &str,
        status: &str,
        details: serde_json::Value,
        error_message: Option<&str>,
        duration_ms: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_history (
                recording_id, action, status, details, error_message, duration_ms
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(recording_id)
        .bind(action)
        .bind(status)
        .bind(details)
        .bind(error_message)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn history_for(&self, recording_id: &str) -> Result<Vec<super::models::ProcessingHistory>> {
        let rows = sqlx::query_as::<_, super::models::ProcessingHistory>(
            "SELECT * FROM processing_history WHERE recording_id = $1 ORDER BY created_at ASC",
        )
        .bind(recording_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Aggregate counts for the status surface and queue-depth gauges
    pub async fn processing_summary(&self) -> Result<ProcessingSummary> {
        let row = sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE upload_status = 'completed'),
                COUNT(*) FILTER (WHERE download_status = 'pending'),
                COUNT(*) FILTER (WHERE download_status = 'completed'
                                   AND transcription_status = 'pending'),
                COUNT(*) FILTER (WHERE transcription_status = 'completed'
                                   AND upload_status = 'pending'),
                COUNT(*) FILTER (WHERE download_status = 'failed'),
                COUNT(*) FILTER (WHERE transcription_status = 'failed'),
                COUNT(*) FILTER (WHERE upload_status = 'failed')
            FROM recordings
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ProcessingSummary {
            total_recordings: row.0,
            completed: row.1,
            pending_download: row.2,
            pending_transcription: row.3,
            pending_upload: row.4,
            failed_download: row.5,
            failed_transcription: row.6,
            failed_upload: row.7,
            active_batches: 0,
        })
    }

    /// Record the true attempt count for a stage when the work inside one
    /// claim involved provider-level retries (e.g. ASR 429s).
    pub async fn set_stage_attempts(
        &self,
        recording_id: &str,
        stage: Stage,
        attempts: i32,
    ) -> Result<()> {
        let p = stage.column_prefix();
        let query = format!(
            "UPDATE recordings
             SET {p}_attempts = GREATEST({p}_attempts, $2), last_updated = NOW()
             WHERE recording_id = $1"
        );

        sqlx::query(&query)
            .bind(recording_id)
            .bind(attempts)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Current attempt count for a stage (used by the ASR retry budget)
    pub async fn stage_attempts(&self, recording_id: &str, stage: Stage) -> Result<i32> {
        let p = stage.column_prefix();
        let query = format!("SELECT {p}_attempts FROM recordings WHERE recording_id = $1");

        let row = sqlx::query_as::<_, (i32,)>(&query)
            .bind(recording_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(n,)| n).unwrap_or(0))
    }

    /// Stage status snapshot used by invariant checks and the CLI
    pub async fn stage_status(
        &self,
        recording_id: &str,
    ) -> Result<Option<(ProcessingStatus, ProcessingStatus, ProcessingStatus)>> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT download_status, transcription_status, upload_status
             FROM recordings WHERE recording_id = $1",
        )
        .bind(recording_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((d, t, u)) => Ok(Some((
                d.parse().map_err(Error::Database)?,
                t.parse().map_err(Error::Database)?,
                u.parse().map_err(Error::Database)?,
            ))),
            None => Ok(None),
        }
    }
}
