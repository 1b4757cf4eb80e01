//! Transcription orchestrator
//!
//! Turns an on-disk recording into a persisted transcript: resolve the
//! media file, extract audio for video, validate, publish at a presigned
//! URL the ASR provider can fetch, submit and poll the job (chunked for
//! long audio), post-process, and persist. At most one job is in flight
//! per recording; the stage claim in the batch worker guarantees it.

pub mod asr;
pub mod audio;
pub mod normalize;

use std::time::{Duration, Instant};

use asr::{AsrClient, AsrOutcome};
use audio::{MediaTool, MAX_CHUNK_DURATION_SECS};
use normalize::{calculate_confidence, normalize, stitch_chunks, ChunkResult};

use crate::database::models::{Stage, Transcript, TranscriptSegment};
use crate::database::recordings::RecordingStore;
use crate::error::{Error, Result};
use crate::storage::archive::{remote_key, ArchiveCategory};
use crate::storage::Storage;

/// How long the presigned audio URL stays valid for the ASR fetch
const PRESIGN_TTL: Duration = Duration::from_secs(2 * 3600);

pub struct TranscriptionPipeline {
    recordings: RecordingStore,
    storage: Storage,
    asr: AsrClient,
}

impl TranscriptionPipeline {
    pub fn new(recordings: RecordingStore, storage: Storage, asr: AsrClient) -> Self {
        Self {
            recordings,
            storage,
            asr,
        }
    }

    /// Transcribe one recording end to end and persist the transcript
    pub async fn transcribe(&self, recording_id: &str) -> Result<Transcript> {
        let recording = self
            .recordings
            .find_by_recording_id(recording_id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("Recording {recording_id} not found")))?;

        let local_path = recording
            .local_file_path
            .as_deref()
            .ok_or_else(|| Error::InvalidInput(format!("Recording {recording_id} has no media file")))?;
        let local_path = std::path::Path::new(local_path);

        let started = Instant::now();
        let media = MediaTool::new()?;

        // Video containers get their audio extracted first
        let audio_path = if audio::is_video(local_path) {
            media.extract_audio(local_path).await?
        } else {
            local_path.to_path_buf()
        };

        let mut duration_secs = recording.duration as f64;
        if duration_secs <= 0.0 {
            duration_secs = media.probe_duration(&audio_path).await?;
        }

        audio::validate_media(&audio_path, duration_secs)?;

        let (text, segments, language, language_probability, attempts) =
            if duration_secs > MAX_CHUNK_DURATION_SECS {
                self.transcribe_chunked(&media, &audio_path, &recording.recording_id, duration_secs)
                    .await?
            } else {
                self.transcribe_single(&audio_path, &recording.recording_id, recording.start_time)
                    .await?
            };

        self.recordings
            .set_stage_attempts(recording_id, Stage::Transcription, attempts as i32)
            .await?;

        let text = normalize(&text);
        let confidence = calculate_confidence(&segments);
        let word_count = text.split_whitespace().count() as i32;

        let transcript = Transcript {
            recording_id: recording.recording_id.clone(),
            text,
            language,
            language_probability,
            segments,
            word_count,
            confidence,
            duration_seconds: duration_secs,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            customer_name: recording.from_name.clone(),
            employee_name: recording.to_name.clone(),
        };

        self.recordings.save_transcript(&transcript).await?;

        tracing::info!(
            recording_id = %recording_id,
            words = transcript.word_count,
            confidence = transcript.confidence,
            language = %transcript.language,
            elapsed_s = transcript.processing_time_seconds,
            "Transcription complete"
        );

        Ok(transcript)
    }

    async fn transcribe_single(
        &self,
        audio_path: &std::path::Path,
        recording_id: &str,
        start_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<(String, Vec<TranscriptSegment>, String, f64, u32)> {
        let extension = audio_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3");
        let key = remote_key(
            start_time,
            ArchiveCategory::Audio,
            &format!("{recording_id}.{extension}"),
        );

        let url = self.publish(audio_path, &key).await?;
        let outcome = self.asr.transcribe_url(&url, recording_id).await?;

        Ok(unpack(outcome))
    }

    /// Long audio: slice into overlapping windows, submit serially, stitch
    async fn transcribe_chunked(
        &self,
        media: &MediaTool,
        audio_path: &std::path::Path,
        recording_id: &str,
        duration_secs: f64,
    ) -> Result<(String, Vec<TranscriptSegment>, String, f64, u32)> {
        let windows = audio::plan_chunks(duration_secs);
        tracing::info!(
            recording_id,
            chunks = windows.len(),
            duration_secs,
            "Using chunked transcription for long audio"
        );

        let mut chunk_results = Vec::with_capacity(windows.len());
        let mut total_attempts = 0u32;

        for (index, window) in windows.iter().enumerate() {
            let chunk_path = media.slice_chunk(audio_path, *window, index).await?;
            let key = format!("staging/{recording_id}_chunk{index:03}.wav");

            let url = self.publish(&chunk_path, &key).await?;
            let chunk_tag = format!("{recording_id}#chunk{index}");
            let outcome = self.asr.transcribe_url(&url, &chunk_tag).await?;
            total_attempts += outcome.submit_attempts;

            let (text, segments, language, language_probability, _) = unpack(outcome);
            chunk_results.push(ChunkResult {
                offset_seconds: window.start_secs,
                text,
                segments,
                language,
                language_probability,
            });

            // Chunk audio is transient; remove it from the archive once used
            let _ = self.storage.delete(&key).await;
        }

        let stitched = stitch_chunks(&chunk_results);
        Ok((
            stitched.text,
            stitched.segments,
            stitched.language,
            stitched.language_probability,
            total_attempts,
        ))
    }

    /// Upload audio to the archive and hand back a short-lived public link
    async fn publish(&self, path: &std::path::Path, key: &str) -> Result<String> {
        let data = tokio::fs::read(path).await?;
        self.storage.upload(key, data).await?;
        self.storage.get_presigned_url(key, PRESIGN_TTL).await
    }
}

fn unpack(outcome: AsrOutcome) -> (String, Vec<TranscriptSegment>, String, f64, u32) {
    let document = outcome.document;
    let segments = document
        .segments
        .into_iter()
        .map(TranscriptSegment::from)
        .collect();

    (
        document.text,
        segments,
        document.language.unwrap_or_else(|| "unknown".to_string()),
        document.language_probability.unwrap_or(0.0),
        outcome.submit_attempts,
    )
}
