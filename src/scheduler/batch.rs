//! Batch processor
//!
//! Walks a date range end to end: discover that day's recordings, then
//! fan each one out to a bounded worker pool that runs the full
//! download -> transcribe -> upload pipeline with a checkpoint after
//! every stage. The batch row persists after every date, so a crashed or
//! stopped batch resumes from its cursor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::state_manager::StateManager;
use crate::database::meetings::{MeetingStore, NewMeeting};
use crate::database::models::Stage;
use crate::error::{Error, Result};
use crate::monitoring::Metrics;
use crate::sources::telephony::CallIngestor;
use crate::storage::secure::SecureStorageHandler;
use crate::transcription::TranscriptionPipeline;

/// Hard deadline for one recording's full pipeline
const PER_ITEM_TIMEOUT: Duration = Duration::from_secs(300);

/// Pause between inner batches to give provider rate limits headroom
const INTER_BATCH_DELAY: Duration = Duration::from_secs(1);

/// Pause after each full recording inside a worker
const INTER_RECORDING_DELAY: Duration = Duration::from_secs(2);

/// Consecutive per-date errors tolerated before the batch aborts
const MAX_BATCH_ERRORS: i64 = 5;

/// Progress snapshot handed to the progress callback after each date
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub current_date: NaiveDate,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
}

pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Final outcome of one batch run
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub total_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub errors: Vec<String>,
    pub completed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct DateStats {
    processed: i64,
    succeeded: i64,
    failed: i64,
}

pub struct BatchProcessor {
    state: StateManager,
    ingestor: Arc<CallIngestor>,
    transcription: Arc<TranscriptionPipeline>,
    secure_storage: Arc<SecureStorageHandler>,
    meetings: MeetingStore,
    metrics: Arc<Metrics>,
    worker_count: usize,
    batch_size: usize,
    max_retries: u32,
    stop_flag: Arc<AtomicBool>,
}

impl BatchProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateManager,
        ingestor: Arc<CallIngestor>,
        transcription: Arc<TranscriptionPipeline>,
        secure_storage: Arc<SecureStorageHandler>,
        meetings: MeetingStore,
        metrics: Arc<Metrics>,
        worker_count: usize,
        batch_size: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            state,
            ingestor,
            transcription,
            secure_storage,
            meetings,
            metrics,
            worker_count: worker_count.max(1),
            batch_size: batch_size.max(1),
            max_retries,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cooperative shutdown; workers finish their current item
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        tracing::info!("Batch processor stopping");
    }

    pub fn clear_stop(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Process a date range, resuming an existing batch when given
    pub async fn process_date_range(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        resume_batch_id: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Result<BatchResult> {
        let mut batch = match resume_batch_id {
            Some(batch_id) => self
                .state
                .load_batch(batch_id)
                .await?
                .ok_or_else(|| Error::InvalidInput(format!("Batch {batch_id} not found")))?,
            None => {
                let batch_id = Uuid::new_v4().to_string();
                self.state.create_batch(&batch_id, start_date, end_date).await?
            }
        };

        if resume_batch_id.is_some() {
            tracing::info!(
                batch_id = %batch.batch_id,
                resume_from = %batch.current_date,
                "Resuming batch"
            );
        }

        let mut result = BatchResult {
            batch_id: batch.batch_id.clone(),
            ..Default::default()
        };

        while batch.current_date <= batch.end_date && !self.stopped() {
            let date = batch.current_date;
            tracing::info!(batch_id = %batch.batch_id, %date, "Processing date");

            match self.process_date(date).await {
                Ok(stats) => {
                    batch.total_processed += stats.processed;
                    batch.total_failed += stats.failed;

                    result.total_processed += stats.processed;
                    result.total_succeeded += stats.succeeded;
                    result.total_failed += stats.failed;
                }
                Err(e) => {
                    batch.error_count += 1;
                    batch.last_error = Some(e.to_string());
                    result.errors.push(format!("{date}: {e}"));
                    tracing::error!(%date, error = %e, "Date processing failed");

                    if batch.error_count > MAX_BATCH_ERRORS {
                        tracing::error!(
                            batch_id = %batch.batch_id,
                            "Too many errors, stopping batch"
                        );
                        self.state.update_batch(&batch).await?;
                        return Ok(result);
                    }
                }
            }

            batch.current_date = date + chrono::Duration::days(1);
            self.state.update_batch(&batch).await?;

            if let Some(callback) = &progress {
                callback(BatchProgress {
                    batch_id: batch.batch_id.clone(),
                    current_date: date,
                    processed: result.total_processed,
                    succeeded: result.total_succeeded,
                    failed: result.total_failed,
                });
            }
        }

        if batch.is_finished() {
            self.state.complete_batch(&mut batch).await?;
            result.completed = true;
        }

        Ok(result)
    }

    /// Discover and fully process one calendar day's recordings
    async fn process_date(&self, date: NaiveDate) -> Result<DateStats> {
        // Discovery applies the four-layer dedup and queues new rows
        self.ingestor.sync_window(date, date).await?;

        // Everything for this date still short of upload-completed
        let recording_ids = self.state.recordings().incomplete_for_date(date).await?;
        if recording_ids.is_empty() {
            tracing::info!(%date, "No recordings to process");
            return Ok(DateStats::default());
        }

        tracing::info!(%date, count = recording_ids.len(), "Processing recordings");

        let mut stats = DateStats::default();
        let semaphore = Arc::new(Semaphore::new(self.worker_count));

        for inner_batch in recording_ids.chunks(self.batch_size) {
            if self.stopped() {
                tracing::info!("Processing stopped by request");
                break;
            }

            let mut handles = Vec::with_capacity(inner_batch.len());

            for recording_id in inner_batch {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("Worker semaphore closed".into()))?;

                if self.stopped() {
                    drop(permit);
                    break;
                }

                let recording_id = recording_id.clone();
                let worker = self.clone_worker();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    let outcome =
                        tokio::time::timeout(PER_ITEM_TIMEOUT, worker.process_recording(&recording_id))
                            .await;

                    let succeeded = match outcome {
                        Ok(Ok(success)) => success,
                        Ok(Err(e)) => {
                            tracing::error!(
                                recording_id = %recording_id,
                                error = %e,
                                "Recording pipeline failed"
                            );
                            false
                        }
                        Err(_) => {
                            tracing::error!(
                                recording_id = %recording_id,
                                "Recording pipeline timed out"
                            );
                            false
                        }
                    };

                    tokio::time::sleep(INTER_RECORDING_DELAY).await;
                    succeeded
                }));
            }

            for handle in handles {
                stats.processed += 1;
                match handle.await {
                    Ok(true) => stats.succeeded += 1,
                    Ok(false) => stats.failed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        tracing::error!(error = %e, "Worker task panicked");
                    }
                }
            }

            tokio::time::sleep(INTER_BATCH_DELAY).await;
        }

        Ok(stats)
    }

    fn clone_worker(&self) -> Worker {
        Worker {
            state: self.state.clone(),
            ingestor: self.ingestor.clone(),
            transcription: self.transcription.clone(),
            secure_storage: self.secure_storage.clone(),
            meetings: self.meetings.clone(),
            metrics: self.metrics.clone(),
            max_retries: self.max_retries,
        }
    }

    /// Reset eligible failed recordings, then drain each stage's pending set
    pub async fn process_failed_recordings(&self, max_retries: u32) -> Result<BatchResult> {
        tracing::info!("Starting failed recording reprocessing");

        let mut result = BatchResult {
            batch_id: "failed-retry".to_string(),
            ..Default::default()
        };

        let reset = self
            .state
            .reset_failed_recordings(24, max_retries as i32)
            .await?;
        if reset == 0 {
            tracing::info!("No failed recordings to reprocess");
            result.completed = true;
            return Ok(result);
        }

        for stage in [Stage::Download, Stage::Transcription, Stage::Upload] {
            let pending = self.state.pending_recordings(stage, 100).await?;
            if pending.is_empty() {
                continue;
            }

            tracing::info!(stage = %stage, count = pending.len(), "Reprocessing stage");

            let semaphore = Arc::new(Semaphore::new(self.worker_count));
            let mut handles = Vec::with_capacity(pending.len());

            for item in pending {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("Worker semaphore closed".into()))?;
                let worker = self.clone_worker();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    tokio::time::timeout(
                        PER_ITEM_TIMEOUT,
                        worker.process_recording(&item.recording_id),
                    )
                    .await
                    .unwrap_or(Ok(false))
                    .unwrap_or(false)
                }));
            }

            for handle in handles {
                result.total_processed += 1;
                match handle.await {
                    Ok(true) => result.total_succeeded += 1,
                    _ => result.total_failed += 1,
                }
            }
        }

        result.completed = true;
        Ok(result)
    }
}

/// One worker's view of the pipeline services
#[derive(Clone)]
struct Worker {
    state: StateManager,
    ingestor: Arc<CallIngestor>,
    transcription: Arc<TranscriptionPipeline>,
    secure_storage: Arc<SecureStorageHandler>,
    meetings: MeetingStore,
    metrics: Arc<Metrics>,
    max_retries: u32,
}

impl Worker {
    /// Run one recording through download -> transcribe -> upload
    ///
    /// Each stage is claimed with a conditional update; a false claim
    /// means the stage is done or another worker owns it. Checkpoints are
    /// written after every stage so a crash resumes mid-pipeline.
    async fn process_recording(&self, recording_id: &str) -> Result<bool> {
        let recordings = self.state.recordings();
        let overall_start = Instant::now();

        let Some((download, transcription, upload)) = recordings.stage_status(recording_id).await?
        else {
            return Err(Error::InvalidInput(format!(
                "Recording {recording_id} not queued"
            )));
        };

        use crate::database::models::ProcessingStatus::*;

        if upload == Completed {
            tracing::debug!(recording_id, "Recording already processed");
            return Ok(true);
        }

        // Download
        if download != Completed {
            if !self.run_stage(recording_id, Stage::Download).await? {
                return Ok(false);
            }
        }

        // Transcribe
        if transcription != Completed {
            if !self.run_stage(recording_id, Stage::Transcription).await? {
                return Ok(false);
            }
        }

        // Upload + secure deletion
        if !self.run_stage(recording_id, Stage::Upload).await? {
            return Ok(false);
        }

        self.metrics
            .record_recording_processed(overall_start.elapsed().as_secs_f64());

        tracing::info!(recording_id, "Recording pipeline complete");
        Ok(true)
    }

    /// Claim and execute one stage, checkpointing the outcome
    async fn run_stage(&self, recording_id: &str, stage: Stage) -> Result<bool> {
        let recordings = self.state.recordings();

        if !recordings.claim_stage(recording_id, stage).await? {
            // Someone else owns it or it already ran; treat as not-ours
            tracing::debug!(recording_id, stage = %stage, "Stage claim lost");
            return Ok(false);
        }

        let stage_start = Instant::now();
        let outcome = self.execute_stage(recording_id, stage).await;
        let elapsed = stage_start.elapsed().as_secs_f64();

        match outcome {
            Ok(()) => {
                self.state
                    .save_recording_checkpoint(recording_id, stage, true, None)
                    .await?;
                self.metrics.record_stage_success(stage.column_prefix(), elapsed);

                recordings
                    .append_history(
                        recording_id,
                        stage.column_prefix(),
                        "success",
                        serde_json::json!({ "duration_ms": (elapsed * 1000.0) as i64 }),
                        None,
                        Some((elapsed * 1000.0) as i32),
                    )
                    .await?;

                Ok(true)
            }
            Err(e) => {
                let classified = crate::error::StageError::classify(&e);
                self.state
                    .save_recording_checkpoint(recording_id, stage, false, Some(&classified.message))
                    .await?;
                self.metrics.record_stage_failure(stage.column_prefix(), elapsed);

                recordings
                    .append_history(
                        recording_id,
                        stage.column_prefix(),
                        "failed",
                        serde_json::json!({ "kind": format!("{:?}", classified.kind) }),
                        Some(&classified.message),
                        Some((elapsed * 1000.0) as i32),
                    )
                    .await?;

                // Past the retry budget the recording leaves the automatic
                // pipeline until a manual reset.
                let attempts = recordings.stage_attempts(recording_id, stage).await?;
                if attempts >= self.max_retries as i32 {
                    recordings
                        .promote_to_failed_item(
                            recording_id,
                            &format!("{stage} failed after {attempts} attempts"),
                            Some(&classified.message),
                        )
                        .await?;
                }

                tracing::warn!(
                    recording_id,
                    stage = %stage,
                    attempts,
                    error = %classified.message,
                    "Stage failed"
                );

                Ok(false)
            }
        }
    }

    async fn execute_stage(&self, recording_id: &str, stage: Stage) -> Result<()> {
        match stage {
            Stage::Download => {
                self.ingestor.download_to_queue(recording_id).await?;
                Ok(())
            }
            Stage::Transcription => {
                let transcript = self.transcription.transcribe(recording_id).await?;
                self.metrics.record_confidence(transcript.confidence);
                Ok(())
            }
            Stage::Upload => {
                let recordings = self.state.recordings();
                let recording = recordings
                    .find_by_recording_id(recording_id)
                    .await?
                    .ok_or_else(|| {
                        Error::InvalidInput(format!("Recording {recording_id} vanished"))
                    })?;
                let transcript = recordings
                    .fetch_transcript(recording_id)
                    .await?
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "Recording {recording_id} has no transcript to archive"
                        ))
                    })?;

                self.secure_storage
                    .process_transcription(&recording, &transcript)
                    .await?;

                // The archived call enters the analytical cascade through
                // its own analysis row; the upsert keeps reruns idempotent.
                let analysis_row = NewMeeting::from_call(&recording);
                if let Some(id) = self.meetings.insert(&analysis_row).await? {
                    self.meetings
                        .set_transcript(id, Some(transcript.text.as_str()), None)
                        .await?;
                }

                Ok(())
            }
        }
    }
}
