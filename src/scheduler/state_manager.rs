//! Durable, resumable processing state
//!
//! Batches and per-recording stage progress both live in the database;
//! the state manager is the one place workers go through to read or
//! advance them.

use chrono::NaiveDate;

use crate::database::models::{BatchState, Stage};
use crate::database::recordings::{PendingRecording, ProcessingSummary, RecordingStore};
use crate::database::state::StateStore;
use crate::error::{Error, Result};

/// State key for the scheduler's own rolling-window progress
pub const MAIN_PROCESSOR_KEY: &str = "main_processor";

fn batch_key(batch_id: &str) -> String {
    format!("batch_{batch_id}")
}

#[derive(Clone)]
pub struct StateManager {
    states: StateStore,
    recordings: RecordingStore,
}

impl StateManager {
    pub fn new(states: StateStore, recordings: RecordingStore) -> Self {
        Self { states, recordings }
    }

    pub fn recordings(&self) -> &RecordingStore {
        &self.recordings
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    /// Create and persist a new batch with its cursor at the start date
    pub async fn create_batch(
        &self,
        batch_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BatchState> {
        if end_date < start_date {
            return Err(Error::InvalidInput(format!(
                "Batch window ends before it starts: {start_date}..{end_date}"
            )));
        }

        let batch = BatchState::new(batch_id.to_string(), start_date, end_date);
        self.states
            .put(&batch_key(batch_id), &serde_json::to_value(&batch)?)
            .await?;

        tracing::info!(batch_id, %start_date, %end_date, "Created batch");
        Ok(batch)
    }

    pub async fn load_batch(&self, batch_id: &str) -> Result<Option<BatchState>> {
        let Some(state) = self.states.get(&batch_key(batch_id)).await? else {
            tracing::warn!(batch_id, "Batch not found");
            return Ok(None);
        };

        let batch: BatchState = serde_json::from_value(state.state_value)?;
        Ok(Some(batch))
    }

    /// Overwrite the persisted snapshot and refresh the checkpoint
    pub async fn update_batch(&self, batch: &BatchState) -> Result<()> {
        self.states
            .put(&batch_key(&batch.batch_id), &serde_json::to_value(batch)?)
            .await?;
        Ok(())
    }

    pub async fn complete_batch(&self, batch: &mut BatchState) -> Result<()> {
        batch.completed = true;

        let key = batch_key(&batch.batch_id);
        self.states.put(&key, &serde_json::to_value(&*batch)?).await?;
        self.states.set_active(&key, false).await?;

        tracing::info!(batch_id = %batch.batch_id, "Completed batch");
        Ok(())
    }

    pub async fn active_batches(&self) -> Result<Vec<BatchState>> {
        let states = self.states.active_with_prefix("batch_").await?;

        let mut batches = Vec::with_capacity(states.len());
        for state in states {
            match serde_json::from_value(state.state_value) {
                Ok(batch) => batches.push(batch),
                Err(e) => tracing::warn!(
                    state_key = %state.state_key,
                    error = %e,
                    "Skipping unreadable batch state"
                ),
            }
        }

        Ok(batches)
    }

    /// Record a stage outcome for one recording
    pub async fn save_recording_checkpoint(
        &self,
        recording_id: &str,
        stage: Stage,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        self.recordings
            .save_checkpoint(recording_id, stage, success, error)
            .await
    }

    /// Recordings waiting on a stage, in pipeline-precondition order
    pub async fn pending_recordings(
        &self,
        stage: Stage,
        limit: i64,
    ) -> Result<Vec<PendingRecording>> {
        self.recordings.pending(stage, limit).await
    }

    /// Move eligible failed stages back to pending
    pub async fn reset_failed_recordings(
        &self,
        max_age_hours: i64,
        max_retries: i32,
    ) -> Result<u64> {
        self.recordings.reset_failed(max_age_hours, max_retries).await
    }

    /// Counts for the status surface, including active batches
    pub async fn processing_summary(&self) -> Result<ProcessingSummary> {
        let mut summary = self.recordings.processing_summary().await?;
        summary.active_batches = self.active_batches().await?.len() as i64;
        Ok(summary)
    }

    pub async fn cleanup_old_states(&self, days: i64) -> Result<u64> {
        self.states.cleanup_old(days).await
    }
}
