//! Call-recording ingestion adapter
//!
//! Turns provider call-log entries into pending recording rows with strict
//! four-layer deduplication:
//!   1. a staging file for the recording id already exists
//!   2. a persisted row has the same recording id
//!   3. a persisted row has the same session id
//!   4. a persisted row matches (start ± 5 s, from, to, duration)
//!
//! A 30-day in-memory id cache fronts the database checks; the database
//! remains authoritative.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;

use super::client::TelephonyClient;
use crate::database::models::DiscoveredRecording;
use crate::database::recordings::RecordingStore;
use crate::error::Result;

/// Days of recording ids preloaded into the advisory dedup cache
const KNOWN_ID_WINDOW_DAYS: i64 = 30;

/// Outcome of one ingestion pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestStats {
    pub checked: usize,
    pub queued: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct CallIngestor {
    client: TelephonyClient,
    recordings: RecordingStore,
    audio_queue_dir: PathBuf,
    state_dir: PathBuf,
    known_ids: Arc<Mutex<HashSet<String>>>,
}

impl CallIngestor {
    pub fn new(
        client: TelephonyClient,
        recordings: RecordingStore,
        audio_queue_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            recordings,
            audio_queue_dir,
            state_dir,
            known_ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Preload recently seen recording ids to avoid hot-pathing the DB
    pub async fn load_known_ids(&self) -> Result<usize> {
        let ids = self
            .recordings
            .recent_recording_ids(KNOWN_ID_WINDOW_DAYS)
            .await?;
        let count = ids.len();

        let mut known = self.known_ids.lock().await;
        *known = ids.into_iter().collect();

        tracing::info!("Loaded {} known recording ids", count);
        Ok(count)
    }

    /// Staging path for a recording's audio
    pub fn staging_path(&self, recording_id: &str) -> PathBuf {
        self.audio_queue_dir.join(format!("{recording_id}.mp3"))
    }

    /// Four-layer duplicate check; returns the reason of the first hit
    pub async fn duplicate_reason(
        &self,
        item: &DiscoveredRecording,
    ) -> Result<Option<&'static str>> {
        // 1. Staging file already present
        if self.staging_path(&item.recording_id).exists() {
            return Ok(Some("staging-file"));
        }

        // 2. Same provider recording id (cache first, DB authoritative)
        {
            let known = self.known_ids.lock().await;
            if known.contains(&item.recording_id) {
                return Ok(Some("recording-id"));
            }
        }
        if self
            .recordings
            .exists_by_recording_id(&item.recording_id)
            .await?
        {
            return Ok(Some("recording-id"));
        }

        // 3. Same provider session id
        if let Some(session_id) = &item.session_id {
            if self.recordings.exists_by_session_id(session_id).await? {
                return Ok(Some("session-duplicate"));
            }
        }

        // 4. Same call facts under a different id
        if self
            .recordings
            .exists_by_call_details(
                item.start_time,
                item.from_number.as_deref(),
                item.to_number.as_deref(),
                item.duration,
            )
            .await?
        {
            return Ok(Some("call-details"));
        }

        Ok(None)
    }

    /// Persist a new recording with all stages pending
    pub async fn queue(&self, item: &DiscoveredRecording) -> Result<bool> {
        let inserted = self.recordings.queue(item).await?;
        if inserted {
            self.known_ids
                .lock()
                .await
                .insert(item.recording_id.clone());
        }
        Ok(inserted)
    }

    /// Discover and queue recordings for a date window
    pub async fn sync_window(&self, start: NaiveDate, end: NaiveDate) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        let discovered = self.client.fetch_call_log(start, end).await?;
        stats.checked = discovered.len();

        for item in &discovered {
            match self.duplicate_reason(item).await? {
                Some(reason) => {
                    stats.duplicates += 1;
                    tracing::debug!(
                        recording_id = %item.recording_id,
                        reason,
                        "Skipping duplicate recording"
                    );
                }
                None => match self.queue(item).await {
                    Ok(true) => stats.queued += 1,
                    Ok(false) => stats.duplicates += 1,
                    Err(e) => {
                        stats.failed += 1;
                        tracing::error!(
                            recording_id = %item.recording_id,
                            error = %e,
                            "Failed to queue recording"
                        );
                    }
                },
            }
        }

        self.write_watermark(&stats).await?;

        tracing::info!(
            checked = stats.checked,
            queued = stats.queued,
            duplicates = stats.duplicates,
            "Ingestion pass complete"
        );

        Ok(stats)
    }

    /// Download a recording's media into the staging area
    ///
    /// Returns the staging path. A pre-existing staging file counts as
    /// downloaded (the dedup layer treats it the same way).
    pub async fn download_to_queue(&self, recording_id: &str) -> Result<PathBuf> {
        let path = self.staging_path(recording_id);
        if path.exists() {
            return Ok(path);
        }

        let recording = self
            .recordings
            .find_by_recording_id(recording_id)
            .await?
            .ok_or_else(|| {
                crate::error::Error::Provider(format!("Recording {recording_id} not queued"))
            })?;

        // Prefer the content URI the provider reported at discovery; the
        // per-recording content path is the stable fallback.
        let content_uri = recording.content_uri.clone().unwrap_or_else(|| {
            format!(
                "/restapi/v1.0/account/~/recording/{}/content",
                recording.recording_id
            )
        });

        tokio::fs::create_dir_all(&self.audio_queue_dir).await?;
        let bytes = self.client.download_recording(&content_uri, &path).await?;

        self.recordings
            .set_local_file(recording_id, &path.to_string_lossy())
            .await?;

        tracing::info!(
            recording_id = %recording_id,
            bytes,
            "Downloaded recording to staging"
        );

        Ok(path)
    }

    /// Mirror the ingestion watermark to disk for operator visibility
    async fn write_watermark(&self, stats: &IngestStats) -> Result<()> {
        tokio::fs::create_dir_all(&self.state_dir).await?;

        let watermark = serde_json::json!({
            "last_check": Utc::now().to_rfc3339(),
            "checked": stats.checked,
            "queued": stats.queued,
        });
        tokio::fs::write(
            self.state_dir.join("last_check.json"),
            serde_json::to_vec_pretty(&watermark)?,
        )
        .await?;

        tokio::fs::write(
            self.state_dir.join("check_summary.json"),
            serde_json::to_vec_pretty(stats)?,
        )
        .await?;

        Ok(())
    }
}
