//! Secure storage handler
//!
//! After a transcript is persisted, this handler archives the artefacts
//! locally and remotely, verifies the remote copy exists, and only then
//! deletes the source audio, re-statting the path to prove the deletion.
//! Every outcome lands in a hash-chained audit log.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use super::archive::{remote_key, render_markdown, ArchiveCategory, ArchiveLayout};
use super::Storage;
use crate::database::models::{Recording, Transcript};
use crate::database::recordings::RecordingStore;
use crate::error::{Error, Result};

/// Outcome of one secure-storage pass
#[derive(Debug, Clone, serde::Serialize)]
pub struct StorageOutcome {
    pub archive_file_id: String,
    pub audio_deleted: bool,
    pub deletion_verified: bool,
    pub deletion_retried: bool,
}

/// Report from the deletion step alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub deleted: bool,
    pub verified: bool,
    pub retried: bool,
}

pub struct SecureStorageHandler {
    remote: Storage,
    layout: ArchiveLayout,
    recordings: RecordingStore,
    audit_log_path: PathBuf,
}

impl SecureStorageHandler {
    pub fn new(
        remote: Storage,
        layout: ArchiveLayout,
        recordings: RecordingStore,
        audit_log_path: PathBuf,
    ) -> Self {
        Self {
            remote,
            layout,
            recordings,
            audit_log_path,
        }
    }

    /// Archive the transcript and delete the source audio
    ///
    /// The audio file is only removed once both archive copies exist and
    /// the remote copy has been confirmed by a metadata fetch.
    pub async fn process_transcription(
        &self,
        recording: &Recording,
        transcript: &Transcript,
    ) -> Result<StorageOutcome> {
        let recording_id = &recording.recording_id;

        let result = self.archive_and_delete(recording, transcript).await;

        match &result {
            Ok(outcome) => {
                self.append_audit(
                    recording_id,
                    "success",
                    serde_json::to_value(outcome).unwrap_or_default(),
                )
                .await?;
            }
            Err(e) => {
                self.append_audit(
                    recording_id,
                    "failure",
                    serde_json::json!({ "error": e.to_string() }),
                )
                .await?;
            }
        }

        result
    }

    async fn archive_and_delete(
        &self,
        recording: &Recording,
        transcript: &Transcript,
    ) -> Result<StorageOutcome> {
        let recording_id = &recording.recording_id;

        // Local artefacts
        let json_body = serde_json::to_vec_pretty(transcript)?;
        let markdown = render_markdown(recording, transcript);

        let json_path = self.layout.json_path(recording_id, recording.start_time);
        let md_path = self.layout.markdown_path(recording_id, recording.start_time);
        self.layout.write(&json_path, &json_body).await?;
        self.layout.write(&md_path, markdown.as_bytes()).await?;

        // Remote artefacts
        let transcript_key = remote_key(
            recording.start_time,
            ArchiveCategory::Transcripts,
            &format!("{recording_id}.json"),
        );
        let metadata_key = remote_key(
            recording.start_time,
            ArchiveCategory::Metadata,
            &format!("{recording_id}.md"),
        );

        self.remote.upload(&transcript_key, json_body).await?;
        self.remote
            .upload(&metadata_key, markdown.into_bytes())
            .await?;

        // An upload call returning cleanly is not proof the object exists;
        // confirm with a metadata fetch before anything is deleted.
        let confirmed = self.remote.metadata(&transcript_key).await?;
        if confirmed.is_none() {
            return Err(Error::Storage(format!(
                "Archive upload for {recording_id} not found on verification fetch"
            )));
        }

        // Delete the source audio with verification
        let report = match &recording.local_file_path {
            Some(path) => delete_with_verification(Path::new(path)).await?,
            None => DeletionReport {
                deleted: false,
                verified: true,
                retried: false,
            },
        };

        if report.retried {
            self.append_audit(
                recording_id,
                "deletion_retry",
                serde_json::json!({ "path": recording.local_file_path }),
            )
            .await?;
        }

        self.recordings
            .mark_audio_deleted(recording_id, &transcript_key)
            .await?;

        self.recordings
            .append_history(
                recording_id,
                "secure_delete",
                "success",
                serde_json::json!({
                    "archive_file_id": transcript_key,
                    "deletion_verified": report.verified,
                }),
                None,
                None,
            )
            .await?;

        tracing::info!(
            recording_id = %recording_id,
            archive_file_id = %transcript_key,
            deletion_verified = report.verified,
            "Transcript archived and audio deleted"
        );

        Ok(StorageOutcome {
            archive_file_id: transcript_key,
            audio_deleted: report.deleted || recording.local_file_path.is_none(),
            deletion_verified: report.verified,
            deletion_retried: report.retried,
        })
    }

    /// Append a hash-chained row to the audit log
    ///
    /// Each entry carries the SHA-256 of the previous entry line, so any
    /// edit to history breaks the chain.
    async fn append_audit(
        &self,
        recording_id: &str,
        outcome: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        if let Some(parent) = self.audit_log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let prev_hash = match tokio::fs::read_to_string(&self.audit_log_path).await {
            Ok(content) => content
                .lines()
                .last()
                .map(|line| hex::encode(Sha256::digest(line.as_bytes())))
                .unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "recording_id": recording_id,
            "outcome": outcome,
            "details": details,
            "prev_hash": prev_hash,
        });

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;

        Ok(())
    }
}

/// Delete a file and verify it is gone, retrying once
///
/// Raises `DeletionFailed` when the path still exists after the retry;
/// callers surface that as a high-priority alert.
pub async fn delete_with_verification(path: &Path) -> Result<DeletionReport> {
    if !path.exists() {
        return Ok(DeletionReport {
            deleted: false,
            verified: true,
            retried: false,
        });
    }

    let first = tokio::fs::remove_file(path).await;
    if first.is_ok() && !path.exists() {
        return Ok(DeletionReport {
            deleted: true,
            verified: true,
            retried: false,
        });
    }

    // Retry once
    let second = tokio::fs::remove_file(path).await;
    if second.is_ok() && !path.exists() {
        return Ok(DeletionReport {
            deleted: true,
            verified: true,
            retried: true,
        });
    }

    Err(Error::DeletionFailed(format!(
        "{} still exists after retry",
        path.display()
    )))
}

/// Verify the audit log's hash chain from the start
pub async fn verify_audit_chain(path: &Path) -> Result<bool> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };

    let mut expected_prev = String::new();
    for line in content.lines() {
        let entry: serde_json::Value = serde_json::from_str(line)?;
        let prev = entry
            .get("prev_hash")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if prev != expected_prev {
            return Ok(false);
        }
        expected_prev = hex::encode(Sha256::digest(line.as_bytes()));
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_delete_with_verification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audio.mp3");
        tokio::fs::write(&path, b"audio").await.unwrap();

        let report = delete_with_verification(&path).await.unwrap();
        assert!(report.deleted);
        assert!(report.verified);
        assert!(!report.retried);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_verified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.mp3");

        let report = delete_with_verification(&path).await.unwrap();
        assert!(!report.deleted);
        assert!(report.verified);
    }

    #[tokio::test]
    async fn test_audit_chain_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("audit.log");

        // Build a two-entry chain by hand, the way append_audit does
        let first = serde_json::json!({"recording_id": "a", "prev_hash": ""});
        let first_line = serde_json::to_string(&first).unwrap();
        let first_hash = hex::encode(Sha256::digest(first_line.as_bytes()));
        let second = serde_json::json!({"recording_id": "b", "prev_hash": first_hash});
        let second_line = serde_json::to_string(&second).unwrap();

        tokio::fs::write(&log, format!("{first_line}\n{second_line}\n"))
            .await
            .unwrap();
        assert!(verify_audit_chain(&log).await.unwrap());

        // Rewrite the first entry; the second entry's prev_hash no longer matches
        let forged = serde_json::json!({"recording_id": "FORGED", "prev_hash": ""});
        let forged_line = serde_json::to_string(&forged).unwrap();
        tokio::fs::write(&log, format!("{forged_line}\n{second_line}\n"))
            .await
            .unwrap();
        assert!(!verify_audit_chain(&log).await.unwrap());
    }
}
