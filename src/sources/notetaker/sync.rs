//! Notetaker sync job
//!
//! Iterates active employees concurrently; each employee's calls run on
//! their own client, which serializes requests on that key. Meetings are
//! deduplicated by the meeting store; transcript 404s are stored as an
//! empty transcript with the missing flag set.

use std::sync::Arc;

use futures::future::join_all;

use super::client::{NotetakerClient, NotetakerMeeting};
use super::keys::{Employee, EmployeeKeyStore};
use crate::config::NotetakerConfig;
use crate::database::meetings::{MeetingStore, NewMeeting};
use crate::database::models::{MeetingSource, MeetingType};
use crate::error::Result;

/// Meetings pulled per employee per sync
const PER_EMPLOYEE_LIMIT: usize = 200;

/// Outcome of one notetaker sync pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct NotetakerSyncStats {
    pub employees_synced: usize,
    pub employees_failed: usize,
    pub meetings_seen: usize,
    pub meetings_saved: usize,
    pub duplicates_skipped: usize,
    pub transcripts_missing: usize,
}

pub struct NotetakerSync {
    config: NotetakerConfig,
    keys: Arc<EmployeeKeyStore>,
    meetings: MeetingStore,
}

impl NotetakerSync {
    pub fn new(config: NotetakerConfig, keys: Arc<EmployeeKeyStore>, meetings: MeetingStore) -> Self {
        Self {
            config,
            keys,
            meetings,
        }
    }

    /// Sync every active employee's meetings
    pub async fn sync_all(&self) -> Result<NotetakerSyncStats> {
        let employees = self.keys.active_employees().await?;
        tracing::info!("Syncing {} notetaker employees", employees.len());

        let futures: Vec<_> = employees
            .iter()
            .map(|employee| self.sync_employee(employee))
            .collect();
        let results = join_all(futures).await;

        let mut stats = NotetakerSyncStats::default();
        for (employee, result) in employees.iter().zip(results) {
            match result {
                Ok(employee_stats) => {
                    stats.employees_synced += 1;
                    stats.meetings_seen += employee_stats.meetings_seen;
                    stats.meetings_saved += employee_stats.meetings_saved;
                    stats.duplicates_skipped += employee_stats.duplicates_skipped;
                    stats.transcripts_missing += employee_stats.transcripts_missing;
                }
                Err(e) => {
                    stats.employees_failed += 1;
                    tracing::error!(
                        employee = %employee.employee_email,
                        error = %e,
                        "Employee sync failed"
                    );
                }
            }
        }

        tracing::info!(
            synced = stats.employees_synced,
            failed = stats.employees_failed,
            saved = stats.meetings_saved,
            "Notetaker sync complete"
        );

        Ok(stats)
    }

    async fn sync_employee(&self, employee: &Employee) -> Result<NotetakerSyncStats> {
        let mut stats = NotetakerSyncStats::default();

        let Some(api_key) = self.keys.api_key(&employee.employee_email).await? else {
            tracing::warn!(
                employee = %employee.employee_email,
                "No active API key, skipping"
            );
            return Ok(stats);
        };

        // The decrypted key lives only inside this client for the sync
        let client = NotetakerClient::new(
            self.config.base_url.clone(),
            api_key,
            self.config.per_key_delay_ms,
        );

        let meetings = client
            .list_meetings(employee.last_sync_at, PER_EMPLOYEE_LIMIT)
            .await?;
        stats.meetings_seen = meetings.len();

        // Only pull meetings newer than the last synced recording id
        let watermark: Option<i64> = employee
            .last_recording_id
            .as_deref()
            .and_then(|id| id.parse().ok());
        let mut newest_recording_id = watermark;

        for meeting in &meetings {
            if let Some(watermark) = watermark {
                if meeting.recording_id <= watermark {
                    stats.duplicates_skipped += 1;
                    continue;
                }
            }

            match self.save_meeting(&client, employee, meeting, &mut stats).await {
                Ok(()) => {
                    newest_recording_id =
                        Some(newest_recording_id.unwrap_or(0).max(meeting.recording_id));
                }
                Err(e) => {
                    tracing::error!(
                        recording_id = meeting.recording_id,
                        error = %e,
                        "Failed to save notetaker meeting"
                    );
                }
            }
        }

        self.keys
            .update_watermark(
                &employee.employee_email,
                newest_recording_id.map(|id| id.to_string()).as_deref(),
            )
            .await?;

        Ok(stats)
    }

    async fn save_meeting(
        &self,
        client: &NotetakerClient,
        employee: &Employee,
        meeting: &NotetakerMeeting,
        stats: &mut NotetakerSyncStats,
    ) -> Result<()> {
        let recording_id = meeting.recording_id.to_string();

        if self
            .meetings
            .exists(MeetingSource::Notetaker, &recording_id)
            .await?
        {
            stats.duplicates_skipped += 1;
            return Ok(());
        }

        // Transcript and summary are separate fetches, each 404-tolerant
        let transcript = client.get_transcript(meeting.recording_id).await?;
        let summary = client.get_summary(meeting.recording_id).await?;
        let action_items = client.get_action_items(meeting.recording_id).await?;

        if transcript.is_none() {
            stats.transcripts_missing += 1;
        }

        let new_meeting = NewMeeting {
            recording_id: recording_id.clone(),
            source: MeetingSource::Notetaker,
            title: meeting.title.clone(),
            meeting_type: meeting
                .title
                .as_deref()
                .map(super::super::telephony::video::classify_meeting_title)
                .unwrap_or(MeetingType::Other),
            platform: meeting.platform.clone(),
            host_name: Some(employee.employee_name.clone()),
            host_email: Some(employee.employee_email.clone()),
            host_extension_id: None,
            host_phone: None,
            started_at: Some(meeting.created_at),
            ended_at: None,
            duration_seconds: meeting.duration_seconds,
            participant_count: Some(meeting.participants.len() as i32),
            has_recording: true,
            participants_json: serde_json::Value::Array(meeting.participants.clone()),
            action_items_json: action_items,
            crm_deals_json: meeting.crm_matches.clone(),
            raw_payload: serde_json::json!({ "employee": employee.employee_email }),
        };

        match self.meetings.insert(&new_meeting).await? {
            Some(id) => {
                self.meetings
                    .set_transcript(id, transcript.as_deref(), summary.as_deref())
                    .await?;
                stats.meetings_saved += 1;
            }
            None => {
                stats.duplicates_skipped += 1;
            }
        }

        Ok(())
    }
}
