//! Telephony-video meeting sync
//!
//! Pulls the provider's video-meeting history, enriches participants from
//! a pre-cached extension directory, and queues meeting rows. When the
//! history endpoint returns nothing but recordings exist, falls back to
//! listing account-level recordings and synthesising one meeting per
//! recording.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::client::{Extension, TelephonyClient, PAGE_DELAY_MS};
use crate::database::meetings::{MeetingStore, NewMeeting};
use crate::database::models::{MeetingSource, MeetingType};
use crate::error::Result;

/// Outcome of one video sync pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VideoSyncStats {
    pub meetings_seen: usize,
    pub meetings_saved: usize,
    pub duplicates_skipped: usize,
    pub recordings_fallback: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingHistoryResponse {
    #[serde(default)]
    meetings: Vec<MeetingRecord>,
    #[serde(default)]
    paging: Paging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paging {
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingRecord {
    id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration: Option<i32>,
    host_info: Option<HostInfo>,
    #[serde(default)]
    participants: Vec<ParticipantRecord>,
    #[serde(default)]
    recordings: Vec<MeetingRecording>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostInfo {
    display_name: Option<String>,
    email: Option<String>,
    extension_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantRecord {
    display_name: Option<String>,
    email: Option<String>,
    extension_number: Option<String>,
    join_time: Option<DateTime<Utc>>,
    leave_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingRecording {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecordingsResponse {
    #[serde(default)]
    records: Vec<AccountRecording>,
    #[serde(default)]
    paging: Paging,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecording {
    id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration: Option<i32>,
    host_extension_id: Option<serde_json::Value>,
}

/// Extension directory cached once per sync, indexed for enrichment
pub struct ExtensionCache {
    by_number: HashMap<String, Extension>,
    by_email: HashMap<String, Extension>,
    by_id: HashMap<String, Extension>,
}

impl ExtensionCache {
    pub fn build(extensions: Vec<Extension>) -> Self {
        let mut by_number = HashMap::new();
        let mut by_email = HashMap::new();
        let mut by_id = HashMap::new();

        for ext in extensions {
            if let Some(number) = &ext.extension_number {
                by_number.insert(number.clone(), ext.clone());
            }
            if let Some(email) = &ext.contact.email {
                by_email.insert(email.to_lowercase(), ext.clone());
            }
            by_id.insert(ext.id.to_string(), ext);
        }

        Self {
            by_number,
            by_email,
            by_id,
        }
    }

    pub fn by_number(&self, number: &str) -> Option<&Extension> {
        self.by_number.get(number)
    }

    pub fn by_email(&self, email: &str) -> Option<&Extension> {
        self.by_email.get(&email.to_lowercase())
    }

    pub fn by_id(&self, id: &str) -> Option<&Extension> {
        self.by_id.get(id)
    }
}

/// Classify a meeting from its title before any LLM sees it;
/// layer 1 refines this later.
pub fn classify_meeting_title(title: &str) -> MeetingType {
    let lower = title.to_lowercase();

    if ["demo", "sales", "prospect", "pricing"].iter().any(|k| lower.contains(k)) {
        MeetingType::Sales
    } else if ["support", "issue", "escalation", "troubleshoot"].iter().any(|k| lower.contains(k)) {
        MeetingType::Support
    } else if ["training", "onboarding", "workshop"].iter().any(|k| lower.contains(k)) {
        MeetingType::Training
    } else if lower.contains("interview") {
        MeetingType::Interview
    } else if ["standup", "stand-up", "1:1", "retro", "all hands", "team sync"]
        .iter()
        .any(|k| lower.contains(k))
    {
        MeetingType::Internal
    } else {
        MeetingType::Other
    }
}

/// Participant enriched with directory data, serialized into the meeting row
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnrichedParticipant {
    pub name: Option<String>,
    pub email: Option<String>,
    pub extension_number: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub is_internal: bool,
    pub duration_seconds: Option<i64>,
}

/// Compute in-meeting time when both join and leave are present
fn participant_duration(
    join: Option<DateTime<Utc>>,
    leave: Option<DateTime<Utc>>,
) -> Option<i64> {
    match (join, leave) {
        (Some(join), Some(leave)) if leave >= join => Some((leave - join).num_seconds()),
        _ => None,
    }
}

fn is_internal_email(email: Option<&str>, internal_domains: &[String]) -> bool {
    let Some(email) = email else { return false };
    let Some(domain) = email.rsplit('@').next() else {
        return false;
    };
    let domain = domain.to_lowercase();
    internal_domains.iter().any(|d| d == &domain)
}

pub struct VideoMeetingSync {
    client: TelephonyClient,
    meetings: MeetingStore,
    internal_domains: Vec<String>,
}

impl VideoMeetingSync {
    pub fn new(
        client: TelephonyClient,
        meetings: MeetingStore,
        internal_domains: Vec<String>,
    ) -> Self {
        Self {
            client,
            meetings,
            internal_domains,
        }
    }

    /// Sync the provider's video-meeting history for a window
    pub async fn sync_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<VideoSyncStats> {
        let mut stats = VideoSyncStats::default();

        // Pre-cache the extension directory once per sync
        let cache = ExtensionCache::build(self.client.list_extensions().await?);

        let meetings = self.fetch_meeting_history(start, end).await?;
        stats.meetings_seen = meetings.len();

        if meetings.is_empty() {
            // Meeting history can lag behind recordings; synthesise
            // meeting rows from account-level recordings instead.
            let recordings = self.fetch_account_recordings().await?;
            if !recordings.is_empty() {
                stats.recordings_fallback = true;
                stats.meetings_seen = recordings.len();

                for recording in recordings {
                    let saved = self.save_synthesised(&recording, &cache).await?;
                    if saved {
                        stats.meetings_saved += 1;
                    } else {
                        stats.duplicates_skipped += 1;
                    }
                }
            }
            return Ok(stats);
        }

        for meeting in meetings {
            let saved = self.save_meeting(&meeting, &cache).await?;
            if saved {
                stats.meetings_saved += 1;
            } else {
                stats.duplicates_skipped += 1;
            }
        }

        tracing::info!(
            seen = stats.meetings_seen,
            saved = stats.meetings_saved,
            duplicates = stats.duplicates_skipped,
            "Video meeting sync complete"
        );

        Ok(stats)
    }

    async fn fetch_meeting_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeetingRecord>> {
        let mut meetings = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("startTime", start.timestamp_millis().to_string()),
                ("endTime", end.timestamp_millis().to_string()),
                ("perPage", "100".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let value = self
                .client
                .get_json("/restapi/v1.0/video/history/meetings", &query)
                .await?;
            let parsed: MeetingHistoryResponse = serde_json::from_value(value)?;

            meetings.extend(parsed.meetings);

            match parsed.paging.page_token {
                Some(token) if !token.is_empty() => {
                    page_token = Some(token);
                    tokio::time::sleep(std::time::Duration::from_millis(PAGE_DELAY_MS)).await;
                }
                _ => break,
            }
        }

        Ok(meetings)
    }

    async fn fetch_account_recordings(&self) -> Result<Vec<AccountRecording>> {
        let value = self
            .client
            .get_json(
                "/restapi/v1.0/account/~/recording",
                &[("perPage", "100".to_string())],
            )
            .await?;
        let parsed: AccountRecordingsResponse = serde_json::from_value(value)?;
        Ok(parsed.records)
    }

    fn enrich_participants(
        &self,
        participants: &[ParticipantRecord],
        cache: &ExtensionCache,
    ) -> Vec<EnrichedParticipant> {
        participants
            .iter()
            .map(|p| {
                let ext = p
                    .extension_number
                    .as_deref()
                    .and_then(|n| cache.by_number(n))
                    .or_else(|| p.email.as_deref().and_then(|e| cache.by_email(e)));

                EnrichedParticipant {
                    name: p
                        .display_name
                        .clone()
                        .or_else(|| ext.and_then(|e| e.name.clone())),
                    email: p
                        .email
                        .clone()
                        .or_else(|| ext.and_then(|e| e.contact.email.clone())),
                    extension_number: p.extension_number.clone(),
                    phone: ext.and_then(|e| e.contact.business_phone.clone()),
                    company: ext.and_then(|e| e.contact.company.clone()),
                    department: ext.and_then(|e| e.contact.department.clone()),
                    job_title: ext.and_then(|e| e.contact.job_title.clone()),
                    is_internal: is_internal_email(p.email.as_deref(), &self.internal_domains),
                    duration_seconds: participant_duration(p.join_time, p.leave_time),
                }
            })
            .collect()
    }

    async fn save_meeting(&self, meeting: &MeetingRecord, cache: &ExtensionCache) -> Result<bool> {
        let enriched = self.enrich_participants(&meeting.participants, cache);

        let host = meeting.host_info.as_ref();
        let host_ext = host
            .and_then(|h| h.extension_id.as_ref())
            .and_then(|id| cache.by_id(&id.to_string()));

        let title = meeting.display_name.clone();
        let meeting_type = title
            .as_deref()
            .map(classify_meeting_title)
            .unwrap_or(MeetingType::Other);

        let new_meeting = NewMeeting {
            recording_id: meeting
                .recordings
                .first()
                .map(|r| r.id.clone())
                .unwrap_or_else(|| meeting.id.clone()),
            source: MeetingSource::TelephonyVideo,
            title,
            meeting_type,
            platform: Some("telephony-video".to_string()),
            host_name: host
                .and_then(|h| h.display_name.clone())
                .or_else(|| host_ext.and_then(|e| e.name.clone())),
            host_email: host.and_then(|h| h.email.clone()),
            host_extension_id: host.and_then(|h| h.extension_id.as_ref().map(|v| v.to_string())),
            host_phone: host_ext.and_then(|e| e.contact.business_phone.clone()),
            started_at: meeting.start_time,
            ended_at: meeting.end_time,
            duration_seconds: meeting.duration.or_else(|| {
                match (meeting.start_time, meeting.end_time) {
                    (Some(s), Some(e)) if e >= s => Some((e - s).num_seconds() as i32),
                    _ => None,
                }
            }),
            participant_count: Some(meeting.participants.len() as i32),
            has_recording: !meeting.recordings.is_empty(),
            participants_json: serde_json::to_value(&enriched)?,
            action_items_json: serde_json::json!([]),
            crm_deals_json: serde_json::json!({}),
            raw_payload: serde_json::json!({ "meeting_id": meeting.id }),
        };

        Ok(self.meetings.insert(&new_meeting).await?.is_some())
    }

    async fn save_synthesised(
        &self,
        recording: &AccountRecording,
        cache: &ExtensionCache,
    ) -> Result<bool> {
        let host_ext = recording
            .host_extension_id
            .as_ref()
            .and_then(|id| cache.by_id(&id.to_string()));

        let title = recording.display_name.clone();
        let meeting_type = title
            .as_deref()
            .map(classify_meeting_title)
            .unwrap_or(MeetingType::Other);

        let new_meeting = NewMeeting {
            recording_id: recording.id.clone(),
            source: MeetingSource::TelephonyVideo,
            title,
            meeting_type,
            platform: Some("telephony-video".to_string()),
            host_name: host_ext.and_then(|e| e.name.clone()),
            host_email: host_ext.and_then(|e| e.contact.email.clone()),
            host_extension_id: recording.host_extension_id.as_ref().map(|v| v.to_string()),
            host_phone: host_ext.and_then(|e| e.contact.business_phone.clone()),
            started_at: recording.start_time,
            ended_at: None,
            duration_seconds: recording.duration,
            participant_count: None,
            has_recording: true,
            participants_json: serde_json::json!([]),
            action_items_json: serde_json::json!([]),
            crm_deals_json: serde_json::json!({}),
            raw_payload: serde_json::json!({ "synthesised_from": "account_recording" }),
        };

        Ok(self.meetings.insert(&new_meeting).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_participant_duration() {
        let join = Some(ts("2025-09-21T15:00:00Z"));
        let leave = Some(ts("2025-09-21T15:45:30Z"));
        assert_eq!(participant_duration(join, leave), Some(2730));

        assert_eq!(participant_duration(join, None), None);
        assert_eq!(participant_duration(None, leave), None);

        // Leave before join is provider noise, not a negative duration
        assert_eq!(participant_duration(leave, join), None);
    }

    #[test]
    fn test_is_internal_email() {
        let domains = vec!["example.com".to_string()];

        assert!(is_internal_email(Some("ada@example.com"), &domains));
        assert!(is_internal_email(Some("ada@EXAMPLE.COM"), &domains));
        assert!(!is_internal_email(Some("bob@other.io"), &domains));
        assert!(!is_internal_email(None, &domains));
    }

    #[test]
    fn test_classify_meeting_title() {
        assert_eq!(classify_meeting_title("Acme product demo"), MeetingType::Sales);
        assert_eq!(classify_meeting_title("Support escalation"), MeetingType::Support);
        assert_eq!(classify_meeting_title("New hire onboarding"), MeetingType::Training);
        assert_eq!(classify_meeting_title("Candidate interview"), MeetingType::Interview);
        assert_eq!(classify_meeting_title("Weekly standup"), MeetingType::Internal);
        assert_eq!(classify_meeting_title("Untitled"), MeetingType::Other);
    }

    #[test]
    fn test_extension_cache_lookup() {
        let ext = Extension {
            id: serde_json::json!(101),
            extension_number: Some("101".into()),
            name: Some("Ada".into()),
            contact: super::super::client::ExtensionContact {
                email: Some("Ada@Example.com".into()),
                ..Default::default()
            },
        };
        let cache = ExtensionCache::build(vec![ext]);

        assert!(cache.by_number("101").is_some());
        assert!(cache.by_email("ada@example.com").is_some());
        assert!(cache.by_id("101").is_some());
        assert!(cache.by_number("999").is_none());
    }
}
