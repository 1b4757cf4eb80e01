//! Notetaker API client
//!
//! Cursor-paginated meeting listing plus per-meeting transcript, summary,
//! and action-item fetches. The transcript endpoints 404 for meetings the
//! provider never transcribed; callers receive `None` rather than an error.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

const MAX_REQUEST_ATTEMPTS: u32 = 3;

/// One meeting as reported by the notetaker provider
#[derive(Debug, Clone, Deserialize)]
pub struct NotetakerMeeting {
    pub recording_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: Option<i32>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub participants: Vec<serde_json::Value>,
    #[serde(default)]
    pub crm_matches: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MeetingListResponse {
    #[serde(default)]
    meetings: Vec<NotetakerMeeting>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    summary: Option<String>,
}

pub struct NotetakerClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    /// Minimum spacing between requests on this key
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl NotetakerClient {
    pub fn new(base_url: String, api_key: String, per_key_delay_ms: u64) -> Self {
        Self {
            base_url,
            api_key,
            client: crate::http_client::api_client(),
            delay: Duration::from_millis(per_key_delay_ms),
            last_request: Mutex::new(None),
        }
    }

    /// Sleep long enough to keep this key under the provider's rate limit
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET with pacing, Retry-After honouring, and bounded retries.
    /// Returns None on 404 when `tolerate_missing` is set.
    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
        tolerate_missing: bool,
    ) -> Result<Option<serde_json::Value>> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..MAX_REQUEST_ATTEMPTS {
            self.pace().await;

            let response = match self
                .client
                .get(&url)
                .header("X-Api-Key", &self.api_key)
                .query(query)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if attempt + 1 == MAX_REQUEST_ATTEMPTS {
                        return Err(Error::Network(format!(
                            "Request to {path} failed after {MAX_REQUEST_ATTEMPTS} attempts: {e}"
                        )));
                    }
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    continue;
                }
            };

            let status = response.status();

            if status == reqwest::StatusCode::NOT_FOUND && tolerate_missing {
                return Ok(None);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let wait = super::super::telephony::client::retry_after_seconds(response.headers())
                    .unwrap_or(60);
                tracing::warn!(path, wait, "Notetaker rate limited, waiting");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(Error::Http(format!(
                    "Notetaker API error ({status}) on {path}: {body}"
                )));
            }

            let value = response
                .json()
                .await
                .map_err(|e| Error::Other(format!("Failed to parse response from {path}: {e}")))?;
            return Ok(Some(value));
        }

        Err(Error::Provider(format!("Max retries exceeded for {path}")))
    }

    /// List meetings newer than the watermark, following the cursor
    pub async fn list_meetings(
        &self,
        created_after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<NotetakerMeeting>> {
        let mut meetings = Vec::new();
        let mut cursor: Option<String> = None;

        while meetings.len() < limit {
            let mut query = vec![("limit", "50".to_string())];
            if let Some(after) = created_after {
                query.push(("created_after", after.to_rfc3339()));
            }
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let Some(value) = self.get("/meetings", &query, false).await? else {
                break;
            };
            let parsed: MeetingListResponse = serde_json::from_value(value)?;

            if parsed.meetings.is_empty() {
                break;
            }
            meetings.extend(parsed.meetings);

            match parsed.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        meetings.truncate(limit);
        Ok(meetings)
    }

    /// Full transcript for a meeting; None when the provider has none
    pub async fn get_transcript(&self, recording_id: i64) -> Result<Option<String>> {
        let path = format!("/meetings/{recording_id}/transcript");
        let Some(value) = self.get(&path, &[], true).await? else {
            return Ok(None);
        };

        let parsed: TranscriptResponse = serde_json::from_value(value)?;
        Ok(parsed.transcript)
    }

    /// Meeting summary; None when absent
    pub async fn get_summary(&self, recording_id: i64) -> Result<Option<String>> {
        let path = format!("/meetings/{recording_id}/summary");
        let Some(value) = self.get(&path, &[], true).await? else {
            return Ok(None);
        };

        let parsed: SummaryResponse = serde_json::from_value(value)?;
        Ok(parsed.summary)
    }

    /// Action items; empty list when absent
    pub async fn get_action_items(&self, recording_id: i64) -> Result<serde_json::Value> {
        let path = format!("/meetings/{recording_id}/action-items");
        match self.get(&path, &[], true).await? {
            Some(value) => Ok(value),
            None => Ok(serde_json::json!([])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(server: &mockito::ServerGuard) -> NotetakerClient {
        // No pacing delay in tests
        NotetakerClient::new(server.url(), "key".into(), 0)
    }

    #[tokio::test]
    async fn test_list_meetings_follows_cursor() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/meetings")
            .match_query(mockito::Matcher::UrlEncoded("cursor".into(), "page2".into()))
            .with_status(200)
            .with_body(
                r#"{"meetings": [{"recording_id": 2, "created_at": "2025-09-02T00:00:00Z"}]}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/meetings")
            .match_query(mockito::Matcher::Exact("limit=50".into()))
            .with_status(200)
            .with_body(
                r#"{"meetings": [{"recording_id": 1, "created_at": "2025-09-01T00:00:00Z"}],
                    "next_cursor": "page2"}"#,
            )
            .create_async()
            .await;

        let client = test_client(&server);
        let meetings = client.list_meetings(None, 10).await.unwrap();

        assert_eq!(meetings.len(), 2);
        assert_eq!(meetings[0].recording_id, 1);
        assert_eq!(meetings[1].recording_id, 2);
    }

    #[tokio::test]
    async fn test_transcript_404_is_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/meetings/42/transcript")
            .with_status(404)
            .create_async()
            .await;

        let client = test_client(&server);
        let transcript = client.get_transcript(42).await.unwrap();
        assert!(transcript.is_none());
    }

    #[tokio::test]
    async fn test_transcript_present() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/meetings/42/transcript")
            .with_status(200)
            .with_body(r#"{"transcript": "hello world"}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let transcript = client.get_transcript(42).await.unwrap();
        assert_eq!(transcript.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn test_server_error_is_not_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/meetings/42/summary")
            .with_status(500)
            .create_async()
            .await;

        let client = test_client(&server);
        assert!(client.get_summary(42).await.is_err());
    }
}
