//! Telephony provider HTTP client
//!
//! Wraps the provider's REST surface: call-log enumeration, recording
//! media download, and the extension directory used for contact
//! enrichment. Every call honours 429 Retry-After and refreshes the
//! access token once on a 401.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::auth::TokenManager;
use crate::database::models::{CallDirection, DiscoveredRecording};
use crate::error::{Error, Result};

/// Sleep between paginated fetches to stay under provider rate limits
pub const PAGE_DELAY_MS: u64 = 500;

const CALL_LOG_PER_PAGE: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallLogResponse {
    #[serde(default)]
    records: Vec<CallLogRecord>,
    #[serde(default)]
    navigation: Navigation,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Navigation {
    next_page: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallLogRecord {
    id: String,
    session_id: Option<String>,
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration: i32,
    direction: Option<String>,
    #[serde(default)]
    from: Party,
    #[serde(default)]
    to: Party,
    recording: Option<RecordingInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Party {
    phone_number: Option<String>,
    name: Option<String>,
    extension_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingInfo {
    id: String,
    content_uri: Option<String>,
    #[serde(rename = "type")]
    recording_type: Option<String>,
}

/// One entry from the provider's extension directory
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub id: serde_json::Value,
    #[serde(default)]
    pub extension_number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact: ExtensionContact,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionContact {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub business_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtensionListResponse {
    #[serde(default)]
    records: Vec<Extension>,
    #[serde(default)]
    navigation: Navigation,
}

#[derive(Clone)]
pub struct TelephonyClient {
    auth: TokenManager,
    server_url: String,
    client: reqwest::Client,
    download: reqwest::Client,
}

impl TelephonyClient {
    pub fn new(auth: TokenManager, server_url: String) -> Self {
        Self {
            auth,
            server_url,
            client: crate::http_client::api_client(),
            download: crate::http_client::download_client(),
        }
    }

    /// Authenticated GET with one token refresh on 401 and Retry-After on 429
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.server_url, path);
        let mut refreshed = false;

        loop {
            let token = self.auth.access_token().await?;
            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await
                .map_err(|e| Error::Network(format!("Request to {path} failed: {e}")))?;

            let status = response.status();

            if status == reqwest::StatusCode::UNAUTHORIZED && !refreshed {
                refreshed = true;
                self.auth.force_refresh().await?;
                continue;
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after_seconds(response.headers()).unwrap_or(60);
                return Err(Error::RateLimited(wait));
            }

            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(Error::Http(format!(
                    "Provider API error ({status}) on {path}: {body}"
                )));
            }

            return response
                .json()
                .await
                .map_err(|e| Error::Other(format!("Failed to parse response from {path}: {e}")));
        }
    }

    /// Enumerate recorded voice calls for a date window
    ///
    /// Walks `navigation.nextPage` until exhausted, sleeping between pages.
    pub async fn fetch_call_log(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<DiscoveredRecording>> {
        let mut discovered = Vec::new();
        let mut page = 1u32;

        loop {
            let value = self
                .get_json(
                    "/restapi/v1.0/account/~/call-log",
                    &[
                        ("dateFrom", format!("{date_from}T00:00:00.000Z")),
                        ("dateTo", format!("{date_to}T23:59:59.999Z")),
                        ("type", "Voice".to_string()),
                        ("view", "Detailed".to_string()),
                        ("recordingType", "All".to_string()),
                        ("perPage", CALL_LOG_PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;

            let parsed: CallLogResponse = serde_json::from_value(value)?;

            for record in &parsed.records {
                if let Some(item) = to_discovered(record) {
                    discovered.push(item);
                }
            }

            if parsed.navigation.next_page.is_none() {
                break;
            }

            page += 1;
            tokio::time::sleep(std::time::Duration::from_millis(PAGE_DELAY_MS)).await;
        }

        tracing::info!(
            count = discovered.len(),
            %date_from,
            %date_to,
            "Fetched call log window"
        );

        Ok(discovered)
    }

    /// Download recording media to a local path via Bearer-authenticated stream
    ///
    /// Accepts an absolute media URL or a path relative to the API server.
    pub async fn download_recording(&self, content_uri: &str, dest: &std::path::Path) -> Result<u64> {
        let url = if content_uri.starts_with('/') {
            format!("{}{}", self.server_url, content_uri)
        } else {
            content_uri.to_string()
        };

        let token = self.auth.access_token().await?;

        let response = self
            .download
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Recording download failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after_seconds(response.headers()).unwrap_or(60);
            return Err(Error::RateLimited(wait));
        }
        if !status.is_success() {
            return Err(Error::Http(format!(
                "Recording download error ({status}) for {content_uri}"
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Recording stream interrupted: {e}")))?;
        tokio::fs::write(dest, &bytes).await?;

        Ok(bytes.len() as u64)
    }

    /// Fetch the full extension directory, paginated
    pub async fn list_extensions(&self) -> Result<Vec<Extension>> {
        let mut extensions = Vec::new();
        let mut page = 1u32;

        loop {
            let value = self
                .get_json(
                    "/restapi/v1.0/account/~/extension",
                    &[("perPage", "100".to_string()), ("page", page.to_string())],
                )
                .await?;

            let parsed: ExtensionListResponse = serde_json::from_value(value)?;
            let page_len = parsed.records.len();
            extensions.extend(parsed.records);

            if parsed.navigation.next_page.is_none() || page_len == 0 {
                break;
            }

            page += 1;
            tokio::time::sleep(std::time::Duration::from_millis(PAGE_DELAY_MS)).await;
        }

        Ok(extensions)
    }
}

fn to_discovered(record: &CallLogRecord) -> Option<DiscoveredRecording> {
    let recording = record.recording.as_ref()?;

    Some(DiscoveredRecording {
        call_id: record.id.clone(),
        recording_id: recording.id.clone(),
        session_id: record.session_id.clone(),
        start_time: record.start_time.unwrap_or_else(Utc::now),
        duration: record.duration,
        direction: record
            .direction
            .as_deref()
            .and_then(|d| d.parse::<CallDirection>().ok()),
        from_number: record.from.phone_number.clone(),
        from_name: record.from.name.clone(),
        from_extension: record.from.extension_number.clone(),
        to_number: record.to.phone_number.clone(),
        to_name: record.to.name.clone(),
        to_extension: record.to.extension_number.clone(),
        recording_type: recording.recording_type.clone(),
        content_uri: recording.content_uri.clone(),
    })
}

/// Parse a Retry-After header value in seconds
pub fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelephonyConfig;

    fn client_for(server: &mockito::ServerGuard) -> TelephonyClient {
        let auth = TokenManager::new(TelephonyConfig {
            server_url: server.url(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            jwt_token: "jwt".into(),
        });
        TelephonyClient::new(auth, server.url())
    }

    async fn mock_token(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/restapi/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "t", "expires_in": 3600}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_fetch_call_log_parses_recorded_calls() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;

        server
            .mock("GET", "/restapi/v1.0/account/~/call-log")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{
                    "records": [
                        {
                            "id": "call-1",
                            "sessionId": "sess-1",
                            "startTime": "2025-09-21T15:30:00.000Z",
                            "duration": 120,
                            "direction": "Inbound",
                            "from": {"phoneNumber": "+15550001111", "name": "Alice"},
                            "to": {"phoneNumber": "+15550002222"},
                            "recording": {"id": "REC-1", "contentUri": "https://media/REC-1", "type": "Automatic"}
                        },
                        {
                            "id": "call-2",
                            "duration": 30,
                            "from": {},
                            "to": {}
                        }
                    ],
                    "navigation": {}
                }"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let date = NaiveDate::from_ymd_opt(2025, 9, 21).unwrap();
        let recordings = client.fetch_call_log(date, date).await.unwrap();

        // Only the call with a recording is discovered
        assert_eq!(recordings.len(), 1);
        let rec = &recordings[0];
        assert_eq!(rec.recording_id, "REC-1");
        assert_eq!(rec.session_id.as_deref(), Some("sess-1"));
        assert_eq!(rec.duration, 120);
        assert_eq!(rec.direction, Some(CallDirection::Inbound));
        assert_eq!(rec.content_uri.as_deref(), Some("https://media/REC-1"));
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;

        server
            .mock("GET", "/restapi/v1.0/account/~/call-log")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "30")
            .create_async()
            .await;

        let client = client_for(&server);
        let date = NaiveDate::from_ymd_opt(2025, 9, 21).unwrap();
        let result = client.fetch_call_log(date, date).await;

        assert!(matches!(result, Err(Error::RateLimited(30))));
    }

    #[tokio::test]
    async fn test_401_refreshes_token_once_then_fails() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/restapi/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "t", "expires_in": 3600}"#)
            .expect(2)
            .create_async()
            .await;

        server
            .mock("GET", "/restapi/v1.0/account/~/extension")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server);
        let result = client.list_extensions().await;
        assert!(matches!(result, Err(Error::Http(_))));

        // The 401 triggered exactly one forced token refresh before failing
        token_mock.assert_async().await;
    }
}
