//! ASR provider client
//!
//! Submit-and-poll transcription: submit a job carrying the audio URL and
//! engine options, then poll until it succeeds or fails. Submission
//! retries transient failures with exponential backoff and honours 429
//! Retry-After; polling backs off exponentially up to a cap, bounded by a
//! configurable total wait.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AsrConfig;
use crate::database::models::TranscriptSegment;
use crate::error::{Error, Result};

/// Backoff parameters for transient submit failures
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 60;

/// Poll interval bounds
const POLL_INITIAL_SECS: u64 = 3;
const POLL_CAP_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    audio_url: &'a str,
    engine: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diarization: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summarization: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    custom_vocabulary: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_prompt: Option<&'a str>,
    metadata: SubmitMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct SubmitMetadata<'a> {
    /// Idempotency tag; the provider coalesces duplicate submissions
    idempotency_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    status: String,
    #[serde(default)]
    result: Option<AsrDocument>,
    #[serde(default)]
    error: Option<String>,
}

/// Structured transcription document returned on success
#[derive(Debug, Clone, Deserialize)]
pub struct AsrDocument {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<AsrSegment>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub language_probability: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsrSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub avg_logprob: f64,
    #[serde(default)]
    pub compression_ratio: f64,
    #[serde(default)]
    pub no_speech_prob: f64,
    #[serde(default)]
    pub tokens: Vec<i64>,
}

impl From<AsrSegment> for TranscriptSegment {
    fn from(s: AsrSegment) -> Self {
        TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text,
            avg_logprob: s.avg_logprob,
            compression_ratio: s.compression_ratio,
            no_speech_prob: s.no_speech_prob,
            tokens: s.tokens,
        }
    }
}

/// A finished transcription plus how many submit attempts it took
#[derive(Debug)]
pub struct AsrOutcome {
    pub document: AsrDocument,
    pub submit_attempts: u32,
}

pub struct AsrClient {
    config: AsrConfig,
    client: reqwest::Client,
}

impl AsrClient {
    pub fn new(config: AsrConfig) -> Self {
        Self {
            config,
            client: crate::http_client::api_client(),
        }
    }

    /// Run one transcription job end to end
    ///
    /// The idempotency tag is the recording id, so re-submitting after a
    /// crash resumes the same provider-side job.
    pub async fn transcribe_url(&self, audio_url: &str, recording_id: &str) -> Result<AsrOutcome> {
        let (job_id, submit_attempts) = self.submit_with_retry(audio_url, recording_id).await?;
        let document = self.poll_for_completion(&job_id).await?;

        Ok(AsrOutcome {
            document,
            submit_attempts,
        })
    }

    async fn submit_with_retry(
        &self,
        audio_url: &str,
        recording_id: &str,
    ) -> Result<(String, u32)> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.submit(audio_url, recording_id).await {
                Ok(job_id) => return Ok((job_id, attempt)),
                Err(Error::RateLimited(wait)) => {
                    if attempt >= self.config.max_attempts {
                        return Err(Error::Transcription(format!(
                            "ASR submit rate limited after {attempt} attempts"
                        )));
                    }
                    tracing::warn!(recording_id, wait, "ASR rate limited, honouring Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                Err(e) => {
                    let stage = crate::error::StageError::classify(&e);
                    if stage.kind != crate::error::ErrorKind::Transient
                        || attempt >= self.config.max_attempts
                    {
                        return Err(e);
                    }

                    let backoff =
                        (BACKOFF_BASE_SECS << (attempt - 1)).min(BACKOFF_CAP_SECS);
                    tracing::warn!(
                        recording_id,
                        attempt,
                        backoff,
                        error = %e,
                        "ASR submit failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
            }
        }
    }

    async fn submit(&self, audio_url: &str, recording_id: &str) -> Result<String> {
        let request = SubmitRequest {
            audio_url,
            engine: &self.config.engine,
            language: self.config.language.as_deref(),
            diarization: self.config.enable_diarization.then_some(true),
            summarization: self.config.enable_summarization.then_some(true),
            custom_vocabulary: self.config.custom_vocabulary.clone(),
            initial_prompt: self.config.initial_prompt.as_deref(),
            metadata: SubmitMetadata {
                idempotency_key: recording_id,
            },
        };

        let response = self
            .client
            .post(format!("{}/jobs", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("ASR submit failed: {e}")))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = crate::sources::telephony::client::retry_after_seconds(response.headers())
                .unwrap_or(60);
            return Err(Error::RateLimited(wait));
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Http(format!("ASR API error ({status}): {body}")));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse submit response: {e}")))?;

        Ok(submitted.id)
    }

    /// Poll until the job leaves the queue, with capped exponential backoff
    async fn poll_for_completion(&self, job_id: &str) -> Result<AsrDocument> {
        let deadline = std::time::Instant::now() + Duration::from_secs(self.config.max_wait_secs);
        let mut interval = POLL_INITIAL_SECS;
        let mut first = true;

        loop {
            if std::time::Instant::now() >= deadline {
                return Err(Error::Transcription(format!(
                    "ASR job {job_id} timed out after {}s",
                    self.config.max_wait_secs
                )));
            }

            if !first {
                tokio::time::sleep(Duration::from_secs(interval)).await;
                interval = (interval * 2).min(POLL_CAP_SECS);
            }
            first = false;

            let response = self
                .client
                .get(format!("{}/jobs/{}", self.config.base_url, job_id))
                .bearer_auth(&self.config.api_key)
                .send()
                .await
                .map_err(|e| Error::Network(format!("ASR poll failed: {e}")))?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let wait =
                    crate::sources::telephony::client::retry_after_seconds(response.headers())
                        .unwrap_or(60);
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if !status.is_success() {
                return Err(Error::Http(format!("ASR poll error ({status})")));
            }

            let job: JobResponse = response
                .json()
                .await
                .map_err(|e| Error::Other(format!("Failed to parse poll response: {e}")))?;

            match job.status.as_str() {
                "succeeded" => {
                    return job.result.ok_or_else(|| {
                        Error::Transcription(format!("ASR job {job_id} succeeded without result"))
                    });
                }
                "failed" => {
                    return Err(Error::Transcription(format!(
                        "ASR job {job_id} failed: {}",
                        job.error.unwrap_or_else(|| "unknown error".to_string())
                    )));
                }
                "queued" | "running" => {
                    tracing::debug!(job_id, status = %job.status, "ASR job in progress");
                }
                other => {
                    tracing::warn!(job_id, status = other, "Unknown ASR job status");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(server: &mockito::ServerGuard) -> AsrConfig {
        AsrConfig {
            base_url: server.url(),
            api_key: "key".into(),
            engine: "full".into(),
            language: Some("en".into()),
            enable_diarization: false,
            enable_summarization: false,
            custom_vocabulary: vec![],
            initial_prompt: None,
            max_wait_secs: 30,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_transcribe_happy_path() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/jobs")
            .with_status(200)
            .with_body(r#"{"id": "job-1"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/jobs/job-1")
            .with_status(200)
            .with_body(
                r#"{"status": "succeeded",
                    "result": {
                        "text": "hello world",
                        "segments": [
                            {"start": 0.0, "end": 1.2, "text": "hello world",
                             "avg_logprob": -0.2, "compression_ratio": 1.1,
                             "no_speech_prob": 0.01, "tokens": [1, 2]}
                        ],
                        "language": "en", "language_probability": 0.98, "duration": 1.2
                    }}"#,
            )
            .create_async()
            .await;

        let client = AsrClient::new(config_for(&server));
        let outcome = client.transcribe_url("https://audio/x", "REC-1").await.unwrap();

        assert_eq!(outcome.submit_attempts, 1);
        assert_eq!(outcome.document.text, "hello world");
        assert_eq!(outcome.document.segments.len(), 1);
        assert_eq!(outcome.document.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_submit_honours_retry_after() {
        let mut server = mockito::Server::new_async().await;

        let limited = server
            .mock("POST", "/jobs")
            .with_status(429)
            .with_header("Retry-After", "1")
            .expect(3)
            .create_async()
            .await;

        let started = std::time::Instant::now();
        let client = AsrClient::new(config_for(&server));
        let result = client.transcribe_url("https://audio/x", "REC-2").await;

        // Three attempts, with the advertised wait honoured after each of
        // the first two 429s before the budget runs out.
        assert!(matches!(result, Err(Error::Transcription(_))));
        assert!(started.elapsed() >= Duration::from_secs(2));
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_gives_up_after_budget() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/jobs")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.max_attempts = 2;

        let client = AsrClient::new(config);
        let result = client.transcribe_url("https://audio/x", "REC-3").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failed_job_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/jobs")
            .with_status(200)
            .with_body(r#"{"id": "job-4"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/jobs/job-4")
            .with_status(200)
            .with_body(r#"{"status": "failed", "error": "corrupt audio"}"#)
            .create_async()
            .await;

        let client = AsrClient::new(config_for(&server));
        let result = client.transcribe_url("https://audio/x", "REC-4").await;
        assert!(matches!(result, Err(Error::Transcription(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/jobs")
            .with_status(400)
            .with_body(r#"{"error": "unsupported codec"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = AsrClient::new(config_for(&server));
        let result = client.transcribe_url("https://audio/x", "REC-5").await;

        assert!(result.is_err());
        mock.assert_async().await;
    }
}
