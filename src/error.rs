//! Error types for Parley

use thiserror::Error;

/// Main error type for Parley
#[derive(Debug, Error)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Upstream provider errors (telephony, notetaker)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transcription/ASR errors
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Invalid input that will never succeed (malformed audio, bad payloads)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limited by an upstream provider; carries the requested wait in seconds
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQL errors
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// S3 errors
    #[error("S3 error: {0}")]
    S3(String),

    /// Reqwest HTTP client errors
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Secure deletion failed after retry; the audio file still exists
    #[error("Deletion failed: {0}")]
    DeletionFailed(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a stage failure, driving the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, 5xx, 429, transient DB errors; retry with backoff
    Transient,
    /// Malformed input, non-auth 4xx, schema violations; fail immediately
    Permanent,
    /// Expired or rejected credentials; refresh once then retry once
    Authentication,
    /// LLM returned non-JSON or empty; fall back to the layer default
    Analysis,
    /// Disk exhaustion, corrupted DB, failed audio deletion; abort the pass
    Critical,
}

/// Recovery action a stage worker should take for a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    RetryWithBackoff,
    Fail,
    RefreshAndRetry,
    UseDefault,
    AbortRun,
}

/// A stage failure with its classification and recovery policy
#[derive(Debug)]
pub struct StageError {
    pub kind: ErrorKind,
    pub recovery: Recovery,
    pub message: String,
}

impl StageError {
    pub fn classify(error: &Error) -> Self {
        let (kind, recovery) = match error {
            Error::RateLimited(_) | Error::Network(_) => {
                (ErrorKind::Transient, Recovery::RetryWithBackoff)
            }
            Error::Reqwest(e) if e.is_timeout() || e.is_connect() => {
                (ErrorKind::Transient, Recovery::RetryWithBackoff)
            }
            Error::Http(msg) if is_retriable_status(msg) => {
                (ErrorKind::Transient, Recovery::RetryWithBackoff)
            }
            Error::Authentication(_) => (ErrorKind::Authentication, Recovery::RefreshAndRetry),
            Error::InvalidInput(_) | Error::Serialization(_) => {
                (ErrorKind::Permanent, Recovery::Fail)
            }
            Error::DeletionFailed(_) => (ErrorKind::Critical, Recovery::AbortRun),
            Error::Sql(sqlx::Error::PoolTimedOut) | Error::Sql(sqlx::Error::Io(_)) => {
                (ErrorKind::Transient, Recovery::RetryWithBackoff)
            }
            _ => (ErrorKind::Permanent, Recovery::Fail),
        };

        Self {
            kind,
            recovery,
            message: error.to_string(),
        }
    }
}

// 5xx and 429 retry; other 4xx do not.
fn is_retriable_status(message: &str) -> bool {
    for code in ["429", "500", "502", "503", "504"] {
        if message.contains(code) {
            return true;
        }
    }
    false
}

/// Determine whether an HTTP status should be retried
///
/// Auth errors retry once (after a token refresh), rate limits and server
/// errors retry with backoff, other client errors are permanent.
pub fn should_retry(status: reqwest::StatusCode, attempt: u32, max_retries: u32) -> bool {
    if attempt >= max_retries {
        return false;
    }
    matches!(status.as_u16(), 401 | 429 | 500..=599)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limited() {
        let err = Error::RateLimited(30);
        let stage = StageError::classify(&err);
        assert_eq!(stage.kind, ErrorKind::Transient);
        assert_eq!(stage.recovery, Recovery::RetryWithBackoff);
    }

    #[test]
    fn test_classify_invalid_input() {
        let err = Error::InvalidInput("audio file is empty".into());
        let stage = StageError::classify(&err);
        assert_eq!(stage.kind, ErrorKind::Permanent);
        assert_eq!(stage.recovery, Recovery::Fail);
    }

    #[test]
    fn test_classify_auth() {
        let err = Error::Authentication("token expired".into());
        let stage = StageError::classify(&err);
        assert_eq!(stage.kind, ErrorKind::Authentication);
        assert_eq!(stage.recovery, Recovery::RefreshAndRetry);
    }

    #[test]
    fn test_classify_deletion_failure_is_critical() {
        let err = Error::DeletionFailed("/tmp/audio.mp3 still present".into());
        let stage = StageError::classify(&err);
        assert_eq!(stage.kind, ErrorKind::Critical);
        assert_eq!(stage.recovery, Recovery::AbortRun);
    }

    #[test]
    fn test_classify_server_error_from_http() {
        let err = Error::Http("ASR API error (503): overloaded".into());
        assert_eq!(StageError::classify(&err).kind, ErrorKind::Transient);

        let err = Error::Http("ASR API error (404): not found".into());
        assert_eq!(StageError::classify(&err).kind, ErrorKind::Permanent);
    }

    #[test]
    fn test_should_retry() {
        use reqwest::StatusCode;

        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS, 0, 3));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR, 0, 3));
        assert!(should_retry(StatusCode::UNAUTHORIZED, 0, 3));
        assert!(!should_retry(StatusCode::BAD_REQUEST, 0, 3));
        assert!(!should_retry(StatusCode::NOT_FOUND, 0, 3));
        assert!(!should_retry(StatusCode::INTERNAL_SERVER_ERROR, 3, 3));
    }
}
