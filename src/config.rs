//! Application configuration
//!
//! All options are explicit records loaded from the environment. Missing
//! required values fail at load time rather than deep inside a worker.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Wall-clock HH:MM for the daily processing pass
    pub daily_schedule_time: String,
    /// Recordings per inner batch
    pub batch_size: usize,
    /// Per-stage retry budget before a recording becomes a failed item
    pub max_retries: u32,
    /// Initial lookback window in days when no previous run exists
    pub historical_days: i64,
    /// Concurrent pipeline workers
    pub worker_count: usize,
    /// Root of the local data tree (audio queue, archive, scheduler state)
    pub data_dir: PathBuf,
    /// Email domains treated as internal participants
    pub internal_domains: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let daily_schedule_time =
            std::env::var("PARLEY_DAILY_SCHEDULE_TIME").unwrap_or_else(|_| "02:00".to_string());
        validate_schedule_time(&daily_schedule_time)?;

        Ok(Self {
            daily_schedule_time,
            batch_size: env_parse("PARLEY_BATCH_SIZE", 50)?,
            max_retries: env_parse("PARLEY_MAX_RETRIES", 3)?,
            historical_days: env_parse("PARLEY_HISTORICAL_DAYS", 60)?,
            worker_count: env_parse("PARLEY_WORKER_COUNT", 4)?,
            data_dir: PathBuf::from(
                std::env::var("PARLEY_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            ),
            internal_domains: std::env::var("PARLEY_INTERNAL_DOMAINS")
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_lowercase())
                .collect(),
        })
    }

    /// Directory where downloaded audio waits for transcription
    pub fn audio_queue_dir(&self) -> PathBuf {
        self.data_dir.join("audio_queue")
    }

    /// Directory for scheduler state mirror files
    pub fn scheduler_state_dir(&self) -> PathBuf {
        self.data_dir.join("scheduler")
    }

    /// Root of the local transcript archive
    pub fn transcriptions_dir(&self) -> PathBuf {
        self.data_dir.join("transcriptions")
    }
}

/// ASR provider options
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub base_url: String,
    pub api_key: String,
    /// Transcription engine name sent with every job ("full" quality tier)
    pub engine: String,
    /// Language hint; the provider auto-detects when empty
    pub language: Option<String>,
    pub enable_diarization: bool,
    pub enable_summarization: bool,
    pub custom_vocabulary: Vec<String>,
    /// Domain-priming prompt prepended to every job
    pub initial_prompt: Option<String>,
    /// Maximum total polling wait in seconds
    pub max_wait_secs: u64,
    /// Retry budget for transient submit/poll failures
    pub max_attempts: u32,
}

impl AsrConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("ASR_BASE_URL")
            .map_err(|_| Error::Configuration("ASR_BASE_URL not set".into()))?;
        url::Url::parse(&base_url)
            .map_err(|e| Error::Configuration(format!("Invalid ASR_BASE_URL: {e}")))?;

        Ok(Self {
            base_url,
            api_key: std::env::var("ASR_API_KEY")
                .map_err(|_| Error::Configuration("ASR_API_KEY not set".into()))?,
            engine: std::env::var("ASR_ENGINE").unwrap_or_else(|_| "full".to_string()),
            language: std::env::var("ASR_LANGUAGE").ok().filter(|s| !s.is_empty()),
            enable_diarization: env_bool("ASR_ENABLE_DIARIZATION", false),
            enable_summarization: env_bool("ASR_ENABLE_SUMMARIZATION", false),
            custom_vocabulary: std::env::var("ASR_CUSTOM_VOCABULARY")
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .collect(),
            initial_prompt: std::env::var("ASR_INITIAL_PROMPT").ok().filter(|s| !s.is_empty()),
            max_wait_secs: env_parse("ASR_MAX_WAIT_SECS", 1800)?,
            max_attempts: env_parse("ASR_MAX_ATTEMPTS", 3)?,
        })
    }
}

/// Telephony provider credentials (JWT grant)
#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    pub server_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub jwt_token: String,
}

impl TelephonyConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_url: std::env::var("TELEPHONY_SERVER_URL")
                .unwrap_or_else(|_| "https://platform.example-telephony.com".to_string()),
            client_id: std::env::var("TELEPHONY_CLIENT_ID")
                .map_err(|_| Error::Configuration("TELEPHONY_CLIENT_ID not set".into()))?,
            client_secret: std::env::var("TELEPHONY_CLIENT_SECRET")
                .map_err(|_| Error::Configuration("TELEPHONY_CLIENT_SECRET not set".into()))?,
            jwt_token: std::env::var("TELEPHONY_JWT_TOKEN")
                .map_err(|_| Error::Configuration("TELEPHONY_JWT_TOKEN not set".into()))?,
        })
    }
}

/// Notetaker provider options (per-employee keys live encrypted in the database)
#[derive(Debug, Clone)]
pub struct NotetakerConfig {
    pub base_url: String,
    /// Minimum spacing between calls on a single key (60/min limit)
    pub per_key_delay_ms: u64,
}

impl NotetakerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: std::env::var("NOTETAKER_BASE_URL")
                .unwrap_or_else(|_| "https://api.example-notetaker.com/external/v1".to_string()),
            per_key_delay_ms: env_parse("NOTETAKER_PER_KEY_DELAY_MS", 1000)?,
        })
    }
}

/// Embedding provider options
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Vector dimensionality; must match the configured model
    pub dimensions: usize,
}

impl EmbeddingConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("EMBEDDING_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .map_err(|_| Error::Configuration("EMBEDDING_API_KEY not set".into()))?,
            model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-ada-002".to_string()),
            dimensions: env_parse("EMBEDDING_DIM", 1536)?,
        })
    }
}

/// Alert channel configuration; the log channel is always active
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

impl AlertConfig {
    pub fn from_env() -> Result<Self> {
        let email = match std::env::var("ALERT_SMTP_HOST") {
            Ok(smtp_host) => Some(EmailConfig {
                smtp_host,
                smtp_port: env_parse("ALERT_SMTP_PORT", 587)?,
                from_address: std::env::var("ALERT_FROM_ADDRESS")
                    .map_err(|_| Error::Configuration("ALERT_FROM_ADDRESS not set".into()))?,
                to_addresses: std::env::var("ALERT_TO_ADDRESSES")
                    .map_err(|_| Error::Configuration("ALERT_TO_ADDRESSES not set".into()))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            }),
            Err(_) => None,
        };

        Ok(Self {
            webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            email,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| Error::Configuration(format!("Invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn validate_schedule_time(value: &str) -> Result<()> {
    let parts: Vec<&str> = value.split(':').collect();
    let valid = parts.len() == 2
        && parts[0].parse::<u32>().map(|h| h < 24).unwrap_or(false)
        && parts[1].parse::<u32>().map(|m| m < 60).unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "Invalid PARLEY_DAILY_SCHEDULE_TIME, expected HH:MM: {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_validate_schedule_time() {
        assert!(validate_schedule_time("02:00").is_ok());
        assert!(validate_schedule_time("23:59").is_ok());
        assert!(validate_schedule_time("24:00").is_err());
        assert!(validate_schedule_time("2am").is_err());
        assert!(validate_schedule_time("02:60").is_err());
    }

    #[test]
    #[serial]
    fn test_app_config_defaults() {
        std::env::remove_var("PARLEY_DAILY_SCHEDULE_TIME");
        std::env::remove_var("PARLEY_BATCH_SIZE");
        std::env::remove_var("PARLEY_INTERNAL_DOMAINS");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.daily_schedule_time, "02:00");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.worker_count, 4);
        assert!(config.internal_domains.is_empty());
    }

    #[test]
    #[serial]
    fn test_app_config_rejects_bad_values() {
        std::env::set_var("PARLEY_BATCH_SIZE", "lots");
        let result = AppConfig::from_env();
        std::env::remove_var("PARLEY_BATCH_SIZE");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_internal_domains_parsing() {
        std::env::set_var("PARLEY_INTERNAL_DOMAINS", "Example.com, corp.example.io");
        let config = AppConfig::from_env().unwrap();
        std::env::remove_var("PARLEY_INTERNAL_DOMAINS");
        assert_eq!(config.internal_domains, vec!["example.com", "corp.example.io"]);
    }
}
