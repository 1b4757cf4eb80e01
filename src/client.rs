//! Parley client and builder
//!
//! The builder constructs every service once and wires them together
//! explicitly; nothing resolves a collaborator through a global. The
//! resulting `Parley` owns the object graph and hands out the pieces the
//! CLI and scheduler need.

use std::sync::Arc;

use crate::analysis::CascadeProcessor;
use crate::config::{
    AlertConfig, AppConfig, AsrConfig, EmbeddingConfig, NotetakerConfig, TelephonyConfig,
};
use crate::database::meetings::MeetingStore;
use crate::database::recordings::RecordingStore;
use crate::database::state::StateStore;
use crate::database::Database;
use crate::embeddings::{EmbeddingClient, EmbeddingJob};
use crate::error::{Error, Result};
use crate::llm::ChatClient;
use crate::monitoring::{AlertManager, HealthChecker, Metrics};
use crate::scheduler::batch::BatchProcessor;
use crate::scheduler::state_manager::StateManager;
use crate::scheduler::Scheduler;
use crate::search::SemanticSearch;
use crate::sources::notetaker::{EmployeeKeyStore, NotetakerSync};
use crate::sources::telephony::{CallIngestor, TelephonyClient, TokenManager, VideoMeetingSync};
use crate::storage::archive::ArchiveLayout;
use crate::storage::encryption::SecretBox;
use crate::storage::secure::SecureStorageHandler;
use crate::storage::{S3Config, Storage};
use crate::transcription::asr::AsrClient;
use crate::transcription::TranscriptionPipeline;

/// The wired application
pub struct Parley {
    config: AppConfig,
    database: Database,
    scheduler: Scheduler,
    batch_processor: Arc<BatchProcessor>,
    state: StateManager,
    search: SemanticSearch,
    key_store: Arc<EmployeeKeyStore>,
    cascade: Arc<CascadeProcessor>,
    embeddings: Arc<EmbeddingJob>,
}

impl Parley {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn batch_processor(&self) -> &Arc<BatchProcessor> {
        &self.batch_processor
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn search(&self) -> &SemanticSearch {
        &self.search
    }

    pub fn key_store(&self) -> &Arc<EmployeeKeyStore> {
        &self.key_store
    }

    pub fn cascade(&self) -> &Arc<CascadeProcessor> {
        &self.cascade
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingJob> {
        &self.embeddings
    }
}

/// Builder for the Parley object graph
pub struct ParleyBuilder {
    database_url: Option<String>,
}

impl ParleyBuilder {
    pub fn new() -> Self {
        Self { database_url: None }
    }

    pub fn postgres(mut self, database_url: &str) -> Self {
        self.database_url = Some(database_url.to_string());
        self
    }

    pub async fn build(self) -> Result<Parley> {
        let database_url = self
            .database_url
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| Error::Configuration("DATABASE_URL not set".into()))?;

        let config = AppConfig::from_env()?;
        let database = Database::new(&database_url)?;
        let pool = database.pool().clone();

        // Repositories
        let recordings = RecordingStore::new(pool.clone());
        let meetings = MeetingStore::new(pool.clone());
        let states = StateStore::new(pool.clone());
        let state = StateManager::new(states, recordings.clone());

        // Archive storage: S3 when configured, local tree otherwise
        let storage = if std::env::var("S3_BUCKET").is_ok() {
            let s3_config = S3Config::from_env()?;
            Storage::s3_from_env().await.map_err(|e| {
                Error::Configuration(format!(
                    "S3 archive misconfigured (bucket {}): {e}",
                    s3_config.bucket
                ))
            })?
        } else {
            tracing::warn!("S3_BUCKET not set, using local archive storage");
            Storage::local(config.data_dir.join("archive"))?
        };

        // Telephony adapter
        let telephony_config = TelephonyConfig::from_env()?;
        let token_manager = TokenManager::new(telephony_config.clone());
        let telephony_client =
            TelephonyClient::new(token_manager, telephony_config.server_url.clone());
        let ingestor = Arc::new(CallIngestor::new(
            telephony_client.clone(),
            recordings.clone(),
            config.audio_queue_dir(),
            config.scheduler_state_dir(),
        ));
        let video_sync = Arc::new(VideoMeetingSync::new(
            telephony_client,
            meetings.clone(),
            config.internal_domains.clone(),
        ));

        // Notetaker adapter with encrypted per-employee keys
        let secrets = SecretBox::from_env()?;
        let key_store = Arc::new(EmployeeKeyStore::new(pool.clone(), secrets));
        let notetaker_sync = Arc::new(NotetakerSync::new(
            NotetakerConfig::from_env()?,
            key_store.clone(),
            meetings.clone(),
        ));

        // Transcription
        let asr = AsrClient::new(AsrConfig::from_env()?);
        let transcription = Arc::new(TranscriptionPipeline::new(
            recordings.clone(),
            storage.clone(),
            asr,
        ));

        // Secure storage
        let layout = ArchiveLayout::new(config.transcriptions_dir());
        let secure_storage = Arc::new(SecureStorageHandler::new(
            storage.clone(),
            layout,
            recordings.clone(),
            config.data_dir.join("audit.log"),
        ));

        // Analysis + embeddings + search
        let chat = Arc::new(ChatClient::new());
        let cascade = Arc::new(CascadeProcessor::new(
            meetings.clone(),
            chat,
            config.worker_count,
        ));
        let embedding_config = EmbeddingConfig::from_env()?;
        let embeddings = Arc::new(EmbeddingJob::new(
            pool.clone(),
            EmbeddingClient::new(embedding_config.clone()),
        ));
        let search = SemanticSearch::new(pool.clone(), EmbeddingClient::new(embedding_config));

        // Monitoring
        let alerts = AlertManager::new(AlertConfig::from_env()?);
        let metrics = Arc::new(
            crate::monitoring::metrics::init()
                .map_err(|e| Error::Configuration(format!("Metrics init failed: {e}")))?,
        );
        let health = Arc::new(HealthChecker::new(
            database.clone(),
            storage.clone(),
            config.audio_queue_dir(),
        ));

        // Batch processor + scheduler
        let batch_processor = Arc::new(BatchProcessor::new(
            state.clone(),
            ingestor,
            transcription,
            secure_storage,
            meetings.clone(),
            metrics.clone(),
            config.worker_count,
            config.batch_size,
            config.max_retries,
        ));

        let scheduler = Scheduler::new(
            config.clone(),
            state.clone(),
            batch_processor.clone(),
            video_sync,
            notetaker_sync,
            cascade.clone(),
            embeddings.clone(),
            health,
            alerts,
            metrics,
        );

        Ok(Parley {
            config,
            database,
            scheduler,
            batch_processor,
            state,
            search,
            key_store,
            cascade,
            embeddings,
        })
    }
}

impl Default for ParleyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
