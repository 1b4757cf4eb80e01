//! Processing scheduler
//!
//! A cron-driven supervisor: the daily pass at a configured wall-clock
//! time, an hourly health probe, and a five-minute metrics tick. Only one
//! daily run can be active; an overlapping trigger is skipped. All
//! collaborators are constructor-injected and shared via the inner state.

pub mod batch;
pub mod state_manager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::analysis::CascadeProcessor;
use crate::config::AppConfig;
use crate::database::models::Stage;
use crate::embeddings::EmbeddingJob;
use crate::error::{Error, Result};
use crate::monitoring::{Alert, AlertManager, AlertPriority, HealthChecker, Metrics};
use crate::sources::notetaker::NotetakerSync;
use crate::sources::telephony::VideoMeetingSync;
use batch::{BatchProcessor, BatchProgress, BatchResult};
use state_manager::{StateManager, MAIN_PROCESSOR_KEY};

/// Meetings per cascade/embedding pass inside one daily run
const ANALYSIS_BATCH_LIMIT: i64 = 50;
const EMBEDDING_BATCH_LIMIT: i64 = 100;

/// Live statistics for the current daily run
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunStats {
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
    pub total_recordings: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub errors: Vec<String>,
}

/// Snapshot returned by `status()`
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub daily_schedule_time: String,
    pub last_successful_run: Option<String>,
    pub total_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub current_run: Option<RunStats>,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    job_scheduler: Mutex<Option<JobScheduler>>,
}

pub struct SchedulerInner {
    config: AppConfig,
    state: StateManager,
    batch_processor: Arc<BatchProcessor>,
    video_sync: Arc<VideoMeetingSync>,
    notetaker_sync: Arc<NotetakerSync>,
    cascade: Arc<CascadeProcessor>,
    embeddings: Arc<EmbeddingJob>,
    health: Arc<HealthChecker>,
    alerts: AlertManager,
    metrics: Arc<Metrics>,
    is_running: AtomicBool,
    daily_active: AtomicBool,
    current_run: Mutex<Option<RunStats>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        state: StateManager,
        batch_processor: Arc<BatchProcessor>,
        video_sync: Arc<VideoMeetingSync>,
        notetaker_sync: Arc<NotetakerSync>,
        cascade: Arc<CascadeProcessor>,
        embeddings: Arc<EmbeddingJob>,
        health: Arc<HealthChecker>,
        alerts: AlertManager,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                state,
                batch_processor,
                video_sync,
                notetaker_sync,
                cascade,
                embeddings,
                health,
                alerts,
                metrics,
                is_running: AtomicBool::new(false),
                daily_active: AtomicBool::new(false),
                current_run: Mutex::new(None),
            }),
            job_scheduler: Mutex::new(None),
        }
    }

    /// Start the scheduling loop; idempotent
    pub async fn start(&self) -> Result<()> {
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Scheduler is already running");
            return Ok(());
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Other(format!("Failed to create scheduler: {e}")))?;

        // Daily pass at the configured wall-clock time
        let daily_cron = daily_cron_expression(&self.inner.config.daily_schedule_time)?;
        let inner = self.inner.clone();
        let daily = Job::new_async(daily_cron.as_str(), move |_uuid, _lock| {
            let inner = inner.clone();
            Box::pin(async move {
                inner.trigger_daily().await;
            })
        })
        .map_err(|e| Error::Other(format!("Failed to create daily job: {e}")))?;
        scheduler
            .add(daily)
            .await
            .map_err(|e| Error::Other(format!("Failed to add daily job: {e}")))?;

        // Hourly health probe
        let inner = self.inner.clone();
        let hourly = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
            let inner = inner.clone();
            Box::pin(async move {
                inner.run_health_check().await;
            })
        })
        .map_err(|e| Error::Other(format!("Failed to create health job: {e}")))?;
        scheduler
            .add(hourly)
            .await
            .map_err(|e| Error::Other(format!("Failed to add health job: {e}")))?;

        // Metrics tick every five minutes
        let inner = self.inner.clone();
        let metrics_tick = Job::new_async("0 */5 * * * *", move |_uuid, _lock| {
            let inner = inner.clone();
            Box::pin(async move {
                inner.collect_metrics().await;
            })
        })
        .map_err(|e| Error::Other(format!("Failed to create metrics job: {e}")))?;
        scheduler
            .add(metrics_tick)
            .await
            .map_err(|e| Error::Other(format!("Failed to add metrics job: {e}")))?;

        scheduler
            .start()
            .await
            .map_err(|e| Error::Other(format!("Failed to start scheduler: {e}")))?;

        *self.job_scheduler.lock().await = Some(scheduler);

        tracing::info!(
            daily_at = %self.inner.config.daily_schedule_time,
            "Scheduler started"
        );
        Ok(())
    }

    /// Cooperative shutdown; in-flight items finish before workers release
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.is_running.swap(false, Ordering::SeqCst) {
            tracing::warn!("Scheduler is not running");
            return Ok(());
        }

        self.inner.batch_processor.stop();

        if let Some(mut scheduler) = self.job_scheduler.lock().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| Error::Other(format!("Failed to stop scheduler: {e}")))?;
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// One full daily pass, runnable on demand
    pub async fn run_daily_processing(&self) -> Result<RunStats> {
        self.inner.run_daily_processing().await
    }

    /// Daily-pass equivalent over an explicit window
    pub async fn process_historical(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BatchResult> {
        self.inner.process_window(start_date, end_date).await
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        self.inner.status().await
    }
}

impl SchedulerInner {
    /// Cron-triggered entry point; skips when a run is already active
    async fn trigger_daily(&self) {
        if self
            .daily_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Daily run already active, skipping trigger");
            return;
        }

        let result = self.run_daily_processing().await;
        self.daily_active.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            tracing::error!(error = %e, "Daily processing failed");
            let _ = self
                .alerts
                .send_error_alert(&e, "scheduler", "daily_processing")
                .await;
        }
    }

    async fn run_daily_processing(&self) -> Result<RunStats> {
        tracing::info!("Starting daily processing run");

        let mut stats = RunStats {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        *self.current_run.lock().await = Some(stats.clone());

        // Abort the run on unhealthy/critical status; not fatal
        let health = self.health.check_health().await?;
        if health.status.blocks_processing() {
            tracing::error!(status = %health.status, "System unhealthy, skipping processing");
            let _ = self.alerts.send_health_alert(&health).await;
            *self.current_run.lock().await = None;
            return Ok(stats);
        }

        let state_value = self.state.states().get_value(MAIN_PROCESSOR_KEY).await?;

        let today = Utc::now().date_naive();
        let start_date = state_value
            .get("last_successful_run")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.date_naive())
            .unwrap_or_else(|| today - chrono::Duration::days(self.config.historical_days));

        tracing::info!(%start_date, %today, "Processing window determined");

        let result = self.process_window(start_date, today).await?;
        stats.total_recordings = result.total_processed;
        stats.succeeded = result.total_succeeded;
        stats.failed = result.total_failed;
        stats.errors = result.errors.clone();

        // Update the rolling-window state with aggregate totals
        let mut state_value = self.state.states().get_value(MAIN_PROCESSOR_KEY).await?;
        let object = state_value.as_object_mut().expect("state is an object");
        object.insert(
            "last_successful_run".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        for (key, delta) in [
            ("total_processed", result.total_processed),
            ("total_succeeded", result.total_succeeded),
            ("total_failed", result.total_failed),
        ] {
            let prior = object.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
            object.insert(key.into(), serde_json::json!(prior + delta));
        }
        self.state
            .states()
            .put(MAIN_PROCESSOR_KEY, &state_value)
            .await?;

        stats.finished_at = Some(Utc::now());
        self.metrics.daily_runs_completed.add(1, &[]);

        self.write_processing_summary(&stats).await?;
        self.send_completion_alert(&stats).await;

        *self.current_run.lock().await = None;

        tracing::info!(
            recordings = stats.total_recordings,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Daily processing run complete"
        );

        Ok(stats)
    }

    /// Walk a window through recordings, meetings, analysis, and embeddings
    async fn process_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BatchResult> {
        self.batch_processor.clear_stop();

        // Per-date main-processor checkpoints ride on the progress callback
        let states = self.state.states().clone();
        let progress: batch::ProgressCallback = Arc::new(move |progress: BatchProgress| {
            let states = states.clone();
            tokio::spawn(async move {
                let checkpoint = serde_json::json!({
                    "last_checkpoint": Utc::now().to_rfc3339(),
                    "checkpoint_data": progress,
                });
                if let Err(e) = states.put("main_processor_checkpoint", &checkpoint).await {
                    tracing::warn!(error = %e, "Failed to write run checkpoint");
                }
            });
        });

        let result = self
            .batch_processor
            .process_date_range(start_date, end_date, None, Some(progress))
            .await?;

        // Meeting ingestion for the same window
        let window_start = start_date
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();
        let window_end = (end_date + chrono::Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();

        if let Err(e) = self.video_sync.sync_window(window_start, window_end).await {
            tracing::error!(error = %e, "Video meeting sync failed");
        }
        if let Err(e) = self.notetaker_sync.sync_all().await {
            tracing::error!(error = %e, "Notetaker sync failed");
        }

        // Decoupled analysis passes
        if let Err(e) = self.cascade.run_all(ANALYSIS_BATCH_LIMIT).await {
            tracing::error!(error = %e, "Cascade pass failed");
        }
        if let Err(e) = self.embeddings.process_all(EMBEDDING_BATCH_LIMIT).await {
            tracing::error!(error = %e, "Embedding pass failed");
        }

        Ok(result)
    }

    async fn run_health_check(&self) {
        match self.health.check_health().await {
            Ok(report) => {
                if report.status.blocks_processing() {
                    let _ = self.alerts.send_health_alert(&report).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "Health check failed"),
        }
    }

    /// Five-minute tick: queue depths into gauges
    async fn collect_metrics(&self) {
        match self.state.processing_summary().await {
            Ok(summary) => {
                self.metrics
                    .set_queue_depth(Stage::Download.column_prefix(), summary.pending_download as u64);
                self.metrics.set_queue_depth(
                    Stage::Transcription.column_prefix(),
                    summary.pending_transcription as u64,
                );
                self.metrics
                    .set_queue_depth(Stage::Upload.column_prefix(), summary.pending_upload as u64);
            }
            Err(e) => tracing::error!(error = %e, "Metrics collection failed"),
        }
    }

    async fn send_completion_alert(&self, stats: &RunStats) {
        let duration = match (stats.started_at, stats.finished_at) {
            (Some(start), Some(end)) => (end - start).num_seconds(),
            _ => 0,
        };

        let message = format!(
            "Daily processing completed:\n\
             - Duration: {duration}s\n\
             - Total recordings: {}\n\
             - Succeeded: {}\n\
             - Failed: {}\n\
             - Errors: {}",
            stats.total_recordings,
            stats.succeeded,
            stats.failed,
            stats.errors.len(),
        );

        let priority = if stats.errors.len() > 5 {
            AlertPriority::High
        } else if stats.failed > 0 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        };

        let _ = self
            .alerts
            .send_alert(
                Alert::new("Daily Processing Complete", message, priority, "scheduler")
                    .with_details(serde_json::to_value(stats).unwrap_or_default()),
            )
            .await;
    }

    /// Mirror the run outcome to disk for operator visibility
    async fn write_processing_summary(&self, stats: &RunStats) -> Result<()> {
        let dir = self.config.scheduler_state_dir();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(
            dir.join("processing_summary.json"),
            serde_json::to_vec_pretty(stats)?,
        )
        .await?;
        Ok(())
    }

    async fn status(&self) -> Result<SchedulerStatus> {
        let state_value = self.state.states().get_value(MAIN_PROCESSOR_KEY).await?;

        Ok(SchedulerStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            daily_schedule_time: self.config.daily_schedule_time.clone(),
            last_successful_run: state_value
                .get("last_successful_run")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            total_processed: state_value
                .get("total_processed")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            total_succeeded: state_value
                .get("total_succeeded")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            total_failed: state_value
                .get("total_failed")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            current_run: self.current_run.lock().await.clone(),
        })
    }
}

/// Convert "HH:MM" into the six-field cron expression the scheduler uses
fn daily_cron_expression(schedule_time: &str) -> Result<String> {
    let parts: Vec<&str> = schedule_time.split(':').collect();
    if parts.len() != 2 {
        return Err(Error::Configuration(format!(
            "Invalid schedule time: {schedule_time}"
        )));
    }

    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| Error::Configuration(format!("Invalid hour in {schedule_time}")))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| Error::Configuration(format!("Invalid minute in {schedule_time}")))?;

    if hour >= 24 || minute >= 60 {
        return Err(Error::Configuration(format!(
            "Schedule time out of range: {schedule_time}"
        )));
    }

    Ok(format!("0 {minute} {hour} * * *"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_cron_expression() {
        assert_eq!(daily_cron_expression("02:00").unwrap(), "0 0 2 * * *");
        assert_eq!(daily_cron_expression("23:45").unwrap(), "0 45 23 * * *");
        assert!(daily_cron_expression("24:00").is_err());
        assert!(daily_cron_expression("2am").is_err());
    }
}
