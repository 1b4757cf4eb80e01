//! Composite health checks
//!
//! Per-component probes roll up into one overall status; the scheduler
//! aborts a daily pass when the overall status is unhealthy or critical.

use std::path::PathBuf;

use serde::Serialize;

use crate::database::Database;
use crate::error::Result;
use crate::storage::Storage;

/// Overall or per-component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    /// Should the daily pass be aborted at this status
    pub fn blocks_processing(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy | HealthStatus::Critical)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// One probe's result
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

/// Snapshot of all probes plus the rolled-up status
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Roll component statuses up to the worst one
pub fn overall_status(components: &[ComponentHealth]) -> HealthStatus {
    components
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

pub struct HealthChecker {
    database: Database,
    storage: Storage,
    staging_dir: PathBuf,
}

impl HealthChecker {
    pub fn new(database: Database, storage: Storage, staging_dir: PathBuf) -> Self {
        Self {
            database,
            storage,
            staging_dir,
        }
    }

    pub async fn check_health(&self) -> Result<HealthReport> {
        let components = vec![
            self.check_database().await,
            self.check_storage().await,
            self.check_staging_dir().await,
        ];

        let status = overall_status(&components);

        if status != HealthStatus::Healthy {
            tracing::warn!(status = %status, "Health check not healthy");
        }

        Ok(HealthReport {
            status,
            components,
            checked_at: chrono::Utc::now(),
        })
    }

    async fn check_database(&self) -> ComponentHealth {
        match self.database.health_check().await {
            Ok(health) if health.is_healthy => ComponentHealth {
                name: "database".into(),
                status: HealthStatus::Healthy,
                message: health.message,
            },
            Ok(health) => ComponentHealth {
                name: "database".into(),
                // Nothing can proceed without the source of truth
                status: HealthStatus::Critical,
                message: health.message,
            },
            Err(e) => ComponentHealth {
                name: "database".into(),
                status: HealthStatus::Critical,
                message: e.to_string(),
            },
        }
    }

    async fn check_storage(&self) -> ComponentHealth {
        match self.storage.health_check().await {
            Ok(health) if health.is_healthy => ComponentHealth {
                name: "archive_storage".into(),
                status: HealthStatus::Healthy,
                message: health.message,
            },
            Ok(health) => ComponentHealth {
                name: "archive_storage".into(),
                status: HealthStatus::Unhealthy,
                message: health.message,
            },
            Err(e) => ComponentHealth {
                name: "archive_storage".into(),
                status: HealthStatus::Unhealthy,
                message: e.to_string(),
            },
        }
    }

    /// The staging area must exist and be writable for downloads
    async fn check_staging_dir(&self) -> ComponentHealth {
        if let Err(e) = tokio::fs::create_dir_all(&self.staging_dir).await {
            return ComponentHealth {
                name: "staging_dir".into(),
                status: HealthStatus::Critical,
                message: format!("Cannot create {}: {e}", self.staging_dir.display()),
            };
        }

        let probe = self.staging_dir.join(".health_probe");
        match tokio::fs::write(&probe, b"probe").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&probe).await;
                ComponentHealth {
                    name: "staging_dir".into(),
                    status: HealthStatus::Healthy,
                    message: format!("{} writable", self.staging_dir.display()),
                }
            }
            Err(e) => ComponentHealth {
                name: "staging_dir".into(),
                status: HealthStatus::Critical,
                message: format!("Cannot write to {}: {e}", self.staging_dir.display()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(status: HealthStatus) -> ComponentHealth {
        ComponentHealth {
            name: "x".into(),
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_overall_status_takes_worst() {
        let components = vec![
            component(HealthStatus::Healthy),
            component(HealthStatus::Degraded),
            component(HealthStatus::Healthy),
        ];
        assert_eq!(overall_status(&components), HealthStatus::Degraded);

        let components = vec![
            component(HealthStatus::Unhealthy),
            component(HealthStatus::Critical),
        ];
        assert_eq!(overall_status(&components), HealthStatus::Critical);
    }

    #[test]
    fn test_empty_components_are_healthy() {
        assert_eq!(overall_status(&[]), HealthStatus::Healthy);
    }

    #[test]
    fn test_blocks_processing() {
        assert!(!HealthStatus::Healthy.blocks_processing());
        assert!(!HealthStatus::Degraded.blocks_processing());
        assert!(HealthStatus::Unhealthy.blocks_processing());
        assert!(HealthStatus::Critical.blocks_processing());
    }
}
