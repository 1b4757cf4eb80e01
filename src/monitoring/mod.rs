//! Health checks, metrics, and alerting

pub mod alerts;
pub mod health;
pub mod metrics;

pub use alerts::{Alert, AlertManager, AlertPriority};
pub use health::{HealthChecker, HealthReport, HealthStatus};
pub use metrics::Metrics;
