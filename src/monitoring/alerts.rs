//! Alert delivery
//!
//! Alerts always land in the log; email and webhook channels activate
//! when configured. History is kept in memory with per-title rate
//! limiting so a flapping component cannot flood a channel.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tokio::sync::Mutex;

use crate::config::AlertConfig;
use crate::error::Result;
use crate::monitoring::health::HealthReport;

/// Minimum spacing between alerts with the same title
const RATE_LIMIT_WINDOW_MINS: i64 = 10;

/// Retained alert history entries
const HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertPriority::Low => write!(f, "low"),
            AlertPriority::Medium => write!(f, "medium"),
            AlertPriority::High => write!(f, "high"),
            AlertPriority::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub priority: AlertPriority,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Alert {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        priority: AlertPriority,
        component: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority,
            component: component.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    title: String,
    sent_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AlertManager {
    config: AlertConfig,
    client: reqwest::Client,
    history: Arc<Mutex<VecDeque<HistoryEntry>>>,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            client: crate::http_client::api_client(),
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Deliver an alert over all configured channels
    ///
    /// Returns false when the alert was suppressed by rate limiting.
    pub async fn send_alert(&self, alert: Alert) -> Result<bool> {
        if !self.admit(&alert).await {
            tracing::debug!(title = %alert.title, "Alert rate limited");
            return Ok(false);
        }

        self.log_alert(&alert);

        if let Some(webhook_url) = &self.config.webhook_url {
            if let Err(e) = self.send_webhook(webhook_url, &alert).await {
                tracing::error!(error = %e, "Webhook alert delivery failed");
            }
        }

        if let Some(email) = &self.config.email {
            if let Err(e) = self.send_email(email, &alert).await {
                tracing::error!(error = %e, "Email alert delivery failed");
            }
        }

        Ok(true)
    }

    /// Error alert with component and operation context
    pub async fn send_error_alert(
        &self,
        error: &crate::error::Error,
        component: &str,
        operation: &str,
    ) -> Result<bool> {
        self.send_alert(
            Alert::new(
                format!("{component} {operation} failed"),
                error.to_string(),
                AlertPriority::High,
                component,
            )
            .with_details(serde_json::json!({ "operation": operation })),
        )
        .await
    }

    /// Health alert whose priority tracks the report status
    pub async fn send_health_alert(&self, report: &HealthReport) -> Result<bool> {
        let priority = match report.status {
            crate::monitoring::health::HealthStatus::Critical => AlertPriority::Critical,
            _ => AlertPriority::High,
        };

        let failing: Vec<String> = report
            .components
            .iter()
            .filter(|c| c.status != crate::monitoring::health::HealthStatus::Healthy)
            .map(|c| format!("{}: {} ({})", c.name, c.status, c.message))
            .collect();

        self.send_alert(
            Alert::new(
                "System health degraded",
                failing.join("\n"),
                priority,
                "health",
            )
            .with_details(serde_json::to_value(report)?),
        )
        .await
    }

    /// Admit the alert unless an identical title fired too recently
    async fn admit(&self, alert: &Alert) -> bool {
        let mut history = self.history.lock().await;
        let cutoff = Utc::now() - Duration::minutes(RATE_LIMIT_WINDOW_MINS);

        // Critical alerts always go through
        if alert.priority != AlertPriority::Critical {
            let recently_sent = history
                .iter()
                .any(|entry| entry.title == alert.title && entry.sent_at > cutoff);
            if recently_sent {
                return false;
            }
        }

        history.push_back(HistoryEntry {
            title: alert.title.clone(),
            sent_at: Utc::now(),
        });
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }

        true
    }

    fn log_alert(&self, alert: &Alert) {
        match alert.priority {
            AlertPriority::Low => {
                tracing::info!(component = %alert.component, title = %alert.title, "{}", alert.message)
            }
            AlertPriority::Medium => {
                tracing::warn!(component = %alert.component, title = %alert.title, "{}", alert.message)
            }
            AlertPriority::High | AlertPriority::Critical => {
                tracing::error!(component = %alert.component, title = %alert.title, priority = %alert.priority, "{}", alert.message)
            }
        }
    }

    async fn send_webhook(&self, url: &str, alert: &Alert) -> Result<()> {
        let payload = serde_json::json!({
            "text": format!("[{}] {}: {}", alert.priority, alert.title, alert.message),
            "alert": alert,
        });

        self.client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| crate::error::Error::Network(format!("Webhook send failed: {e}")))?
            .error_for_status()
            .map_err(|e| crate::error::Error::Http(format!("Webhook rejected: {e}")))?;

        Ok(())
    }

    async fn send_email(&self, email: &crate::config::EmailConfig, alert: &Alert) -> Result<()> {
        use lettre::message::Mailbox;

        let from: Mailbox = email
            .from_address
            .parse()
            .map_err(|e| crate::error::Error::Configuration(format!("Bad from address: {e}")))?;

        let transport: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(email.smtp_host.as_str())
                .port(email.smtp_port)
                .build();

        for to_address in &email.to_addresses {
            let to: Mailbox = match to_address.parse() {
                Ok(to) => to,
                Err(e) => {
                    tracing::warn!(to_address, error = %e, "Skipping bad alert recipient");
                    continue;
                }
            };

            let message = lettre::Message::builder()
                .from(from.clone())
                .to(to)
                .subject(format!("[{}] {}", alert.priority, alert.title))
                .body(alert.message.clone())
                .map_err(|e| crate::error::Error::Other(format!("Email build failed: {e}")))?;

            transport
                .send(message)
                .await
                .map_err(|e| crate::error::Error::Network(format!("Email send failed: {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_only_manager() -> AlertManager {
        AlertManager::new(AlertConfig::default())
    }

    #[tokio::test]
    async fn test_alert_delivers_to_log_channel() {
        let manager = log_only_manager();
        let sent = manager
            .send_alert(Alert::new("Test", "message", AlertPriority::Low, "tests"))
            .await
            .unwrap();
        assert!(sent);
    }

    #[tokio::test]
    async fn test_repeated_alert_is_rate_limited() {
        let manager = log_only_manager();

        let first = manager
            .send_alert(Alert::new("Same title", "a", AlertPriority::Medium, "tests"))
            .await
            .unwrap();
        let second = manager
            .send_alert(Alert::new("Same title", "b", AlertPriority::Medium, "tests"))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_critical_alerts_bypass_rate_limit() {
        let manager = log_only_manager();

        for _ in 0..3 {
            let sent = manager
                .send_alert(Alert::new(
                    "Deletion failed",
                    "audio still present",
                    AlertPriority::Critical,
                    "secure_storage",
                ))
                .await
                .unwrap();
            assert!(sent);
        }
    }

    #[tokio::test]
    async fn test_webhook_delivery() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let manager = AlertManager::new(AlertConfig {
            webhook_url: Some(format!("{}/hook", server.url())),
            email: None,
        });

        manager
            .send_alert(Alert::new("Hooked", "msg", AlertPriority::High, "tests"))
            .await
            .unwrap();

        mock.assert_async().await;
    }
}
