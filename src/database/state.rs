//! Durable processing-state rows
//!
//! One JSON snapshot per state key (`main_processor`, `batch_<id>`).
//! At most one active row exists per key; the unique constraint on
//! `state_key` enforces it.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use super::models::ProcessingState;
use crate::error::Result;

#[derive(Clone)]
pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, state_key: &str) -> Result<Option<ProcessingState>> {
        let state = sqlx::query_as::<_, ProcessingState>(
            "SELECT * FROM processing_state WHERE state_key = $1",
        )
        .bind(state_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    /// Fetch the JSON snapshot for a key, or an empty object when absent
    pub async fn get_value(&self, state_key: &str) -> Result<serde_json::Value> {
        Ok(self
            .get(state_key)
            .await?
            .map(|s| s.state_value)
            .unwrap_or_else(|| serde_json::json!({})))
    }

    /// Create or overwrite the snapshot for a key, refreshing the checkpoint
    pub async fn put(&self, state_key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_state (state_key, state_value, is_active, last_checkpoint)
            VALUES ($1, $2, TRUE, NOW())
            ON CONFLICT (state_key) DO UPDATE SET
                state_value = EXCLUDED.state_value,
                last_checkpoint = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(state_key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_active(&self, state_key: &str, is_active: bool) -> Result<()> {
        sqlx::query(
            "UPDATE processing_state SET is_active = $2, updated_at = NOW() WHERE state_key = $1",
        )
        .bind(state_key)
        .bind(is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All active states whose key starts with the given prefix
    pub async fn active_with_prefix(&self, prefix: &str) -> Result<Vec<ProcessingState>> {
        let pattern = format!("{}%", prefix);
        let states = sqlx::query_as::<_, ProcessingState>(
            "SELECT * FROM processing_state
             WHERE state_key LIKE $1 AND is_active = TRUE
             ORDER BY state_key",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(states)
    }

    /// Delete inactive states older than the given age
    pub async fn cleanup_old(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);

        let result = sqlx::query(
            "DELETE FROM processing_state
             WHERE is_active = FALSE AND last_checkpoint < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        tracing::info!("Cleaned up {} old processing states", removed);
        Ok(removed)
    }
}
