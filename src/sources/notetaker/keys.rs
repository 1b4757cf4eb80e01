//! Employee key store
//!
//! Per-employee notetaker API keys live in the database encrypted with
//! AES-256-GCM; plaintext exists only in memory during a sync. Key
//! rotation overwrites the encrypted column.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::storage::encryption::SecretBox;

/// An employee with notetaker API access
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Employee {
    pub id: i64,
    pub employee_name: String,
    pub employee_email: String,
    pub team: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_recording_id: Option<String>,
}

pub struct EmployeeKeyStore {
    pool: PgPool,
    secrets: SecretBox,
}

impl EmployeeKeyStore {
    pub fn new(pool: PgPool, secrets: SecretBox) -> Self {
        Self { pool, secrets }
    }

    /// Add an employee or rotate their key
    pub async fn add_employee(
        &self,
        employee_name: &str,
        employee_email: &str,
        api_key: &str,
        team: Option<&str>,
        is_admin: bool,
    ) -> Result<i64> {
        let encrypted = self.secrets.encrypt(api_key)?;

        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO notetaker_employees
                (employee_name, employee_email, api_key_encrypted, team, is_active, is_admin)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            ON CONFLICT (employee_email) DO UPDATE SET
                employee_name = EXCLUDED.employee_name,
                api_key_encrypted = EXCLUDED.api_key_encrypted,
                team = EXCLUDED.team,
                is_admin = EXCLUDED.is_admin,
                is_active = TRUE,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(employee_name)
        .bind(employee_email)
        .bind(&encrypted)
        .bind(team)
        .bind(is_admin)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(employee = %employee_email, "Added/updated notetaker employee");
        Ok(row.0)
    }

    /// Decrypted API key for an active employee
    pub async fn api_key(&self, employee_email: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT api_key_encrypted FROM notetaker_employees
             WHERE employee_email = $1 AND is_active = TRUE",
        )
        .bind(employee_email)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((encrypted,)) => Ok(Some(self.secrets.decrypt(&encrypted)?)),
            None => Ok(None),
        }
    }

    pub async fn active_employees(&self) -> Result<Vec<Employee>> {
        let employees = sqlx::query_as::<_, Employee>(
            "SELECT id, employee_name, employee_email, team, is_active, is_admin,
                    last_sync_at, last_recording_id
             FROM notetaker_employees
             WHERE is_active = TRUE
             ORDER BY employee_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(employees)
    }

    /// Record a successful sync so the next pass only pulls newer meetings
    pub async fn update_watermark(
        &self,
        employee_email: &str,
        last_recording_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notetaker_employees
            SET last_sync_at = NOW(),
                last_recording_id = COALESCE($2, last_recording_id),
                updated_at = NOW()
            WHERE employee_email = $1
            "#,
        )
        .bind(employee_email)
        .bind(last_recording_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn deactivate(&self, employee_email: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notetaker_employees
             SET is_active = FALSE, updated_at = NOW()
             WHERE employee_email = $1",
        )
        .bind(employee_email)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
