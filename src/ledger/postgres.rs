//! Postgres-backed ledger. One append-only table for step entries plus a
//! claims table enforcing single-writer-per-environment.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::LedgerTable;
use crate::error::LedgerError;
use crate::ledger::{ClaimToken, Ledger, LedgerEntry, StepStatus, applied_in_completion_order};
use crate::sql::quote_qualified;

/// A run that crashed never releases its claim, so claims older than this
/// are treated as abandoned and taken over by the next run.
pub const DEFAULT_STALE_CLAIM_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub struct PgLedger {
    pool: PgPool,
    table: LedgerTable,
    stale_claim_timeout: Duration,
}

impl PgLedger {
    pub fn new(pool: PgPool, table: LedgerTable) -> Self {
        Self {
            pool,
            table,
            stale_claim_timeout: DEFAULT_STALE_CLAIM_TIMEOUT,
        }
    }

    /// How old a claim must be before it counts as abandoned. Set it above
    /// the longest upgrade run you expect.
    pub fn with_stale_claim_timeout(mut self, timeout: Duration) -> Self {
        self.stale_claim_timeout = timeout;
        self
    }

    fn entries_table(&self) -> Result<String, LedgerError> {
        quote_qualified(&self.table.schema, &self.table.name).map_err(LedgerError::Other)
    }

    fn claims_table(&self) -> Result<String, LedgerError> {
        let claims = format!("{}_claims", self.table.name);
        quote_qualified(&self.table.schema, &claims).map_err(LedgerError::Other)
    }

    /// Create the ledger and claims tables if they do not exist yet. Called
    /// once on startup, before the engine begins planning.
    pub async fn ensure_tables(&self) -> Result<(), LedgerError> {
        let entries = self.entries_table()?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                environment TEXT NOT NULL,
                version TEXT NOT NULL,
                step_name TEXT NOT NULL,
                status TEXT NOT NULL,
                recorded_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            entries
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_key ON {}(environment, version, step_name)",
            self.table.name, entries
        ))
        .execute(&self.pool)
        .await?;

        let claims = self.claims_table()?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                environment TEXT PRIMARY KEY,
                token UUID NOT NULL,
                claimed_by TEXT,
                claimed_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            claims
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entries_for(
        &self,
        environment: &str,
        version: &str,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries_table()?;
        let rows = sqlx::query(&format!(
            "SELECT version, step_name, status, recorded_at FROM {}
             WHERE environment = $1 AND version = $2
             ORDER BY id",
            entries
        ))
        .bind(environment)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(LedgerEntry {
                    environment: environment.to_string(),
                    version: row.get("version"),
                    step: row.get("step_name"),
                    status: status.parse::<StepStatus>()?,
                    recorded_at: row.get("recorded_at"),
                })
            })
            .collect()
    }

    async fn append(
        &self,
        environment: &str,
        version: &str,
        step: &str,
        status: StepStatus,
    ) -> Result<(), LedgerError> {
        let entries = self.entries_table()?;
        sqlx::query(&format!(
            "INSERT INTO {} (environment, version, step_name, status) VALUES ($1, $2, $3, $4)",
            entries
        ))
        .bind(environment)
        .bind(version)
        .bind(step)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn is_applied(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<bool, LedgerError> {
        let entries = self.entries_table()?;
        let row: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT status FROM {}
             WHERE environment = $1 AND version = $2 AND step_name = $3
             ORDER BY id DESC LIMIT 1",
            entries
        ))
        .bind(environment)
        .bind(version)
        .bind(step)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((status,)) => Ok(status.parse::<StepStatus>()? == StepStatus::Completed),
            None => Ok(false),
        }
    }

    async fn record_completed(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<(), LedgerError> {
        self.append(environment, version, step, StepStatus::Completed)
            .await
    }

    async fn record_rolled_back(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<(), LedgerError> {
        self.append(environment, version, step, StepStatus::RolledBack)
            .await
    }

    async fn completed_steps_for(
        &self,
        environment: &str,
        version: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let entries = self.entries_for(environment, version).await?;
        Ok(applied_in_completion_order(&entries))
    }

    async fn claim(&self, environment: &str) -> Result<ClaimToken, LedgerError> {
        let claims = self.claims_table()?;
        let token = Uuid::new_v4();
        let claimed_by = format!("relup pid {}", std::process::id());

        // The conflict arm takes over claims older than the stale timeout;
        // a live claim keeps its row and the insert affects zero rows.
        let result = sqlx::query(&format!(
            "INSERT INTO {} AS c (environment, token, claimed_by) VALUES ($1, $2, $3)
             ON CONFLICT (environment) DO UPDATE
             SET token = EXCLUDED.token,
                 claimed_by = EXCLUDED.claimed_by,
                 claimed_at = CURRENT_TIMESTAMP
             WHERE c.claimed_at < CURRENT_TIMESTAMP - make_interval(secs => $4)",
            claims
        ))
        .bind(environment)
        .bind(token)
        .bind(&claimed_by)
        .bind(self.stale_claim_timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ClaimToken(token));
        }

        let holder: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT claimed_by FROM {} WHERE environment = $1",
            claims
        ))
        .bind(environment)
        .fetch_optional(&self.pool)
        .await?;

        Err(LedgerError::Contention {
            environment: environment.to_string(),
            holder: holder.map(|(h,)| h),
        })
    }

    async fn release(&self, environment: &str, token: ClaimToken) -> Result<(), LedgerError> {
        let claims = self.claims_table()?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE environment = $1 AND token = $2",
            claims
        ))
        .bind(environment)
        .bind(token.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn table_names_are_validated_and_quoted() {
        let ledger = PgLedger::new(
            PgPool::connect_lazy("postgres://localhost/relup").unwrap(),
            LedgerTable {
                schema: "public".to_string(),
                name: "upgrade_ledger".to_string(),
            },
        );
        assert_eq!(
            ledger.entries_table().unwrap(),
            r#""public"."upgrade_ledger""#
        );
        assert_eq!(
            ledger.claims_table().unwrap(),
            r#""public"."upgrade_ledger_claims""#
        );
    }

    #[tokio::test]
    async fn stale_claim_timeout_is_configurable() {
        let pool = PgPool::connect_lazy("postgres://localhost/relup").unwrap();
        let ledger = PgLedger::new(pool.clone(), LedgerTable::default());
        assert_eq!(ledger.stale_claim_timeout, DEFAULT_STALE_CLAIM_TIMEOUT);

        let tuned = PgLedger::new(pool, LedgerTable::default())
            .with_stale_claim_timeout(Duration::from_secs(4 * 60 * 60));
        assert_eq!(tuned.stale_claim_timeout, Duration::from_secs(4 * 60 * 60));
    }

    #[tokio::test]
    async fn hostile_table_names_are_rejected() {
        let ledger = PgLedger::new(
            PgPool::connect_lazy("postgres://localhost/relup").unwrap(),
            LedgerTable {
                schema: "public".to_string(),
                name: "ledger; DROP TABLE users".to_string(),
            },
        );
        assert!(ledger.entries_table().is_err());
    }
}
