//! In-memory ledger with the same semantics as the Postgres one. Backs the
//! engine test suite and `up --dry-run` previews.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::{ClaimToken, Ledger, LedgerEntry, StepStatus, applied_in_completion_order};

#[derive(Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    claims: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full append-only history, for assertions on ordering and audit shape.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().unwrap().entries.clone()
    }

    fn append(&self, environment: &str, version: &str, step: &str, status: StepStatus) {
        self.inner.lock().unwrap().entries.push(LedgerEntry {
            environment: environment.to_string(),
            version: version.to_string(),
            step: step.to_string(),
            status,
            recorded_at: Utc::now(),
        });
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn is_applied(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<bool, LedgerError> {
        let inner = self.inner.lock().unwrap();
        let latest = inner
            .entries
            .iter()
            .rev()
            .find(|e| e.environment == environment && e.version == version && e.step == step);
        Ok(matches!(
            latest,
            Some(entry) if entry.status == StepStatus::Completed
        ))
    }

    async fn record_completed(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<(), LedgerError> {
        self.append(environment, version, step, StepStatus::Completed);
        Ok(())
    }

    async fn record_rolled_back(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<(), LedgerError> {
        self.append(environment, version, step, StepStatus::RolledBack);
        Ok(())
    }

    async fn completed_steps_for(
        &self,
        environment: &str,
        version: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        Ok(applied_in_completion_order(
            inner
                .entries
                .iter()
                .filter(|e| e.environment == environment && e.version == version),
        ))
    }

    async fn claim(&self, environment: &str) -> Result<ClaimToken, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.claims.contains_key(environment) {
            return Err(LedgerError::Contention {
                environment: environment.to_string(),
                holder: None,
            });
        }
        let token = Uuid::new_v4();
        inner.claims.insert(environment.to_string(), token);
        Ok(ClaimToken(token))
    }

    async fn release(&self, environment: &str, token: ClaimToken) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.claims.get(environment) == Some(&token.0) {
            inner.claims.remove(environment);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_entry_wins_for_is_applied() {
        let ledger = MemoryLedger::new();
        ledger
            .record_completed("prod", "5.8.0-b1", "createTable")
            .await
            .unwrap();
        assert!(ledger.is_applied("prod", "5.8.0-b1", "createTable").await.unwrap());

        ledger
            .record_rolled_back("prod", "5.8.0-b1", "createTable")
            .await
            .unwrap();
        assert!(!ledger.is_applied("prod", "5.8.0-b1", "createTable").await.unwrap());
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let ledger = MemoryLedger::new();
        let token = ledger.claim("prod").await.unwrap();

        let second = ledger.claim("prod").await;
        assert!(matches!(second, Err(LedgerError::Contention { .. })));

        // Different environments do not contend.
        ledger.claim("staging").await.unwrap();

        ledger.release("prod", token).await.unwrap();
        ledger.claim("prod").await.unwrap();
    }

    #[tokio::test]
    async fn stale_token_does_not_release_a_newer_claim() {
        let ledger = MemoryLedger::new();
        let first = ledger.claim("prod").await.unwrap();
        ledger.release("prod", first).await.unwrap();
        let _second = ledger.claim("prod").await.unwrap();

        ledger.release("prod", first).await.unwrap();
        assert!(matches!(
            ledger.claim("prod").await,
            Err(LedgerError::Contention { .. })
        ));
    }
}
