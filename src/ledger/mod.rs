//! The execution ledger: the durable record of which steps have completed,
//! in what order, per environment.
//!
//! The ledger is append-only. A rollback appends a `rolled_back` row rather
//! than touching the `completed` row, so the full history stays auditable.
//! "Applied" means the latest row for an `(environment, version, step)` key
//! is `completed`.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LedgerError;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    RolledBack,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for StepStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "rolled_back" => Ok(Self::RolledBack),
            _ => Err(LedgerError::Other(format!("unknown step status: {s}"))),
        }
    }
}

/// One appended ledger row.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub environment: String,
    pub version: String,
    pub step: String,
    pub status: StepStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Token proving ownership of the single-writer claim on an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken(pub Uuid);

/// Durable per-environment step bookkeeping. Implementations must survive
/// process crash (Postgres) or emulate the same semantics in memory for
/// tests and dry runs.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// True when the latest entry for the key is `completed`.
    async fn is_applied(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<bool, LedgerError>;

    async fn record_completed(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<(), LedgerError>;

    async fn record_rolled_back(
        &self,
        environment: &str,
        version: &str,
        step: &str,
    ) -> Result<(), LedgerError>;

    /// Step names currently applied for a plan, in actual completion order
    /// (not declaration order). This drives reverse-order rollback.
    async fn completed_steps_for(
        &self,
        environment: &str,
        version: &str,
    ) -> Result<Vec<String>, LedgerError>;

    /// Acquire the single-writer claim for an environment. Fails with
    /// [`LedgerError::Contention`] if another run holds it.
    async fn claim(&self, environment: &str) -> Result<ClaimToken, LedgerError>;

    /// Release a claim previously acquired by this run. Releasing a claim
    /// that is no longer held is not an error.
    async fn release(&self, environment: &str, token: ClaimToken) -> Result<(), LedgerError>;
}

/// Fold an append-only entry sequence down to the steps that are currently
/// applied, ordered by when their (latest) completion was recorded.
pub(crate) fn applied_in_completion_order<'a, I>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut latest: HashMap<&str, (usize, StepStatus)> = HashMap::new();
    for (seq, entry) in entries.into_iter().enumerate() {
        latest.insert(entry.step.as_str(), (seq, entry.status));
    }

    let mut applied: Vec<(usize, &str)> = latest
        .into_iter()
        .filter(|(_, (_, status))| *status == StepStatus::Completed)
        .map(|(step, (seq, _))| (seq, step))
        .collect();
    applied.sort_unstable();
    applied.into_iter().map(|(_, s)| s.to_string()).collect()
}
