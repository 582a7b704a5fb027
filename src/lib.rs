//! relup - a release-upgrade execution engine.
//!
//! Products that ship versioned releases accumulate upgrade work per
//! release: schema changes, data backfills, permission seeding, config-file
//! merges. relup models each release as a [`plan::VersionPlan`] of named
//! [`plan::Step`]s with a forward operation and a best-effort inverse, runs
//! them strictly in order, and records every completion in a durable
//! per-environment [`ledger::Ledger`] so runs are resumable and a failed
//! plan rolls back in reverse completion order.
//!
//! Steps only touch infrastructure through the narrow
//! [`adapters`] traits, which keeps plans declarative and testable with the
//! recording fakes in [`adapters::testing`].

pub mod adapters;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod plan;
pub mod progress;

mod sql;

pub use adapters::StepContext;
pub use engine::{MigrationEngine, MigrationReport, Outcome};
pub use error::{AdapterError, EngineError, LedgerError, PlanningError, RollbackError, StepError};
pub use ledger::{Ledger, MemoryLedger, PgLedger};
pub use plan::{Registry, ReleaseOrder, Revert, Step, VersionPlan};
