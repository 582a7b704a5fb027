//! Shared scaffolding for engine-level tests: a recording context, an
//! in-memory ledger, and steps whose operations flow through the fake
//! schema executor so every side effect lands in one call log.

use std::sync::Arc;

use relup::adapters::testing::{Recorder, recording_context};
use relup::engine::MigrationEngine;
use relup::ledger::{MemoryLedger, StepStatus};
use relup::plan::{Registry, ReleaseOrder, Step};

pub const ENV: &str = "test-env";

/// A reversible step whose forward/backward operations execute the
/// statements `"apply <name>"` / `"revert <name>"` against the fake schema
/// executor. Failure injection keys off those exact strings.
pub fn tracked_step(name: &str) -> Step {
    let apply_tag = format!("apply {name}");
    let revert_tag = format!("revert {name}");
    Step::reversible(
        name,
        move |ctx| {
            let tag = apply_tag.clone();
            async move { ctx.schema.execute(&tag, &[]).await.map(|_| ()) }
        },
        move |ctx| {
            let tag = revert_tag.clone();
            async move { ctx.schema.execute(&tag, &[]).await.map(|_| ()) }
        },
    )
}

/// Like [`tracked_step`] but with a declared no-op revert.
pub fn tracked_noop_step(name: &str) -> Step {
    let apply_tag = format!("apply {name}");
    Step::irreversible(name, move |ctx| {
        let tag = apply_tag.clone();
        async move { ctx.schema.execute(&tag, &[]).await.map(|_| ()) }
    })
}

pub struct Harness {
    pub recorder: Recorder,
    pub ledger: Arc<MemoryLedger>,
    pub engine: MigrationEngine,
}

pub fn harness(registry: Registry) -> Harness {
    let recorder = Recorder::new();
    let ledger = Arc::new(MemoryLedger::new());
    let engine = MigrationEngine::new(
        registry,
        ledger.clone(),
        recording_context(ENV, &recorder),
    );
    Harness {
        recorder,
        ledger,
        engine,
    }
}

pub fn order(labels: &[&str]) -> ReleaseOrder {
    ReleaseOrder::new(labels.iter().copied()).unwrap()
}

/// Only the schema-executor statements, in call order.
pub fn schema_calls(recorder: &Recorder) -> Vec<String> {
    recorder
        .calls()
        .into_iter()
        .filter_map(|line| {
            line.strip_prefix("schema.execute ")
                .and_then(|rest| rest.strip_suffix(" (0 params)"))
                .map(str::to_string)
        })
        .collect()
}

/// The ledger never holds two `completed` entries for the same key without
/// an intervening `rolled_back` entry.
pub fn assert_ledger_monotonic(ledger: &MemoryLedger) {
    use std::collections::HashMap;

    let mut latest: HashMap<(String, String, String), StepStatus> = HashMap::new();
    for entry in ledger.entries() {
        let key = (
            entry.environment.clone(),
            entry.version.clone(),
            entry.step.clone(),
        );
        if let Some(prev) = latest.get(&key) {
            assert!(
                !(*prev == StepStatus::Completed && entry.status == StepStatus::Completed),
                "two completed entries for {key:?} without an intervening rollback"
            );
        }
        latest.insert(key, entry.status);
    }
}
