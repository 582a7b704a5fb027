//! Engine behavior: ordering, idempotent re-runs, scoped best-effort
//! rollback, unknown-step dispatch, ledger monotonicity, cancellation,
//! single-writer claims, and the down path.

mod helpers;

use std::sync::OnceLock;

use helpers::*;
use relup::engine::{CancelToken, Outcome, PlanState, StepDispatch};
use relup::error::{EngineError, LedgerError, PlanningError};
use relup::ledger::Ledger;
use relup::plan::{Registry, Step, VersionPlan};

fn release_scenario() -> Registry {
    // The concrete scenario: 5.8.0-b1 declares three steps in order.
    let mut registry = Registry::new(order(&["5.7.0-b1", "5.8.0-b1"]));
    registry
        .register(
            VersionPlan::new(
                "5.7.0-b1",
                vec![tracked_step("initSchema")],
            )
            .unwrap(),
        )
        .unwrap();
    registry
        .register(
            VersionPlan::new(
                "5.8.0-b1",
                vec![
                    tracked_step("createTable"),
                    tracked_step("addColumn"),
                    tracked_step("seedPermission"),
                ],
            )
            .unwrap(),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn applies_steps_in_declaration_order() {
    let h = harness(release_scenario());

    let report = h.engine.up(Some("5.8.0-b1")).await.unwrap();
    assert_eq!(report.outcome(), Outcome::Done);
    assert_eq!(report.outcome().exit_code(), 0);

    assert_eq!(
        schema_calls(&h.recorder),
        [
            "apply initSchema",
            "apply createTable",
            "apply addColumn",
            "apply seedPermission",
        ]
    );
    assert_eq!(
        h.ledger
            .completed_steps_for(ENV, "5.8.0-b1")
            .await
            .unwrap(),
        ["createTable", "addColumn", "seedPermission"]
    );

    // The run released its claim on the way out.
    h.ledger.claim(ENV).await.unwrap();
}

#[tokio::test]
async fn second_run_is_a_noop() {
    let h = harness(release_scenario());

    h.engine.up(None).await.unwrap();
    let calls_after_first = h.recorder.calls().len();

    let report = h.engine.up(None).await.unwrap();
    assert_eq!(report.outcome(), Outcome::Done);
    assert!(report.applied.is_empty());
    assert_eq!(h.recorder.calls().len(), calls_after_first);
    assert_ledger_monotonic(&h.ledger);
}

#[tokio::test]
async fn resumes_a_partially_applied_plan() {
    let h = harness(release_scenario());
    h.ledger
        .record_completed(ENV, "5.7.0-b1", "initSchema")
        .await
        .unwrap();
    h.ledger
        .record_completed(ENV, "5.8.0-b1", "createTable")
        .await
        .unwrap();

    let report = h.engine.up(None).await.unwrap();
    assert_eq!(report.outcome(), Outcome::Done);
    assert_eq!(
        schema_calls(&h.recorder),
        ["apply addColumn", "apply seedPermission"]
    );
}

#[tokio::test]
async fn failure_rolls_back_only_the_failing_plan() {
    let h = harness(release_scenario());
    h.recorder.fail_on("apply seedPermission");

    let report = h.engine.up(Some("5.8.0-b1")).await.unwrap();
    assert_eq!(report.outcome(), Outcome::RolledBack);
    assert_eq!(report.outcome().exit_code(), 1);

    let failure = report.failure.unwrap();
    assert_eq!(failure.version, "5.8.0-b1");
    assert_eq!(failure.step, "seedPermission");
    assert_eq!(failure.reverted, ["addColumn", "createTable"]);
    assert!(failure.rollback_clean());
    assert!(failure.rollback_error().is_none());

    // Reverts ran in reverse completion order, and never touched the
    // previously completed 5.7.0-b1 plan.
    assert_eq!(
        schema_calls(&h.recorder),
        [
            "apply initSchema",
            "apply createTable",
            "apply addColumn",
            "apply seedPermission",
            "revert addColumn",
            "revert createTable",
        ]
    );
    assert!(h.ledger.is_applied(ENV, "5.7.0-b1", "initSchema").await.unwrap());
    assert!(!h.ledger.is_applied(ENV, "5.8.0-b1", "createTable").await.unwrap());
    assert_ledger_monotonic(&h.ledger);
}

#[tokio::test]
async fn retry_after_rollback_reapplies_the_reverted_steps() {
    let h = harness(release_scenario());
    h.recorder.fail_on("apply seedPermission");
    h.engine.up(None).await.unwrap();

    h.recorder.clear_failure("apply seedPermission");
    let report = h.engine.up(None).await.unwrap();

    assert_eq!(report.outcome(), Outcome::Done);
    let applied: Vec<&str> = report.applied.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(applied, ["createTable", "addColumn", "seedPermission"]);
    assert_ledger_monotonic(&h.ledger);
}

#[tokio::test]
async fn rollback_continues_past_revert_failures() {
    let mut registry = Registry::new(order(&["6.0.0"]));
    registry
        .register(
            VersionPlan::new(
                "6.0.0",
                vec![
                    tracked_step("s1"),
                    tracked_step("s2"),
                    tracked_step("s3"),
                    tracked_step("s4"),
                ],
            )
            .unwrap(),
        )
        .unwrap();

    let h = harness(registry);
    h.recorder.fail_on("apply s4");
    h.recorder.fail_on("revert s2");

    let report = h.engine.up(None).await.unwrap();
    assert_eq!(report.outcome(), Outcome::Dirty);
    assert_eq!(report.outcome().exit_code(), 2);

    let failure = report.failure.unwrap();
    // s3 and s1 reverted; s2's failure did not stop the walk.
    assert_eq!(failure.reverted, ["s3", "s1"]);
    assert_eq!(failure.failed_to_revert.len(), 1);
    assert_eq!(failure.failed_to_revert[0].0, "s2");

    let rollback_error = failure.rollback_error().unwrap();
    assert!(rollback_error.to_string().contains("s2"));

    // The attempted revert order was strictly reverse completion order.
    let calls = schema_calls(&h.recorder);
    let tail = &calls[calls.len() - 3..];
    assert_eq!(tail, ["revert s3", "revert s2", "revert s1"]);

    // s2 stays applied in the ledger: its revert never succeeded.
    assert!(h.ledger.is_applied(ENV, "6.0.0", "s2").await.unwrap());
    assert!(!h.ledger.is_applied(ENV, "6.0.0", "s3").await.unwrap());
}

#[tokio::test]
async fn noop_revert_is_recorded_for_audit() {
    let mut registry = Registry::new(order(&["6.0.0"]));
    registry
        .register(
            VersionPlan::new(
                "6.0.0",
                vec![
                    tracked_step("createTable"),
                    tracked_noop_step("editEmailContent"),
                    tracked_step("boom"),
                ],
            )
            .unwrap(),
        )
        .unwrap();

    let h = harness(registry);
    h.recorder.fail_on("apply boom");

    let report = h.engine.up(None).await.unwrap();
    let failure = report.failure.unwrap();
    assert_eq!(failure.reverted, ["editEmailContent", "createTable"]);

    // The declared no-op produced no schema call but still got its
    // rolled_back ledger entry.
    assert!(!schema_calls(&h.recorder).contains(&"revert editEmailContent".to_string()));
    assert!(
        !h.ledger
            .is_applied(ENV, "6.0.0", "editEmailContent")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn unknown_step_dispatch_is_a_successful_noop() {
    let h = harness(release_scenario());

    let dispatch = h
        .engine
        .apply_step_by_name("5.8.0-b1", "dropEverything", false)
        .await
        .unwrap();
    assert_eq!(dispatch, StepDispatch::Unknown);
    assert!(h.recorder.calls().is_empty());
    assert!(h.ledger.entries().is_empty());

    // Unknown version labels, by contrast, are planning errors.
    let err = h
        .engine
        .apply_step_by_name("9.9.9", "createTable", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Planning(PlanningError::UnknownVersion(_))
    ));
}

#[tokio::test]
async fn single_step_dispatch_honors_the_ledger() {
    let h = harness(release_scenario());

    let first = h
        .engine
        .apply_step_by_name("5.8.0-b1", "createTable", false)
        .await
        .unwrap();
    assert_eq!(first, StepDispatch::Applied);

    let second = h
        .engine
        .apply_step_by_name("5.8.0-b1", "createTable", false)
        .await
        .unwrap();
    assert_eq!(second, StepDispatch::AlreadyApplied);

    let undo = h
        .engine
        .apply_step_by_name("5.8.0-b1", "createTable", true)
        .await
        .unwrap();
    assert_eq!(undo, StepDispatch::Reverted);
    assert!(!h.ledger.is_applied(ENV, "5.8.0-b1", "createTable").await.unwrap());
}

#[tokio::test]
async fn undo_of_an_unapplied_step_touches_nothing() {
    let h = harness(release_scenario());

    let dispatch = h
        .engine
        .apply_step_by_name("5.8.0-b1", "createTable", true)
        .await
        .unwrap();
    assert_eq!(dispatch, StepDispatch::NothingToUndo);

    // No revert ran and no rolled_back row exists without a completed one.
    assert!(h.recorder.calls().is_empty());
    assert!(h.ledger.entries().is_empty());
}

#[tokio::test]
async fn cancellation_is_honored_at_step_boundaries() {
    static TOKEN: OnceLock<CancelToken> = OnceLock::new();

    let mut registry = Registry::new(order(&["6.0.0"]));
    let cancelling_step = Step::reversible(
        "longBackfill",
        |ctx| async move {
            // Simulate an operator hitting Ctrl-C while this step runs.
            TOKEN.get().unwrap().cancel();
            ctx.schema.execute("apply longBackfill", &[]).await.map(|_| ())
        },
        |ctx| async move {
            ctx.schema.execute("revert longBackfill", &[]).await.map(|_| ())
        },
    );
    registry
        .register(
            VersionPlan::new("6.0.0", vec![cancelling_step, tracked_step("addIndex")]).unwrap(),
        )
        .unwrap();

    let h = harness(registry);
    TOKEN.set(h.engine.cancel_token()).ok();

    let report = h.engine.up(None).await.unwrap();
    assert_eq!(report.outcome(), Outcome::Cancelled);
    assert!(report.cancelled);

    // The in-flight step finished and was recorded; the next one never ran.
    assert!(h.ledger.is_applied(ENV, "6.0.0", "longBackfill").await.unwrap());
    assert!(!schema_calls(&h.recorder).contains(&"apply addIndex".to_string()));
}

#[tokio::test]
async fn concurrent_runs_contend_on_the_environment_claim() {
    let h = harness(release_scenario());
    let _held = h.ledger.claim(ENV).await.unwrap();

    let err = h.engine.up(None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ledger(LedgerError::Contention { .. })
    ));
    assert!(h.recorder.calls().is_empty());
}

#[tokio::test]
async fn target_behind_recorded_progress_is_a_planning_error() {
    let h = harness(release_scenario());
    h.engine.up(Some("5.8.0-b1")).await.unwrap();

    let err = h.engine.up(Some("5.7.0-b1")).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Planning(PlanningError::TargetBeforeCurrent { .. })
    ));
}

#[tokio::test]
async fn labels_without_plans_are_empty_plans() {
    // 5.7.0-b1 has no registered plan at all.
    let mut registry = Registry::new(order(&["5.7.0-b1", "5.8.0-b1"]));
    registry
        .register(VersionPlan::new("5.8.0-b1", vec![tracked_step("createTable")]).unwrap())
        .unwrap();

    let h = harness(registry);
    let report = h.engine.up(None).await.unwrap();
    assert_eq!(report.outcome(), Outcome::Done);
    assert_eq!(schema_calls(&h.recorder), ["apply createTable"]);
}

#[tokio::test]
async fn down_reverts_the_most_recent_plan_only() {
    let h = harness(release_scenario());
    h.engine.up(None).await.unwrap();

    let report = h.engine.down("5.7.0-b1").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.version, "5.8.0-b1");
    assert_eq!(
        report.reverted,
        ["seedPermission", "addColumn", "createTable"]
    );

    // 5.7.0-b1 is untouched and is the current version again.
    assert!(h.ledger.is_applied(ENV, "5.7.0-b1", "initSchema").await.unwrap());
    assert_eq!(
        h.engine.current_version(ENV).await.unwrap(),
        Some("5.7.0-b1".to_string())
    );
}

#[tokio::test]
async fn down_rejects_anything_but_the_immediate_predecessor() {
    let mut registry = Registry::new(order(&["5.6.0", "5.7.0-b1", "5.8.0-b1"]));
    registry
        .register(VersionPlan::new("5.6.0", vec![tracked_step("base")]).unwrap())
        .unwrap();
    registry
        .register(VersionPlan::new("5.7.0-b1", vec![tracked_step("mid")]).unwrap())
        .unwrap();
    registry
        .register(VersionPlan::new("5.8.0-b1", vec![tracked_step("top")]).unwrap())
        .unwrap();

    let h = harness(registry);
    h.engine.up(None).await.unwrap();

    let err = h.engine.down("5.6.0").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Planning(PlanningError::NotImmediatePredecessor { .. })
    ));

    let fresh = harness(release_scenario());
    let err = fresh.engine.down("5.7.0-b1").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Planning(PlanningError::NothingApplied)
    ));
}

#[tokio::test]
async fn status_reports_applied_partial_and_pending() {
    let h = harness(release_scenario());
    h.ledger
        .record_completed(ENV, "5.7.0-b1", "initSchema")
        .await
        .unwrap();
    h.ledger
        .record_completed(ENV, "5.8.0-b1", "createTable")
        .await
        .unwrap();

    let status = h.engine.status().await.unwrap();
    assert_eq!(status.current_version, Some("5.7.0-b1".to_string()));
    assert_eq!(status.plans[0].state, PlanState::Applied);
    assert_eq!(status.plans[1].state, PlanState::Partial);
    assert_eq!(status.plans[1].completed_steps, 1);
    assert_eq!(status.plans[1].total_steps, 3);

    // And it serializes for --format json.
    let json = serde_json::to_string(&status).unwrap();
    assert!(json.contains("\"partial\""));
}

#[tokio::test]
async fn preview_lists_pending_steps_without_side_effects() {
    let h = harness(release_scenario());
    h.ledger
        .record_completed(ENV, "5.7.0-b1", "initSchema")
        .await
        .unwrap();

    let pending = h.engine.preview(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, "5.8.0-b1");
    assert_eq!(pending[0].1, ["createTable", "addColumn", "seedPermission"]);
    assert!(h.recorder.calls().is_empty());
}
