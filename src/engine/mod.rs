//! The migration engine: selects pending version plans, executes their
//! steps in order, records each completion in the ledger, and drives scoped
//! best-effort rollback when a step fails.
//!
//! Execution is strictly sequential. Rollback is scoped to the plan that
//! failed; steps of previously completed plans are never auto-reverted, so
//! the blast radius of a failed upgrade is one version increment.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::adapters::StepContext;
use crate::error::{EngineError, LedgerError, PlanningError, RollbackError, StepError};
use crate::ledger::Ledger;
use crate::plan::{Registry, RevertOutcome, VersionPlan};
use crate::progress::PlanReporter;

/// Cooperative cancellation flag, honored at step boundaries only. A
/// half-applied step cannot be safely interrupted, so a pending request
/// takes effect before the next step starts.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum EngineState {
    Idle,
    Planning,
    Running { version: String, step_index: usize },
    RollingBack { version: String },
    Done,
    Failed,
}

/// How one `up` run ended, mapped straight onto the CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All pending plans applied (or nothing was pending).
    Done,
    /// Stopped at a step boundary on operator request; resumable.
    Cancelled,
    /// A step failed and the failing plan was fully rolled back.
    RolledBack,
    /// A step failed and one or more reverts failed too. Operator needed.
    Dirty,
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Done => 0,
            Self::Cancelled | Self::RolledBack => 1,
            Self::Dirty => 2,
        }
    }
}

/// What happened to the plan that failed, including the exact revert
/// bookkeeping the operator needs when rollback itself degraded.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub version: String,
    pub step: String,
    pub error: String,
    /// Steps reverted, in the order the reverts ran (reverse completion order).
    pub reverted: Vec<String>,
    /// Steps whose revert failed, with the failure text. Rollback continued
    /// past each of these.
    pub failed_to_revert: Vec<(String, String)>,
}

impl FailureReport {
    pub fn rollback_clean(&self) -> bool {
        self.failed_to_revert.is_empty()
    }

    /// The terminal [`RollbackError`] when rollback degraded, for callers
    /// that want an error value rather than the report.
    pub fn rollback_error(&self) -> Option<RollbackError> {
        if self.rollback_clean() {
            return None;
        }
        Some(RollbackError {
            version: self.version.clone(),
            failed: self.failed_to_revert.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub environment: String,
    pub target: String,
    /// `(version, step)` pairs applied by this run, in execution order.
    pub applied: Vec<(String, String)>,
    pub cancelled: bool,
    pub failure: Option<FailureReport>,
}

impl MigrationReport {
    pub fn outcome(&self) -> Outcome {
        match &self.failure {
            Some(f) if !f.rollback_clean() => Outcome::Dirty,
            Some(_) => Outcome::RolledBack,
            None if self.cancelled => Outcome::Cancelled,
            None => Outcome::Done,
        }
    }
}

/// Result of `down`: the single most recently applied plan, reverted.
#[derive(Debug)]
pub struct RollbackReport {
    pub environment: String,
    pub version: String,
    pub reverted: Vec<String>,
    pub failed_to_revert: Vec<(String, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed_to_revert.is_empty()
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_clean() { 0 } else { 2 }
    }

    pub fn rollback_error(&self) -> Option<RollbackError> {
        if self.is_clean() {
            return None;
        }
        Some(RollbackError {
            version: self.version.clone(),
            failed: self.failed_to_revert.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Applied,
    Partial,
    Pending,
    /// No steps registered for this release label.
    Empty,
}

#[derive(Debug, Serialize)]
pub struct PlanStatus {
    pub version: String,
    pub state: PlanState,
    pub completed_steps: usize,
    pub total_steps: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub environment: String,
    pub current_version: Option<String>,
    pub plans: Vec<PlanStatus>,
}

/// Result of dispatching a single step by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDispatch {
    Applied,
    AlreadyApplied,
    Reverted,
    NothingToUndo,
    /// The name is not in the plan. Deliberately a successful no-op so that
    /// version skew between deployed code and requested steps cannot crash
    /// a rolling deploy.
    Unknown,
}

pub struct MigrationEngine {
    registry: Registry,
    ledger: Arc<dyn Ledger>,
    ctx: StepContext,
    reporter: PlanReporter,
    cancel: CancelToken,
}

impl MigrationEngine {
    pub fn new(registry: Registry, ledger: Arc<dyn Ledger>, ctx: StepContext) -> Self {
        Self {
            registry,
            ledger,
            ctx,
            reporter: PlanReporter::new(false),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: PlanReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// The token the driver wires to its shutdown signal handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn environment(&self) -> &str {
        &self.ctx.environment
    }

    fn transition(&self, state: &mut EngineState, next: EngineState) {
        debug!(from = ?state, to = ?next, "engine transition");
        *state = next;
    }

    /// Apply all pending plans up to `target` (default: latest release).
    /// Holds the single-writer claim for the whole run.
    pub async fn up(&self, target: Option<&str>) -> Result<MigrationReport, EngineError> {
        let environment = self.environment().to_string();
        let Some(target) = target
            .map(str::to_string)
            .or_else(|| self.registry.order().latest().map(str::to_string))
        else {
            // Empty release order: nothing can ever be pending.
            return Ok(MigrationReport {
                environment,
                ..Default::default()
            });
        };

        let token = self.ledger.claim(&environment).await?;
        let result = self.up_inner(&environment, &target).await;
        if let Err(e) = self.ledger.release(&environment, token).await {
            warn!("failed to release environment claim: {e}");
        }
        result
    }

    async fn up_inner(
        &self,
        environment: &str,
        target: &str,
    ) -> Result<MigrationReport, EngineError> {
        let mut state = EngineState::Idle;
        self.transition(&mut state, EngineState::Planning);

        let labels = self.registry.labels_up_to(target)?;
        self.check_target_not_behind(environment, target).await?;

        let mut report = MigrationReport {
            environment: environment.to_string(),
            target: target.to_string(),
            ..Default::default()
        };

        for label in &labels {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let Some(plan) = self.registry.plan(label) else {
                debug!("no plan registered for {label}, treating as empty");
                continue;
            };

            self.run_plan(plan, &mut state, &mut report).await?;
            if report.failure.is_some() || report.cancelled {
                break;
            }
        }

        let final_state = if report.failure.is_some() {
            EngineState::Failed
        } else {
            EngineState::Done
        };
        self.transition(&mut state, final_state);
        Ok(report)
    }

    /// A target behind already-recorded progress is a planning error, not a
    /// rollback request.
    async fn check_target_not_behind(
        &self,
        environment: &str,
        target: &str,
    ) -> Result<(), EngineError> {
        let target_idx = self.registry.order().index_of(target)?;
        for label in &self.registry.order().labels()[target_idx + 1..] {
            let touched = !self
                .ledger
                .completed_steps_for(environment, label)
                .await?
                .is_empty();
            if touched {
                return Err(PlanningError::TargetBeforeCurrent {
                    current: label.clone(),
                    target: target.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn run_plan(
        &self,
        plan: &VersionPlan,
        state: &mut EngineState,
        report: &mut MigrationReport,
    ) -> Result<(), EngineError> {
        let environment = report.environment.clone();
        let version = plan.version().to_string();
        let started = Instant::now();
        let mut applied_here = 0usize;

        for (step_index, step) in plan.steps().iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                self.reporter.cancelled(&version, step.name());
                return Ok(());
            }

            self.transition(
                state,
                EngineState::Running {
                    version: version.clone(),
                    step_index,
                },
            );

            if self
                .ledger
                .is_applied(&environment, &version, step.name())
                .await?
            {
                self.reporter.step_skipped(&version, step.name());
                continue;
            }

            if applied_here == 0 {
                self.reporter.plan_started(&version, plan.steps().len());
            }

            let step_started = Instant::now();
            match step.apply(&self.ctx).await {
                Ok(()) => {
                    self.ledger
                        .record_completed(&environment, &version, step.name())
                        .await?;
                    self.reporter
                        .step_applied(step_index, plan.steps().len(), step.name(), step_started.elapsed());
                    report
                        .applied
                        .push((version.clone(), step.name().to_string()));
                    applied_here += 1;
                }
                Err(cause) => {
                    let error = StepError {
                        version: version.clone(),
                        step: step.name().to_string(),
                        cause,
                    };
                    self.reporter.step_failed(&error);
                    self.transition(
                        state,
                        EngineState::RollingBack {
                            version: version.clone(),
                        },
                    );
                    let failure = self.roll_back_plan(&environment, plan, error).await?;
                    report.failure = Some(failure);
                    return Ok(());
                }
            }
        }

        if applied_here > 0 {
            self.reporter
                .plan_completed(&version, started.elapsed(), applied_here);
        }
        Ok(())
    }

    /// Walk the plan's completed steps in reverse completion order, calling
    /// each revert. Revert failures are collected, never fatal: rollback
    /// always runs to the end of the list.
    async fn roll_back_plan(
        &self,
        environment: &str,
        plan: &VersionPlan,
        error: StepError,
    ) -> Result<FailureReport, LedgerError> {
        let version = plan.version().to_string();
        self.reporter.rollback_started(&version);

        let completed = self.ledger.completed_steps_for(environment, &version).await?;
        let mut reverted = Vec::new();
        let mut failed_to_revert = Vec::new();

        for name in completed.iter().rev() {
            let Some(step) = plan.step(name) else {
                // The ledger knows a step this build does not carry. It
                // cannot be reverted from here; report it and keep going.
                warn!("completed step '{name}' is unknown to this build, cannot revert");
                failed_to_revert.push((name.clone(), "step unknown to this build".to_string()));
                continue;
            };

            match step.revert(&self.ctx).await {
                Ok(outcome) => {
                    self.ledger
                        .record_rolled_back(environment, &version, name)
                        .await?;
                    self.reporter
                        .step_reverted(name, outcome == RevertOutcome::NothingToUndo);
                    reverted.push(name.clone());
                }
                Err(e) => {
                    self.reporter.revert_failed(name, &e.to_string());
                    failed_to_revert.push((name.clone(), e.to_string()));
                }
            }
        }

        Ok(FailureReport {
            version,
            step: error.step.clone(),
            error: error.to_string(),
            reverted,
            failed_to_revert,
        })
    }

    /// Roll back the single most recently applied plan. `to` must name the
    /// immediately preceding release label; deeper rollback is out of scope.
    pub async fn down(&self, to: &str) -> Result<RollbackReport, EngineError> {
        self.registry.order().index_of(to)?;
        let environment = self.environment().to_string();

        let token = self.ledger.claim(&environment).await?;
        let result = self.down_inner(&environment, to).await;
        if let Err(e) = self.ledger.release(&environment, token).await {
            warn!("failed to release environment claim: {e}");
        }
        result
    }

    async fn down_inner(
        &self,
        environment: &str,
        to: &str,
    ) -> Result<RollbackReport, EngineError> {
        let current = self
            .current_version(environment)
            .await?
            .ok_or(PlanningError::NothingApplied)?;

        if self.registry.order().predecessor(&current)? != Some(to) {
            return Err(PlanningError::NotImmediatePredecessor {
                current,
                version: to.to_string(),
            }
            .into());
        }

        // current_version only reports labels with a registered plan.
        let plan = self
            .registry
            .plan(&current)
            .expect("current version has a registered plan");

        self.reporter.rollback_started(&current);
        let completed = self.ledger.completed_steps_for(environment, &current).await?;
        let mut reverted = Vec::new();
        let mut failed_to_revert = Vec::new();

        for name in completed.iter().rev() {
            let Some(step) = plan.step(name) else {
                warn!("completed step '{name}' is unknown to this build, cannot revert");
                failed_to_revert.push((name.clone(), "step unknown to this build".to_string()));
                continue;
            };
            match step.revert(&self.ctx).await {
                Ok(outcome) => {
                    self.ledger
                        .record_rolled_back(environment, &current, name)
                        .await
                        .map_err(EngineError::Ledger)?;
                    self.reporter
                        .step_reverted(name, outcome == RevertOutcome::NothingToUndo);
                    reverted.push(name.clone());
                }
                Err(e) => {
                    self.reporter.revert_failed(name, &e.to_string());
                    failed_to_revert.push((name.clone(), e.to_string()));
                }
            }
        }

        Ok(RollbackReport {
            environment: environment.to_string(),
            version: current,
            reverted,
            failed_to_revert,
        })
    }

    /// The most recent release label whose plan is fully applied here.
    pub async fn current_version(
        &self,
        environment: &str,
    ) -> Result<Option<String>, EngineError> {
        for label in self.registry.order().labels().iter().rev() {
            let Some(plan) = self.registry.plan(label) else {
                continue;
            };
            if plan.is_empty() {
                continue;
            }
            if self.fully_applied(environment, plan).await? {
                return Ok(Some(label.clone()));
            }
        }
        Ok(None)
    }

    async fn fully_applied(
        &self,
        environment: &str,
        plan: &VersionPlan,
    ) -> Result<bool, EngineError> {
        let done: HashSet<String> = self
            .ledger
            .completed_steps_for(environment, plan.version())
            .await?
            .into_iter()
            .collect();
        Ok(plan.steps().iter().all(|s| done.contains(s.name())))
    }

    /// Per-plan applied/partial/pending view for `status`.
    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        let environment = self.environment().to_string();
        let mut plans = Vec::new();

        for label in self.registry.order().labels() {
            let status = match self.registry.plan(label) {
                None => PlanStatus {
                    version: label.clone(),
                    state: PlanState::Empty,
                    completed_steps: 0,
                    total_steps: 0,
                },
                Some(plan) if plan.is_empty() => PlanStatus {
                    version: label.clone(),
                    state: PlanState::Empty,
                    completed_steps: 0,
                    total_steps: 0,
                },
                Some(plan) => {
                    let done: HashSet<String> = self
                        .ledger
                        .completed_steps_for(&environment, label)
                        .await?
                        .into_iter()
                        .collect();
                    let completed = plan
                        .steps()
                        .iter()
                        .filter(|s| done.contains(s.name()))
                        .count();
                    let total = plan.steps().len();
                    let state = if completed == total {
                        PlanState::Applied
                    } else if completed > 0 {
                        PlanState::Partial
                    } else {
                        PlanState::Pending
                    };
                    PlanStatus {
                        version: label.clone(),
                        state,
                        completed_steps: completed,
                        total_steps: total,
                    }
                }
            };
            plans.push(status);
        }

        Ok(StatusReport {
            environment: environment.clone(),
            current_version: self.current_version(&environment).await?,
            plans,
        })
    }

    /// Pending `(version, step)` work up to `target`, read-only. Backs
    /// `up --dry-run`.
    pub async fn preview(
        &self,
        target: Option<&str>,
    ) -> Result<Vec<(String, Vec<String>)>, EngineError> {
        let environment = self.environment().to_string();
        let Some(target) = target
            .map(str::to_string)
            .or_else(|| self.registry.order().latest().map(str::to_string))
        else {
            return Ok(Vec::new());
        };

        let mut pending = Vec::new();
        for label in self.registry.labels_up_to(&target)? {
            let Some(plan) = self.registry.plan(&label) else {
                continue;
            };
            let mut steps = Vec::new();
            for step in plan.steps() {
                if !self
                    .ledger
                    .is_applied(&environment, &label, step.name())
                    .await?
                {
                    steps.push(step.name().to_string());
                }
            }
            if !steps.is_empty() {
                pending.push((label, steps));
            }
        }
        Ok(pending)
    }

    /// Dispatch a single named step of a version, forward or backward.
    /// Unknown names (and unregistered plans) succeed without side effects.
    pub async fn apply_step_by_name(
        &self,
        version: &str,
        name: &str,
        undo: bool,
    ) -> Result<StepDispatch, EngineError> {
        self.registry.order().index_of(version)?;
        let environment = self.environment().to_string();

        let Some(step) = self.registry.plan(version).and_then(|p| p.step(name)) else {
            debug!("step '{name}' not declared for {version}, ignoring");
            return Ok(StepDispatch::Unknown);
        };

        if undo {
            // Never append a rolled_back row for a step the ledger does not
            // show as applied; the audit trail stays completed-then-rolled-back.
            if !self.ledger.is_applied(&environment, version, name).await? {
                return Ok(StepDispatch::NothingToUndo);
            }
            let outcome = step.revert(&self.ctx).await.map_err(|cause| StepError {
                version: version.to_string(),
                step: name.to_string(),
                cause,
            })?;
            self.ledger
                .record_rolled_back(&environment, version, name)
                .await?;
            return Ok(match outcome {
                RevertOutcome::Reverted => StepDispatch::Reverted,
                RevertOutcome::NothingToUndo => StepDispatch::NothingToUndo,
            });
        }

        if self.ledger.is_applied(&environment, version, name).await? {
            return Ok(StepDispatch::AlreadyApplied);
        }
        step.apply(&self.ctx).await.map_err(|cause| StepError {
            version: version.to_string(),
            step: name.to_string(),
            cause,
        })?;
        self.ledger
            .record_completed(&environment, version, name)
            .await?;
        Ok(StepDispatch::Applied)
    }
}
