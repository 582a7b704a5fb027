//! Version plans and the steps they contain.
//!
//! A [`VersionPlan`] is an ordered, immutable list of named [`Step`]s for one
//! release label. Plans are declared in code by the embedding product and
//! collected into a [`Registry`] together with the explicit release order.

pub mod releases;

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::adapters::StepContext;
use crate::error::{AdapterError, PlanningError};

pub use releases::ReleaseOrder;

/// A boxed forward or backward operation. Operations receive the adapter
/// handles through the context and never touch infrastructure directly.
pub type StepOp =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<(), AdapterError>> + Send + Sync>;

fn boxed_op<F, Fut>(f: F) -> StepOp
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// The backward half of a step. `NoOp` is a deliberate, auditable "nothing
/// to undo" declaration, distinct from a forgotten revert.
#[derive(Clone)]
pub enum Revert {
    Run(StepOp),
    NoOp,
}

impl Revert {
    pub fn run<F, Fut>(f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
    {
        Self::Run(boxed_op(f))
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// What a revert call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted,
    /// The step declares `Revert::NoOp`. Still recorded in the ledger.
    NothingToUndo,
}

/// A single named forward/backward pair. The name is the ledger key and must
/// never change once a release has shipped.
#[derive(Clone)]
pub struct Step {
    name: String,
    forward: StepOp,
    backward: Revert,
}

impl Step {
    /// A step with an explicit inverse.
    pub fn reversible<F, FFut, B, BFut>(name: impl Into<String>, forward: F, backward: B) -> Self
    where
        F: Fn(StepContext) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = Result<(), AdapterError>> + Send + 'static,
        B: Fn(StepContext) -> BFut + Send + Sync + 'static,
        BFut: Future<Output = Result<(), AdapterError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            forward: boxed_op(forward),
            backward: Revert::run(backward),
        }
    }

    /// A step whose undo is a documented no-op (e.g. a content-only edit
    /// whose table has since been dropped).
    pub fn irreversible<F, FFut>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(StepContext) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = Result<(), AdapterError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            forward: boxed_op(forward),
            backward: Revert::NoOp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_noop_revert(&self) -> bool {
        self.backward.is_noop()
    }

    /// Execute the forward operation. The engine never calls this twice for
    /// a step the ledger already shows as completed.
    pub async fn apply(&self, ctx: &StepContext) -> Result<(), AdapterError> {
        (self.forward)(ctx.clone()).await
    }

    /// Execute the backward operation, best effort. A `NoOp` revert succeeds
    /// immediately and reports [`RevertOutcome::NothingToUndo`].
    pub async fn revert(&self, ctx: &StepContext) -> Result<RevertOutcome, AdapterError> {
        match &self.backward {
            Revert::Run(op) => {
                op(ctx.clone()).await?;
                Ok(RevertOutcome::Reverted)
            }
            Revert::NoOp => Ok(RevertOutcome::NothingToUndo),
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("noop_revert", &self.backward.is_noop())
            .finish()
    }
}

/// The ordered steps for one release label. Step order is declaration order
/// and is part of the contract: later steps may depend on earlier ones.
#[derive(Debug, Clone)]
pub struct VersionPlan {
    version: String,
    steps: Vec<Step>,
}

impl VersionPlan {
    pub fn new(version: impl Into<String>, steps: Vec<Step>) -> Result<Self, PlanningError> {
        let version = version.into();
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name().to_string()) {
                return Err(PlanningError::DuplicateStep {
                    version,
                    step: step.name().to_string(),
                });
            }
        }
        Ok(Self { version, steps })
    }

    /// A plan with zero steps is valid and immediately done.
    pub fn empty(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            steps: Vec::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Unknown names dispatch to nothing: callers treat `None` as a
    /// successful no-op to tolerate code-version skew during rolling deploys.
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.step(name).is_some()
    }
}

/// All registered plans plus the release order that sequences them.
pub struct Registry {
    order: ReleaseOrder,
    plans: HashMap<String, VersionPlan>,
}

impl Registry {
    pub fn new(order: ReleaseOrder) -> Self {
        Self {
            order,
            plans: HashMap::new(),
        }
    }

    /// Register a plan. Its version must appear in the release order and
    /// must not already have a plan.
    pub fn register(&mut self, plan: VersionPlan) -> Result<(), PlanningError> {
        self.order.index_of(plan.version())?;
        if self.plans.contains_key(plan.version()) {
            return Err(PlanningError::DuplicatePlan(plan.version().to_string()));
        }
        self.plans.insert(plan.version().to_string(), plan);
        Ok(())
    }

    pub fn order(&self) -> &ReleaseOrder {
        &self.order
    }

    /// A release label with no registered plan is an empty plan.
    pub fn plan(&self, version: &str) -> Option<&VersionPlan> {
        self.plans.get(version)
    }

    /// Labels from the start of the release order up to and including
    /// `target`, in release order.
    pub fn labels_up_to(&self, target: &str) -> Result<Vec<String>, PlanningError> {
        let idx = self.order.index_of(target)?;
        Ok(self.order.labels()[..=idx].to_vec())
    }
}
