//! Error types for the orchestration core.

use crate::context::ExecutionContext;
use crate::failure::{FailureMode, PartialResult};
use crate::planning::PlanningStage;
use helmsman_config::{AuditBackendKind, ConfigError};
use helmsman_protocol::{LifecycleStage, PlanId, TraceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by context construction and derivation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// Trace id was empty or whitespace.
    #[error("trace_id must be non-empty")]
    EmptyTraceId,
    /// A memory scope was set on a context without a user.
    #[error("memory_scope requires user_id")]
    MemoryScopeWithoutUser,
    /// A conversation id was set on a context without a session.
    #[error("conversation_id requires session_id")]
    ConversationWithoutSession,
}

/// Budget dimension that can be overrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetDimension {
    Cost,
    Tokens,
    Calls,
}

impl fmt::Display for BudgetDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cost => "cost",
            Self::Tokens => "tokens",
            Self::Calls => "calls",
        };
        f.write_str(label)
    }
}

/// A single ceiling exceeded by a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetOverrun {
    pub dimension: BudgetDimension,
    /// Remaining allowance for the dimension.
    pub limit: f64,
    /// Amount the plan asks for.
    pub requested: f64,
    /// `requested - limit`.
    pub excess: f64,
}

impl fmt::Display for BudgetOverrun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} exceeds limit {} by {}",
            self.dimension, self.requested, self.limit, self.excess
        )
    }
}

/// Plan estimates exceed one or more budget ceilings.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("plan exceeds budget: {}", join_overruns(.overruns))]
pub struct BudgetError {
    /// Every exceeded ceiling, in cost, tokens, calls order.
    pub overruns: Vec<BudgetOverrun>,
}

impl BudgetError {
    /// Whether the given dimension was exceeded.
    pub fn exceeds(&self, dimension: BudgetDimension) -> bool {
        self.overruns.iter().any(|o| o.dimension == dimension)
    }
}

fn join_overruns(overruns: &[BudgetOverrun]) -> String {
    overruns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Requested plan stage is unreachable from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "plan {plan_id} cannot move from {from} to {to} (valid next stages: {})",
    join_stages(.allowed)
)]
pub struct TransitionError {
    pub plan_id: PlanId,
    pub from: PlanningStage,
    pub to: PlanningStage,
    pub allowed: Vec<PlanningStage>,
}

fn join_stages(stages: &[PlanningStage]) -> String {
    if stages.is_empty() {
        return "none".to_string();
    }
    stages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by the audit trail and its backends.
#[derive(Debug, Error)]
pub enum AuditError {
    /// File IO failed.
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),
    /// Record encoding or decoding failed.
    #[error("audit serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// SQLite statement or transaction failed.
    #[error("audit database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A durable backend was requested without a location.
    #[error("{0:?} audit backend requires a path")]
    MissingPath(AuditBackendKind),
    /// Log file was written by a newer schema.
    #[error("unsupported audit schema version: {0}")]
    UnsupportedSchema(u32),
    /// Stored row could not be decoded.
    #[error("corrupt audit record: {0}")]
    Corrupt(String),
}

/// Errors returned by plan creation, validation, and transitions.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// Goal text was empty.
    #[error("goal must be non-empty")]
    EmptyGoal,
    /// No eligible tool matched the goal.
    #[error("no tool matches goal `{goal}` for profile `{profile}`")]
    NoMatchingTools { goal: String, profile: String },
    /// The plan does not belong to the trace it was addressed with.
    #[error("plan {plan_id} belongs to trace {expected}, not {actual}")]
    TraceMismatch {
        plan_id: PlanId,
        expected: TraceId,
        actual: TraceId,
    },
    /// Plan estimates exceed the budget.
    #[error(transparent)]
    Budget(#[from] BudgetError),
    /// Illegal stage transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Step index outside the plan.
    #[error("plan has no step {0}")]
    UnknownStep(usize),
    /// Workers can only be assigned before the plan is routed.
    #[error("cannot assign workers to a plan in stage {0}")]
    AssignmentClosed(PlanningStage),
    /// Decision could not be audited.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Errors returned by routing.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Candidate list was empty.
    #[error("no candidates available for task `{0}`")]
    NoCandidates(String),
    /// Decision could not be audited.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Errors returned while wiring core components.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid execution context.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Audit backend failed to open.
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// Configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A required component was not supplied.
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

/// Structured failure surfaced by orchestration entry points.
///
/// Worker errors are always wrapped here; callers never see raw worker errors.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed ({failure_mode}) for trace {trace_id}: {message}")]
pub struct OrchestrationError {
    pub stage: LifecycleStage,
    pub failure_mode: FailureMode,
    pub message: String,
    pub trace_id: TraceId,
    /// Context at the point of failure.
    pub context: ExecutionContext,
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    /// Whether resuming from `partial` may succeed.
    pub recoverable: bool,
    pub partial: Option<PartialResult>,
    /// Attempts made by the failing operation.
    pub attempts: u32,
}

impl OrchestrationError {
    pub fn new(
        stage: LifecycleStage,
        failure_mode: FailureMode,
        context: &ExecutionContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            failure_mode,
            message: message.into(),
            trace_id: context.trace_id().to_string(),
            context: context.clone(),
            cause: None,
            recoverable: !failure_mode.is_terminal() && failure_mode.is_retryable(),
            partial: None,
            attempts: 0,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Attach accumulated work; recoverability follows the partial result.
    pub fn with_partial(mut self, partial: PartialResult) -> Self {
        self.recoverable = !self.failure_mode.is_terminal() && partial.is_recoverable();
        self.partial = Some(partial);
        self
    }
}
