//! Helmsman orchestration core.
//!
//! Turns a goal into a budgeted [`Plan`], routes each step to a [`Worker`],
//! executes under a retry and failure policy, and records every planning and
//! routing decision in an [`AuditTrail`].

pub mod audit;
pub mod context;
pub mod error;
pub mod failure;
pub mod metrics;
pub mod orchestrator;
pub mod planning;
pub mod registry;
pub mod retry;
pub mod routing;

pub use audit::{AuditBackend, AuditQuery, AuditTrail, DecisionRecord, DecisionType};
pub use context::{DEFAULT_PROFILE, ExecutionContext};
pub use error::{
    AuditError, BudgetDimension, BudgetError, BudgetOverrun, ContextError, CoreError,
    OrchestrationError, PlanningError, RoutingError, TransitionError,
};
pub use failure::{
    FailureCategory, FailureMode, FailureProfile, FailureSeverity, PartialResult, StepState,
};
pub use metrics::{ExecutionSample, MetricsAggregator, MetricsSummary, ToolCall};
pub use orchestrator::{
    OrchestrationOutcome, Orchestrator, OrchestratorBuilder, StepRecord, Worker, WorkerRegistry,
};
pub use planning::{
    Plan, PlanConstraints, PlanStep, PlanningAuthority, PlanningStage, ToolBudget,
};
pub use registry::{ToolCatalog, ToolRegistry};
pub use retry::{
    ExponentialBackoffPolicy, LinearBackoffPolicy, RetryExecutor, RetryPolicy, Sleeper,
    TokioSleeper,
};
pub use routing::{
    RoutingAuthority, RoutingCandidate, RoutingDecision, RoutingPolicy, RoutingTask,
};
