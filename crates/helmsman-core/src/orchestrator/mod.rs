//! Orchestrator lifecycle: INITIALIZE, PLAN, ROUTE, EXECUTE, AGGREGATE, then
//! exactly one terminal stage.
//!
//! Workers are external. Their errors and panics are classified and wrapped in
//! [`OrchestrationError`]; nothing raw crosses `run`.

mod outcome;
mod worker;

pub use outcome::{OrchestrationOutcome, StepRecord};
pub use worker::{Worker, WorkerRegistry};

use crate::audit::AuditTrail;
use crate::context::ExecutionContext;
use crate::error::{CoreError, OrchestrationError, PlanningError, RoutingError};
use crate::failure::{FailureMode, PartialResult, StepState};
use crate::metrics::{ExecutionSample, MetricsAggregator, ToolCall};
use crate::planning::{Plan, PlanConstraints, PlanStep, PlanningAuthority, PlanningStage, ToolBudget};
use crate::registry::ToolCatalog;
use crate::retry::{RetryExecutor, RetryPolicy, Sleeper};
use crate::routing::{RoutingAuthority, RoutingDecision, RoutingTask};
use futures_util::FutureExt;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use helmsman_config::{ErrorPropagation, HelmsmanConfig};
use helmsman_protocol::{
    EventMsg, EventPayload, EventSink, LifecycleStage, NullEventSink, ToolExecutionError,
};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drives plans through the lifecycle against registered workers.
///
/// Planning and routing authorities may be shared between orchestrators.
pub struct Orchestrator {
    planning: Arc<PlanningAuthority>,
    routing: Arc<RoutingAuthority>,
    workers: WorkerRegistry,
    retry: RetryExecutor,
    propagation: ErrorPropagation,
    max_concurrency: usize,
    events: Arc<dyn EventSink>,
    metrics: Option<Arc<MetricsAggregator>>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    planning: Option<Arc<PlanningAuthority>>,
    routing: Option<Arc<RoutingAuthority>>,
    workers: WorkerRegistry,
    retry_policy: RetryPolicy,
    sleeper: Option<Arc<dyn Sleeper>>,
    propagation: ErrorPropagation,
    max_concurrency: Option<usize>,
    events: Option<Arc<dyn EventSink>>,
    metrics: Option<Arc<MetricsAggregator>>,
    cancel: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn planning(mut self, planning: Arc<PlanningAuthority>) -> Self {
        self.planning = Some(planning);
        self
    }

    pub fn routing(mut self, routing: Arc<RoutingAuthority>) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn workers(mut self, workers: WorkerRegistry) -> Self {
        self.workers = workers;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn error_propagation(mut self, propagation: ErrorPropagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Steps dispatched at once. Values below 1 are raised to 1.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Record one sample per run, successful or not.
    pub fn metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Orchestrator, CoreError> {
        let planning = self
            .planning
            .ok_or(CoreError::MissingComponent("planning authority"))?;
        let routing = self
            .routing
            .ok_or(CoreError::MissingComponent("routing authority"))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(NullEventSink) as Arc<dyn EventSink>);
        let cancel = self.cancel.unwrap_or_default();
        let mut retry = RetryExecutor::new(self.retry_policy)
            .with_cancellation(cancel.clone())
            .with_event_sink(events.clone());
        if let Some(sleeper) = self.sleeper {
            retry = retry.with_sleeper(sleeper);
        }
        let max_concurrency = self.max_concurrency.unwrap_or(1).max(1);
        info!(
            "orchestrator initialized (propagation={:?}, max_concurrency={}, retry={}, workers={})",
            self.propagation,
            max_concurrency,
            retry.policy().name(),
            self.workers.len()
        );
        Ok(Orchestrator {
            planning,
            routing,
            workers: self.workers,
            retry,
            propagation: self.propagation,
            max_concurrency,
            events,
            metrics: self.metrics,
            cancel,
        })
    }
}

/// Stages entered by one run. Finishing consumes it, so a run reports one
/// terminal stage.
struct Lifecycle<'a> {
    ctx: &'a ExecutionContext,
    events: &'a dyn EventSink,
    stages: Vec<LifecycleStage>,
}

impl<'a> Lifecycle<'a> {
    fn new(ctx: &'a ExecutionContext, events: &'a dyn EventSink) -> Self {
        Self {
            ctx,
            events,
            stages: Vec::new(),
        }
    }

    fn current(&self) -> LifecycleStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(LifecycleStage::Initialize)
    }

    fn enter(&mut self, stage: LifecycleStage) {
        debug!(
            "entering stage {} (trace_id={})",
            stage,
            self.ctx.trace_id()
        );
        self.stages.push(stage);
        self.events.emit(EventMsg::new(
            self.ctx.trace_id(),
            EventPayload::StageEntered { stage },
        ));
    }

    fn finish(mut self, stage: LifecycleStage, message: Option<String>) -> Vec<LifecycleStage> {
        self.enter(stage);
        self.events.emit(EventMsg::new(
            self.ctx.trace_id(),
            EventPayload::Terminal { stage, message },
        ));
        self.stages
    }

    fn complete(self) -> Vec<LifecycleStage> {
        info!("orchestration complete (trace_id={})", self.ctx.trace_id());
        self.finish(LifecycleStage::Complete, None)
    }

    fn fail(self, err: OrchestrationError) -> OrchestrationError {
        let terminal = if err.failure_mode == FailureMode::UserCancelled {
            LifecycleStage::Cancelled
        } else {
            LifecycleStage::Failed
        };
        error!(
            "orchestration {} at stage {} (trace_id={}, mode={}): {}",
            terminal, err.stage, err.trace_id, err.failure_mode, err.message
        );
        self.finish(terminal, Some(err.message.clone()));
        err
    }
}

/// Result of dispatching one step.
struct StepRun {
    record: StepRecord,
    error: Option<OrchestrationError>,
}

struct Execution {
    records: Vec<StepRecord>,
    partial: PartialResult,
    halt: Option<OrchestrationError>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Validate `config`, then wire authorities, audit, and retry from it.
    ///
    /// The returned builder already carries `events`; audit failures under
    /// fail-open are reported to the same sink.
    pub fn from_config(
        config: &HelmsmanConfig,
        tools: Arc<dyn ToolCatalog>,
        workers: WorkerRegistry,
        events: Arc<dyn EventSink>,
    ) -> Result<OrchestratorBuilder, CoreError> {
        config.validate()?;
        let audit = Arc::new(AuditTrail::from_config(&config.audit)?.with_event_sink(events.clone()));
        let planning = PlanningAuthority::from_config(tools, audit.clone(), &config.planning);
        let routing = RoutingAuthority::from_config(&config.routing, audit);
        Ok(Self::builder()
            .planning(Arc::new(planning))
            .routing(Arc::new(routing))
            .workers(workers)
            .retry_policy(RetryPolicy::from_config(&config.retry))
            .error_propagation(config.orchestrator.error_propagation)
            .max_concurrency(config.orchestrator.max_concurrency)
            .event_sink(events))
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn error_propagation(&self) -> ErrorPropagation {
        self.propagation
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop dispatching new steps and retries. Running worker calls finish.
    pub fn cancel(&self) {
        info!("orchestrator cancellation requested");
        self.cancel.cancel();
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsAggregator>> {
        self.metrics.as_ref()
    }

    /// Plan, route, execute, and aggregate `goal` under `ctx`.
    pub async fn run(
        &self,
        goal: &str,
        ctx: &ExecutionContext,
        budget: ToolBudget,
        constraints: &PlanConstraints,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        let started = Instant::now();
        let mut tally = Tally::default();
        let result = self.drive(goal, ctx, budget, constraints, &mut tally).await;
        if let Some(metrics) = &self.metrics {
            metrics.record(tally.into_sample(ctx, &result, started));
        }
        result
    }

    async fn drive(
        &self,
        goal: &str,
        ctx: &ExecutionContext,
        budget: ToolBudget,
        constraints: &PlanConstraints,
        tally: &mut Tally,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        let mut lifecycle = Lifecycle::new(ctx, self.events.as_ref());
        lifecycle.enter(LifecycleStage::Initialize);
        info!(
            "orchestration started (trace_id={}, profile={}, depth={})",
            ctx.trace_id(),
            ctx.profile(),
            ctx.depth()
        );
        if self.cancel.is_cancelled() {
            return Err(lifecycle.fail(cancelled(
                LifecycleStage::Initialize,
                ctx,
                "run cancelled before planning",
            )));
        }

        lifecycle.enter(LifecycleStage::Plan);
        let plan = match self.planning.create_plan(
            goal,
            ctx.trace_id(),
            ctx.profile(),
            budget,
            constraints,
        ) {
            Ok(plan) => plan,
            Err(err) => {
                return Err(lifecycle.fail(planning_failure(LifecycleStage::Plan, ctx, err)));
            }
        };
        self.emit(
            ctx,
            EventPayload::PlanCreated {
                plan_id: plan.plan_id(),
                goal: plan.goal().to_string(),
                steps: plan.steps().iter().map(|s| s.tool.clone()).collect(),
            },
        );
        if let Err(err) = self.planning.validate_plan(&plan) {
            self.abandon(&plan, PlanningStage::Failed);
            let failure = OrchestrationError::new(
                LifecycleStage::Plan,
                FailureMode::PolicyBudget,
                ctx,
                err.to_string(),
            )
            .with_cause(err);
            return Err(lifecycle.fail(failure));
        }

        lifecycle.enter(LifecycleStage::Route);
        let (plan, decisions) = match self.route_plan(&plan, ctx) {
            Ok(routed) => routed,
            Err(err) => {
                self.abandon(&plan, PlanningStage::Failed);
                return Err(lifecycle.fail(err));
            }
        };
        let plan = match self.advance(&plan, PlanningStage::Routed, lifecycle.current(), ctx) {
            Ok(plan) => plan,
            Err(err) => {
                self.release_routes(&decisions);
                return Err(lifecycle.fail(err));
            }
        };

        lifecycle.enter(LifecycleStage::Execute);
        let plan = match self.advance(&plan, PlanningStage::Executing, lifecycle.current(), ctx) {
            Ok(plan) => plan,
            Err(err) => {
                self.release_routes(&decisions);
                return Err(lifecycle.fail(err));
            }
        };
        let execution = self.execute_plan(&plan, &decisions, ctx).await;

        lifecycle.enter(LifecycleStage::Aggregate);
        let spent = charge(plan.budget(), plan.steps(), &execution.records);
        tally.observe(&execution.records, &spent);
        let Execution {
            records,
            partial,
            halt,
        } = execution;
        if let Some(err) = halt {
            let stage = if err.failure_mode == FailureMode::UserCancelled {
                PlanningStage::Cancelled
            } else {
                PlanningStage::Failed
            };
            self.abandon(&plan, stage);
            return Err(lifecycle.fail(err.with_partial(partial)));
        }
        if self.propagation == ErrorPropagation::Continue
            && !records.is_empty()
            && records.iter().all(StepRecord::is_failed)
        {
            self.abandon(&plan, PlanningStage::Failed);
            let err = OrchestrationError::new(
                LifecycleStage::Aggregate,
                FailureMode::PartialToolFailures,
                ctx,
                format!("all {} step(s) failed", records.len()),
            )
            .with_partial(partial);
            return Err(lifecycle.fail(err));
        }
        let plan = match self.advance(&plan, PlanningStage::Completed, lifecycle.current(), ctx) {
            Ok(plan) => plan,
            Err(err) => return Err(lifecycle.fail(err)),
        };
        let failed = records.iter().filter(|r| r.is_failed()).count();
        if failed > 0 {
            warn!(
                "orchestration completed with {} failed step(s) (trace_id={})",
                failed,
                ctx.trace_id()
            );
        }
        let stages = lifecycle.complete();
        Ok(OrchestrationOutcome {
            trace_id: ctx.trace_id().to_string(),
            plan,
            steps: records,
            stages,
            budget: spent,
        })
    }

    /// Run `goal` in a child of `parent`. The trace id is unchanged.
    pub async fn run_nested(
        &self,
        goal: &str,
        parent: &ExecutionContext,
        budget: ToolBudget,
        constraints: &PlanConstraints,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        let child = parent.child();
        self.run(goal, &child, budget, constraints).await
    }

    fn route_plan(
        &self,
        plan: &Plan,
        ctx: &ExecutionContext,
    ) -> Result<(Plan, Vec<RoutingDecision>), OrchestrationError> {
        let mut routed = plan.clone();
        let mut decisions = Vec::with_capacity(plan.steps().len());
        for step in plan.steps() {
            let task = RoutingTask::new(format!("step-{}:{}", step.index, step.tool))
                .with_requirements([step.tool.clone()]);
            let candidates = self.workers.candidates_for(&step.tool);
            let decision = match self.routing.route(&task, ctx, &candidates) {
                Ok(decision) => decision,
                Err(err) => {
                    self.release_routes(&decisions);
                    return Err(routing_failure(ctx, err));
                }
            };
            routed = match routed.with_assigned_worker(step.index, decision.target()) {
                Ok(routed) => routed,
                Err(err) => {
                    self.routing.release(decision.target());
                    self.release_routes(&decisions);
                    return Err(planning_failure(LifecycleStage::Route, ctx, err));
                }
            };
            self.emit(
                ctx,
                EventPayload::RouteDecided {
                    step: step.index,
                    target: decision.target().to_string(),
                    fallback: decision.fallback().map(str::to_string),
                    reason: decision.reason().to_string(),
                },
            );
            decisions.push(decision);
        }
        Ok((routed, decisions))
    }

    /// Dispatch steps in order, at most `max_concurrency` at a time.
    ///
    /// Once a halting failure is seen nothing new is dispatched, but steps
    /// already in flight are awaited and folded in.
    async fn execute_plan(
        &self,
        plan: &Plan,
        decisions: &[RoutingDecision],
        ctx: &ExecutionContext,
    ) -> Execution {
        let steps = plan.steps();
        let mut partial = PartialResult::pending(steps.len());
        let mut records: Vec<StepRecord> = steps
            .iter()
            .map(|step| StepRecord::skipped(step.index, step.tool.clone()))
            .collect();
        let mut halt: Option<OrchestrationError> = None;
        let mut in_flight = FuturesUnordered::new();
        let mut next = 0;

        loop {
            while halt.is_none() && next < steps.len() && in_flight.len() < self.max_concurrency {
                if self.cancel.is_cancelled() {
                    halt = Some(cancelled(
                        LifecycleStage::Execute,
                        ctx,
                        format!("run cancelled before step {next}"),
                    ));
                    break;
                }
                in_flight.push(self.execute_step(&steps[next], &decisions[next], ctx));
                next += 1;
            }
            let Some(StepRun { record, error }) = in_flight.next().await else {
                break;
            };
            let index = record.index;
            match &record.state {
                StepState::Completed { output } => partial.complete(index, output.clone()),
                StepState::Failed { mode, message } => partial.fail(index, *mode, message.clone()),
                StepState::Pending => {}
            }
            records[index] = record;

            if let Some(err) = error {
                let halts = self.propagation != ErrorPropagation::Continue
                    || err.failure_mode.is_terminal();
                if halts && halt.is_none() {
                    if !in_flight.is_empty() {
                        info!(
                            "step {} failed; draining {} in-flight step(s) (trace_id={})",
                            index,
                            in_flight.len(),
                            ctx.trace_id()
                        );
                    }
                    halt = Some(err);
                }
            }
        }
        if next < decisions.len() {
            debug!(
                "releasing {} undispatched step(s) (trace_id={})",
                decisions.len() - next,
                ctx.trace_id()
            );
            self.release_routes(&decisions[next..]);
        }
        Execution {
            records,
            partial,
            halt,
        }
    }

    async fn execute_step(
        &self,
        step: &PlanStep,
        decision: &RoutingDecision,
        ctx: &ExecutionContext,
    ) -> StepRun {
        let target = decision.target();
        let label = format!("step {} ({})", step.index, step.tool);
        self.emit(
            ctx,
            EventPayload::StepStarted {
                step: step.index,
                tool: step.tool.clone(),
                worker: target.to_string(),
            },
        );

        let mut worker = target.to_string();
        let mut used_fallback = false;
        let mut attempts = 1;
        let result = match self.propagation {
            ErrorPropagation::Retry => {
                let counter = &mut attempts;
                self.retry
                    .execute(ctx, LifecycleStage::Execute, &label, move |attempt| {
                        *counter = attempt;
                        self.invoke(target, step, ctx)
                    })
                    .await
            }
            propagation => {
                let mut outcome = self.invoke(target, step, ctx).await;
                let failed_mode = outcome.as_ref().err().map(FailureMode::classify);
                if propagation == ErrorPropagation::Fallback {
                    if let (Some(mode), Some(fallback)) = (failed_mode, decision.fallback()) {
                        if !mode.is_terminal() {
                            warn!(
                                "{} failed on {} ({}); trying fallback {}",
                                label, target, mode, fallback
                            );
                            worker = fallback.to_string();
                            used_fallback = true;
                            attempts = 2;
                            outcome = self.invoke(fallback, step, ctx).await;
                        }
                    }
                }
                outcome.map_err(|err| {
                    let mode = FailureMode::classify(&err);
                    OrchestrationError::new(
                        LifecycleStage::Execute,
                        mode,
                        ctx,
                        format!("{label} failed on {worker}: {err}"),
                    )
                    .with_cause(err)
                    .with_attempts(attempts)
                })
            }
        };
        self.routing.release(target);

        match result {
            Ok(output) => {
                debug!(
                    "{} completed on {} (trace_id={}, attempts={})",
                    label,
                    worker,
                    ctx.trace_id(),
                    attempts
                );
                self.emit(
                    ctx,
                    EventPayload::StepCompleted {
                        step: step.index,
                        result: output.clone(),
                    },
                );
                StepRun {
                    record: StepRecord {
                        index: step.index,
                        tool: step.tool.clone(),
                        worker: Some(worker),
                        state: StepState::Completed { output },
                        attempts,
                        used_fallback,
                    },
                    error: None,
                }
            }
            Err(err) => {
                warn!(
                    "{} failed (trace_id={}, mode={}): {}",
                    label,
                    ctx.trace_id(),
                    err.failure_mode,
                    err.message
                );
                self.emit(
                    ctx,
                    EventPayload::StepFailed {
                        step: step.index,
                        failure_mode: err.failure_mode.to_string(),
                        message: err.message.clone(),
                    },
                );
                let attempts = err.attempts.max(attempts);
                StepRun {
                    record: StepRecord {
                        index: step.index,
                        tool: step.tool.clone(),
                        worker: Some(worker),
                        state: StepState::Failed {
                            mode: err.failure_mode,
                            message: err.message.clone(),
                        },
                        attempts,
                        used_fallback,
                    },
                    error: Some(err.with_attempts(attempts)),
                }
            }
        }
    }

    async fn invoke(
        &self,
        worker_id: &str,
        step: &PlanStep,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolExecutionError> {
        let Some(worker) = self.workers.get(worker_id) else {
            return Err(ToolExecutionError::ToolUnavailable(format!(
                "worker `{worker_id}` is not registered"
            )));
        };
        match AssertUnwindSafe(worker.execute(step, ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "worker {} panicked on step {} (trace_id={}): {}",
                    worker_id,
                    step.index,
                    ctx.trace_id(),
                    message
                );
                Err(ToolExecutionError::Crashed(format!(
                    "worker `{worker_id}` panicked: {message}"
                )))
            }
        }
    }

    fn advance(
        &self,
        plan: &Plan,
        stage: PlanningStage,
        at: LifecycleStage,
        ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestrationError> {
        self.planning
            .transition_to(plan, stage)
            .map_err(|err| planning_failure(at, ctx, err))
    }

    /// Move the plan to a terminal stage on the failure path. A second failure
    /// here is logged; the original error is what the caller sees.
    fn abandon(&self, plan: &Plan, stage: PlanningStage) {
        if let Err(err) = self.planning.transition_to(plan, stage) {
            warn!(
                "could not move plan {} to {} (trace_id={}): {}",
                plan.plan_id(),
                stage,
                plan.trace_id(),
                err
            );
        }
    }

    /// Return routing load for steps that will never reach a worker.
    fn release_routes(&self, decisions: &[RoutingDecision]) {
        for decision in decisions {
            self.routing.release(decision.target());
        }
    }

    fn emit(&self, ctx: &ExecutionContext, payload: EventPayload) {
        self.events.emit(EventMsg::new(ctx.trace_id(), payload));
    }
}

/// What a run got through, for metrics.
#[derive(Default)]
struct Tally {
    calls: Vec<ToolCall>,
    spent: Option<ToolBudget>,
}

impl Tally {
    fn observe(&mut self, records: &[StepRecord], spent: &ToolBudget) {
        self.calls = records
            .iter()
            .filter(|record| record.attempts > 0)
            .map(|record| ToolCall::new(record.tool.clone(), record.is_failed()))
            .collect();
        self.spent = Some(spent.clone());
    }

    fn into_sample(
        self,
        ctx: &ExecutionContext,
        result: &Result<OrchestrationOutcome, OrchestrationError>,
        started: Instant,
    ) -> ExecutionSample {
        let rejected = matches!(result, Err(err) if err.failure_mode == FailureMode::PolicyBudget);
        let (cost, over) = match &self.spent {
            Some(spent) => (spent.cost_spent(), spent.cost_spent() > spent.cost_ceiling()),
            None => (0.0, false),
        };
        ExecutionSample::new(ctx.trace_id(), result.is_ok(), started.elapsed())
            .with_cost(cost, rejected || over)
            .with_calls(self.calls)
    }
}

/// Charge one call per attempt plus the estimates of every dispatched step.
fn charge(budget: &ToolBudget, steps: &[PlanStep], records: &[StepRecord]) -> ToolBudget {
    steps
        .iter()
        .zip(records)
        .filter(|(_, record)| record.attempts > 0)
        .fold(budget.clone(), |spent, (step, record)| {
            (0..record.attempts)
                .fold(spent, |acc, _| acc.with_call())
                .with_cost(step.estimated_cost)
                .with_tokens(step.estimated_tokens)
        })
}

fn cancelled(
    stage: LifecycleStage,
    ctx: &ExecutionContext,
    message: impl Into<String>,
) -> OrchestrationError {
    OrchestrationError::new(stage, FailureMode::UserCancelled, ctx, message)
}

fn planning_failure(
    stage: LifecycleStage,
    ctx: &ExecutionContext,
    err: PlanningError,
) -> OrchestrationError {
    let mode = match &err {
        PlanningError::EmptyGoal => FailureMode::UserInvalidInput,
        PlanningError::NoMatchingTools { .. } => FailureMode::AgentLogic,
        PlanningError::Budget(_) => FailureMode::PolicyBudget,
        PlanningError::Audit(_) => FailureMode::SystemDisk,
        PlanningError::TraceMismatch { .. }
        | PlanningError::Transition(_)
        | PlanningError::UnknownStep(_)
        | PlanningError::AssignmentClosed(_) => FailureMode::AgentState,
    };
    OrchestrationError::new(stage, mode, ctx, err.to_string()).with_cause(err)
}

fn routing_failure(ctx: &ExecutionContext, err: RoutingError) -> OrchestrationError {
    let mode = match &err {
        RoutingError::NoCandidates(_) => FailureMode::ResourceToolUnavailable,
        RoutingError::Audit(_) => FailureMode::SystemDisk,
    };
    OrchestrationError::new(LifecycleStage::Route, mode, ctx, err.to_string()).with_cause(err)
}
