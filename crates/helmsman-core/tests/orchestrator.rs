use async_trait::async_trait;
use helmsman_config::{AuditBackendKind, ConfigError, ErrorPropagation, HelmsmanConfig};
use helmsman_core::routing::LoadBalancedPolicy;
use helmsman_core::{
    AuditBackend, AuditQuery, AuditTrail, CoreError, DecisionType, ExecutionContext,
    ExponentialBackoffPolicy, FailureMode, MetricsAggregator, Orchestrator, PlanConstraints, PlanStep,
    PlanningAuthority, PlanningStage, RetryPolicy, RoutingAuthority, RoutingPolicy, ToolBudget,
    Worker, WorkerRegistry,
};
use helmsman_protocol::{EventPayload, LifecycleStage, ToolExecutionError};
use helmsman_test_utils::{RecordingEventSink, RecordingSleeper, ScriptedWorker, sample_tools};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const THREE_STEP_GOAL: &str = "search the web, read the pdf documents, then summarize";

struct Harness {
    orchestrator: Orchestrator,
    routing: Arc<RoutingAuthority>,
    audit: Arc<AuditTrail>,
    events: Arc<RecordingEventSink>,
    metrics: Arc<MetricsAggregator>,
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn harness(
    workers: Vec<Arc<ScriptedWorker>>,
    propagation: ErrorPropagation,
    concurrency: usize,
) -> Harness {
    let workers = workers
        .into_iter()
        .map(|worker| worker as Arc<dyn Worker>)
        .collect();
    let audit = Arc::new(AuditTrail::in_memory());
    let routing = Arc::new(RoutingAuthority::new(RoutingPolicy::default(), audit.clone()));
    harness_with(workers, propagation, concurrency, routing, audit, CancellationToken::new())
}

fn harness_with(
    workers: Vec<Arc<dyn Worker>>,
    propagation: ErrorPropagation,
    concurrency: usize,
    routing: Arc<RoutingAuthority>,
    audit: Arc<AuditTrail>,
    cancel: CancellationToken,
) -> Harness {
    init_logging();
    let events = Arc::new(RecordingEventSink::new());
    let metrics = Arc::new(MetricsAggregator::new());
    let orchestrator = Orchestrator::builder()
        .planning(Arc::new(PlanningAuthority::new(
            Arc::new(sample_tools()),
            audit.clone(),
        )))
        .routing(routing.clone())
        .metrics(metrics.clone())
        .workers(workers.into_iter().collect())
        .error_propagation(propagation)
        .max_concurrency(concurrency)
        .event_sink(events.clone())
        .cancellation(cancel)
        .build()
        .expect("orchestrator");
    Harness {
        orchestrator,
        routing,
        audit,
        events,
        metrics,
    }
}

fn load_balanced(audit: Arc<AuditTrail>) -> Arc<RoutingAuthority> {
    Arc::new(RoutingAuthority::new(
        RoutingPolicy::LoadBalanced(LoadBalancedPolicy::new()),
        audit,
    ))
}

fn in_flight(routing: &RoutingAuthority, worker: &str) -> u64 {
    match routing.policy() {
        RoutingPolicy::LoadBalanced(policy) => policy.load(worker),
        other => panic!("unexpected policy: {other:?}"),
    }
}

/// Cancels the run once `tool` has finished.
struct CancelAfter {
    inner: ScriptedWorker,
    tool: &'static str,
    cancel: CancellationToken,
}

#[async_trait]
impl Worker for CancelAfter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn execute(
        &self,
        step: &PlanStep,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolExecutionError> {
        let result = self.inner.execute(step, ctx).await;
        if step.tool == self.tool {
            self.cancel.cancel();
        }
        result
    }
}

fn ctx(trace: &str) -> ExecutionContext {
    ExecutionContext::new(trace).expect("ctx")
}

#[tokio::test]
async fn budget_overrun_halts_before_execution() {
    let worker = Arc::new(ScriptedWorker::new("w1"));
    let h = harness(vec![worker.clone()], ErrorPropagation::FailFast, 1);

    let err = h
        .orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-budget"),
            ToolBudget::new(10.0, 10, 100_000),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.failure_mode, FailureMode::PolicyBudget);
    assert_eq!(err.stage, LifecycleStage::Plan);
    assert!(err.partial.is_none());
    assert!(err.message.contains("cost 12 exceeds limit 10 by 2"));
    assert_eq!(worker.call_count(), 0);
    assert!(
        h.events
            .payloads()
            .iter()
            .all(|p| !matches!(p, EventPayload::StepStarted { .. }))
    );
    assert_eq!(h.events.terminals(), vec![LifecycleStage::Failed]);

    let stages: Vec<_> = h
        .audit
        .query(&AuditQuery::for_trace("t-budget").with_type(DecisionType::Planning))
        .expect("query")
        .iter()
        .map(|r| r.stage().to_string())
        .collect();
    assert_eq!(stages, vec!["created", "failed"]);
}

#[tokio::test]
async fn fail_fast_drains_in_flight_steps() {
    let worker = Arc::new(
        ScriptedWorker::new("w1")
            .then("read_pdf", Err(ToolExecutionError::Network("reset".into())))
            .with_delay("web_search", Duration::from_millis(50)),
    );
    let h = harness(vec![worker.clone()], ErrorPropagation::FailFast, 2);

    let err = h
        .orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-drain"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.failure_mode, FailureMode::SystemNetwork);
    let partial = err.partial.clone().expect("partial");
    assert_eq!(partial.failed_steps(), vec![0]);
    assert_eq!(partial.completed_steps(), vec![1]);
    assert_eq!(partial.pending_steps(), vec![2]);
    assert!(err.recoverable);
    assert!(!worker.calls().contains(&"summarize".to_string()));
    assert_eq!(h.events.terminals(), vec![LifecycleStage::Failed]);
}

#[tokio::test]
async fn continue_records_failures_and_completes() {
    let worker = Arc::new(
        ScriptedWorker::new("w1")
            .then("read_pdf", Err(ToolExecutionError::ApiUnavailable("503".into()))),
    );
    let h = harness(vec![worker.clone()], ErrorPropagation::Continue, 1);

    let outcome = h
        .orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-continue"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .expect("outcome");

    assert_eq!(outcome.failed_steps(), vec![0]);
    assert_eq!(
        outcome.outputs(),
        vec![
            &json!({ "worker": "w1", "tool": "web_search" }),
            &json!({ "worker": "w1", "tool": "summarize" }),
        ]
    );
    assert_eq!(outcome.plan.stage(), PlanningStage::Completed);
    assert_eq!(outcome.terminal_stage(), Some(LifecycleStage::Complete));
    assert_eq!(worker.calls(), vec!["read_pdf", "web_search", "summarize"]);
}

#[tokio::test]
async fn continue_fails_when_every_step_fails() {
    let worker = Arc::new(
        ScriptedWorker::new("w1")
            .then("summarize", Err(ToolExecutionError::Timeout("slow".into()))),
    );
    let h = harness(vec![worker], ErrorPropagation::Continue, 1);

    let err = h
        .orchestrator
        .run(
            "summarize",
            &ctx("t-all-failed"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.failure_mode, FailureMode::PartialToolFailures);
    assert_eq!(err.stage, LifecycleStage::Aggregate);
    assert!(!err.recoverable);
}

#[tokio::test]
async fn terminal_failure_halts_even_under_continue() {
    let worker = Arc::new(
        ScriptedWorker::new("w1")
            .then("read_pdf", Err(ToolExecutionError::Security("blocked".into()))),
    );
    let h = harness(vec![worker.clone()], ErrorPropagation::Continue, 1);

    let err = h
        .orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-terminal"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.failure_mode, FailureMode::PolicySecurity);
    assert!(!err.recoverable);
    assert_eq!(worker.calls(), vec!["read_pdf"]);
}

#[tokio::test]
async fn fallback_worker_takes_over() {
    let primary = Arc::new(
        ScriptedWorker::new("w1")
            .then("summarize", Err(ToolExecutionError::ToolUnavailable("down".into()))),
    );
    let backup = Arc::new(ScriptedWorker::new("w2"));
    let h = harness(
        vec![primary.clone(), backup.clone()],
        ErrorPropagation::Fallback,
        1,
    );

    let outcome = h
        .orchestrator
        .run(
            "summarize",
            &ctx("t-fallback"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .expect("outcome");
    let step = &outcome.steps[0];
    assert!(step.used_fallback);
    assert_eq!(step.worker.as_deref(), Some("w2"));
    assert_eq!(step.attempts, 2);
    assert_eq!(primary.call_count(), 1);
    assert_eq!(backup.call_count(), 1);
}

#[tokio::test]
async fn retry_propagation_retries_transient_failures() {
    let worker = Arc::new(
        ScriptedWorker::new("w1")
            .then("summarize", Err(ToolExecutionError::Network("reset".into())))
            .then("summarize", Err(ToolExecutionError::Network("reset".into()))),
    );
    let sleeper = Arc::new(RecordingSleeper::new());
    let audit = Arc::new(AuditTrail::in_memory());
    let orchestrator = Orchestrator::builder()
        .planning(Arc::new(PlanningAuthority::new(
            Arc::new(sample_tools()),
            audit.clone(),
        )))
        .routing(Arc::new(RoutingAuthority::new(RoutingPolicy::default(), audit)))
        .workers([worker.clone() as Arc<dyn Worker>].into_iter().collect())
        .error_propagation(ErrorPropagation::Retry)
        .retry_policy(RetryPolicy::ExponentialBackoff(ExponentialBackoffPolicy {
            base_delay: Duration::from_millis(10),
            jitter: 0.0,
            ..ExponentialBackoffPolicy::default()
        }))
        .sleeper(sleeper.clone())
        .build()
        .expect("orchestrator");

    let outcome = orchestrator
        .run(
            "summarize",
            &ctx("t-retry"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .expect("outcome");
    assert_eq!(outcome.steps[0].attempts, 3);
    assert_eq!(outcome.budget.call_spent(), 3);
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
    assert_eq!(worker.call_count(), 3);
}

#[tokio::test]
async fn nested_run_keeps_trace_id() {
    let worker = Arc::new(ScriptedWorker::new("w1"));
    let h = harness(vec![worker], ErrorPropagation::FailFast, 1);
    let parent = ctx("t-nested").with_profile("default");

    let outcome = h
        .orchestrator
        .run_nested(
            "summarize",
            &parent,
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .expect("outcome");
    assert_eq!(outcome.trace_id, "t-nested");
    assert_eq!(outcome.plan.trace_id(), "t-nested");
    assert_eq!(h.events.trace_ids(), vec!["t-nested"]);
    assert_eq!(h.events.terminals(), vec![LifecycleStage::Complete]);

    let records = h.audit.for_trace("t-nested").expect("query");
    let kinds: Vec<_> = records.iter().map(|r| r.decision_type()).collect();
    assert_eq!(
        kinds,
        vec![
            DecisionType::Planning,
            DecisionType::Routing,
            DecisionType::Planning,
            DecisionType::Planning,
            DecisionType::Planning,
        ]
    );
}

#[tokio::test]
async fn concurrent_dispatch_respects_bound_and_order() {
    let worker = Arc::new(
        ScriptedWorker::new("w1")
            .with_delay("read_pdf", Duration::from_millis(30))
            .with_delay("web_search", Duration::from_millis(10))
            .with_delay("summarize", Duration::from_millis(10)),
    );
    let h = harness(vec![worker.clone()], ErrorPropagation::FailFast, 2);

    let outcome = h
        .orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-concurrent"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .expect("outcome");
    let tools: Vec<_> = outcome.steps.iter().map(|s| s.tool.as_str()).collect();
    assert_eq!(tools, vec!["read_pdf", "web_search", "summarize"]);
    assert_eq!(outcome.outputs().len(), 3);
    assert_eq!(worker.peak_concurrency(), 2);
}

#[tokio::test]
async fn shared_router_stays_fair_across_orchestrators() {
    let audit = Arc::new(AuditTrail::in_memory());
    let planning = Arc::new(PlanningAuthority::new(Arc::new(sample_tools()), audit.clone()));
    let routing = Arc::new(RoutingAuthority::new(RoutingPolicy::default(), audit.clone()));
    let workers: WorkerRegistry = ["w1", "w2", "w3"]
        .into_iter()
        .map(|id| Arc::new(ScriptedWorker::new(id)) as Arc<dyn Worker>)
        .collect();
    let build = || {
        Orchestrator::builder()
            .planning(planning.clone())
            .routing(routing.clone())
            .workers(workers.clone())
            .build()
            .expect("orchestrator")
    };
    let (first, second) = (build(), build());

    let (ctx_a, ctx_b) = (ctx("t-a"), ctx("t-b"));
    let (constraints_a, constraints_b) = (PlanConstraints::default(), PlanConstraints::default());
    let (a, b) = tokio::join!(
        first.run(
            THREE_STEP_GOAL,
            &ctx_a,
            ToolBudget::default(),
            &constraints_a
        ),
        second.run(
            THREE_STEP_GOAL,
            &ctx_b,
            ToolBudget::default(),
            &constraints_b
        ),
    );
    let mut counts: HashMap<String, usize> = HashMap::new();
    for outcome in [a.expect("a"), b.expect("b")] {
        for step in outcome.steps {
            *counts.entry(step.worker.expect("worker")).or_default() += 1;
        }
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|count| *count == 2));
}

#[tokio::test]
async fn missing_workers_fail_routing() {
    let h = harness(Vec::new(), ErrorPropagation::FailFast, 1);
    let err = h
        .orchestrator
        .run(
            "summarize",
            &ctx("t-no-workers"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.stage, LifecycleStage::Route);
    assert_eq!(err.failure_mode, FailureMode::ResourceToolUnavailable);
    assert_eq!(h.events.terminals(), vec![LifecycleStage::Failed]);
}

#[tokio::test]
async fn from_config_wires_components() {
    let mut config = HelmsmanConfig::default();
    config.audit.backend = AuditBackendKind::Memory;
    config.orchestrator.error_propagation = ErrorPropagation::Continue;
    let events = Arc::new(RecordingEventSink::new());
    let workers: WorkerRegistry = [Arc::new(ScriptedWorker::new("w1")) as Arc<dyn Worker>]
        .into_iter()
        .collect();

    let orchestrator = Orchestrator::from_config(
        &config,
        Arc::new(sample_tools()),
        workers,
        events.clone(),
    )
    .expect("builder")
    .build()
    .expect("orchestrator");
    assert_eq!(orchestrator.error_propagation(), ErrorPropagation::Continue);

    let outcome = orchestrator
        .run(
            "read pdf",
            &ctx("t-config"),
            ToolBudget::from_config(&config.planning.budget),
            &PlanConstraints::default(),
        )
        .await
        .expect("outcome");
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(events.terminals(), vec![LifecycleStage::Complete]);
}

#[tokio::test]
async fn halted_runs_return_routing_load() {
    let worker = Arc::new(
        (0..3).fold(ScriptedWorker::new("w1"), |worker, _| {
            worker.then("read_pdf", Err(ToolExecutionError::Network("reset".into())))
        }),
    );
    let audit = Arc::new(AuditTrail::in_memory());
    let routing = load_balanced(audit.clone());
    let h = harness_with(
        vec![worker.clone() as Arc<dyn Worker>],
        ErrorPropagation::FailFast,
        1,
        routing,
        audit,
        CancellationToken::new(),
    );

    for run in 0..3 {
        let err = h
            .orchestrator
            .run(
                THREE_STEP_GOAL,
                &ctx(&format!("t-load-{run}")),
                ToolBudget::default(),
                &PlanConstraints::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.failure_mode, FailureMode::SystemNetwork);
        assert_eq!(in_flight(&h.routing, "w1"), 0);
    }
    assert_eq!(worker.calls(), vec!["read_pdf"; 3]);
}

#[tokio::test]
async fn cancellation_between_steps_keeps_completed_work() {
    let cancel = CancellationToken::new();
    let worker = Arc::new(CancelAfter {
        inner: ScriptedWorker::new("w1"),
        tool: "read_pdf",
        cancel: cancel.clone(),
    });
    let audit = Arc::new(AuditTrail::in_memory());
    let routing = load_balanced(audit.clone());
    let h = harness_with(
        vec![worker.clone() as Arc<dyn Worker>],
        ErrorPropagation::FailFast,
        1,
        routing,
        audit,
        cancel,
    );

    let err = h
        .orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-cancel-mid"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.failure_mode, FailureMode::UserCancelled);
    assert_eq!(err.stage, LifecycleStage::Execute);
    let partial = err.partial.clone().expect("partial");
    assert_eq!(partial.completed_steps(), vec![0]);
    assert_eq!(partial.pending_steps(), vec![1, 2]);
    assert_eq!(worker.inner.calls(), vec!["read_pdf"]);
    assert_eq!(h.events.terminals(), vec![LifecycleStage::Cancelled]);
    assert_eq!(in_flight(&h.routing, "w1"), 0);

    let stages: Vec<_> = h
        .audit
        .query(&AuditQuery::for_trace("t-cancel-mid").with_type(DecisionType::Planning))
        .expect("query")
        .iter()
        .map(|r| r.stage().to_string())
        .collect();
    assert_eq!(stages.last().map(String::as_str), Some("cancelled"));
}

#[tokio::test]
async fn routing_failure_returns_load_of_routed_steps() {
    let worker = Arc::new(ScriptedWorker::new("w1").with_capabilities(["read_pdf", "web_search"]));
    let audit = Arc::new(AuditTrail::in_memory());
    let routing = load_balanced(audit.clone());
    let h = harness_with(
        vec![worker.clone() as Arc<dyn Worker>],
        ErrorPropagation::FailFast,
        1,
        routing,
        audit,
        CancellationToken::new(),
    );

    let err = h
        .orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-route-leak"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.failure_mode, FailureMode::ResourceToolUnavailable);
    assert_eq!(err.stage, LifecycleStage::Route);
    assert_eq!(in_flight(&h.routing, "w1"), 0);
    assert_eq!(worker.call_count(), 0);
}

#[tokio::test]
async fn fail_closed_routing_audit_fails_the_run() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("routing.jsonl");
    let routing_audit = Arc::new(AuditTrail::new(
        AuditBackend::open(AuditBackendKind::Jsonl, Some(&path)).expect("open backend"),
    ));
    fs::remove_file(&path).expect("remove log");
    fs::create_dir(&path).expect("block path");

    let worker = Arc::new(ScriptedWorker::new("w1"));
    let h = harness_with(
        vec![worker.clone() as Arc<dyn Worker>],
        ErrorPropagation::FailFast,
        1,
        load_balanced(routing_audit),
        Arc::new(AuditTrail::in_memory()),
        CancellationToken::new(),
    );

    let err = h
        .orchestrator
        .run(
            "summarize",
            &ctx("t-audit-closed"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.failure_mode, FailureMode::SystemDisk);
    assert_eq!(err.stage, LifecycleStage::Route);
    assert_eq!(h.events.terminals(), vec![LifecycleStage::Failed]);
    assert_eq!(in_flight(&h.routing, "w1"), 0);
    assert_eq!(worker.call_count(), 0);
}

#[tokio::test]
async fn runs_are_folded_into_metrics() {
    let worker = Arc::new(
        ScriptedWorker::new("w1")
            .then("read_pdf", Err(ToolExecutionError::ApiUnavailable("503".into()))),
    );
    let h = harness(vec![worker], ErrorPropagation::Continue, 1);

    h.orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-metrics-ok"),
            ToolBudget::default(),
            &PlanConstraints::default(),
        )
        .await
        .expect("outcome");
    h.orchestrator
        .run(
            THREE_STEP_GOAL,
            &ctx("t-metrics-budget"),
            ToolBudget::new(10.0, 10, 100_000),
            &PlanConstraints::default(),
        )
        .await
        .unwrap_err();

    let summary = h.metrics.summary();
    assert_eq!(summary.total_executions, 2);
    assert_eq!(summary.successful_executions, 1);
    assert_eq!(summary.error_rate, 0.5);
    assert_eq!(summary.budget_exceeded_count, 1);
    assert_eq!(summary.total_steps, 3);
    assert_eq!(summary.total_budget_used, 12.0);
    assert_eq!(summary.tool_call_count, 3);
    assert_eq!(summary.tool_errors.get("read_pdf"), Some(&1));
    let traces: Vec<_> = h
        .metrics
        .samples()
        .into_iter()
        .map(|s| s.trace_id)
        .collect();
    assert_eq!(traces, vec!["t-metrics-ok", "t-metrics-budget"]);
}

#[test]
fn from_config_rejects_invalid_retry_settings() {
    let mut config = HelmsmanConfig::default();
    config.audit.backend = AuditBackendKind::Memory;
    config.retry.jitter = f64::NAN;

    match Orchestrator::from_config(
        &config,
        Arc::new(sample_tools()),
        WorkerRegistry::new(),
        Arc::new(RecordingEventSink::new()),
    ) {
        Err(CoreError::Config(ConfigError::InvalidField { path, .. })) => {
            assert_eq!(path, "retry.jitter")
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("invalid config was accepted"),
    }
}
