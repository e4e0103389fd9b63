use async_trait::async_trait;
use helmsman_core::{
    ExecutionContext, ExponentialBackoffPolicy, FailureMode, LinearBackoffPolicy, PartialResult,
    RetryExecutor, RetryPolicy, Sleeper,
};
use helmsman_protocol::{LifecycleStage, ToolExecutionError};
use helmsman_test_utils::{RecordingEventSink, RecordingSleeper};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn exponential(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::ExponentialBackoff(ExponentialBackoffPolicy {
        base_delay: Duration::from_millis(100),
        multiplier: 2.0,
        max_delay: Duration::from_secs(5),
        max_attempts,
        jitter: 0.0,
        retryable_modes: None,
    })
}

fn ctx() -> ExecutionContext {
    ExecutionContext::new("t-retry").expect("ctx")
}

#[tokio::test]
async fn succeeds_on_third_attempt_after_two_sleeps() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let events = Arc::new(RecordingEventSink::new());
    let executor = RetryExecutor::new(exponential(3))
        .with_sleeper(sleeper.clone())
        .with_event_sink(events.clone());
    let calls = AtomicU32::new(0);

    let result = executor
        .execute(&ctx(), LifecycleStage::Execute, "fetch", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ToolExecutionError::Network("connection reset".into()))
                } else {
                    Ok(json!("done"))
                }
            }
        })
        .await
        .expect("success");

    assert_eq!(result, json!("done"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let delays = sleeper.delays();
    assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(events.events().len(), 2);
}

#[tokio::test]
async fn terminal_failure_is_not_retried() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let executor = RetryExecutor::new(exponential(5)).with_sleeper(sleeper.clone());
    let err = executor
        .execute(&ctx(), LifecycleStage::Execute, "validate", |_| async {
            Err::<Value, _>(ToolExecutionError::Validation("bad schema".into()))
        })
        .await
        .unwrap_err();
    assert_eq!(err.failure_mode, FailureMode::AgentValidation);
    assert_eq!(err.attempts, 1);
    assert!(!err.recoverable);
    assert_eq!(sleeper.count(), 0);
}

#[tokio::test]
async fn exhausted_attempts_surface_last_failure() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let executor = RetryExecutor::new(RetryPolicy::LinearBackoff(LinearBackoffPolicy {
        fixed_delay: Duration::from_millis(50),
        max_attempts: 3,
        retryable_modes: None,
    }))
    .with_sleeper(sleeper.clone());
    let err = executor
        .execute(&ctx(), LifecycleStage::Execute, "call api", |attempt| async move {
            Err::<Value, _>(ToolExecutionError::RateLimited(format!("attempt {attempt}")))
        })
        .await
        .unwrap_err();
    assert_eq!(err.failure_mode, FailureMode::PolicyRateLimit);
    assert_eq!(err.attempts, 3);
    assert!(err.message.contains("attempt 3"));
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(50); 2]);
}

#[test]
fn exponential_delays_are_monotonic_and_bounded() {
    for base_ms in [1u64, 10, 250, 1_000] {
        for multiplier in [1.0, 1.5, 2.0, 3.0] {
            for max_ms in [base_ms, 5_000, 60_000] {
                let policy = ExponentialBackoffPolicy {
                    base_delay: Duration::from_millis(base_ms),
                    multiplier,
                    max_delay: Duration::from_millis(max_ms),
                    max_attempts: 12,
                    jitter: 0.0,
                    retryable_modes: None,
                };
                let wrapped = RetryPolicy::ExponentialBackoff(policy.clone());
                let delays: Vec<Duration> = (1..=policy.max_attempts)
                    .map(|attempt| wrapped.next_delay(attempt))
                    .collect();
                assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{delays:?}");
                assert!(delays.iter().all(|d| *d <= policy.max_delay));

                let jittered = RetryPolicy::ExponentialBackoff(ExponentialBackoffPolicy {
                    jitter: 0.5,
                    ..policy.clone()
                });
                assert!((1..=12).all(|a| jittered.next_delay(a) <= policy.max_delay));
            }
        }
    }
}

#[tokio::test]
async fn step_failure_preserves_completed_work() {
    let executor = RetryExecutor::new(RetryPolicy::NoRetry);
    let steps = vec!["a", "b", "c"];
    let err = executor
        .execute_steps(&ctx(), LifecycleStage::Execute, &steps, |idx, step, _| async move {
            if idx == 1 {
                Err(ToolExecutionError::Security(format!("{step} blocked")))
            } else {
                Ok(json!(step))
            }
        })
        .await
        .unwrap_err();

    let partial = err.partial.expect("partial result");
    assert_eq!(partial.completed_steps(), vec![0]);
    assert_eq!(partial.failed_steps(), vec![1]);
    assert_eq!(partial.pending_steps(), vec![2]);
    assert_eq!(partial.failure_mode(), Some(FailureMode::PolicySecurity));
    assert!(!partial.is_recoverable());
    assert!(!err.recoverable);
}

#[tokio::test]
async fn resume_runs_only_unfinished_steps() {
    let executor = RetryExecutor::new(RetryPolicy::NoRetry);
    let mut partial = PartialResult::pending(3);
    partial.complete(0, json!("a-done"));
    partial.fail(1, FailureMode::SystemNetwork, "connection reset");
    assert!(partial.is_recoverable());

    let ran = Mutex::new(Vec::new());
    let outputs = executor
        .execute_from_partial(
            &ctx(),
            LifecycleStage::Execute,
            &["a", "b", "c"],
            partial,
            |idx, step, _| {
                ran.lock().push(idx);
                async move { Ok(json!(format!("{step}-done"))) }
            },
        )
        .await
        .expect("resume");

    assert_eq!(*ran.lock(), vec![1, 2]);
    assert_eq!(outputs, vec![json!("a-done"), json!("b-done"), json!("c-done")]);
}

#[tokio::test]
async fn unrecoverable_partial_is_rejected_without_running() {
    let executor = RetryExecutor::new(RetryPolicy::default());
    let mut partial = PartialResult::pending(2);
    partial.fail(0, FailureMode::PolicyBudget, "over budget");

    let ran = AtomicU32::new(0);
    let err = executor
        .execute_from_partial(&ctx(), LifecycleStage::Execute, &[1, 2], partial, |_, _, _| {
            ran.fetch_add(1, Ordering::SeqCst);
            async { Ok(Value::Null) }
        })
        .await
        .unwrap_err();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(err.failure_mode, FailureMode::PolicyBudget);
}

struct CancelOnSleep(CancellationToken);

#[async_trait]
impl Sleeper for CancelOnSleep {
    async fn sleep(&self, _delay: Duration) {
        self.0.cancel();
        std::future::pending::<()>().await;
    }
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let token = CancellationToken::new();
    let executor = RetryExecutor::new(exponential(5))
        .with_cancellation(token.clone())
        .with_sleeper(Arc::new(CancelOnSleep(token)));
    let calls = AtomicU32::new(0);
    let err = executor
        .execute(&ctx(), LifecycleStage::Execute, "fetch", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, _>(ToolExecutionError::Timeout("slow".into())) }
        })
        .await
        .unwrap_err();
    assert_eq!(err.failure_mode, FailureMode::UserCancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
