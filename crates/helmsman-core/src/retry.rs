//! Retry policies and the cancellable retry executor.

use crate::context::ExecutionContext;
use crate::error::OrchestrationError;
use crate::failure::{FailureMode, PartialResult};
use async_trait::async_trait;
use helmsman_config::{RetryConfig, RetryStrategy};
use helmsman_protocol::{EventMsg, EventPayload, EventSink, LifecycleStage, ToolExecutionError};
use log::{debug, info, warn};
use rand::Rng;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff: `min(max_delay, base_delay * multiplier^(attempt-1))` plus jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Fraction of the delay randomly added or removed, within 0.0..=1.0.
    pub jitter: f64,
    /// Modes to retry instead of each mode's own retryability.
    pub retryable_modes: Option<Vec<FailureMode>>,
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
            jitter: 0.1,
            retryable_modes: None,
        }
    }
}

impl ExponentialBackoffPolicy {
    /// Delay before the retry that follows `attempt`, without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let raw = self.base_delay.as_secs_f64() * factor;
        let capped = raw.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt).as_secs_f64();
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 || base == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let spread = base * jitter;
        let offset = rand::rng().random_range(-spread..=spread);
        let delay = (base + offset).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

/// Constant delay between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearBackoffPolicy {
    pub fixed_delay: Duration,
    pub max_attempts: u32,
    /// Modes to retry instead of each mode's own retryability.
    pub retryable_modes: Option<Vec<FailureMode>>,
}

impl Default for LinearBackoffPolicy {
    fn default() -> Self {
        Self {
            fixed_delay: Duration::from_secs(2),
            max_attempts: 3,
            retryable_modes: None,
        }
    }
}

/// Closed set of retry strategies.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    ExponentialBackoff(ExponentialBackoffPolicy),
    LinearBackoff(LinearBackoffPolicy),
    NoRetry,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ExponentialBackoff(ExponentialBackoffPolicy::default())
    }
}

impl RetryPolicy {
    /// Build the policy selected by config.
    pub fn from_config(config: &RetryConfig) -> Self {
        match config.strategy {
            RetryStrategy::Exponential => Self::ExponentialBackoff(ExponentialBackoffPolicy {
                base_delay: Duration::from_millis(config.base_delay_ms),
                multiplier: config.multiplier,
                max_delay: Duration::from_millis(config.max_delay_ms),
                max_attempts: config.max_attempts,
                jitter: config.jitter,
                retryable_modes: None,
            }),
            RetryStrategy::Linear => Self::LinearBackoff(LinearBackoffPolicy {
                fixed_delay: Duration::from_millis(config.fixed_delay_ms),
                max_attempts: config.max_attempts,
                retryable_modes: None,
            }),
            RetryStrategy::None => Self::NoRetry,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::ExponentialBackoff(policy) => policy.max_attempts,
            Self::LinearBackoff(policy) => policy.max_attempts,
            Self::NoRetry => 1,
        }
    }

    /// Restrict retries to `modes`, overriding each mode's own retryability.
    ///
    /// Terminal modes are never retried. Has no effect on [`RetryPolicy::NoRetry`].
    pub fn with_retryable_modes(mut self, modes: impl IntoIterator<Item = FailureMode>) -> Self {
        let modes: Vec<FailureMode> = modes.into_iter().collect();
        match &mut self {
            Self::ExponentialBackoff(policy) => policy.retryable_modes = Some(modes),
            Self::LinearBackoff(policy) => policy.retryable_modes = Some(modes),
            Self::NoRetry => {}
        }
        self
    }

    fn retryable_modes(&self) -> Option<&[FailureMode]> {
        match self {
            Self::ExponentialBackoff(policy) => policy.retryable_modes.as_deref(),
            Self::LinearBackoff(policy) => policy.retryable_modes.as_deref(),
            Self::NoRetry => None,
        }
    }

    /// Whether to try again after `attempt` attempts failed with `mode`.
    pub fn should_retry(&self, attempt: u32, mode: FailureMode) -> bool {
        if matches!(self, Self::NoRetry) || mode.is_terminal() || attempt >= self.max_attempts() {
            return false;
        }
        match self.retryable_modes() {
            Some(modes) => modes.contains(&mode),
            None => mode.is_retryable(),
        }
    }

    /// Delay before the attempt that follows `attempt`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::ExponentialBackoff(policy) => policy.jittered(attempt),
            Self::LinearBackoff(policy) => policy.fixed_delay,
            Self::NoRetry => Duration::ZERO,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ExponentialBackoff(_) => "exponential",
            Self::LinearBackoff(_) => "linear",
            Self::NoRetry => "none",
        }
    }
}

/// Suspends the retrying call path between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Runs operations under a [`RetryPolicy`], honoring cancellation.
///
/// Cancellation is observed before every attempt and while waiting out a
/// backoff delay. Work already handed to an operation is not interrupted.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
    events: Option<Arc<dyn EventSink>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        stage: LifecycleStage,
        operation: &str,
        mut op: F,
    ) -> Result<T, OrchestrationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ToolExecutionError>>,
    {
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled(ctx, stage, operation, attempt - 1));
            }
            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{operation} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let mode = FailureMode::classify(&err);
            if !self.policy.should_retry(attempt, mode) {
                debug!(
                    "{operation} giving up (attempt={attempt}, mode={mode}, terminal={})",
                    mode.is_terminal()
                );
                return Err(OrchestrationError::new(
                    stage,
                    mode,
                    ctx,
                    format!("{operation} failed after {attempt} attempt(s): {err}"),
                )
                .with_cause(err)
                .with_attempts(attempt));
            }

            let delay = self.policy.next_delay(attempt);
            warn!(
                "{operation} failed (attempt={attempt}, mode={mode}); retrying in {}ms",
                delay.as_millis()
            );
            if let Some(events) = &self.events {
                events.emit(EventMsg::new(
                    ctx.trace_id(),
                    EventPayload::RetryScheduled {
                        operation: operation.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        failure_mode: mode.to_string(),
                    },
                ));
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(cancelled(ctx, stage, operation, attempt));
                }
                _ = self.sleeper.sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Run every step in order, stopping at the first unrecoverable failure.
    ///
    /// On failure the error carries a [`PartialResult`] with completed outputs.
    pub async fn execute_steps<S, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        stage: LifecycleStage,
        steps: &[S],
        run: F,
    ) -> Result<Vec<Value>, OrchestrationError>
    where
        S: Clone,
        F: FnMut(usize, S, u32) -> Fut,
        Fut: Future<Output = Result<Value, ToolExecutionError>>,
    {
        let partial = PartialResult::pending(steps.len());
        let done = self.run_steps(ctx, stage, steps, partial, run).await?;
        Ok(done.outputs().into_iter().map(|(_, v)| v.clone()).collect())
    }

    /// Resume the pending and failed steps of `partial`.
    ///
    /// Completed steps are never re-run. A result that is not recoverable is
    /// rejected without running anything.
    pub async fn execute_from_partial<S, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        stage: LifecycleStage,
        steps: &[S],
        partial: PartialResult,
        run: F,
    ) -> Result<Vec<Value>, OrchestrationError>
    where
        S: Clone,
        F: FnMut(usize, S, u32) -> Fut,
        Fut: Future<Output = Result<Value, ToolExecutionError>>,
    {
        if !partial.is_recoverable() {
            let mode = partial.failure_mode().unwrap_or(FailureMode::AgentState);
            return Err(OrchestrationError::new(
                stage,
                mode,
                ctx,
                "partial result is not recoverable",
            )
            .with_partial(partial));
        }
        info!(
            "resuming from partial result (trace_id={}, completed={}, remaining={})",
            ctx.trace_id(),
            partial.completed_steps().len(),
            partial.resumable_steps().len()
        );
        let done = self.run_steps(ctx, stage, steps, partial, run).await?;
        Ok(done.outputs().into_iter().map(|(_, v)| v.clone()).collect())
    }

    async fn run_steps<S, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        stage: LifecycleStage,
        steps: &[S],
        mut partial: PartialResult,
        mut run: F,
    ) -> Result<PartialResult, OrchestrationError>
    where
        S: Clone,
        F: FnMut(usize, S, u32) -> Fut,
        Fut: Future<Output = Result<Value, ToolExecutionError>>,
    {
        for idx in partial.resumable_steps() {
            let Some(step) = steps.get(idx) else {
                return Err(OrchestrationError::new(
                    stage,
                    FailureMode::AgentState,
                    ctx,
                    format!("partial result references missing step {idx}"),
                )
                .with_partial(partial));
            };
            partial.reset(idx);
            let label = format!("step {idx}");
            let outcome = self
                .execute(ctx, stage, &label, |attempt| run(idx, step.clone(), attempt))
                .await;
            match outcome {
                Ok(output) => partial.complete(idx, output),
                Err(err) => {
                    partial.fail(idx, err.failure_mode, err.message.clone());
                    return Err(err.with_partial(partial));
                }
            }
        }
        Ok(partial)
    }
}

fn cancelled(
    ctx: &ExecutionContext,
    stage: LifecycleStage,
    operation: &str,
    attempts: u32,
) -> OrchestrationError {
    info!("{operation} cancelled (trace_id={})", ctx.trace_id());
    OrchestrationError::new(
        stage,
        FailureMode::UserCancelled,
        ctx,
        format!("{operation} cancelled"),
    )
    .with_attempts(attempts)
}
