//! Golden-signal aggregation across orchestration runs.

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// One dispatched step as seen by metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool: String,
    pub failed: bool,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, failed: bool) -> Self {
        Self {
            tool: tool.into(),
            failed,
        }
    }
}

/// Measurements from a single run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSample {
    pub trace_id: String,
    pub success: bool,
    pub duration: Duration,
    pub cost_spent: f64,
    /// The run was rejected for budget, or spent past its cost ceiling.
    pub budget_exceeded: bool,
    pub calls: Vec<ToolCall>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionSample {
    pub fn new(trace_id: impl Into<String>, success: bool, duration: Duration) -> Self {
        Self {
            trace_id: trace_id.into(),
            success,
            duration,
            cost_spent: 0.0,
            budget_exceeded: false,
            calls: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_cost(mut self, cost_spent: f64, budget_exceeded: bool) -> Self {
        self.cost_spent = cost_spent;
        self.budget_exceeded = budget_exceeded;
        self
    }

    pub fn with_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.calls = calls;
        self
    }
}

/// Aggregated view over every recorded run.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetricsSummary {
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub mean_latency_ms: f64,
    pub total_steps: usize,
    pub mean_steps_per_execution: f64,
    pub total_budget_used: f64,
    pub mean_budget_per_execution: f64,
    pub budget_exceeded_count: usize,
    pub tool_call_count: u64,
    pub tool_error_count: u64,
    pub tool_success_rate: f64,
    pub tool_calls: BTreeMap<String, u64>,
    pub tool_errors: BTreeMap<String, u64>,
    pub first_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
}

/// Thread-safe collector of [`ExecutionSample`]s.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    samples: Mutex<Vec<ExecutionSample>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: ExecutionSample) {
        debug!(
            "recorded execution (trace_id={}, success={}, duration_ms={}, steps={})",
            sample.trace_id,
            sample.success,
            sample.duration.as_millis(),
            sample.calls.len()
        );
        self.samples.lock().push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn samples(&self) -> Vec<ExecutionSample> {
        self.samples.lock().clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return MetricsSummary::default();
        }
        let total = samples.len();
        let successful = samples.iter().filter(|s| s.success).count();

        let mut latencies: Vec<f64> = samples
            .iter()
            .map(|s| s.duration.as_micros() as f64 / 1_000.0)
            .collect();
        latencies.sort_by(f64::total_cmp);

        let mut tool_calls: BTreeMap<String, u64> = BTreeMap::new();
        let mut tool_errors: BTreeMap<String, u64> = BTreeMap::new();
        for call in samples.iter().flat_map(|s| &s.calls) {
            *tool_calls.entry(call.tool.clone()).or_default() += 1;
            if call.failed {
                *tool_errors.entry(call.tool.clone()).or_default() += 1;
            }
        }
        let tool_call_count: u64 = tool_calls.values().sum();
        let tool_error_count: u64 = tool_errors.values().sum();
        let total_steps: usize = samples.iter().map(|s| s.calls.len()).sum();
        let total_budget_used: f64 = samples.iter().map(|s| s.cost_spent).sum();

        MetricsSummary {
            total_executions: total,
            successful_executions: successful,
            failed_executions: total - successful,
            success_rate: successful as f64 / total as f64,
            error_rate: (total - successful) as f64 / total as f64,
            latency_p50_ms: percentile(&latencies, 0.50),
            latency_p95_ms: percentile(&latencies, 0.95),
            latency_p99_ms: percentile(&latencies, 0.99),
            mean_latency_ms: latencies.iter().sum::<f64>() / total as f64,
            total_steps,
            mean_steps_per_execution: total_steps as f64 / total as f64,
            total_budget_used,
            mean_budget_per_execution: total_budget_used / total as f64,
            budget_exceeded_count: samples.iter().filter(|s| s.budget_exceeded).count(),
            tool_call_count,
            tool_error_count,
            tool_success_rate: if tool_call_count == 0 {
                0.0
            } else {
                (tool_call_count - tool_error_count) as f64 / tool_call_count as f64
            },
            tool_calls,
            tool_errors,
            first_execution: samples.first().map(|s| s.recorded_at),
            last_execution: samples.last().map(|s| s.recorded_at),
        }
    }
}

/// Nearest-rank percentile over sorted, non-empty values.
fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    let rank = ((sorted.len() as f64) * quantile) as usize;
    sorted[rank.min(sorted.len() - 1)]
}
