use crate::failure::StepState;
use crate::planning::{Plan, ToolBudget};
use helmsman_protocol::{LifecycleStage, TraceId};
use serde::Serialize;
use serde_json::Value;

/// What happened to one plan step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub tool: String,
    /// Worker that produced the final state, if the step was dispatched.
    pub worker: Option<String>,
    pub state: StepState,
    pub attempts: u32,
    pub used_fallback: bool,
}

impl StepRecord {
    pub(crate) fn skipped(index: usize, tool: impl Into<String>) -> Self {
        Self {
            index,
            tool: tool.into(),
            worker: None,
            state: StepState::Pending,
            attempts: 0,
            used_fallback: false,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.state {
            StepState::Completed { output } => Some(output),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, StepState::Failed { .. })
    }
}

/// Aggregate of a finished run, in plan step order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationOutcome {
    pub trace_id: TraceId,
    /// Plan in its terminal stage.
    pub plan: Plan,
    pub steps: Vec<StepRecord>,
    /// Lifecycle stages in the order they were entered.
    pub stages: Vec<LifecycleStage>,
    /// Plan budget after charging every dispatched step.
    pub budget: ToolBudget,
}

impl OrchestrationOutcome {
    /// Outputs of completed steps, in step order.
    pub fn outputs(&self) -> Vec<&Value> {
        self.steps.iter().filter_map(StepRecord::output).collect()
    }

    /// Steps that failed without halting the run.
    pub fn failed_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|s| s.is_failed())
            .map(|s| s.index)
            .collect()
    }

    pub fn terminal_stage(&self) -> Option<LifecycleStage> {
        self.stages.last().copied().filter(|s| s.is_terminal())
    }
}
