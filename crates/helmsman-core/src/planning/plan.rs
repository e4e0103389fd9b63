use super::budget::ToolBudget;
use crate::error::PlanningError;
use chrono::{DateTime, Utc};
use helmsman_protocol::{PlanId, TraceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Plan lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningStage {
    Created,
    Routed,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl PlanningStage {
    pub const ALL: [PlanningStage; 6] = [
        Self::Created,
        Self::Routed,
        Self::Executing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stages reachable in one transition.
    pub fn next_stages(self) -> &'static [PlanningStage] {
        match self {
            Self::Created => &[Self::Routed, Self::Failed, Self::Cancelled],
            Self::Routed => &[Self::Executing],
            Self::Executing => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: PlanningStage) -> bool {
        self.next_stages().contains(&next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Routed => "routed",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PlanningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub tool: String,
    pub input: Value,
    pub estimated_cost: f64,
    pub estimated_tokens: u64,
    /// Why the planner picked this tool.
    #[serde(default)]
    pub reason: String,
    /// Filled in after routing.
    #[serde(default)]
    pub assigned_worker: Option<String>,
}

impl PlanStep {
    pub fn new(index: usize, tool: impl Into<String>, input: Value) -> Self {
        Self {
            index,
            tool: tool.into(),
            input,
            estimated_cost: 0.0,
            estimated_tokens: 0,
            reason: String::new(),
            assigned_worker: None,
        }
    }

    pub fn with_cost(mut self, estimated_cost: f64) -> Self {
        self.estimated_cost = estimated_cost;
        self
    }

    pub fn with_tokens(mut self, estimated_tokens: u64) -> Self {
        self.estimated_tokens = estimated_tokens;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Ordered, budgeted steps derived from a goal.
///
/// Plans are values: stage changes go through the planning authority and
/// produce a new plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    plan_id: PlanId,
    trace_id: TraceId,
    goal: String,
    profile: String,
    steps: Vec<PlanStep>,
    budget: ToolBudget,
    stage: PlanningStage,
    created_at: DateTime<Utc>,
    routed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Build a plan in the `Created` stage. Step indices are renumbered in order.
    pub fn new(
        trace_id: impl Into<TraceId>,
        goal: impl Into<String>,
        profile: impl Into<String>,
        steps: Vec<PlanStep>,
        budget: ToolBudget,
    ) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| PlanStep { index, ..step })
            .collect();
        Self {
            plan_id: Uuid::new_v4(),
            trace_id: trace_id.into(),
            goal: goal.into(),
            profile: profile.into(),
            steps,
            budget,
            stage: PlanningStage::Created,
            created_at: Utc::now(),
            routed_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn budget(&self) -> &ToolBudget {
        &self.budget
    }

    pub fn stage(&self) -> PlanningStage {
        self.stage
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn routed_at(&self) -> Option<DateTime<Utc>> {
        self.routed_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn estimated_total_cost(&self) -> f64 {
        self.steps.iter().map(|step| step.estimated_cost).sum()
    }

    pub fn estimated_total_tokens(&self) -> u64 {
        self.steps.iter().map(|step| step.estimated_tokens).sum()
    }

    /// Whether the estimates fit within every ceiling.
    pub fn budget_sufficient(&self) -> bool {
        self.budget
            .check_ceilings(
                self.estimated_total_cost(),
                self.steps.len(),
                self.estimated_total_tokens(),
            )
            .is_ok()
    }

    /// Bind a step to a worker. Only allowed before the plan is routed.
    pub fn with_assigned_worker(
        &self,
        index: usize,
        worker: impl Into<String>,
    ) -> Result<Plan, PlanningError> {
        if self.stage != PlanningStage::Created {
            return Err(PlanningError::AssignmentClosed(self.stage));
        }
        if index >= self.steps.len() {
            return Err(PlanningError::UnknownStep(index));
        }
        let mut next = self.clone();
        next.steps[index].assigned_worker = Some(worker.into());
        Ok(next)
    }

    pub(crate) fn with_stage(&self, stage: PlanningStage, at: DateTime<Utc>) -> Plan {
        let mut next = self.clone();
        next.stage = stage;
        match stage {
            PlanningStage::Created => {}
            PlanningStage::Routed => next.routed_at = Some(at),
            PlanningStage::Executing => next.started_at = Some(at),
            PlanningStage::Completed | PlanningStage::Failed | PlanningStage::Cancelled => {
                next.completed_at = Some(at)
            }
        }
        next
    }
}
