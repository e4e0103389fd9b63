//! Plan construction, budget validation, and the plan state machine.
//!
//! `PlanningAuthority` holds no per-plan state. Every plan it creates and every
//! stage change it applies is written to the audit trail before it is returned.

mod budget;
mod plan;
mod ranking;

pub use budget::ToolBudget;
pub use plan::{Plan, PlanStep, PlanningStage};

use crate::audit::{AuditTrail, DecisionRecord, DecisionType};
use crate::error::{BudgetError, PlanningError, TransitionError};
use crate::registry::ToolCatalog;
use chrono::Utc;
use helmsman_config::{MAX_PLAN_STEPS, MIN_PLAN_STEPS, PlanningConfig};
use log::{debug, info, warn};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Per-call restrictions on plan shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanConstraints {
    /// Overrides the authority's default step limit; still clamped.
    pub max_steps: Option<usize>,
    /// When set, only these tools are eligible.
    pub allowed_tools: Option<BTreeSet<String>>,
    pub denied_tools: BTreeSet<String>,
}

impl PlanConstraints {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn allow<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn deny<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    fn permits(&self, tool_id: &str) -> bool {
        !self.denied_tools.contains(tool_id)
            && self
                .allowed_tools
                .as_ref()
                .is_none_or(|allowed| allowed.contains(tool_id))
    }
}

/// Builds budgeted plans and owns their stage transitions.
pub struct PlanningAuthority {
    catalog: Arc<dyn ToolCatalog>,
    audit: Arc<AuditTrail>,
    default_max_steps: usize,
    min_steps: usize,
    max_steps: usize,
}

impl PlanningAuthority {
    pub fn new(catalog: Arc<dyn ToolCatalog>, audit: Arc<AuditTrail>) -> Self {
        Self::from_config(catalog, audit, &PlanningConfig::default())
    }

    pub fn from_config(
        catalog: Arc<dyn ToolCatalog>,
        audit: Arc<AuditTrail>,
        config: &PlanningConfig,
    ) -> Self {
        info!(
            "initializing planning authority (max_steps={})",
            config.max_steps
        );
        Self {
            catalog,
            audit,
            default_max_steps: config.max_steps,
            min_steps: MIN_PLAN_STEPS,
            max_steps: MAX_PLAN_STEPS,
        }
    }

    /// Replace the clamp range applied to step limits.
    pub fn with_step_bounds(mut self, min_steps: usize, max_steps: usize) -> Self {
        self.min_steps = min_steps.max(1);
        self.max_steps = max_steps.max(self.min_steps);
        self
    }

    /// Step limit after clamping to the configured range.
    pub fn effective_max_steps(&self, constraints: &PlanConstraints) -> usize {
        let requested = constraints.max_steps.unwrap_or(self.default_max_steps);
        let clamped = requested.clamp(self.min_steps, self.max_steps);
        if clamped != requested {
            warn!(
                "max_steps {} clamped to {} (range {}..={})",
                requested, clamped, self.min_steps, self.max_steps
            );
        }
        clamped
    }

    /// Rank catalog tools against `goal` and build a plan from the best matches.
    ///
    /// Identical inputs and catalog contents always yield the same step sequence.
    pub fn create_plan(
        &self,
        goal: &str,
        trace_id: &str,
        profile: &str,
        budget: ToolBudget,
        constraints: &PlanConstraints,
    ) -> Result<Plan, PlanningError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(PlanningError::EmptyGoal);
        }
        let max_steps = self.effective_max_steps(constraints);
        let goal_terms = ranking::terms(goal);
        let eligible: Vec<_> = self
            .catalog
            .descriptors()
            .into_iter()
            .filter(|tool| tool.allows_profile(profile) && constraints.permits(&tool.id))
            .collect();
        let candidate_count = eligible.len();
        let mut ranked = ranking::rank_tools(&goal_terms, eligible);
        if ranked.is_empty() {
            return Err(PlanningError::NoMatchingTools {
                goal: goal.to_string(),
                profile: profile.to_string(),
            });
        }
        let dropped: Vec<String> = ranked
            .split_off(max_steps.min(ranked.len()))
            .into_iter()
            .map(|r| r.tool.id)
            .collect();

        let top_score = ranked.first().map(|r| r.score()).unwrap_or(0);
        let steps = ranked
            .into_iter()
            .enumerate()
            .map(|(index, ranked)| {
                let reason = format!(
                    "matched {} goal term(s): {}",
                    ranked.score(),
                    ranked.matched.iter().cloned().collect::<Vec<_>>().join(", ")
                );
                PlanStep::new(index, ranked.tool.id, json!({ "text": goal }))
                    .with_cost(ranked.tool.estimated_cost)
                    .with_tokens(ranked.tool.estimated_tokens)
                    .with_reason(reason)
            })
            .collect::<Vec<_>>();
        let plan = Plan::new(trace_id, goal, profile, steps, budget);
        let tools: Vec<&str> = plan.steps().iter().map(|s| s.tool.as_str()).collect();

        let confidence = top_score as f64 / goal_terms.len().max(1) as f64;
        self.audit.record(
            DecisionRecord::new(
                trace_id,
                DecisionType::Planning,
                PlanningStage::Created.as_str(),
                plan.plan_id().to_string(),
                format!(
                    "selected {} of {} eligible tool(s) for profile `{}`",
                    tools.len(),
                    candidate_count,
                    profile
                ),
            )
            .with_alternatives(dropped)
            .with_confidence(confidence)
            .with_metadata("goal", json!(goal))
            .with_metadata("steps", json!(tools))
            .with_metadata("max_steps", json!(max_steps))
            .with_metadata("estimated_cost", json!(plan.estimated_total_cost()))
            .with_metadata("estimated_tokens", json!(plan.estimated_total_tokens())),
        )?;
        info!(
            "plan created (trace_id={}, plan_id={}, steps={:?})",
            trace_id,
            plan.plan_id(),
            tools
        );
        Ok(plan)
    }

    /// Check plan estimates against its budget ceilings.
    pub fn validate_plan(&self, plan: &Plan) -> Result<(), BudgetError> {
        let result = plan.budget().check_ceilings(
            plan.estimated_total_cost(),
            plan.steps().len(),
            plan.estimated_total_tokens(),
        );
        match &result {
            Ok(()) => debug!(
                "plan within budget (trace_id={}, plan_id={})",
                plan.trace_id(),
                plan.plan_id()
            ),
            Err(err) => warn!(
                "plan over budget (trace_id={}, plan_id={}): {}",
                plan.trace_id(),
                plan.plan_id(),
                err
            ),
        }
        result
    }

    /// Move a plan to `stage`, returning the updated plan.
    ///
    /// Requesting the current stage of a live plan is a no-op and is not
    /// audited. Terminal plans reject every request.
    pub fn transition_to(&self, plan: &Plan, stage: PlanningStage) -> Result<Plan, PlanningError> {
        let from = plan.stage();
        if from.is_terminal() || (from != stage && !from.can_transition_to(stage)) {
            return Err(TransitionError {
                plan_id: plan.plan_id(),
                from,
                to: stage,
                allowed: from.next_stages().to_vec(),
            }
            .into());
        }
        if from == stage {
            debug!(
                "plan already in stage {} (plan_id={})",
                stage,
                plan.plan_id()
            );
            return Ok(plan.clone());
        }

        let next = plan.with_stage(stage, Utc::now());
        self.audit.record(
            DecisionRecord::new(
                plan.trace_id(),
                DecisionType::Planning,
                stage.as_str(),
                plan.plan_id().to_string(),
                format!("{from} -> {stage}"),
            )
            .with_metadata("from", json!(from))
            .with_metadata("to", json!(stage)),
        )?;
        info!(
            "plan transitioned (trace_id={}, plan_id={}, {} -> {})",
            plan.trace_id(),
            plan.plan_id(),
            from,
            stage
        );
        Ok(next)
    }

    /// Like [`transition_to`](Self::transition_to), addressed by trace id.
    pub fn transition_for_trace(
        &self,
        trace_id: &str,
        plan: &Plan,
        stage: PlanningStage,
    ) -> Result<Plan, PlanningError> {
        if plan.trace_id() != trace_id {
            return Err(PlanningError::TraceMismatch {
                plan_id: plan.plan_id(),
                expected: plan.trace_id().to_string(),
                actual: trace_id.to_string(),
            });
        }
        self.transition_to(plan, stage)
    }
}
