//! Closed failure taxonomy and resumable partial results.
//!
//! Every [`FailureMode`] maps to one row of a static property table, so the
//! retryable and terminal flags can never disagree for a given mode.

use helmsman_protocol::ToolExecutionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Origin of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Agent,
    System,
    Resource,
    Policy,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Derived properties of a failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureProfile {
    pub category: FailureCategory,
    pub retryable: bool,
    pub terminal: bool,
    pub partial_results_possible: bool,
    pub severity: FailureSeverity,
}

impl FailureProfile {
    const fn new(
        category: FailureCategory,
        retryable: bool,
        terminal: bool,
        partial_results_possible: bool,
    ) -> Self {
        let severity = if terminal {
            FailureSeverity::Critical
        } else {
            match category {
                FailureCategory::System => FailureSeverity::High,
                FailureCategory::Resource | FailureCategory::Policy => FailureSeverity::Medium,
                FailureCategory::Agent | FailureCategory::User => FailureSeverity::Low,
            }
        };
        Self {
            category,
            retryable,
            terminal,
            partial_results_possible,
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    AgentValidation,
    AgentTimeout,
    AgentLogic,
    AgentContract,
    AgentState,
    SystemNetwork,
    SystemTimeout,
    SystemCrash,
    SystemOom,
    SystemDisk,
    ResourceToolUnavailable,
    ResourceApiUnavailable,
    ResourceMemoryFull,
    ResourceQuota,
    ResourceCircuitOpen,
    PolicySecurity,
    PolicyBudget,
    PolicyAllowlist,
    PolicyRateLimit,
    UserInvalidInput,
    UserCancelled,
    UserPermission,
    PartialToolFailures,
    PartialStepFailures,
    PartialTimeout,
}

use FailureCategory::{Agent, Policy, Resource, System, User};

impl FailureMode {
    pub const ALL: [FailureMode; 25] = [
        Self::AgentValidation,
        Self::AgentTimeout,
        Self::AgentLogic,
        Self::AgentContract,
        Self::AgentState,
        Self::SystemNetwork,
        Self::SystemTimeout,
        Self::SystemCrash,
        Self::SystemOom,
        Self::SystemDisk,
        Self::ResourceToolUnavailable,
        Self::ResourceApiUnavailable,
        Self::ResourceMemoryFull,
        Self::ResourceQuota,
        Self::ResourceCircuitOpen,
        Self::PolicySecurity,
        Self::PolicyBudget,
        Self::PolicyAllowlist,
        Self::PolicyRateLimit,
        Self::UserInvalidInput,
        Self::UserCancelled,
        Self::UserPermission,
        Self::PartialToolFailures,
        Self::PartialStepFailures,
        Self::PartialTimeout,
    ];

    /// Static property row for this mode.
    pub const fn profile(self) -> FailureProfile {
        //                                   category  retry  term   partial
        match self {
            Self::AgentValidation => FailureProfile::new(Agent, false, true, false),
            Self::AgentTimeout => FailureProfile::new(Agent, true, false, true),
            Self::AgentLogic => FailureProfile::new(Agent, false, true, false),
            Self::AgentContract => FailureProfile::new(Agent, false, true, false),
            Self::AgentState => FailureProfile::new(Agent, false, false, false),
            Self::SystemNetwork => FailureProfile::new(System, true, false, false),
            Self::SystemTimeout => FailureProfile::new(System, true, false, true),
            Self::SystemCrash => FailureProfile::new(System, false, true, false),
            Self::SystemOom => FailureProfile::new(System, false, true, false),
            Self::SystemDisk => FailureProfile::new(System, false, false, false),
            Self::ResourceToolUnavailable => FailureProfile::new(Resource, true, false, false),
            Self::ResourceApiUnavailable => FailureProfile::new(Resource, true, false, false),
            Self::ResourceMemoryFull => FailureProfile::new(Resource, false, false, false),
            Self::ResourceQuota => FailureProfile::new(Resource, false, true, true),
            Self::ResourceCircuitOpen => FailureProfile::new(Resource, true, false, false),
            Self::PolicySecurity => FailureProfile::new(Policy, false, true, false),
            Self::PolicyBudget => FailureProfile::new(Policy, false, true, false),
            Self::PolicyAllowlist => FailureProfile::new(Policy, false, true, false),
            Self::PolicyRateLimit => FailureProfile::new(Policy, true, false, false),
            Self::UserInvalidInput => FailureProfile::new(User, false, true, false),
            Self::UserCancelled => FailureProfile::new(User, false, true, false),
            Self::UserPermission => FailureProfile::new(User, false, false, false),
            Self::PartialToolFailures => FailureProfile::new(Agent, false, false, true),
            Self::PartialStepFailures => FailureProfile::new(Agent, false, false, true),
            Self::PartialTimeout => FailureProfile::new(Agent, true, false, true),
        }
    }

    pub const fn category(self) -> FailureCategory {
        self.profile().category
    }

    pub const fn is_retryable(self) -> bool {
        self.profile().retryable
    }

    pub const fn is_terminal(self) -> bool {
        self.profile().terminal
    }

    pub const fn partial_results_possible(self) -> bool {
        self.profile().partial_results_possible
    }

    pub const fn severity(self) -> FailureSeverity {
        self.profile().severity
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentValidation => "agent_validation",
            Self::AgentTimeout => "agent_timeout",
            Self::AgentLogic => "agent_logic",
            Self::AgentContract => "agent_contract",
            Self::AgentState => "agent_state",
            Self::SystemNetwork => "system_network",
            Self::SystemTimeout => "system_timeout",
            Self::SystemCrash => "system_crash",
            Self::SystemOom => "system_oom",
            Self::SystemDisk => "system_disk",
            Self::ResourceToolUnavailable => "resource_tool_unavailable",
            Self::ResourceApiUnavailable => "resource_api_unavailable",
            Self::ResourceMemoryFull => "resource_memory_full",
            Self::ResourceQuota => "resource_quota",
            Self::ResourceCircuitOpen => "resource_circuit_open",
            Self::PolicySecurity => "policy_security",
            Self::PolicyBudget => "policy_budget",
            Self::PolicyAllowlist => "policy_allowlist",
            Self::PolicyRateLimit => "policy_rate_limit",
            Self::UserInvalidInput => "user_invalid_input",
            Self::UserCancelled => "user_cancelled",
            Self::UserPermission => "user_permission",
            Self::PartialToolFailures => "partial_tool_failures",
            Self::PartialStepFailures => "partial_step_failures",
            Self::PartialTimeout => "partial_timeout",
        }
    }

    /// Classify a worker error. Pure: the same error always yields the same mode.
    pub fn classify(error: &ToolExecutionError) -> Self {
        match error {
            ToolExecutionError::Validation(_) => Self::AgentValidation,
            ToolExecutionError::Timeout(_) => Self::AgentTimeout,
            ToolExecutionError::Network(_) => Self::SystemNetwork,
            ToolExecutionError::ToolUnavailable(_) => Self::ResourceToolUnavailable,
            ToolExecutionError::ApiUnavailable(_) => Self::ResourceApiUnavailable,
            ToolExecutionError::RateLimited(_) => Self::PolicyRateLimit,
            ToolExecutionError::QuotaExceeded(_) => Self::ResourceQuota,
            ToolExecutionError::InvalidInput(_) => Self::UserInvalidInput,
            ToolExecutionError::PermissionDenied(_) => Self::UserPermission,
            ToolExecutionError::Cancelled(_) => Self::UserCancelled,
            ToolExecutionError::Crashed(_) => Self::SystemCrash,
            ToolExecutionError::OutOfMemory(_) => Self::SystemOom,
            ToolExecutionError::BudgetExceeded(_) => Self::PolicyBudget,
            ToolExecutionError::Security(_) => Self::PolicySecurity,
            ToolExecutionError::Contract(_) => Self::AgentContract,
            ToolExecutionError::Other(message) => Self::classify_message(message),
        }
    }

    /// Keyword heuristic for untyped error messages.
    pub fn classify_message(message: &str) -> Self {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));
        if has(&["timeout", "timed out"]) {
            Self::SystemTimeout
        } else if has(&["network", "connection"]) {
            Self::SystemNetwork
        } else if has(&["memory", "oom"]) {
            Self::SystemOom
        } else if has(&["permission", "forbidden", "unauthorized"]) {
            Self::UserPermission
        } else if has(&["validation", "invalid"]) {
            Self::AgentValidation
        } else if has(&["rate limit", "quota"]) {
            Self::PolicyRateLimit
        } else if has(&["circuit"]) {
            Self::ResourceCircuitOpen
        } else if has(&["unavailable", "not found"]) {
            Self::ResourceToolUnavailable
        } else {
            Self::AgentLogic
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step inside a partial result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum StepState {
    Pending,
    Completed { output: Value },
    Failed { mode: FailureMode, message: String },
}

/// Work preserved across a failure, keyed by step index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialResult {
    steps: BTreeMap<usize, StepState>,
    failure_mode: Option<FailureMode>,
}

impl PartialResult {
    /// Start with every step pending.
    pub fn pending(step_count: usize) -> Self {
        Self {
            steps: (0..step_count).map(|idx| (idx, StepState::Pending)).collect(),
            failure_mode: None,
        }
    }

    pub fn complete(&mut self, step: usize, output: Value) {
        self.steps.insert(step, StepState::Completed { output });
    }

    /// Record a failed step; the first failure becomes the result's mode.
    pub fn fail(&mut self, step: usize, mode: FailureMode, message: impl Into<String>) {
        self.steps.insert(
            step,
            StepState::Failed {
                mode,
                message: message.into(),
            },
        );
        self.failure_mode.get_or_insert(mode);
    }

    /// Reset a step to pending.
    pub fn reset(&mut self, step: usize) {
        self.steps.insert(step, StepState::Pending);
    }

    pub fn failure_mode(&self) -> Option<FailureMode> {
        self.failure_mode
    }

    pub fn step(&self, step: usize) -> Option<&StepState> {
        self.steps.get(&step)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn completed_steps(&self) -> Vec<usize> {
        self.indices(|state| matches!(state, StepState::Completed { .. }))
    }

    pub fn pending_steps(&self) -> Vec<usize> {
        self.indices(|state| matches!(state, StepState::Pending))
    }

    pub fn failed_steps(&self) -> Vec<usize> {
        self.indices(|state| matches!(state, StepState::Failed { .. }))
    }

    /// Steps that a resume would run, in order.
    pub fn resumable_steps(&self) -> Vec<usize> {
        self.indices(|state| !matches!(state, StepState::Completed { .. }))
    }

    fn indices(&self, predicate: impl Fn(&StepState) -> bool) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|(_, state)| predicate(state))
            .map(|(idx, _)| *idx)
            .collect()
    }

    /// Share of steps completed, from 0.0 to 1.0.
    pub fn completion_ratio(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.completed_steps().len() as f64 / self.steps.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty() && self.resumable_steps().is_empty()
    }

    /// Worth resuming: the failure is retryable and some work already completed.
    ///
    /// A terminal failure on any step makes the whole result unrecoverable.
    pub fn is_recoverable(&self) -> bool {
        let terminal = self.steps.values().any(|state| match state {
            StepState::Failed { mode, .. } => mode.is_terminal(),
            _ => false,
        });
        !terminal
            && self.failure_mode.is_some_and(FailureMode::is_retryable)
            && self.completion_ratio() > 0.0
    }

    /// Outputs of completed steps in step order.
    pub fn outputs(&self) -> Vec<(usize, &Value)> {
        self.steps
            .iter()
            .filter_map(|(idx, state)| match state {
                StepState::Completed { output } => Some((*idx, output)),
                _ => None,
            })
            .collect()
    }

    /// Combine with a later result; `later` wins for every step it mentions.
    pub fn merge(&self, later: &PartialResult) -> PartialResult {
        let mut steps = self.steps.clone();
        for (idx, state) in &later.steps {
            steps.insert(*idx, state.clone());
        }
        let failure_mode = steps.values().find_map(|state| match state {
            StepState::Failed { mode, .. } => Some(*mode),
            _ => None,
        });
        PartialResult {
            steps,
            failure_mode,
        }
    }
}
