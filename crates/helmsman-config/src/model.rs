//! Configuration schema for Helmsman.

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest step count a plan may be truncated to.
pub const MIN_PLAN_STEPS: usize = 1;
/// Largest step count a plan may be truncated to.
pub const MAX_PLAN_STEPS: usize = 50;

/// Directory under the home directory holding Helmsman state.
pub const DEFAULT_STATE_DIR: &str = ".helmsman";
/// Default audit log filename for file-backed trails.
pub const DEFAULT_AUDIT_FILE: &str = "audit.jsonl";
/// Default audit database filename for SQLite trails.
pub const DEFAULT_AUDIT_DB: &str = "audit.db";

/// Root config for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HelmsmanConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub planning: PlanningConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl HelmsmanConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> HelmsmanConfigBuilder {
        HelmsmanConfigBuilder::new()
    }
}

/// Builder for assembling a `HelmsmanConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct HelmsmanConfigBuilder {
    config: HelmsmanConfig,
}

impl HelmsmanConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: HelmsmanConfig::default(),
        }
    }

    /// Replace the planning configuration.
    pub fn planning(mut self, planning: PlanningConfig) -> Self {
        self.config.planning = planning;
        self
    }

    /// Replace the routing configuration.
    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.config.routing = routing;
        self
    }

    /// Replace the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Replace the audit configuration.
    pub fn audit(mut self, audit: AuditConfig) -> Self {
        self.config.audit = audit;
        self
    }

    /// Replace the orchestrator configuration.
    pub fn orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.config.orchestrator = orchestrator;
        self
    }

    /// Finalize and return the built `HelmsmanConfig`.
    pub fn build(self) -> HelmsmanConfig {
        self.config
    }
}

/// Planner settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanningConfig {
    /// Requested upper bound on plan length; clamped by the planner.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            budget: BudgetConfig::default(),
        }
    }
}

fn default_max_steps() -> usize {
    10
}

/// Default ceilings applied to new plans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetConfig {
    #[serde(default = "default_cost_ceiling")]
    pub cost_ceiling: f64,
    #[serde(default = "default_call_ceiling")]
    pub call_ceiling: u32,
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cost_ceiling: default_cost_ceiling(),
            call_ceiling: default_call_ceiling(),
            token_ceiling: default_token_ceiling(),
        }
    }
}

fn default_cost_ceiling() -> f64 {
    100.0
}

fn default_call_ceiling() -> u32 {
    50
}

fn default_token_ceiling() -> u64 {
    100_000
}

/// Worker selection strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    #[default]
    RoundRobin,
    CapabilityBased,
    LoadBalanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
}

/// Backoff strategy for retried steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    Exponential,
    Linear,
    None,
}

/// Retry and backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: RetryStrategy,
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Constant delay used by the linear strategy.
    #[serde(default = "default_fixed_delay_ms")]
    pub fixed_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            fixed_delay_ms: default_fixed_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_fixed_delay_ms() -> u64 {
    2_000
}

/// Storage used for the decision audit log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackendKind {
    #[default]
    Jsonl,
    Sqlite,
    Memory,
}

/// Behavior when an audit write fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditFailureMode {
    /// Abort the decision.
    #[default]
    FailClosed,
    /// Apply the decision and raise an alarm.
    FailOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AuditConfig {
    #[serde(default)]
    pub backend: AuditBackendKind,
    /// Location of the log; defaults under `~/.helmsman`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub on_failure: AuditFailureMode,
}

impl AuditConfig {
    /// Resolve the storage location for durable backends.
    ///
    /// Returns `None` for the in-memory backend or when no home directory exists.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if self.backend == AuditBackendKind::Memory {
            return None;
        }
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        let filename = match self.backend {
            AuditBackendKind::Sqlite => DEFAULT_AUDIT_DB,
            _ => DEFAULT_AUDIT_FILE,
        };
        BaseDirs::new().map(|dirs| dirs.home_dir().join(DEFAULT_STATE_DIR).join(filename))
    }
}

/// How step failures propagate through a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPropagation {
    /// Stop dispatching on the first failure.
    #[default]
    FailFast,
    /// Retry failed steps under the retry policy.
    Retry,
    /// Retry once against the routed fallback worker.
    Fallback,
    /// Record the failure and keep going.
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub error_propagation: ErrorPropagation,
    /// Steps dispatched at once; 1 runs sequentially.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            error_propagation: ErrorPropagation::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    1
}
