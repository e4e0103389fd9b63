//! Worker selection.
//!
//! `RoutingAuthority` delegates to one [`RoutingPolicy`] and writes every
//! decision to the audit trail. One authority may be shared by many
//! orchestrators; the round robin counter is the only shared mutable state.

mod policy;

pub use policy::{
    CapabilityBasedPolicy, LoadBalancedPolicy, RoundRobinPolicy, RoutingPolicy, Selection,
};

use crate::audit::{AuditTrail, DecisionRecord, DecisionType};
use crate::context::ExecutionContext;
use crate::error::RoutingError;
use helmsman_config::RoutingConfig;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A worker eligible for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub id: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl RoutingCandidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Work to be routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTask {
    pub name: String,
    #[serde(default)]
    pub requirements: BTreeSet<String>,
}

impl RoutingTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: BTreeSet::new(),
        }
    }

    pub fn with_requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }
}

/// Chosen worker for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    target: String,
    reason: String,
    fallback: Option<String>,
    strategy: String,
    confidence: f64,
    metadata: BTreeMap<String, Value>,
}

impl RoutingDecision {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Never empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Second choice, usable without consulting the policy again.
    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

pub struct RoutingAuthority {
    policy: RoutingPolicy,
    audit: Arc<AuditTrail>,
}

impl RoutingAuthority {
    pub fn new(policy: RoutingPolicy, audit: Arc<AuditTrail>) -> Self {
        info!("initializing routing authority (strategy={})", policy.name());
        Self { policy, audit }
    }

    pub fn from_config(config: &RoutingConfig, audit: Arc<AuditTrail>) -> Self {
        Self::new(RoutingPolicy::from_config(config.strategy), audit)
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Select a worker for `task` and audit the choice under the context's trace.
    pub fn route(
        &self,
        task: &RoutingTask,
        ctx: &ExecutionContext,
        candidates: &[RoutingCandidate],
    ) -> Result<RoutingDecision, RoutingError> {
        if candidates.is_empty() {
            return Err(RoutingError::NoCandidates(task.name.clone()));
        }
        let selection = self.policy.select(task, candidates);
        let target = candidates[selection.target].id.clone();
        let fallback = selection.fallback.map(|idx| candidates[idx].id.clone());
        let reason = if selection.reason.is_empty() {
            format!("selected by {}", self.policy.name())
        } else {
            selection.reason
        };
        let alternatives: Vec<String> = candidates
            .iter()
            .filter(|c| c.id != target)
            .map(|c| c.id.clone())
            .collect();

        let mut metadata = BTreeMap::new();
        metadata.insert("task".to_string(), json!(task.name));
        metadata.insert("candidates".to_string(), json!(candidates.len()));

        let mut record = DecisionRecord::new(
            ctx.trace_id(),
            DecisionType::Routing,
            "route",
            target.clone(),
            reason.clone(),
        )
        .with_alternatives(alternatives)
        .with_confidence(selection.confidence)
        .with_metadata("strategy", json!(self.policy.name()));
        for (key, value) in &metadata {
            record = record.with_metadata(key.clone(), value.clone());
        }
        if let Some(fallback) = &fallback {
            record = record.with_metadata("fallback", json!(fallback));
        }
        let stored = match self.audit.record(record) {
            Ok(stored) => stored,
            Err(err) => {
                self.policy.release(&target);
                return Err(err.into());
            }
        };

        info!(
            "routed task {} to {} (trace_id={}, strategy={}, fallback={:?})",
            task.name,
            target,
            ctx.trace_id(),
            self.policy.name(),
            fallback
        );
        Ok(RoutingDecision {
            target,
            reason,
            fallback,
            strategy: self.policy.name().to_string(),
            confidence: stored.confidence(),
            metadata,
        })
    }

    /// Report that work routed to `target` has finished.
    pub fn release(&self, target: &str) {
        self.policy.release(target);
    }
}
