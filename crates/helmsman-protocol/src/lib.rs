//! Shared types for Helmsman events, tool metadata, and worker errors.

mod tool;

pub use tool::{ToolDescriptor, ToolExecutionError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identifier shared by every record of one logical execution.
pub type TraceId = String;
/// Unique identifier for a plan.
pub type PlanId = Uuid;

/// Orchestrator lifecycle stages in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Initialize,
    Plan,
    Route,
    Execute,
    Aggregate,
    Complete,
    Failed,
    Cancelled,
}

impl LifecycleStage {
    /// Terminal stages end a run and are emitted exactly once.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Plan => "plan",
            Self::Route => "route",
            Self::Execute => "execute",
            Self::Aggregate => "aggregate",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper for events emitted during orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMsg {
    /// Unique id for the event.
    pub id: Uuid,
    /// Trace id of the execution that produced the event.
    pub trace_id: TraceId,
    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,
    /// Event payload content.
    pub payload: EventPayload,
}

impl EventMsg {
    /// Stamp a payload with a fresh id and the current time.
    pub fn new(trace_id: impl Into<TraceId>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id: trace_id.into(),
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All events emitted during orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum EventPayload {
    /// Orchestrator entered a lifecycle stage.
    StageEntered { stage: LifecycleStage },
    /// Planner produced a plan.
    PlanCreated {
        plan_id: PlanId,
        goal: String,
        steps: Vec<String>,
    },
    /// Router assigned a step to a worker.
    RouteDecided {
        step: usize,
        target: String,
        fallback: Option<String>,
        reason: String,
    },
    /// Step was handed to a worker.
    StepStarted {
        step: usize,
        tool: String,
        worker: String,
    },
    /// Step finished successfully.
    StepCompleted { step: usize, result: Value },
    /// Step failed after all recovery attempts.
    StepFailed {
        step: usize,
        failure_mode: String,
        message: String,
    },
    /// A failed attempt will be retried after a delay.
    RetryScheduled {
        operation: String,
        attempt: u32,
        delay_ms: u64,
        failure_mode: String,
    },
    /// A decision could not be written to the audit trail.
    AuditWriteFailed { target: String, message: String },
    /// Run reached a terminal stage.
    Terminal {
        stage: LifecycleStage,
        message: Option<String>,
    },
}

/// Sink interface for orchestrator events.
pub trait EventSink: Send + Sync {
    /// Emit an event to downstream listeners.
    fn emit(&self, event: EventMsg);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: EventMsg) {}
}
