//! Append-only audit trail of routing and planning decisions.
//!
//! Records are stamped with non-decreasing timestamps under a single lock, so
//! write order and timestamp order agree for every trail. Storage is one of a
//! fixed set of backends selected at construction.

mod jsonl;
mod memory;
mod sqlite;

pub use jsonl::JsonlAuditLog;
pub use memory::MemoryAuditLog;
pub use sqlite::SqliteAuditStore;

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use helmsman_config::{AuditBackendKind, AuditConfig, AuditFailureMode};
use helmsman_protocol::{EventMsg, EventPayload, EventSink, TraceId};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Kind of decision being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Routing,
    Planning,
}

impl DecisionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Planning => "planning",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = AuditError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "routing" => Ok(Self::Routing),
            "planning" => Ok(Self::Planning),
            other => Err(AuditError::Corrupt(format!("unknown decision type `{other}`"))),
        }
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    id: Uuid,
    timestamp: DateTime<Utc>,
    trace_id: TraceId,
    decision_type: DecisionType,
    stage: String,
    target: String,
    reason: String,
    #[serde(default)]
    alternatives: Vec<String>,
    confidence: f64,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl DecisionRecord {
    pub fn new(
        trace_id: impl Into<TraceId>,
        decision_type: DecisionType,
        stage: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            trace_id: trace_id.into(),
            decision_type,
            stage: stage.into(),
            target: target.into(),
            reason: reason.into(),
            alternatives: Vec::new(),
            confidence: 1.0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives = alternatives.into_iter().map(Into::into).collect();
        self
    }

    /// Confidence is clamped to 0.0..=1.0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn decision_type(&self) -> DecisionType {
        self.decision_type
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

/// Filter for [`AuditTrail::query`]; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub trace_id: Option<TraceId>,
    pub decision_type: Option<DecisionType>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_trace(trace_id: impl Into<TraceId>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            ..Self::default()
        }
    }

    pub fn of_type(decision_type: DecisionType) -> Self {
        Self {
            decision_type: Some(decision_type),
            ..Self::default()
        }
    }

    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, decision_type: DecisionType) -> Self {
        self.decision_type = Some(decision_type);
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<TraceId>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn matches(&self, record: &DecisionRecord) -> bool {
        self.trace_id
            .as_deref()
            .is_none_or(|trace| record.trace_id == trace)
            && self
                .decision_type
                .is_none_or(|kind| record.decision_type == kind)
            && self.since.is_none_or(|since| record.timestamp >= since)
            && self.until.is_none_or(|until| record.timestamp <= until)
    }
}

/// Storage behind an [`AuditTrail`].
pub enum AuditBackend {
    /// Append-only JSONL file, fsynced per record.
    Jsonl(JsonlAuditLog),
    /// SQLite table, one transaction per record.
    Sqlite(SqliteAuditStore),
    /// Process-local vector.
    Memory(MemoryAuditLog),
}

impl AuditBackend {
    /// Open the backend of the given kind; durable kinds require a path.
    pub fn open(kind: AuditBackendKind, path: Option<&Path>) -> Result<Self, AuditError> {
        match kind {
            AuditBackendKind::Memory => Ok(Self::Memory(MemoryAuditLog::default())),
            AuditBackendKind::Jsonl => {
                let path = path.ok_or(AuditError::MissingPath(kind))?;
                Ok(Self::Jsonl(JsonlAuditLog::open(path)?))
            }
            AuditBackendKind::Sqlite => {
                let path = path.ok_or(AuditError::MissingPath(kind))?;
                Ok(Self::Sqlite(SqliteAuditStore::open(path)?))
            }
        }
    }

    pub fn kind(&self) -> AuditBackendKind {
        match self {
            Self::Jsonl(_) => AuditBackendKind::Jsonl,
            Self::Sqlite(_) => AuditBackendKind::Sqlite,
            Self::Memory(_) => AuditBackendKind::Memory,
        }
    }

    fn append(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        match self {
            Self::Jsonl(log) => log.append(record),
            Self::Sqlite(store) => store.append(record),
            Self::Memory(log) => {
                log.append(record);
                Ok(())
            }
        }
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<DecisionRecord>, AuditError> {
        match self {
            Self::Jsonl(log) => log.query(query),
            Self::Sqlite(store) => store.query(query),
            Self::Memory(log) => Ok(log.query(query)),
        }
    }

    /// Newest timestamp already stored, if any.
    fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, AuditError> {
        match self {
            Self::Jsonl(log) => log.latest_timestamp(),
            Self::Sqlite(store) => store.latest_timestamp(),
            Self::Memory(log) => Ok(log.latest_timestamp()),
        }
    }
}

/// Shared, queryable decision log.
pub struct AuditTrail {
    backend: AuditBackend,
    on_failure: AuditFailureMode,
    /// Last stamped timestamp; held across each append.
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
    failed_writes: AtomicU64,
    events: Option<Arc<dyn EventSink>>,
}

impl AuditTrail {
    /// Wrap a backend with fail-closed semantics.
    ///
    /// Timestamps continue from the newest record already in the backend.
    pub fn new(backend: AuditBackend) -> Self {
        let latest = backend.latest_timestamp().unwrap_or_else(|err| {
            warn!(
                "could not read latest audit timestamp (backend={:?}): {}",
                backend.kind(),
                err
            );
            None
        });
        info!(
            "initializing audit trail (backend={:?}, latest={:?})",
            backend.kind(),
            latest
        );
        Self {
            backend,
            on_failure: AuditFailureMode::FailClosed,
            last_timestamp: Mutex::new(latest),
            failed_writes: AtomicU64::new(0),
            events: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(AuditBackend::Memory(MemoryAuditLog::default()))
    }

    /// Open the backend and failure mode described by config.
    pub fn from_config(config: &AuditConfig) -> Result<Self, AuditError> {
        let path = config.resolved_path();
        let backend = AuditBackend::open(config.backend, path.as_deref())?;
        Ok(Self::new(backend).with_failure_mode(config.on_failure))
    }

    pub fn with_failure_mode(mut self, on_failure: AuditFailureMode) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn backend_kind(&self) -> AuditBackendKind {
        self.backend.kind()
    }

    pub fn failure_mode(&self) -> AuditFailureMode {
        self.on_failure
    }

    /// Writes lost under fail-open since the trail was created.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Append a decision and return it as stored.
    ///
    /// The record is durable when this returns `Ok`, except under fail-open
    /// where a failed write is counted and reported instead of returned.
    pub fn record(&self, record: DecisionRecord) -> Result<DecisionRecord, AuditError> {
        let mut last = self.last_timestamp.lock();
        let mut record = record;
        if let Some(previous) = *last {
            if record.timestamp < previous {
                record.timestamp = previous;
            }
        }
        match self.backend.append(&record) {
            Ok(()) => {
                *last = Some(record.timestamp);
                debug!(
                    "audit record written (trace_id={}, type={}, target={})",
                    record.trace_id, record.decision_type, record.target
                );
                Ok(record)
            }
            Err(err) => match self.on_failure {
                AuditFailureMode::FailClosed => {
                    error!(
                        "audit write failed; rejecting decision (trace_id={}, target={}): {}",
                        record.trace_id, record.target, err
                    );
                    Err(err)
                }
                AuditFailureMode::FailOpen => {
                    let failures = self.failed_writes.fetch_add(1, Ordering::Relaxed) + 1;
                    error!(
                        "audit write failed; applying decision anyway (trace_id={}, target={}, failures={}): {}",
                        record.trace_id, record.target, failures, err
                    );
                    if let Some(events) = &self.events {
                        events.emit(EventMsg::new(
                            record.trace_id.clone(),
                            EventPayload::AuditWriteFailed {
                                target: record.target.clone(),
                                message: err.to_string(),
                            },
                        ));
                    }
                    Ok(record)
                }
            },
        }
    }

    /// Matching records in non-decreasing timestamp order, ties in write order.
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<DecisionRecord>, AuditError> {
        let mut records = self.backend.query(query)?;
        records.sort_by_key(|record| record.timestamp);
        Ok(records)
    }

    /// Every record written for a trace.
    pub fn for_trace(&self, trace_id: &str) -> Result<Vec<DecisionRecord>, AuditError> {
        self.query(&AuditQuery::for_trace(trace_id))
    }
}
