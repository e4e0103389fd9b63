//! Immutable execution context propagated through planning, routing, and execution.
//!
//! Every `with_*` method returns a new context; the receiver is never changed.
//! Nested runs derive a child with [`ExecutionContext::child`], which keeps the
//! trace id and links back to the parent for audit reconstruction.

use crate::error::ContextError;
use chrono::{DateTime, Utc};
use helmsman_protocol::TraceId;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Profile applied when none is requested.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionContext {
    trace_id: TraceId,
    request_id: Option<String>,
    user_intent: Option<String>,
    user_id: Option<String>,
    memory_scope: Option<String>,
    conversation_id: Option<String>,
    session_id: Option<String>,
    profile: String,
    metadata: BTreeMap<String, Value>,
    #[serde(skip)]
    parent: Option<Arc<ExecutionContext>>,
    created_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create a root context for a new logical execution.
    pub fn new(trace_id: impl Into<TraceId>) -> Result<Self, ContextError> {
        let trace_id = trace_id.into();
        if trace_id.trim().is_empty() {
            return Err(ContextError::EmptyTraceId);
        }
        Ok(Self {
            trace_id,
            request_id: None,
            user_intent: None,
            user_id: None,
            memory_scope: None,
            conversation_id: None,
            session_id: None,
            profile: DEFAULT_PROFILE.to_string(),
            metadata: BTreeMap::new(),
            parent: None,
            created_at: Utc::now(),
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn user_intent(&self) -> Option<&str> {
        self.user_intent.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn memory_scope(&self) -> Option<&str> {
        self.memory_scope.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Context this one was derived from by [`child`](Self::child).
    pub fn parent(&self) -> Option<&ExecutionContext> {
        self.parent.as_deref()
    }

    /// Nesting depth; root contexts are 0.
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Iterate parents from nearest to root.
    pub fn ancestors(&self) -> impl Iterator<Item = &ExecutionContext> {
        std::iter::successors(self.parent(), |ctx| ctx.parent())
    }

    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.request_id = Some(request_id.into());
        next
    }

    pub fn with_user_intent(&self, user_intent: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.user_intent = Some(user_intent.into());
        next
    }

    pub fn with_user_id(&self, user_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.user_id = Some(user_id.into());
        next
    }

    /// Scope memory access; requires `user_id` to be set first.
    pub fn with_memory_scope(&self, memory_scope: impl Into<String>) -> Result<Self, ContextError> {
        if self.user_id.is_none() {
            return Err(ContextError::MemoryScopeWithoutUser);
        }
        let mut next = self.clone();
        next.memory_scope = Some(memory_scope.into());
        Ok(next)
    }

    pub fn with_session_id(&self, session_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.session_id = Some(session_id.into());
        next
    }

    /// Attach a conversation; requires `session_id` to be set first.
    pub fn with_conversation_id(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<Self, ContextError> {
        if self.session_id.is_none() {
            return Err(ContextError::ConversationWithoutSession);
        }
        let mut next = self.clone();
        next.conversation_id = Some(conversation_id.into());
        Ok(next)
    }

    pub fn with_profile(&self, profile: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.profile = profile.into();
        next
    }

    pub fn with_metadata(&self, key: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }

    /// Derive a context for nested orchestration.
    ///
    /// The child inherits every field, keeps the same trace id, and points at
    /// a snapshot of `self`. The link only exists for audit reconstruction.
    pub fn child(&self) -> Self {
        let mut next = self.clone();
        next.parent = Some(Arc::new(self.clone()));
        next.created_at = Utc::now();
        next
    }
}
