use serde::{Deserialize, Serialize};

/// Metadata a tool registry publishes for planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable tool identifier, also used as the ranking tie-breaker.
    pub id: String,
    /// Human readable description used for keyword scoring.
    #[serde(default)]
    pub description: String,
    /// Free-form tags used for keyword scoring.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Profiles allowed to use the tool; empty means every profile.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Declared cost of one invocation.
    #[serde(default)]
    pub estimated_cost: f64,
    /// Declared token usage of one invocation.
    #[serde(default)]
    pub estimated_tokens: u64,
}

impl ToolDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            tags: Vec::new(),
            profiles: Vec::new(),
            estimated_cost: 0.0,
            estimated_tokens: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cost(mut self, estimated_cost: f64) -> Self {
        self.estimated_cost = estimated_cost;
        self
    }

    pub fn with_tokens(mut self, estimated_tokens: u64) -> Self {
        self.estimated_tokens = estimated_tokens;
        self
    }

    /// Whether the tool may be used under the given profile.
    pub fn allows_profile(&self, profile: &str) -> bool {
        self.profiles.is_empty() || self.profiles.iter().any(|p| p == profile)
    }
}

/// Errors raised by workers while executing a step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolExecutionError {
    /// Input failed validation before execution.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Transport or connection failure.
    #[error("network error: {0}")]
    Network(String),
    /// Tool is not registered or currently unavailable.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),
    /// Upstream API is unavailable.
    #[error("api unavailable: {0}")]
    ApiUnavailable(String),
    /// Request was throttled.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Hard quota was exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Caller supplied input the tool cannot accept.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Caller lacks permission for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Execution was cancelled by the caller.
    #[error("cancelled: {0}")]
    Cancelled(String),
    /// The executor crashed.
    #[error("crashed: {0}")]
    Crashed(String),
    /// The executor ran out of memory.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    /// Spending limits were exceeded.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    /// A security policy rejected the call.
    #[error("security violation: {0}")]
    Security(String),
    /// The tool returned output violating its contract.
    #[error("contract violation: {0}")]
    Contract(String),
    /// Untyped failure, classified by message.
    #[error("{0}")]
    Other(String),
}
