use async_trait::async_trait;
use helmsman_core::{ExecutionContext, PlanStep, Worker};
use helmsman_protocol::ToolExecutionError;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Scripted = Result<Value, ToolExecutionError>;

/// Worker that replays queued results per tool and records every call.
///
/// Once a tool's queue is empty the worker answers
/// `{"worker": <id>, "tool": <tool>}`.
pub struct ScriptedWorker {
    id: String,
    capabilities: Vec<String>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: Vec::new(),
            scripts: Mutex::new(HashMap::new()),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
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

    /// Queue the next result for `tool`.
    pub fn then(mut self, tool: impl Into<String>, result: Scripted) -> Self {
        self.scripts
            .get_mut()
            .entry(tool.into())
            .or_default()
            .push_back(result);
        self
    }

    /// Hold every call for `tool` for `delay` before answering.
    pub fn with_delay(mut self, tool: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(tool.into(), delay);
        self
    }

    /// Tools called so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn execute(
        &self,
        step: &PlanStep,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ToolExecutionError> {
        self.calls.lock().push(step.tool.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&step.tool) {
            tokio::time::sleep(*delay).await;
        }
        let scripted = self
            .scripts
            .lock()
            .get_mut(&step.tool)
            .and_then(VecDeque::pop_front);

        self.active.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| Ok(json!({ "worker": self.id, "tool": step.tool })))
    }
}
