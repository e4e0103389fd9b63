//! Worker interface and registry.

use crate::context::ExecutionContext;
use crate::planning::PlanStep;
use crate::routing::RoutingCandidate;
use async_trait::async_trait;
use helmsman_protocol::ToolExecutionError;
use log::info;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Executes plan steps on behalf of the orchestrator.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Tool ids this worker accepts. Empty means any tool.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(
        &self,
        step: &PlanStep,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolExecutionError>;
}

/// Shared map of workers keyed by id.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<RwLock<BTreeMap<String, Arc<dyn Worker>>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a worker.
    pub fn register(&self, worker: Arc<dyn Worker>) {
        let id = worker.id().to_string();
        info!("registering worker (worker_id={})", id);
        self.workers.write().insert(id, worker);
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        self.workers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Workers able to run `tool`, in id order.
    pub fn candidates_for(&self, tool: &str) -> Vec<RoutingCandidate> {
        self.workers
            .read()
            .values()
            .filter_map(|worker| {
                let capabilities = worker.capabilities();
                let accepts = capabilities.is_empty() || capabilities.iter().any(|c| c == tool);
                accepts.then(|| {
                    RoutingCandidate::new(worker.id()).with_capabilities(capabilities)
                })
            })
            .collect()
    }
}

impl FromIterator<Arc<dyn Worker>> for WorkerRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Worker>>>(iter: I) -> Self {
        let registry = Self::new();
        for worker in iter {
            registry.register(worker);
        }
        registry
    }
}
