//! Tool metadata catalog consumed by the planner.

use helmsman_protocol::ToolDescriptor;
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source of candidate tool metadata for planning.
pub trait ToolCatalog: Send + Sync {
    /// Every known tool, ordered by id.
    fn descriptors(&self) -> Vec<ToolDescriptor>;
}

/// In-memory catalog keyed by tool id.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<BTreeMap<String, ToolDescriptor>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a tool by id.
    pub fn register(&self, tool: ToolDescriptor) {
        debug!("registering tool (id={})", tool.id);
        self.tools.write().insert(tool.id.clone(), tool);
    }

    pub fn unregister(&self, id: &str) -> Option<ToolDescriptor> {
        self.tools.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl FromIterator<ToolDescriptor> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = ToolDescriptor>>(iter: I) -> Self {
        let registry = ToolRegistry::new();
        for tool in iter {
            registry.register(tool);
        }
        registry
    }
}

impl ToolCatalog for ToolRegistry {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.read().values().cloned().collect()
    }
}

impl ToolCatalog for Vec<ToolDescriptor> {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut tools = self.clone();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }
}
