use super::traits::{Tool, ToolSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Returned by [`CapabilityRegistry::resolve`] for names that were never registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

/// Fixed catalog of capabilities exposed to the reasoning backend.
///
/// Built once at startup and shared read-only afterwards. Registration order
/// is preserved for [`CapabilityRegistry::specs`] so the backend sees a stable
/// tool list.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration with the same name replaces the
    /// earlier handler but keeps its position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered capability");
        } else {
            self.order.push(name);
        }
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, UnknownCapability> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownCapability(name.to_string()))
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
