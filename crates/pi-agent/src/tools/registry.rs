//! Tool registry (spec.md §4.C), grounded verbatim in the teacher's
//! `tools/registry.rs::ToolRegistry` shape.

use super::context::Tool;
use parking_lot::Mutex;
use pi_llm::ToolDefinition;
use std::collections::HashMap;
use std::sync::Arc;

/// A registry of callable tools, keyed by name.
///
/// Mutation goes through `&self` (a `parking_lot::Mutex` inside rather than
/// requiring `&mut self`) because spec.md §4.D has extensions register tools
/// into this same registry during `session_start`, after it has already been
/// shared via `Arc` with the scheduler and tool executor.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
        }
    }

    /// Register a tool. Spec.md §4.D: collisions are later-registration-wins;
    /// a collision is logged so a tool silently shadowing another (e.g. two
    /// extensions both registering "bash") is visible in the logs.
    pub fn add(&self, tool: Arc<dyn Tool>) -> &Self {
        let name = tool.name().to_string();
        let mut tools = self.tools.lock();
        if tools.contains_key(&name) {
            tracing::warn!(tool = %name, "tool registration collision: later registration wins");
        }
        tools.insert(name, tool);
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.lock().values().map(|tool| tool.definition()).collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.lock().keys().cloned().collect()
    }
}
