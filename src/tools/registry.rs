use crate::tools::types::ToolError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait that all tool executors implement.
///
/// Executors take the parsed JSON parameters from a tool call and return a
/// JSON-or-string payload for submission back to the run. Failures are
/// recovered by the orchestrator as error-shaped outputs; they never abort
/// the run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool name the assistant calls this executor by.
    fn name(&self) -> &str;

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: Value) -> Result<String, ToolError>;
}

/// Registry mapping tool names to executors. Constructed once at startup and
/// passed into the orchestrator; no shared mutable state.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its own name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
