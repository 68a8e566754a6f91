//! Tool registry for name-based dispatch.

use bond_types::{Tool, ToolDefinition, ToolError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of available tools, supporting name-based dispatch.
///
/// Registration goes through `&self` so a registry can be shared behind an
/// `Arc` with the MCP client that falls back to it.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with all built-in tools.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.insert(Arc::new(super::CalculatorTool));
        registry
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let mut tools = self.tools.write().unwrap();
        let name = tool.name().to_string();
        if tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered { name });
        }
        tracing::debug!("Registered tool '{}'", name);
        tools.insert(name, tool);
        Ok(())
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn insert(&self, tool: Arc<dyn Tool>) {
        self.tools
            .write()
            .unwrap()
            .insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    /// All registered tools, ordered by name.
    pub fn get_all(&self) -> Vec<Arc<dyn Tool>> {
        let mut all: Vec<Arc<dyn Tool>> = self.tools.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Unregister a tool. Returns `true` if it was present.
    pub fn remove(&self, name: &str) -> bool {
        self.tools.write().unwrap().remove(name).is_some()
    }

    /// Get all tool definitions for sending to a provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.get_all().iter().map(|t| t.definition()).collect()
    }

    /// Execute a tool by name with the given input.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<String, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        tool.execute(input).await
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
