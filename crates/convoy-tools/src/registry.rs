//! Tool registry.

use crate::BoxedTool;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a registry with all built-in tools. Currently just `bash`; the
    /// registry itself is not limited to one entry, and future tools register
    /// here the same way.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::bash::BashTool));
        registry
    }

    /// Create a registry with all built-in tools, returning an Arc for sharing
    /// across concurrently-running ToolCalls.
    pub fn with_builtins_arc() -> Arc<Self> {
        Arc::new(Self::with_builtins())
    }

    /// Register a tool.
    pub fn register(&mut self, tool: BoxedTool) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    /// Get a tool by ID.
    pub fn get(&self, id: &str) -> Option<&BoxedTool> {
        self.tools.get(id)
    }

    /// List all tool IDs.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get all tools.
    pub fn all(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.values()
    }

    /// Get tools filtered by a predicate.
    pub fn filter<F>(&self, predicate: F) -> Vec<&BoxedTool>
    where
        F: Fn(&str) -> bool,
    {
        self.tools
            .iter()
            .filter(|(id, _)| predicate(id))
            .map(|(_, tool)| tool)
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_builtins_registers_bash() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.get("bash").is_some());
        assert_eq!(registry.list(), vec!["bash"]);
    }

    #[test]
    fn test_get_missing_tool() {
        let registry = ToolRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_filter() {
        let registry = ToolRegistry::with_builtins();
        let matches = registry.filter(|id| id.starts_with("ba"));
        assert_eq!(matches.len(), 1);
    }
}
