//! Tool registry
//!
//! Maps tool names to their handlers. Registration and removal happen
//! between batches; a batch only ever reads the registry, through a shared
//! `Arc<ToolRegistry>` snapshot.

use crate::errors::{Result, ToolError};
use crate::tools::types::Tool;
use std::collections::HashMap;

/// Tool registry
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// Map of tool name to tool
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique
    pub fn register(&mut self, tool: Tool) -> Result<()> {
        if self.tools.contains_key(&tool.name) {
            return Err(ToolError::DuplicateTool { name: tool.name });
        }
        tracing::debug!(tool = %tool.name, "registered tool");
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Builder-style registration
    pub fn with_tool(mut self, tool: Tool) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Remove a tool, returning it if present
    pub fn unregister(&mut self, name: &str) -> Option<Tool> {
        self.tools.remove(name)
    }

    /// Look up tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Check if tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name and description pairs, sorted by name
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .tools
            .values()
            .map(|tool| (tool.name.clone(), tool.description.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Get total number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
