//! Message types exchanged with the model transport and conversation history
//!
//! A `ToolCall` comes in from the model turn; a `ResultMessage` goes back
//! into history. One result per call, always.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Call identifier assigned by the model
    pub id: String,

    /// Name of the tool to run
    pub name: String,

    /// Arguments in the order the model produced them
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Create a call with no arguments
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: Map::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Build from a JSON object; anything else yields an empty argument map
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        if let Value::Object(map) = arguments {
            self.arguments = map;
        }
        self
    }

    /// Arguments as the JSON text handed to handlers
    pub fn arguments_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.arguments)
    }
}

/// Message author role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tool,
}

/// Outcome of one call, ready to append to the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMessage {
    pub role: Role,

    /// Rendered result or error text
    pub content: String,

    /// Id of the call this answers
    pub tool_call_id: String,

    /// Tool name as requested
    pub name: String,
}

impl ResultMessage {
    /// Result message answering `call`
    pub fn for_call(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
        }
    }
}
