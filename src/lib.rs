//! toolgate - tool call dispatch for language-model agents
//!
//! Takes the tool calls requested in one model turn and turns them into
//! result messages for the conversation history.
//!
//! # Architecture
//!
//! - **tools**: registry, approval gate, timeout, retry, dispatcher, formatter
//! - **events**: lifecycle event stream for observers
//! - **types**: boundary types (`ToolCall`, `ResultMessage`)
//! - **cli**: settings file and command-line arguments for the runner binary

pub mod errors;
pub mod types;
pub mod events;
pub mod tools;
pub mod cli;

// Re-export commonly used types
pub use errors::{Result, ToolError};
pub use events::{Event, EventEmitter, EventPolicy, EventStream, EventType};
pub use tools::{ApprovalConfig, DispatchConfig, Dispatcher, RetryPolicy, Tool, ToolRegistry};
pub use types::{ResultMessage, ToolCall};
