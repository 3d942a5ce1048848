//! Type definitions module
//!
//! Boundary types shared with the model transport and the conversation history.

pub mod messages;

// Re-export commonly used types
pub use messages::{ResultMessage, Role, ToolCall};
