//! Error types for toolgate
//!
//! Every failure a single tool call can hit is a variant here. None of them
//! abort a batch: the dispatcher turns them into result messages and events.

use std::any::Any;
use thiserror::Error;

/// Main error type for tool dispatch
#[derive(Error, Debug)]
pub enum ToolError {
    /// Call names a tool that is not registered
    #[error("tool \"{name}\" not found")]
    ToolNotFound { name: String },

    /// Registration attempted with a name already in use
    #[error("tool \"{name}\" is already registered")]
    DuplicateTool { name: String },

    /// Call arguments could not be encoded for the handler
    #[error("failed to encode arguments: {0}")]
    ArgumentEncoding(String),

    /// Approval gate said no
    #[error("tool call \"{tool}\" was denied: {reason}")]
    ApprovalDenied { tool: String, reason: String },

    /// Gated call but nobody configured to decide
    #[error("no approval handler configured")]
    NoApprovalHandler,

    /// Decision function itself failed
    #[error("approval failed: {0}")]
    Approval(String),

    /// Per-call deadline elapsed
    #[error("tool call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Ambient run was cancelled
    #[error("tool call cancelled")]
    Cancelled,

    /// Handler returned an error
    #[error("{0}")]
    Execution(String),

    /// Handler panicked
    #[error("tool handler panicked: {0}")]
    Panicked(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, ToolError>;

impl ToolError {
    /// Convenience constructor for handler failures
    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }

    /// Timeout or run-level cancellation, as opposed to a handler failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ToolError::Timeout { .. } | ToolError::Cancelled)
    }

    /// Whether the retry executor may try the operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            // Transient: the handler itself failed
            ToolError::Execution(_) => true,
            ToolError::IoError(_) => true,

            // Permanent
            ToolError::Timeout { .. } | ToolError::Cancelled => false,
            ToolError::ToolNotFound { .. } => false,
            ToolError::ApprovalDenied { .. }
            | ToolError::NoApprovalHandler
            | ToolError::Approval(_) => false,
            ToolError::ArgumentEncoding(_) | ToolError::SerializationError(_) => false,
            ToolError::Panicked(_) => false,
            ToolError::DuplicateTool { .. } | ToolError::ConfigError(_) => false,
        }
    }
}

/// Convert anyhow errors raised inside handlers
impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::Execution(format!("{:#}", err))
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
