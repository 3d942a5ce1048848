//! Tool dispatch system
//!
//! Runs a batch of model-requested tool calls:
//! - Registry lookup by name
//! - Fail-closed approval gate
//! - Per-call timeout scope
//! - Retry with exponential backoff
//! - Sequential or semaphore-bounded parallel dispatch
//! - Result formatting and lifecycle events

pub mod types;
pub mod registry;
pub mod approval;
pub mod timeout;
pub mod retry;
pub mod formatter;
pub mod dispatcher;
pub mod builtin;

// Re-export commonly used types
pub use types::{Tool, ToolHandler, ToolStats};
pub use registry::ToolRegistry;
pub use approval::{ApprovalConfig, ApprovalHandler, ApprovalRequest, AutoApprove, AutoDeny, Verdict};
pub use timeout::{CallScope, TimeoutGuard};
pub use retry::RetryPolicy;
pub use formatter::{format_error, format_outcome, format_value};
pub use dispatcher::{DispatchConfig, Dispatcher};
