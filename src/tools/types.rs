//! Tool definition types
//!
//! A `Tool` pairs a unique name and description with an async handler.
//! Handlers receive the call's cancellation token and the arguments encoded
//! as JSON text, and return a JSON value.

use crate::errors::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executable side of a tool
///
/// Handlers should watch `cancel` and stop early when it fires. The
/// dispatcher stops waiting on them either way.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool once
    async fn call(&self, cancel: CancellationToken, arguments: String) -> Result<Value>;
}

/// Adapter turning an async closure into a `ToolHandler`
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(CancellationToken, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, cancel: CancellationToken, arguments: String) -> Result<Value> {
        (self.func)(cancel, arguments).await
    }
}

/// Registered tool
#[derive(Clone)]
pub struct Tool {
    /// Unique tool name
    pub name: String,

    /// Tool description, shown to approvers
    pub description: String,

    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Create tool from a handler implementation
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler: Arc::new(handler),
        }
    }

    /// Create tool from an async closure
    pub fn from_fn<F, Fut>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(CancellationToken, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::new(name, description, FnHandler::new(func))
    }

    /// Shared handle to the handler
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Dispatch statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolStats {
    /// Calls whose handler ran to a final outcome
    pub total_executions: u64,

    /// Successful executions
    pub successful_executions: u64,

    /// Failed executions (including timeouts and cancellations)
    pub failed_executions: u64,

    /// Retry attempts beyond the first
    pub retry_attempts: u64,

    /// Calls naming an unregistered tool
    pub not_found: u64,

    /// Calls rejected at the approval gate
    pub denied: u64,

    /// Total execution time (ms)
    pub total_duration_ms: u64,

    /// Calls currently inside their handler pipeline
    pub in_flight: usize,

    /// Highest `in_flight` observed
    pub peak_in_flight: usize,
}

impl ToolStats {
    /// Record successful execution
    pub fn record_success(&mut self, duration_ms: u64) {
        self.total_executions += 1;
        self.successful_executions += 1;
        self.total_duration_ms += duration_ms;
    }

    /// Record failed execution
    pub fn record_failure(&mut self, duration_ms: u64) {
        self.total_executions += 1;
        self.failed_executions += 1;
        self.total_duration_ms += duration_ms;
    }

    /// Record retry attempt
    pub fn record_retry(&mut self) {
        self.retry_attempts += 1;
    }

    pub fn record_not_found(&mut self) {
        self.not_found += 1;
    }

    pub fn record_denied(&mut self) {
        self.denied += 1;
    }

    /// Mark a call as entering execution
    pub fn enter(&mut self) {
        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
    }

    /// Mark a call as leaving execution
    pub fn leave(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Calculate average duration
    pub fn average_duration_ms(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_executions as f64
        }
    }

    /// Calculate success rate
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }
}
