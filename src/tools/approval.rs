//! Approval gate
//!
//! Decides whether a call must be authorized before it runs and waits on a
//! caller-supplied decision function. The gate is fail-closed: no handler,
//! a handler error, or a cancelled wait all count as a denial.

use crate::errors::{panic_message, Result, ToolError};
use crate::types::ToolCall;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What the approver is shown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub description: String,
    pub conversation_id: String,
    pub call_id: String,
}

impl ApprovalRequest {
    /// Build the request for `call` against a tool with `description`
    pub fn for_call(call: &ToolCall, description: &str, conversation_id: &str) -> Self {
        Self {
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            description: description.to_string(),
            conversation_id: conversation_id.to_string(),
            call_id: call.id.clone(),
        }
    }
}

/// Decision function for gated calls
///
/// Return `Ok(true)` to let the call run. `Ok(false)` and any error deny it.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn decide(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        request: &ApprovalRequest,
    ) -> Result<bool>;
}

/// Approves every request
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn decide(&self, _: &CancellationToken, _: &ToolCall, _: &ApprovalRequest) -> Result<bool> {
        Ok(true)
    }
}

/// Denies every request
pub struct AutoDeny;

#[async_trait]
impl ApprovalHandler for AutoDeny {
    async fn decide(&self, _: &CancellationToken, _: &ToolCall, _: &ApprovalRequest) -> Result<bool> {
        Ok(false)
    }
}

/// Adapter for an async closure over an owned request
pub struct FnApproval<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> ApprovalHandler for FnApproval<F>
where
    F: Fn(ApprovalRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn decide(&self, _: &CancellationToken, _: &ToolCall, request: &ApprovalRequest) -> Result<bool> {
        (self.func)(request.clone()).await
    }
}

/// Outcome of the gate for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Denied { reason: String },
}

/// Approval policy
#[derive(Clone, Default)]
pub struct ApprovalConfig {
    /// Tools that need approval
    pub tools: HashSet<String>,

    /// Decision function; `None` denies every gated call
    pub handler: Option<Arc<dyn ApprovalHandler>>,

    /// Gate every tool regardless of `tools`
    pub all_tools: bool,
}

impl ApprovalConfig {
    /// Policy that gates nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate the named tools
    pub fn for_tools<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Gate every tool
    pub fn all() -> Self {
        Self {
            all_tools: true,
            ..Default::default()
        }
    }

    /// Set decision function
    pub fn with_handler(mut self, handler: impl ApprovalHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set decision function from an async closure
    pub fn with_handler_fn<F, Fut>(self, func: F) -> Self
    where
        F: Fn(ApprovalRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.with_handler(FnApproval { func })
    }

    /// Whether `tool_name` must pass the gate
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.all_tools || self.tools.contains(tool_name)
    }

    /// Ask the decision function, waiting until it answers or `cancel` fires
    pub async fn evaluate(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        request: &ApprovalRequest,
    ) -> Result<bool> {
        let handler = match &self.handler {
            Some(handler) => Arc::clone(handler),
            None => return Err(ToolError::NoApprovalHandler),
        };

        let decision = AssertUnwindSafe(handler.decide(cancel, call, request)).catch_unwind();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            decision = decision => decision.unwrap_or_else(|payload| {
                Err(ToolError::Approval(format!(
                    "approval handler panicked: {}",
                    panic_message(payload.as_ref())
                )))
            }),
        }
    }

    /// Collapse `evaluate` into a verdict; errors deny
    pub async fn verdict(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        request: &ApprovalRequest,
    ) -> Verdict {
        match self.evaluate(cancel, call, request).await {
            Ok(true) => Verdict::Approved,
            Ok(false) => Verdict::Denied {
                reason: "denied by approver".to_string(),
            },
            Err(e) => Verdict::Denied {
                reason: e.to_string(),
            },
        }
    }
}

impl fmt::Debug for ApprovalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalConfig")
            .field("tools", &self.tools)
            .field("all_tools", &self.all_tools)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
