//! Batch dispatcher
//!
//! Turns a batch of tool calls into result messages:
//! - Sequential mode: one call at a time, in input order
//! - Parallel mode: semaphore-bounded fan-out (at most `max_concurrent`
//!   calls in flight), results reassembled by input index
//! - Every call yields exactly one result message; failures are data
//!
//! Per call: registry lookup → approval gate → timeout scope → retry →
//! formatting → terminal event. A panicking handler is caught at the call
//! boundary and reported like any other execution error.

use crate::errors::{panic_message, ToolError};
use crate::events::{Event, EventEmitter, FailureCause};
use crate::tools::approval::{ApprovalConfig, ApprovalRequest, Verdict};
use crate::tools::formatter::{format_error, format_value};
use crate::tools::registry::ToolRegistry;
use crate::tools::retry::RetryPolicy;
use crate::tools::timeout::TimeoutGuard;
use crate::tools::types::ToolStats;
use crate::types::{ResultMessage, ToolCall};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default concurrency bound for parallel mode
pub const MAX_PARALLEL_OPERATIONS: usize = 4;

/// Immutable configuration for one batch
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Tools available to the batch
    pub registry: Arc<ToolRegistry>,

    /// Approval policy
    pub approval: ApprovalConfig,

    /// Retry policy applied to every handler
    pub retry: RetryPolicy,

    /// Per-call execution timeout; approval waits are not counted
    pub timeout: Option<Duration>,

    /// Run calls concurrently
    pub parallel: bool,

    /// Concurrency bound in parallel mode
    pub max_concurrent: usize,

    /// Forwarded to approvers
    pub conversation_id: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            registry: Arc::new(ToolRegistry::new()),
            approval: ApprovalConfig::default(),
            retry: RetryPolicy::default(),
            timeout: None,
            parallel: false,
            max_concurrent: MAX_PARALLEL_OPERATIONS,
            conversation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl DispatchConfig {
    /// Sequential configuration over `registry`
    pub fn new(registry: impl Into<Arc<ToolRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            ..Default::default()
        }
    }

    pub fn with_approval(mut self, approval: ApprovalConfig) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Switch to parallel mode with the given bound
    pub fn with_parallel(mut self, max_concurrent: usize) -> Self {
        self.parallel = true;
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }
}

/// Batch dispatcher
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    config: DispatchConfig,
    emitter: EventEmitter,
    stats: Mutex<ToolStats>,
}

impl Dispatcher {
    /// Create dispatcher publishing to `emitter`
    pub fn new(config: DispatchConfig, emitter: EventEmitter) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                emitter,
                stats: Mutex::new(ToolStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.shared.config.registry
    }

    /// Snapshot of accumulated statistics
    pub fn stats(&self) -> ToolStats {
        self.shared.lock_stats().clone()
    }

    /// Execute a batch under a fresh run scope
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ResultMessage> {
        self.execute(&CancellationToken::new(), calls).await
    }

    /// Execute a batch under `cancel`
    ///
    /// Returns one message per call, in input order.
    pub async fn execute(&self, cancel: &CancellationToken, calls: &[ToolCall]) -> Vec<ResultMessage> {
        if calls.is_empty() {
            return Vec::new();
        }

        let config = &self.shared.config;
        tracing::info!(
            calls = calls.len(),
            parallel = config.parallel,
            max_concurrent = config.max_concurrent,
            "dispatching tool batch"
        );

        if config.parallel && calls.len() > 1 {
            self.execute_parallel(cancel, calls).await
        } else {
            self.execute_sequential(cancel, calls).await
        }
    }

    async fn execute_sequential(
        &self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
    ) -> Vec<ResultMessage> {
        let mut results = Vec::with_capacity(calls.len());
        for (index, call) in calls.iter().enumerate() {
            let message = run_guarded(Arc::clone(&self.shared), cancel.clone(), index, call.clone()).await;
            results.push(message);
        }
        results
    }

    /// Fan out under a semaphore and reassemble by index
    ///
    /// Each task owns exactly one slot index, so no two tasks write the same
    /// slot. Completion order never leaks into the result order.
    async fn execute_parallel(
        &self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
    ) -> Vec<ResultMessage> {
        let semaphore = Arc::new(Semaphore::new(self.shared.config.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();

        for (index, call) in calls.iter().enumerate() {
            // Admission: wait here until a slot frees
            let permit = Arc::clone(&semaphore).acquire_owned().await;
            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            let call = call.clone();

            join_set.spawn(async move {
                let message = match permit {
                    Ok(_permit) => run_guarded(shared, cancel, index, call).await,
                    Err(_) => {
                        let err = ToolError::execution("admission semaphore closed");
                        shared.fail(&call, err, 0).await
                    }
                };
                (index, message)
            });
        }

        let mut slots: Vec<Option<ResultMessage>> = vec![None; calls.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, message)) => slots[index] = Some(message),
                Err(e) => tracing::error!(error = %e, "dispatch task did not complete"),
            }
        }

        let mut results = Vec::with_capacity(calls.len());
        for (slot, call) in slots.into_iter().zip(calls) {
            let message = match slot {
                Some(message) => message,
                None => {
                    let err = ToolError::Panicked("dispatch task did not complete".to_string());
                    self.shared.fail(call, err, 0).await
                }
            };
            results.push(message);
        }
        results
    }
}

/// Run one call with a panic guard around its whole pipeline
async fn run_guarded(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    index: usize,
    call: ToolCall,
) -> ResultMessage {
    let span = tracing::debug_span!("tool_call", index, tool = %call.name, call_id = %call.id);
    let outcome = AssertUnwindSafe(shared.run_call(&cancel, &call))
        .catch_unwind()
        .instrument(span)
        .await;

    match outcome {
        Ok(message) => message,
        Err(payload) => {
            let err = ToolError::Panicked(panic_message(payload.as_ref()));
            shared.fail(&call, err, 0).await
        }
    }
}

/// Decrements the in-flight count however the call exits
struct InFlight<'a> {
    stats: &'a Mutex<ToolStats>,
}

impl<'a> InFlight<'a> {
    fn enter(stats: &'a Mutex<ToolStats>) -> Self {
        stats.lock().unwrap_or_else(PoisonError::into_inner).enter();
        Self { stats }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).leave();
    }
}

impl Shared {
    fn lock_stats(&self) -> MutexGuard<'_, ToolStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_call(&self, cancel: &CancellationToken, call: &ToolCall) -> ResultMessage {
        let config = &self.config;

        let Some(tool) = config.registry.get(&call.name) else {
            tracing::warn!("tool not found");
            self.lock_stats().record_not_found();
            self.emitter.emit(Event::tool_not_found(&call.name, &call.id)).await;
            let err = ToolError::ToolNotFound {
                name: call.name.clone(),
            };
            return ResultMessage::for_call(call, format_error(&err));
        };

        let arguments = match call.arguments_json() {
            Ok(arguments) => arguments,
            Err(e) => return self.fail(call, ToolError::ArgumentEncoding(e.to_string()), 0).await,
        };

        // Admitted after the run was cancelled: skip without side effects
        if cancel.is_cancelled() {
            return self.fail(call, ToolError::Cancelled, 0).await;
        }

        if config.approval.requires_approval(&call.name) {
            let request = ApprovalRequest::for_call(call, &tool.description, &config.conversation_id);
            self.emitter.emit(Event::approval_requested(&request)).await;

            match config.approval.verdict(cancel, call, &request).await {
                Verdict::Approved => {
                    tracing::debug!("approval granted");
                    self.emitter
                        .emit(Event::approval_granted(&call.name, &call.id))
                        .await;
                }
                Verdict::Denied { reason } => {
                    tracing::info!(%reason, "approval denied");
                    self.lock_stats().record_denied();
                    self.emitter
                        .emit(Event::approval_denied(&call.name, &call.id, &reason))
                        .await;
                    let err = ToolError::ApprovalDenied {
                        tool: call.name.clone(),
                        reason,
                    };
                    return ResultMessage::for_call(call, format_error(&err));
                }
            }
        }

        let handler = tool.handler();
        let _in_flight = InFlight::enter(&self.stats);
        self.emitter
            .emit(Event::execution_started(&call.name, &call.id))
            .await;

        let started = Instant::now();
        let scope = TimeoutGuard::new(config.timeout).scope(cancel);
        let outcome = config
            .retry
            .run(&scope, |attempt| {
                if attempt > 1 {
                    self.lock_stats().record_retry();
                }
                handler.call(scope.token().clone(), arguments.clone())
            })
            .await;
        drop(scope);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                tracing::debug!(elapsed_ms, "tool call succeeded");
                self.lock_stats().record_success(elapsed_ms);
                self.emitter
                    .emit(Event::execution_success(&call.name, &call.id, &value))
                    .await;
                ResultMessage::for_call(call, format_value(&value))
            }
            Err(err) => self.fail(call, err, elapsed_ms).await,
        }
    }

    /// Record, publish and render an execution failure
    async fn fail(&self, call: &ToolCall, err: ToolError, elapsed_ms: u64) -> ResultMessage {
        let cause = match &err {
            ToolError::Timeout { .. } => FailureCause::Timeout,
            ToolError::Cancelled => FailureCause::Cancelled,
            ToolError::Panicked(_) => FailureCause::Panic,
            _ => FailureCause::Failure,
        };

        tracing::warn!(
            tool = %call.name,
            call_id = %call.id,
            cause = cause.as_str(),
            error = %err,
            "tool call failed"
        );
        self.lock_stats().record_failure(elapsed_ms);
        self.emitter
            .emit(Event::execution_error(&call.name, &call.id, &err.to_string(), cause))
            .await;

        ResultMessage::for_call(call, format_error(&err))
    }
}
