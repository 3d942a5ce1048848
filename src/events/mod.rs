//! Lifecycle events for tool dispatch
//!
//! Every state transition of a call is published as an `Event` on one
//! bounded channel shared by the whole batch. Events keep emission order,
//! which under parallel dispatch interleaves calls freely.
//!
//! Backpressure is explicit: with `EventPolicy::DropNewest` (the default) a
//! full channel discards the new event and counts it; with
//! `EventPolicy::Block` the emitter waits for room. Either way a consumer
//! that has gone away never stalls dispatch.

use crate::tools::approval::ApprovalRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Event kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ToolNotFound,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    ExecutionStarted,
    ExecutionError,
    ExecutionSuccess,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ToolNotFound => "tool_not_found",
            EventType::ApprovalRequested => "approval_requested",
            EventType::ApprovalGranted => "approval_granted",
            EventType::ApprovalDenied => "approval_denied",
            EventType::ExecutionStarted => "execution_started",
            EventType::ExecutionError => "execution_error",
            EventType::ExecutionSuccess => "execution_success",
        }
    }

    /// Terminal events end a call's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::ToolNotFound
                | EventType::ApprovalDenied
                | EventType::ExecutionError
                | EventType::ExecutionSuccess
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failed execution ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Failure,
    Timeout,
    Cancelled,
    Panic,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::Failure => "failure",
            FailureCause::Timeout => "timeout",
            FailureCause::Cancelled => "cancelled",
            FailureCause::Panic => "panic",
        }
    }
}

/// A published lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    fn new(event_type: EventType, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_not_found(tool_name: &str, call_id: &str) -> Self {
        Self::new(
            EventType::ToolNotFound,
            json!({ "tool_name": tool_name, "call_id": call_id }),
        )
    }

    pub fn approval_requested(request: &ApprovalRequest) -> Self {
        Self::new(
            EventType::ApprovalRequested,
            json!({
                "tool_name": request.tool_name,
                "arguments": request.arguments,
                "description": request.description,
                "conversation_id": request.conversation_id,
                "call_id": request.call_id,
            }),
        )
    }

    pub fn approval_granted(tool_name: &str, call_id: &str) -> Self {
        Self::new(
            EventType::ApprovalGranted,
            json!({ "tool_name": tool_name, "call_id": call_id }),
        )
    }

    pub fn approval_denied(tool_name: &str, call_id: &str, reason: &str) -> Self {
        Self::new(
            EventType::ApprovalDenied,
            json!({ "tool_name": tool_name, "call_id": call_id, "reason": reason }),
        )
    }

    pub fn execution_started(tool_name: &str, call_id: &str) -> Self {
        Self::new(
            EventType::ExecutionStarted,
            json!({ "tool_name": tool_name, "call_id": call_id }),
        )
    }

    pub fn execution_error(tool_name: &str, call_id: &str, error: &str, cause: FailureCause) -> Self {
        Self::new(
            EventType::ExecutionError,
            json!({
                "tool_name": tool_name,
                "call_id": call_id,
                "error": error,
                "cause": cause.as_str(),
            }),
        )
    }

    pub fn execution_success(tool_name: &str, call_id: &str, result: &Value) -> Self {
        Self::new(
            EventType::ExecutionSuccess,
            json!({ "tool_name": tool_name, "call_id": call_id, "result": result }),
        )
    }

    /// Field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.get("tool_name").and_then(Value::as_str)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.get("call_id").and_then(Value::as_str)
    }
}

/// What to do when the channel is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventPolicy {
    /// Wait for the consumer to make room
    Block,
    /// Discard the event being emitted
    #[default]
    DropNewest,
}

/// Publishing side of the event stream
#[derive(Clone)]
pub struct EventEmitter {
    sender: Option<mpsc::Sender<Event>>,
    policy: EventPolicy,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Emitter and stream with default capacity and policy
    pub fn new() -> (Self, EventStream) {
        Self::channel(DEFAULT_EVENT_CAPACITY, EventPolicy::default())
    }

    /// Emitter and stream with explicit capacity and policy
    pub fn channel(capacity: usize, policy: EventPolicy) -> (Self, EventStream) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let emitter = Self {
            sender: Some(sender),
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (emitter, EventStream { receiver })
    }

    /// Emitter with no consumer; every event is discarded
    pub fn disabled() -> Self {
        Self {
            sender: None,
            policy: EventPolicy::DropNewest,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event
    pub async fn emit(&self, event: Event) {
        let Some(sender) = &self.sender else {
            return;
        };

        match self.policy {
            EventPolicy::DropNewest => match sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        event = %event.event_type,
                        dropped_total = total,
                        "event stream full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            },
            EventPolicy::Block => {
                // Closed channel: consumer gone, nothing to wait for
                let _ = sender.send(event).await;
            }
        }
    }

    /// Events discarded because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> EventPolicy {
        self.policy
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.sender.is_some())
            .field("policy", &self.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Consuming side of the event stream
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Next event; `None` once every emitter is gone and the buffer is empty
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Everything buffered right now
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Stop accepting new events
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
