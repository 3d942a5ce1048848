//! Per-call timeout guard
//!
//! A `CallScope` is a child of the run-level cancellation token, optionally
//! bounded by a deadline. Whichever fires first ends the scope. Dropping the
//! scope cancels its token, so anything the handler spawned on it is released
//! even if the call unwinds.

use crate::errors::{Result, ToolError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Derives call scopes from a configured per-call timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutGuard {
    timeout: Option<Duration>,
}

impl TimeoutGuard {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Open a scope under `parent`
    pub fn scope(&self, parent: &CancellationToken) -> CallScope {
        CallScope::new(parent, self.timeout)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Bounded lifetime for a single call
pub struct CallScope {
    token: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    timed_out: AtomicBool,
    _guard: DropGuard,
}

impl CallScope {
    /// Child scope of `parent`, ending after `timeout` if one is given
    pub fn new(parent: &CancellationToken, timeout: Option<Duration>) -> Self {
        let token = parent.child_token();
        let guard = token.clone().drop_guard();

        Self {
            token,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
            timed_out: AtomicBool::new(false),
            _guard: guard,
        }
    }

    /// Token handed to handlers
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Neither cancelled nor past the deadline
    ///
    /// Seeing the deadline passed ends the scope as timed out.
    pub fn is_active(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.time_out();
            return false;
        }
        true
    }

    fn time_out(&self) {
        if !self.token.is_cancelled() {
            self.timed_out.store(true, Ordering::Release);
        }
        self.token.cancel();
    }

    /// Why the scope ended
    ///
    /// `Timeout` only if the deadline ended the scope before anything else did.
    pub fn cause(&self) -> ToolError {
        if self.timed_out.load(Ordering::Acquire) {
            ToolError::Timeout {
                duration_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            }
        } else {
            ToolError::Cancelled
        }
    }

    /// Resolve once the scope ends, yielding the cause
    ///
    /// Hitting the deadline also cancels the token so cooperative handlers
    /// observe it.
    pub async fn expired(&self) -> ToolError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => self.cause(),
                    _ = tokio::time::sleep_until(deadline) => {
                        self.time_out();
                        self.cause()
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                self.cause()
            }
        }
    }

    /// Run `fut` inside the scope
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.is_active() {
            return Err(self.cause());
        }

        tokio::select! {
            biased;
            cause = self.expired() => Err(cause),
            result = fut => result,
        }
    }
}
