//! Built-in tools
//!
//! Small tools registered by the command-line runner:
//! - echo: return the arguments unchanged
//! - sleep: wait `ms` milliseconds, stopping early on cancellation
//! - now: current UTC time

use crate::errors::{Result, ToolError};
use crate::tools::registry::ToolRegistry;
use crate::tools::types::Tool;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct SleepArgs {
    ms: u64,
}

async fn echo_handler(_cancel: CancellationToken, args: String) -> Result<Value> {
    Ok(serde_json::from_str(&args)?)
}

async fn sleep_handler(cancel: CancellationToken, args: String) -> Result<Value> {
    let args: SleepArgs = serde_json::from_str(&args)?;
    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(args.ms)) => Ok(json!({ "slept_ms": args.ms })),
    }
}

pub fn echo() -> Tool {
    Tool::from_fn("echo", "Return the arguments unchanged", echo_handler)
}

pub fn sleep() -> Tool {
    Tool::from_fn("sleep", "Wait for a number of milliseconds", sleep_handler)
}

pub fn now() -> Tool {
    Tool::from_fn("now", "Current UTC time (RFC 3339)", |_cancel, _args| async {
        Ok(Value::String(chrono::Utc::now().to_rfc3339()))
    })
}

/// Register all built-in tools
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(echo())?;
    registry.register(sleep())?;
    registry.register(now())?;
    Ok(())
}
