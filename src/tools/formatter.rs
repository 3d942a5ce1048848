//! Result formatter
//!
//! Renders handler output as the text stored in a result message:
//! - null → `null`
//! - string → verbatim
//! - error → `Error: <message>`
//! - anything else → JSON, or its debug form if serialization fails
//!
//! None of these functions can fail.

use crate::errors::Result;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{Debug, Display};

/// Render a handler's JSON result
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => format_serializable(other),
    }
}

/// Render an error
pub fn format_error(err: &dyn Display) -> String {
    format!("Error: {}", err)
}

/// Render any serializable value, falling back to its debug form
pub fn format_serializable<T: Serialize + Debug + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{:?}", value))
}

/// Render a handler outcome
pub fn format_outcome(outcome: &Result<Value>) -> String {
    match outcome {
        Ok(value) => format_value(value),
        Err(err) => format_error(err),
    }
}
