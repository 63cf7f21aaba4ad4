//! Result normalization
//!
//! Servers answer `tools/call` in several shapes: a bare payload, a payload
//! nested under a `result` wrapper, or a list of typed content blocks whose
//! first text block may itself be a JSON-encoded string. Everything is
//! collapsed into one [`CallOutcome`] so callers never see the zoo.

use crate::error::McpError;
use serde_json::{Value, json};

/// The single result contract of the call facade.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// The call succeeded with a normalized payload
    Success {
        /// Unwrapped result payload
        payload: Value,
    },
    /// The call failed, whether in transport or inside the tool
    Failure {
        /// What went wrong
        error: McpError,
    },
}

impl CallOutcome {
    /// Wrap a payload.
    pub fn success(payload: Value) -> Self {
        Self::Success { payload }
    }

    /// Wrap an error.
    pub fn failure(error: McpError) -> Self {
        Self::Failure { error }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The payload, if the call succeeded.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload } => Some(payload),
            Self::Failure { .. } => None,
        }
    }

    /// The error, if the call failed.
    pub fn error(&self) -> Option<&McpError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }

    /// Convert into a `Result`, consuming the outcome.
    pub fn into_result(self) -> Result<Value, McpError> {
        match self {
            Self::Success { payload } => Ok(payload),
            Self::Failure { error } => Err(error),
        }
    }

    /// Normalize a raw `tools/call` result value.
    ///
    /// Unwrapping order, highest priority first (a JSON-RPC `error` member
    /// never reaches this function; it fails the call at the protocol
    /// layer):
    ///
    /// 1. `isError: true`: the failure text is taken from the first text
    ///    content block, JSON-decoded to its `error` field when possible,
    ///    else used verbatim.
    /// 2. A `content` block list at the top level.
    /// 3. A `content` block list nested one level under `result`.
    /// 4. Within the chosen list, the first block of type `text`: parsed as
    ///    JSON when it parses, else wrapped as `{"text": …}`.
    /// 5. Anything else passes through as the payload unchanged.
    pub fn from_result(result: Value) -> Self {
        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Self::failure(McpError::server(-1, tool_error_message(&result)));
        }

        let blocks = result
            .get("content")
            .or_else(|| result.get("result").and_then(|r| r.get("content")))
            .and_then(Value::as_array);

        if let Some(blocks) = blocks {
            if let Some(text) = first_text_block(blocks) {
                return match serde_json::from_str::<Value>(text) {
                    Ok(parsed) => Self::success(parsed),
                    Err(_) => Self::success(json!({ "text": text })),
                };
            }
        }

        Self::success(result)
    }
}

/// Text of the first content block, when that block is of type `text`.
fn first_text_block(blocks: &[Value]) -> Option<&str> {
    let first = blocks.first()?;
    if first.get("type").and_then(Value::as_str) == Some("text") {
        first.get("text").and_then(Value::as_str)
    } else {
        None
    }
}

/// Failure text for an `isError` result.
fn tool_error_message(result: &Value) -> String {
    const FALLBACK: &str = "tool execution failed";

    let Some(text) = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| first_text_block(blocks))
    else {
        return FALLBACK.to_string();
    };

    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => parsed
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK.to_string()),
        Err(_) => text.to_string(),
    }
}
