//! # Call Messages
//!
//! The three message shapes that make up a remote tool-call exchange:
//!
//! ```text
//! caller ──CallRequest{id}──────────→ dispatcher
//! caller ←─CallResult{callId = id}─── dispatcher   (success)
//! caller ←─CallError{callId = id}──── dispatcher   (failure)
//! ```
//!
//! Field names follow the wire format (`callId`, `executionTimeMs`).

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Topic carrying call requests.
pub const TOOL_CALL_TOPIC: &str = "tool_call";

/// Topic carrying successful call results.
pub const TOOL_RESULT_TOPIC: &str = "tool_result";

/// Topic carrying call errors.
pub const TOOL_ERROR_TOPIC: &str = "tool_error";

/// Caller-issued identifier of a single call attempt.
///
/// Opaque on the receiving side; callers in this workspace generate UUID v7
/// strings, but any unique string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh time-ordered id (UUID v7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What to call: a tool name and its JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A request to execute a named tool on a remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: CallId,
    pub payload: CallPayload,
    /// Milliseconds since the Unix epoch, caller clock.
    pub timestamp: Timestamp,
    /// Identity of the issuing participant.
    #[serde(default)]
    pub origin: String,
}

impl CallRequest {
    /// Build a request with a freshly generated id.
    pub fn new(name: impl Into<String>, args: Value, origin: impl Into<String>, now: Timestamp) -> Self {
        Self::with_id(CallId::generate(), name, args, origin, now)
    }

    /// Build a request with a caller-chosen id.
    pub fn with_id(
        id: CallId,
        name: impl Into<String>,
        args: Value,
        origin: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            payload: CallPayload {
                name: name.into(),
                args,
            },
            timestamp: now,
            origin: origin.into(),
        }
    }

    /// Tool name shortcut.
    pub fn name(&self) -> &str {
        &self.payload.name
    }
}

/// Successful outcome of a call, correlated by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub id: CallId,
    pub call_id: CallId,
    pub result: Value,
    pub timestamp: Timestamp,
    pub execution_time_ms: u64,
}

/// Failed outcome of a call, correlated by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallError {
    pub id: CallId,
    pub call_id: CallId,
    /// Human-readable failure description.
    pub error: String,
    pub timestamp: Timestamp,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = CallRequest::with_id("a".into(), "echo", json!({"x": 1}), "user-1", 1000);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "a",
                "payload": {"name": "echo", "args": {"x": 1}},
                "timestamp": 1000,
                "origin": "user-1"
            })
        );
    }

    #[test]
    fn test_result_uses_camel_case() {
        let result = CallResult {
            id: "r1".into(),
            call_id: "a".into(),
            result: json!("ok"),
            timestamp: 5,
            execution_time_ms: 12,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["callId"], "a");
        assert_eq!(value["executionTimeMs"], 12);
    }

    #[test]
    fn test_request_missing_args_defaults_to_null() {
        let raw = r#"{"id":"b","payload":{"name":"do_nothing"},"timestamp":1}"#;
        let request: CallRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.payload.args, Value::Null);
        assert_eq!(request.origin, "");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(CallId::generate(), CallId::generate());
    }
}
