//! JSON-RPC 2.0 frame types
//!
//! Newline-delimited JSON objects. A frame with a non-null `id` and a
//! `result` or `error` member is a response; anything else with a `method`
//! is a request (or, without an `id`, a notification).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// Standard error codes
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Generic tool failure; `data.code` carries the stable taxonomy code
pub const TOOL_ERROR: i64 = -32000;

/// An incoming or outgoing request/notification frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(Value::from(id)),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.id == Some(Value::Null)
    }
}

/// A response frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl ResponseFrame {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "parse error")
    }
}

/// Classify a raw frame: response if it carries a non-null id plus a
/// result/error member, otherwise request/notification.
pub fn is_response(frame: &Value) -> bool {
    let id_present = frame.get("id").is_some_and(|id| !id.is_null());
    id_present && (frame.get("result").is_some() || frame.get("error").is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_frames() {
        assert!(is_response(&json!({"jsonrpc": "2.0", "id": 1, "result": {}})));
        assert!(is_response(&json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "x"}})));
        assert!(!is_response(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})));
        assert!(!is_response(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"})));
        assert!(!is_response(&json!({"jsonrpc": "2.0", "id": null, "result": {}})));
    }

    #[test]
    fn notification_detection() {
        let frame: RequestFrame =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(frame.is_notification());
        let frame: RequestFrame =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}))
                .unwrap();
        assert!(!frame.is_notification());
    }
}
