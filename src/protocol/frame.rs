//! WebSocket frame types.
//!
//! Every text frame on a relay connection is one JSON [`Frame`], tagged by
//! `type`. The first frame a client sends is always `bind`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{CallId, ConnectionId};

use super::Call;

// ============================================================================
// Frame
// ============================================================================

/// A message exchanged between a client and the relay.
///
/// # Format
///
/// ```json
/// { "type": "bind", "package": "overlay.relay", "action": "overlay.relay.action.GET_HOST" }
/// { "type": "bound", "connectionId": 7 }
/// { "type": "request", "id": "uuid", "call": { "method": "host.overlayBackPressed" } }
/// { "type": "response", "id": "uuid", "status": "success", "result": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Client asks to bind to a service by (package, action).
    Bind {
        /// Package that publishes the service.
        package: String,
        /// Action string selecting the contract.
        action: String,
    },

    /// Relay accepted the bind.
    Bound {
        /// Relay-side connection identifier.
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },

    /// Relay refused the bind.
    Rejected {
        /// Reason for the refusal.
        message: String,
    },

    /// A call in either direction.
    Request(Request),

    /// The answer to a [`Frame::Request`].
    Response(Response),
}

// ============================================================================
// Request
// ============================================================================

/// A remote invocation awaiting a [`Response`] with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: CallId,

    /// The invoked method and its params.
    pub call: Call,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(call: Call) -> Self {
        Self {
            id: CallId::generate(),
            call,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// The answer to a request.
///
/// Success:
/// ```json
/// { "id": "uuid", "status": "success", "result": true }
/// ```
///
/// Error:
/// ```json
/// { "id": "uuid", "status": "error", "error": "unknown method", "message": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: CallId,

    /// Response status.
    pub status: ResponseStatus,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error code (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error message (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: CallId, result: Value) -> Self {
        Self {
            id,
            status: ResponseStatus::Success,
            result: Some(result),
            error: None,
            message: None,
        }
    }

    /// Creates an error response from a local error.
    #[inline]
    #[must_use]
    pub fn failure(id: CallId, error: &Error) -> Self {
        Self {
            id,
            status: ResponseStatus::Error,
            result: None,
            error: Some(error.code().to_string()),
            message: Some(error.to_string()),
        }
    }

    /// Builds a response from a dispatch result.
    #[inline]
    #[must_use]
    pub fn from_result(id: CallId, result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::failure(id, &e),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Extracts the result value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the response was an error.
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            ResponseStatus::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseStatus::Error => {
                let code = self.error.unwrap_or_else(|| "unknown error".to_string());
                let message = self.message.unwrap_or_else(|| code.clone());
                Err(Error::remote(code, message))
            }
        }
    }
}

// ============================================================================
// ResponseStatus
// ============================================================================

/// Response status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Successful response.
    Success,
    /// Error response.
    Error,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_bind_frame_format() {
        let frame = Frame::Bind {
            package: "overlay.relay".into(),
            action: "overlay.relay.action.HOST".into(),
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "bind");
        assert_eq!(json["action"], "overlay.relay.action.HOST");
    }

    #[test]
    fn test_request_frame_parse() {
        let text = r#"{
            "type": "request",
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "call": { "method": "overlay.setInputInterceptable", "params": { "enabled": true } }
        }"#;

        let frame: Frame = serde_json::from_str(text).expect("parse");
        let Frame::Request(request) = frame else {
            panic!("expected request frame");
        };
        assert_eq!(request.call, Call::SetInputInterceptable { enabled: true });
    }

    #[test]
    fn test_success_response() {
        let id = CallId::generate();
        let frame = Frame::Response(Response::success(id, json!(true)));
        let text = serde_json::to_string(&frame).expect("serialize");
        assert!(!text.contains("\"error\""));

        let Frame::Response(response) = serde_json::from_str(&text).expect("parse") else {
            panic!("expected response frame");
        };
        assert!(response.is_success());
        assert_eq!(response.into_result().expect("success"), json!(true));
    }

    #[test]
    fn test_error_response_into_result() {
        let id = CallId::generate();
        let response = Response::failure(id, &Error::unknown_method("host.reboot"));
        assert!(!response.is_success());

        let err = response.into_result().unwrap_err();
        match err {
            Error::Remote { code, message } => {
                assert_eq!(code, "unknown method");
                assert!(message.contains("host.reboot"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
