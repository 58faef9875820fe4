//! JSON-RPC shaped request/response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version echoed on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Malformed or empty request.
pub const INVALID_REQUEST: i64 = -32600;
/// Unknown method, or a method not reachable over the calling transport.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Unexpected internal fault.
pub const INTERNAL_ERROR: i64 = -32603;

/// An inbound call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcRequest {
    /// Opaque identifier echoed back. `None` for notification-style calls.
    #[serde(default)]
    pub id: Option<Value>,
    /// Dot-namespaced method name.
    #[serde(default)]
    pub method: String,
    /// Opaque parameters.
    #[serde(default)]
    pub params: Value,
}

/// Error code: a protocol integer or an application string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    /// Protocol-level failure (`-32600`, `-32601`, `-32603`).
    Protocol(i64),
    /// Application-level failure (`forbidden`, `validation`, ...).
    App(String),
}

impl ErrorCode {
    /// Builds an application code.
    #[must_use]
    pub fn app(code: impl Into<String>) -> Self {
        Self::App(code.into())
    }

    /// Returns the code as a string for logging and metrics.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Protocol(code) => code.to_string(),
            Self::App(code) => code.clone(),
        }
    }
}

/// Typed error carried by a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: ErrorCode,
    /// Human readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RpcError {
    /// Builds an application-tier error.
    #[must_use]
    pub fn app(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::app(code),
            message: message.into(),
            details: None,
        }
    }

    /// `-32600 Invalid Request`.
    #[must_use]
    pub fn invalid_request() -> Self {
        Self::protocol(INVALID_REQUEST, "Invalid Request")
    }

    /// `-32601 Method not found`.
    #[must_use]
    pub fn method_not_found() -> Self {
        Self::protocol(METHOD_NOT_FOUND, "Method not found")
    }

    /// `-32603 Internal error`.
    #[must_use]
    pub fn internal() -> Self {
        Self::protocol(INTERNAL_ERROR, "Internal error")
    }

    fn protocol(code: i64, message: &str) -> Self {
        Self {
            code: ErrorCode::Protocol(code),
            message: message.to_string(),
            details: None,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Option<Value>) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code.label())
    }
}

impl std::error::Error for RpcError {}

/// An outbound response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Identifier copied from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Always `"2.0"`.
    pub jsonrpc: String,
}

impl RpcResponse {
    /// Builds a success response.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            jsonrpc: JSONRPC_VERSION.to_string(),
        }
    }

    /// Builds a failure response.
    #[must_use]
    pub fn failure(id: Option<Value>, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
            jsonrpc: JSONRPC_VERSION.to_string(),
        }
    }
}

/// Response body mirroring the shape of the request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    /// Object in, object out.
    Single(RpcResponse),
    /// Array in, array out.
    Batch(Vec<RpcResponse>),
}
