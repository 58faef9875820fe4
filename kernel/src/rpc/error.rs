//! Handler errors and their classification into response errors.

use serde_json::Value;

use crate::rpc::envelope::{ErrorCode, RpcError};

/// Capability implemented by errors that know their own response code.
///
/// Classified errors take precedence over the generic sentinel mapping.
pub trait ClassifiedError: std::error::Error + Send + Sync + 'static {
    /// Short application error code, for example `"conflict"`.
    fn error_kind(&self) -> String;

    /// Message to expose. Defaults to the generic message for the code.
    fn message(&self) -> Option<String> {
        None
    }

    /// Structured details to expose.
    fn details(&self) -> Option<Value> {
        None
    }
}

/// Error returned by a method handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Request was structurally invalid.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller lacks a required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Handler failed internally.
    #[error("internal error: {0}")]
    Internal(String),
    /// Error that supplies its own code.
    #[error("{0}")]
    Custom(Box<dyn ClassifiedError>),
    /// Error relayed verbatim from an applet runtime.
    #[error("{}", .0.message)]
    Remote(RpcError),
    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Wraps a classified error.
    #[must_use]
    pub fn custom(err: impl ClassifiedError) -> Self {
        Self::Custom(Box::new(err))
    }

    /// Converts the error into the response error exposed to callers.
    ///
    /// Sentinel kinds expose only a generic message so internals do not leak.
    #[must_use]
    pub fn classify(&self) -> RpcError {
        let code = match self {
            Self::Custom(err) => {
                let kind = err.error_kind().trim().to_string();
                let kind = if kind.is_empty() { "error".to_string() } else { kind };
                let message = err
                    .message()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| generic_message(&kind).to_string());
                return RpcError::app(kind, message).with_details(err.details());
            }
            Self::Remote(err) => return err.clone(),
            Self::Validation(_) => "validation",
            Self::Invalid(_) => "invalid",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "forbidden",
            Self::Internal(_) => "internal",
            Self::Other(_) => "error",
        };
        RpcError {
            code: ErrorCode::app(code),
            message: generic_message(code).to_string(),
            details: None,
        }
    }
}

/// Generic message for an application error code.
#[must_use]
pub fn generic_message(code: &str) -> &'static str {
    match code {
        "forbidden" => "permission denied",
        "unauthorized" => "authentication required",
        "rate_limited" => "too many requests",
        "validation" => "validation failed",
        "invalid" => "invalid request",
        "not_found" => "resource not found",
        "internal" => "internal error",
        _ => "request failed",
    }
}
