//! Middleware chain wrapped around method execution.
//!
//! Each step either lets the call proceed or blocks it with an error. Steps
//! may enrich the [`RequestContext`] seen by later steps and the handler.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::rpc::context::RequestContext;
use crate::rpc::envelope::RpcError;
use crate::rpc::error::generic_message;

/// Outcome of a single middleware step.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareDecision {
    /// Continue with the next step.
    Proceed,
    /// Stop and answer with this error.
    Block(RpcError),
}

impl MiddlewareDecision {
    /// Blocks with `unauthorized`.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::block_with("unauthorized")
    }

    /// Blocks with `forbidden`.
    #[must_use]
    pub fn forbidden() -> Self {
        Self::block_with("forbidden")
    }

    /// Blocks with `rate_limited`.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::block_with("rate_limited")
    }

    /// Maps an HTTP status written by host middleware that did not call through.
    ///
    /// `401` is `unauthorized`, `403` is `forbidden`, `429` is `rate_limited`,
    /// any other 4xx is a generic block and everything else is an internal fault.
    #[must_use]
    pub fn short_circuit(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Self::unauthorized(),
            StatusCode::FORBIDDEN => Self::forbidden(),
            StatusCode::TOO_MANY_REQUESTS => Self::rate_limited(),
            s if s.is_client_error() => {
                Self::Block(RpcError::app("forbidden", "request blocked by middleware"))
            }
            _ => Self::Block(RpcError::internal()),
        }
    }

    fn block_with(code: &str) -> Self {
        Self::Block(RpcError::app(code, generic_message(code)))
    }
}

/// One step of a method's middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Inspects (and may enrich) the context before the handler runs.
    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareDecision;
}

/// Adapts a synchronous closure into a [`Middleware`].
pub struct FnMiddleware<F>(F);

/// Creates a middleware from a closure.
pub fn from_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut RequestContext) -> MiddlewareDecision + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut RequestContext) -> MiddlewareDecision + Send + Sync,
{
    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareDecision {
        (self.0)(ctx)
    }
}

/// Runs the chain in registration order, stopping at the first block.
///
/// # Errors
///
/// Returns the blocking step's error.
pub async fn run_chain(
    chain: &[Arc<dyn Middleware>],
    ctx: &mut RequestContext,
) -> Result<(), RpcError> {
    for step in chain {
        if let MiddlewareDecision::Block(err) = step.handle(ctx).await {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::envelope::{ErrorCode, INTERNAL_ERROR};
    use crate::rpc::transport::Transport;

    fn code_of(decision: MiddlewareDecision) -> ErrorCode {
        match decision {
            MiddlewareDecision::Block(err) => err.code,
            MiddlewareDecision::Proceed => panic!("expected a block"),
        }
    }

    #[test]
    fn short_circuit_maps_statuses() {
        assert_eq!(
            code_of(MiddlewareDecision::short_circuit(StatusCode::UNAUTHORIZED)),
            ErrorCode::app("unauthorized")
        );
        assert_eq!(
            code_of(MiddlewareDecision::short_circuit(StatusCode::FORBIDDEN)),
            ErrorCode::app("forbidden")
        );
        assert_eq!(
            code_of(MiddlewareDecision::short_circuit(StatusCode::TOO_MANY_REQUESTS)),
            ErrorCode::app("rate_limited")
        );
        assert_eq!(
            code_of(MiddlewareDecision::short_circuit(StatusCode::IM_A_TEAPOT)),
            ErrorCode::app("forbidden")
        );
        assert_eq!(
            code_of(MiddlewareDecision::short_circuit(StatusCode::OK)),
            ErrorCode::Protocol(INTERNAL_ERROR)
        );
        assert_eq!(
            code_of(MiddlewareDecision::short_circuit(StatusCode::BAD_GATEWAY)),
            ErrorCode::Protocol(INTERNAL_ERROR)
        );
    }

    #[tokio::test]
    async fn chain_runs_in_order_and_stops_at_first_block() {
        let chain = vec![
            from_fn(|ctx: &mut RequestContext| {
                ctx.user_id = Some("from-middleware".into());
                MiddlewareDecision::Proceed
            }),
            from_fn(|_: &mut RequestContext| MiddlewareDecision::rate_limited()),
            from_fn(|ctx: &mut RequestContext| {
                ctx.user_id = Some("unreachable".into());
                MiddlewareDecision::Proceed
            }),
        ];
        let mut ctx = RequestContext::new(Transport::Public);

        let err = run_chain(&chain, &mut ctx).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::app("rate_limited"));
        assert_eq!(err.message, "too many requests");
        assert_eq!(ctx.user_id.as_deref(), Some("from-middleware"));
    }

    #[tokio::test]
    async fn empty_chain_proceeds() {
        let mut ctx = RequestContext::new(Transport::Internal);
        assert!(run_chain(&[], &mut ctx).await.is_ok());
    }
}
