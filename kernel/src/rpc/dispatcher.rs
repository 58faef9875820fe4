//! Request dispatcher.
//!
//! Resolves a method name against the [`Registry`], applies the transport's
//! visibility rules, runs the method's middleware chain and permission gate,
//! and executes the handler either natively or through the applet's
//! secondary runtime. Every outcome becomes a response envelope.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::host::permissions::{self, HostServices, PermissionError};
use crate::infrastructure::audit::{self, AuditEvent};
use crate::rpc::context::RequestContext;
use crate::rpc::envelope::{RpcError, RpcReply, RpcRequest, RpcResponse};
use crate::rpc::error::HandlerError;
use crate::rpc::middleware;
use crate::rpc::registry::{MethodHandler, RegisteredMethod, Registry, Target, Visibility};
use crate::rpc::transport::Transport;
use crate::runtime::SecondaryRuntime;

/// Default cap on inbound RPC bodies (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1 << 20;

/// Hook run after method resolution and before execution, e.g. an
/// applet-enablement check. A failure answers with an internal error.
#[async_trait]
pub trait PreDispatchHook: Send + Sync {
    /// Checks whether `applet` may serve the request.
    ///
    /// # Errors
    ///
    /// Returns an error to reject the call.
    async fn before_dispatch(&self, ctx: &RequestContext, applet: &str) -> anyhow::Result<()>;
}

enum Execution {
    Native(Arc<dyn MethodHandler>),
    Delegated(Arc<dyn SecondaryRuntime>),
}

/// HTTP-independent JSON-RPC engine shared by both transports.
pub struct Dispatcher {
    registry: Arc<Registry>,
    host: Option<Arc<dyn HostServices>>,
    max_body_bytes: usize,
    pre_dispatch: Option<Arc<dyn PreDispatchHook>>,
    secondary: Option<Arc<dyn SecondaryRuntime>>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, host: Option<Arc<dyn HostServices>>) -> Self {
        Self {
            registry,
            host,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            pre_dispatch: None,
            secondary: None,
        }
    }

    /// Sets the body size cap.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Installs the pre-dispatch hook.
    #[must_use]
    pub fn with_pre_dispatch(mut self, hook: Arc<dyn PreDispatchHook>) -> Self {
        self.pre_dispatch = Some(hook);
        self
    }

    /// Installs the caller used for secondary-runtime methods.
    #[must_use]
    pub fn with_secondary_runtime(mut self, runtime: Arc<dyn SecondaryRuntime>) -> Self {
        self.secondary = Some(runtime);
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns the body size cap.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Reply for a body over the size cap.
    #[must_use]
    pub fn oversize_reply() -> (StatusCode, RpcReply) {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            RpcReply::Single(RpcResponse::failure(None, RpcError::invalid_request())),
        )
    }

    /// Handles a raw request body and returns the HTTP status and reply.
    ///
    /// An array body is dispatched as a batch and answered with an array in
    /// the same order; anything else is parsed as a single request.
    pub async fn handle_payload(
        &self,
        transport: Transport,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> (StatusCode, RpcReply) {
        if payload.len() > self.max_body_bytes {
            return Self::oversize_reply();
        }
        let trimmed = payload.trim_ascii();
        if trimmed.is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                RpcReply::Single(RpcResponse::failure(None, RpcError::invalid_request())),
            );
        }

        let base = RequestContext::from_headers(transport, headers);
        if trimmed.first() == Some(&b'[') {
            let batch = match serde_json::from_slice::<Vec<RpcRequest>>(trimmed) {
                Ok(batch) if !batch.is_empty() => batch,
                _ => {
                    return (
                        StatusCode::BAD_REQUEST,
                        RpcReply::Batch(vec![RpcResponse::failure(
                            None,
                            RpcError::invalid_request(),
                        )]),
                    );
                }
            };
            let mut out = Vec::with_capacity(batch.len());
            for req in batch {
                out.push(self.dispatch(&base, req).await);
            }
            return (StatusCode::OK, RpcReply::Batch(out));
        }

        match serde_json::from_slice::<RpcRequest>(trimmed) {
            Ok(req) => (StatusCode::OK, RpcReply::Single(self.dispatch(&base, req).await)),
            Err(e) => {
                debug!(error = %e, "Malformed RPC request");
                (
                    StatusCode::BAD_REQUEST,
                    RpcReply::Single(RpcResponse::failure(None, RpcError::invalid_request())),
                )
            }
        }
    }

    /// Dispatches one request and wraps the outcome with the request id.
    pub async fn dispatch(&self, base: &RequestContext, req: RpcRequest) -> RpcResponse {
        let transport = base.transport;
        let outcome = self.call(base.clone(), &req.method, req.params).await;
        let label = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            "applet_rpc_requests_total",
            "transport" => transport.as_str(),
            "outcome" => label
        )
        .increment(1);
        match outcome {
            Ok(result) => RpcResponse::success(req.id, result),
            Err(err) => RpcResponse::failure(req.id, err),
        }
    }

    /// Resolves and executes `method` with `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the response error for any protocol or application failure.
    pub async fn call(
        &self,
        mut ctx: RequestContext,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let name = method.trim();
        if name.is_empty() {
            return Err(RpcError::invalid_request());
        }
        let transport = ctx.transport;
        let Some(method) = self
            .registry
            .get(name)
            .filter(|m| transport.allows(m.visibility))
        else {
            debug!(method = name, %transport, "Method not found");
            return Err(RpcError::method_not_found());
        };

        if let Some(hook) = &self.pre_dispatch
            && let Err(e) = hook.before_dispatch(&ctx, &method.applet_name).await
        {
            error!(method = name, error = %e, "Pre-dispatch hook failed");
            return Err(RpcError::internal());
        }

        ctx.applet_id.clone_from(&method.applet_name);
        let execution = self.select_execution(&method, transport)?;

        middleware::run_chain(&method.def.middlewares, &mut ctx).await?;

        if let Err(e) = self
            .require_permissions(&ctx, &method.def.required_permissions)
            .await
        {
            warn!(method = name, error = %e, "RPC permission check failed");
            audit::log_audit(&AuditEvent::AccessDenied {
                user: ctx.user_id.clone().unwrap_or_default(),
                resource: method.name.clone(),
            });
            return Err(HandlerError::PermissionDenied(e.to_string()).classify());
        }

        let result = match execution {
            Execution::Native(handler) => handler.call(ctx, params).await,
            Execution::Delegated(runtime) => {
                runtime
                    .call_public_method(&ctx, &method.applet_name, &method.name, &params)
                    .await
            }
        };
        result.map_err(|e| {
            error!(method = %method.name, error = %e, "Applet RPC handler error");
            e.classify()
        })
    }

    // Internal transport always runs the native handler so operators can reach
    // native logic after the public surface moved to the secondary runtime.
    fn select_execution(
        &self,
        method: &RegisteredMethod,
        transport: Transport,
    ) -> Result<Execution, RpcError> {
        if method.visibility == Visibility::Public
            && method.target == Target::Secondary
            && transport == Transport::Public
        {
            return match &self.secondary {
                Some(runtime) => Ok(Execution::Delegated(Arc::clone(runtime))),
                None => {
                    error!(method = %method.name, "No secondary runtime configured");
                    Err(RpcError::internal())
                }
            };
        }
        method
            .handler()
            .map(|h| Execution::Native(Arc::clone(h)))
            .ok_or_else(RpcError::internal)
    }

    async fn require_permissions(
        &self,
        ctx: &RequestContext,
        required: &[String],
    ) -> Result<(), PermissionError> {
        if required.iter().all(|p| p.trim().is_empty()) {
            return Ok(());
        }
        let host = self
            .host
            .as_ref()
            .ok_or(PermissionError::MissingHostServices)?;
        let user = host
            .extract_user(ctx)
            .await
            .map_err(|_| PermissionError::Unauthenticated)?;
        permissions::require_all(user.as_ref(), required)
    }
}
