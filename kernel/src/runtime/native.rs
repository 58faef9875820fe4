//! In-process work dispatch.
//!
//! Jobs and socket events for applets without an external runtime are run
//! as internal-transport calls against the [`Dispatcher`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{HttpAppletRuntime, RuntimeError, WorkDispatcher, WorkKind, WorkUnit};
use crate::rpc::context::RequestContext;
use crate::rpc::envelope::{ErrorCode, METHOD_NOT_FOUND};
use crate::rpc::{Dispatcher, Transport};

/// Runs work units as internal RPC calls.
///
/// Jobs call their stored method. Socket events call `<applet>.ws.<event>`
/// and are skipped when the applet registered no such method.
pub struct NativeWorkDispatcher {
    dispatcher: Arc<Dispatcher>,
}

impl NativeWorkDispatcher {
    /// Creates a dispatcher calling through `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// Method name receiving socket `event` for `applet`.
#[must_use]
pub fn socket_event_method(applet: &str, event: &str) -> String {
    format!("{applet}.ws.{event}")
}

#[async_trait]
impl WorkDispatcher for NativeWorkDispatcher {
    async fn dispatch(&self, unit: WorkUnit) -> Result<(), RuntimeError> {
        let (method, request_id) = match unit.kind {
            WorkKind::Job => (unit.method.clone(), format!("job-{}", unit.unit_id)),
            WorkKind::SocketEvent => (
                socket_event_method(&unit.applet_id, &unit.method),
                format!("ws-{}", unit.unit_id),
            ),
        };
        let mut ctx = RequestContext::new(Transport::Internal).with_request_id(request_id);
        if !unit.tenant_id.is_empty() {
            ctx = ctx.with_tenant(unit.tenant_id.clone());
        }

        match self.dispatcher.call(ctx, &method, unit.params).await {
            Ok(_) => Ok(()),
            Err(err)
                if unit.kind == WorkKind::SocketEvent
                    && err.code == ErrorCode::Protocol(METHOD_NOT_FOUND) =>
            {
                debug!(method = %method, "No socket event handler registered");
                Ok(())
            }
            Err(err) => Err(RuntimeError::Handler(format!(
                "{} ({})",
                err.message,
                err.code.label()
            ))),
        }
    }
}

/// Sends work to the applet's HTTP runtime when one is registered and runs
/// it natively otherwise.
pub struct RoutingWorkDispatcher {
    native: Arc<dyn WorkDispatcher>,
    http: Arc<HttpAppletRuntime>,
}

impl RoutingWorkDispatcher {
    /// Creates a router over both dispatch targets.
    #[must_use]
    pub fn new(native: Arc<dyn WorkDispatcher>, http: Arc<HttpAppletRuntime>) -> Self {
        Self { native, http }
    }
}

#[async_trait]
impl WorkDispatcher for RoutingWorkDispatcher {
    async fn dispatch(&self, unit: WorkUnit) -> Result<(), RuntimeError> {
        if self.http.has_applet(&unit.applet_id) {
            self.http.dispatch(unit).await
        } else {
            self.native.dispatch(unit).await
        }
    }
}
