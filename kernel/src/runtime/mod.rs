//! Work dispatch targets.
//!
//! A queued job, a scheduled tick and a socket event are all delivered to
//! applet logic through the same [`WorkDispatcher`] contract. Public RPC
//! calls for methods targeting the secondary runtime go through
//! [`SecondaryRuntime`].

pub mod http;
pub mod native;

pub use http::{HttpAppletRuntime, RemoteMethod};
pub use native::{NativeWorkDispatcher, RoutingWorkDispatcher, socket_event_method};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::rpc::context::RequestContext;
use crate::rpc::error::HandlerError;

/// What produced a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    /// A queued or scheduled job.
    Job,
    /// A websocket lifecycle or message event.
    SocketEvent,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job => write!(f, "job"),
            Self::SocketEvent => write!(f, "socket_event"),
        }
    }
}

/// One invocation of applet logic.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    /// Producer of the work.
    pub kind: WorkKind,
    /// Target applet.
    pub applet_id: String,
    /// Tenant the work belongs to.
    pub tenant_id: String,
    /// Job id or connection id.
    pub unit_id: String,
    /// Method name for jobs, event name for socket events.
    pub method: String,
    /// Opaque payload.
    pub params: Value,
}

/// Errors raised while dispatching work.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// No runtime is configured for the applet.
    #[error("applet runtime '{0}' is not configured")]
    NotConfigured(String),
    /// Transport failure talking to the runtime.
    #[error("dispatch request to applet failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Runtime answered with a non-success status.
    #[error("applet {endpoint} endpoint returned status {status}")]
    Status {
        /// Endpoint path.
        endpoint: &'static str,
        /// HTTP status.
        status: u16,
    },
    /// Runtime answered with an undecodable body.
    #[error("decode applet response: {0}")]
    Decode(#[source] serde_json::Error),
    /// The applet logic failed.
    #[error("{0}")]
    Handler(String),
    /// Dispatch did not finish in time.
    #[error("dispatch timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Capability delivering one unit of work to an applet.
#[async_trait]
pub trait WorkDispatcher: Send + Sync {
    /// Delivers the unit and waits for the applet to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails or the applet reports failure.
    async fn dispatch(&self, unit: WorkUnit) -> Result<(), RuntimeError>;
}

/// Caller for public methods executed by an applet's secondary runtime.
#[async_trait]
pub trait SecondaryRuntime: Send + Sync {
    /// Invokes `method` of `applet_id` and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error, classified for the response envelope.
    async fn call_public_method(
        &self,
        ctx: &RequestContext,
        applet_id: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, HandlerError>;
}
