//! Applet RPC: method registry, dispatcher and HTTP surfaces.
//!
//! Methods are registered in-process by applet loaders and addressed by a
//! dot-namespaced name (`<applet>.<method>`). Requests arrive over a
//! [`Transport`] that decides which methods are reachable.

pub mod context;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod http;
pub mod middleware;
pub mod registry;
pub mod transport;

pub use context::RequestContext;
pub use dispatcher::{Dispatcher, PreDispatchHook};
pub use envelope::{ErrorCode, RpcError, RpcReply, RpcRequest, RpcResponse};
pub use error::{ClassifiedError, HandlerError};
pub use middleware::{Middleware, MiddlewareDecision};
pub use registry::{
    MethodDef, MethodHandler, RegisteredMethod, Registry, RegistryError, Target, Visibility,
};
pub use transport::Transport;
