//! WebSocket bridge between live sockets and applets.

pub mod bridge;
pub mod connection;
pub mod handler;
pub mod types;

pub use bridge::WsBridge;
pub use types::{ConnectionId, OutboundFrame, OutboundPayload, SocketEvent, SocketSink, WsError};
