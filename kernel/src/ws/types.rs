//! Domain types for the websocket bridge.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id received from an applet runtime.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }

    /// Underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Socket lifecycle events delivered to applets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    /// A socket was accepted.
    Open,
    /// A client frame arrived.
    Message,
    /// The socket went away.
    Close,
}

impl SocketEvent {
    /// Event name as applets see it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload an applet asks to push to a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    /// Sent as a text frame.
    Text(String),
    /// Sent as a binary frame.
    Binary(Bytes),
    /// Serialized to JSON and sent as a text frame.
    Json(Value),
}

impl OutboundPayload {
    /// Chooses the frame type for raw bytes: valid UTF-8 is text.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        match String::from_utf8(data) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Binary(Bytes::from(e.into_bytes())),
        }
    }

    /// Serializes the payload into a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a JSON value cannot be serialized.
    pub fn into_frame(self) -> Result<OutboundFrame, WsError> {
        match self {
            Self::Text(text) => Ok(OutboundFrame::Text(text)),
            Self::Binary(data) => Ok(OutboundFrame::Binary(data)),
            Self::Json(value) => serde_json::to_string(&value)
                .map(OutboundFrame::Text)
                .map_err(WsError::Serialization),
        }
    }
}

/// A frame ready to be written to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

/// Write half of a tracked socket.
#[async_trait]
pub trait SocketSink: Send + Sync {
    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed or the write fails.
    async fn send(&self, frame: OutboundFrame) -> Result<(), WsError>;
}

/// Errors raised by the websocket layer.
#[derive(Debug, Error)]
pub enum WsError {
    /// Socket transport failure.
    #[error("WebSocket connection error: {0}")]
    AxumWs(#[from] axum::Error),

    /// A JSON frame could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// No live connection has this id.
    #[error("websocket connection not found: {0}")]
    UnknownConnection(String),

    /// The connection belongs to another applet.
    #[error("websocket connection {connection} does not belong to applet {applet}")]
    OwnershipMismatch {
        /// Target connection.
        connection: String,
        /// Applet that asked to send.
        applet: String,
    },

    /// Malformed control request.
    #[error("invalid control payload: {0}")]
    InvalidPayload(String),

    /// Control request named an event other than `send`.
    #[error("unsupported websocket event: {0}")]
    UnsupportedEvent(String),

    /// The client closed the socket.
    #[error("Connection closed by client")]
    ClientDisconnected,
}
