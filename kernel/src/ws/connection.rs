//! Per-socket lifecycle task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info};

use crate::ws::bridge::WsBridge;
use crate::ws::types::{ConnectionId, OutboundFrame, SocketSink, WsError};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Write half of an axum socket, shared between the bridge and the task.
pub struct AxumSocketSink {
    inner: Mutex<SplitSink<WebSocket, Message>>,
}

impl AxumSocketSink {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            inner: Mutex::new(sink),
        }
    }

    async fn send_message(&self, message: Message) -> Result<(), WsError> {
        self.inner
            .lock()
            .await
            .send(message)
            .await
            .map_err(WsError::AxumWs)
    }
}

#[async_trait]
impl SocketSink for AxumSocketSink {
    async fn send(&self, frame: OutboundFrame) -> Result<(), WsError> {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text.into()),
            OutboundFrame::Binary(data) => Message::Binary(data),
        };
        self.send_message(message).await
    }
}

/// A socket tracked by the bridge for one applet and tenant.
pub struct Connection {
    id: ConnectionId,
    bridge: Arc<WsBridge>,
    stream: SplitStream<WebSocket>,
    sink: Arc<AxumSocketSink>,
}

impl Connection {
    /// Registers the socket with the bridge.
    pub async fn open(
        socket: WebSocket,
        bridge: Arc<WsBridge>,
        applet_id: &str,
        tenant_id: &str,
    ) -> Self {
        let (sink, stream) = socket.split();
        let sink = Arc::new(AxumSocketSink::new(sink));
        let id = bridge
            .add_connection(applet_id, tenant_id, sink.clone())
            .await;
        Self {
            id,
            bridge,
            stream,
            sink,
        }
    }

    /// Returns the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Pumps inbound frames into the bridge until the client goes away.
    ///
    /// The connection is always released from the bridge before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from or writing to the socket fails.
    pub async fn run(mut self) -> Result<(), WsError> {
        let result = self.pump().await;
        self.bridge.remove_connection(self.id).await;
        if result.is_ok() {
            self.graceful_close().await;
        }
        result
    }

    async fn pump(&mut self) -> Result<(), WsError> {
        let mut ping_interval = interval(PING_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                incoming = self.stream.next() => {
                    match incoming {
                        Some(Ok(msg)) => {
                            if self.handle_incoming_message(msg).await? {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => {
                            debug!(connection_id = %self.id, error = %e, "WebSocket read failed");
                            return Err(WsError::AxumWs(e));
                        }
                        None => {
                            debug!(connection_id = %self.id, "Stream ended");
                            return Ok(());
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    debug!(connection_id = %self.id, "Sending ping");
                    self.sink.send_message(Message::Ping(Bytes::new())).await?;
                }
            }
        }
    }

    async fn handle_incoming_message(&mut self, message: Message) -> Result<bool, WsError> {
        match message {
            Message::Text(text) => {
                debug!(connection_id = %self.id, len = text.len(), "Received text");
                self.bridge
                    .dispatch_message(self.id, text.as_str().as_bytes())
                    .await;
                Ok(false)
            }
            Message::Binary(data) => {
                debug!(connection_id = %self.id, len = data.len(), "Received binary");
                self.bridge.dispatch_message(self.id, &data).await;
                Ok(false)
            }
            Message::Ping(data) => {
                self.sink.send_message(Message::Pong(data)).await?;
                Ok(false)
            }
            Message::Pong(_) => Ok(false),
            Message::Close(_) => {
                info!(connection_id = %self.id, "Client initiated close");
                Ok(true)
            }
        }
    }

    async fn graceful_close(&self) {
        if let Err(e) = self.sink.send_message(Message::Close(None)).await {
            debug!(connection_id = %self.id, error = %e, "Close frame not delivered");
        }
    }
}
