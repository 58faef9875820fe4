//! Connection registry bridging live sockets to applet logic.
//!
//! Socket lifecycle and inbound frames become `open`, `message` and `close`
//! work units for the attached [`WorkDispatcher`]. Applets push frames back
//! through [`WsBridge::send`], which only reaches connections they own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::runtime::http::encode_data;
use crate::runtime::{WorkDispatcher, WorkKind, WorkUnit};
use crate::ws::types::{ConnectionId, OutboundPayload, SocketEvent, SocketSink, WsError};

/// Upper bound on a single event dispatch.
pub const EVENT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

struct ConnectionEntry {
    applet_id: String,
    tenant_id: String,
    sink: Arc<dyn SocketSink>,
}

/// Tracks live sockets per applet and tenant.
pub struct WsBridge {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    runtime: Option<Arc<dyn WorkDispatcher>>,
    dispatch_timeout: Duration,
}

impl WsBridge {
    /// Creates a bridge that tracks connections without dispatching events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            runtime: None,
            dispatch_timeout: EVENT_DISPATCH_TIMEOUT,
        }
    }

    /// Attaches the dispatcher receiving socket events.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn WorkDispatcher>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Overrides the event dispatch timeout.
    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Tracks a new socket and announces it to the applet.
    ///
    /// The connection stays tracked even if the `open` dispatch fails.
    pub async fn add_connection(
        &self,
        applet_id: &str,
        tenant_id: &str,
        sink: Arc<dyn SocketSink>,
    ) -> ConnectionId {
        let id = ConnectionId::generate();
        self.connections.write().insert(
            id,
            ConnectionEntry {
                applet_id: applet_id.to_string(),
                tenant_id: tenant_id.to_string(),
                sink,
            },
        );
        metrics::gauge!("applet_ws_connections").increment(1.0);
        info!(connection_id = %id, applet = applet_id, tenant_id, "WebSocket connection tracked");

        self.dispatch_event(applet_id, tenant_id, id, SocketEvent::Open, None)
            .await;
        id
    }

    /// Stops tracking a socket, then announces the close to the applet.
    pub async fn remove_connection(&self, id: ConnectionId) {
        let Some(entry) = self.connections.write().remove(&id) else {
            return;
        };
        metrics::gauge!("applet_ws_connections").decrement(1.0);
        info!(connection_id = %id, applet = %entry.applet_id, "WebSocket connection released");

        self.dispatch_event(&entry.applet_id, &entry.tenant_id, id, SocketEvent::Close, None)
            .await;
    }

    /// Forwards an inbound frame. Unknown connections are ignored.
    pub async fn dispatch_message(&self, id: ConnectionId, data: &[u8]) {
        let owner = self
            .connections
            .read()
            .get(&id)
            .map(|entry| (entry.applet_id.clone(), entry.tenant_id.clone()));
        let Some((applet_id, tenant_id)) = owner else {
            debug!(connection_id = %id, "Dropping frame for unknown connection");
            return;
        };
        self.dispatch_event(&applet_id, &tenant_id, id, SocketEvent::Message, Some(data))
            .await;
    }

    /// Writes `payload` to a connection owned by `applet_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown, belongs to another
    /// applet, or the write fails.
    pub async fn send(
        &self,
        applet_id: &str,
        id: ConnectionId,
        payload: OutboundPayload,
    ) -> Result<(), WsError> {
        let sink = {
            let connections = self.connections.read();
            let entry = connections
                .get(&id)
                .ok_or_else(|| WsError::UnknownConnection(id.to_string()))?;
            if entry.applet_id != applet_id {
                warn!(connection_id = %id, applet = applet_id, owner = %entry.applet_id, "Rejected send to foreign connection");
                return Err(WsError::OwnershipMismatch {
                    connection: id.to_string(),
                    applet: applet_id.to_string(),
                });
            }
            Arc::clone(&entry.sink)
        };
        sink.send(payload.into_frame()?).await
    }

    async fn dispatch_event(
        &self,
        applet_id: &str,
        tenant_id: &str,
        id: ConnectionId,
        event: SocketEvent,
        data: Option<&[u8]>,
    ) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let mut params = Map::new();
        params.insert("connectionId".into(), Value::String(id.to_string()));
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            params.insert("dataBase64".into(), Value::String(encode_data(data)));
        }
        let unit = WorkUnit {
            kind: WorkKind::SocketEvent,
            applet_id: applet_id.to_string(),
            tenant_id: tenant_id.to_string(),
            unit_id: id.to_string(),
            method: event.as_str().to_string(),
            params: Value::Object(params),
        };

        match tokio::time::timeout(self.dispatch_timeout, runtime.dispatch(unit)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(connection_id = %id, applet = applet_id, %event, error = %e, "WebSocket event dispatch failed");
            }
            Err(_) => {
                warn!(connection_id = %id, applet = applet_id, %event, "WebSocket event dispatch timed out");
            }
        }
    }
}

impl Default for WsBridge {
    fn default() -> Self {
        Self::new()
    }
}
