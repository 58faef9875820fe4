//! WebSocket upgrade route and the applet control endpoint.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State, ws::WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tracing::{info, warn};

use crate::host::EngineState;
use crate::rpc::context::{TENANT_ID_HEADER, header_value};
use crate::ws::bridge::WsBridge;
use crate::ws::connection::Connection;
use crate::ws::types::{ConnectionId, OutboundPayload, WsError};

const SEND_EVENT: &str = "send";

/// Body of a control request from an applet runtime.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    /// Applet asking to send.
    #[serde(default)]
    pub applet_id: String,
    /// Target connection.
    #[serde(default)]
    pub connection_id: String,
    /// Requested operation; only `send` is supported.
    #[serde(default)]
    pub event: String,
    /// Base64 encoded frame payload.
    #[serde(default)]
    pub data_base64: String,
}

/// Handles WebSocket upgrade requests for one applet.
pub async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    Path(applet_id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<EngineState>>,
) -> Response {
    let applet_id = applet_id.trim().to_string();
    if !state.registry().applets().contains(&applet_id) {
        return (StatusCode::NOT_FOUND, "unknown applet").into_response();
    }
    let tenant_id = header_value(&headers, TENANT_ID_HEADER).unwrap_or_default();
    info!(applet = %applet_id, tenant_id = %tenant_id, "WebSocket upgrade requested");

    let bridge = Arc::clone(state.bridge());
    ws.on_upgrade(move |socket| async move {
        let connection = Connection::open(socket, bridge, &applet_id, &tenant_id).await;
        let id = connection.id();
        if let Err(e) = connection.run().await {
            warn!(connection_id = %id, error = %e, "WebSocket connection error");
        }
    })
}

/// Handles a control request, answering `202` once the frame is written.
pub async fn handle_control(State(state): State<Arc<EngineState>>, body: Bytes) -> Response {
    match apply_control(state.bridge(), &body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            warn!(error = %e, "WebSocket control request rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// Parses and executes a control request against `bridge`.
///
/// # Errors
///
/// Returns an error for a malformed body, an unsupported event, or a failed
/// send.
pub async fn apply_control(bridge: &WsBridge, body: &[u8]) -> Result<(), WsError> {
    let req: ControlRequest =
        serde_json::from_slice(body).map_err(|e| WsError::InvalidPayload(e.to_string()))?;
    if req.event.trim() != SEND_EVENT {
        return Err(WsError::UnsupportedEvent(req.event));
    }
    let applet_id = req.applet_id.trim();
    if applet_id.is_empty() {
        return Err(WsError::InvalidPayload("appletId is required".into()));
    }
    let id = ConnectionId::parse(&req.connection_id)
        .ok_or_else(|| WsError::UnknownConnection(req.connection_id.clone()))?;
    let data = BASE64
        .decode(req.data_base64.trim())
        .map_err(|e| WsError::InvalidPayload(format!("dataBase64: {e}")))?;

    bridge
        .send(applet_id, id, OutboundPayload::from_bytes(data))
        .await
}

/// Creates the upgrade and control routes.
pub fn routes(ws_path: &str, control_path: &str) -> Router<Arc<EngineState>> {
    Router::new()
        .route(ws_path, get(handle_ws_upgrade))
        .route(control_path, post(handle_control))
}
