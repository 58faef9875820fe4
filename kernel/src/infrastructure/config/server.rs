//! Server configuration for the applet kernel.
//!
//! This module defines HTTP binding and route settings.

use serde::Deserialize;

pub(super) const DEFAULT_PUBLIC_RPC_PATH: &str = "/rpc";
pub(super) const DEFAULT_INTERNAL_RPC_PATH: &str = "/__internal/rpc";
pub(super) const DEFAULT_WS_PATH: &str = "/ws/{applet_id}";
pub(super) const DEFAULT_WS_CONTROL_PATH: &str = "/__internal/ws";
pub(super) const DEFAULT_MAX_BODY_BYTES: u64 = 1 << 20;

/// Server binding settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path of the public RPC surface.
    pub public_rpc_path: String,
    /// Path of the internal RPC surface.
    pub internal_rpc_path: String,
    /// Socket upgrade path; must capture `{applet_id}`.
    pub ws_path: String,
    /// Path of the websocket control endpoint.
    pub ws_control_path: String,
    /// Cap on RPC request bodies.
    pub max_body_bytes: usize,
    /// Believe `x-applet-user-id`/`x-applet-permissions` on the public
    /// surface. Only safe behind an authenticating proxy that sets them.
    #[serde(default)]
    pub trust_public_identity_headers: bool,
}
