//! HTTP server assembly: RPC surfaces, websocket routes and the control plane.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

use crate::host::EngineState;
use crate::infrastructure::config::{BindAddress, ServerSettings};
use crate::{rpc, ws};

async fn health_live() -> &'static str {
    "OK"
}

async fn health_ready(State(state): State<Arc<EngineState>>) -> (StatusCode, &'static str) {
    match state.ready().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
        }
    }
}

/// Builds the full router over `state`.
///
/// `/metrics` is only mounted when a Prometheus handle is supplied.
pub fn build_router(
    settings: &ServerSettings,
    state: Arc<EngineState>,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let mut control_plane = Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready));

    if let Some(handle) = metrics {
        control_plane =
            control_plane.route("/metrics", get(move || std::future::ready(handle.render())));
    }

    control_plane
        .merge(rpc::http::routes(
            &settings.public_rpc_path,
            &settings.internal_rpc_path,
        ))
        .merge(ws::handler::routes(
            &settings.ws_path,
            &settings.ws_control_path,
        ))
        .with_state(state)
}

/// Serves `app` on the configured address until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address is invalid, the listener cannot bind, or
/// the server fails while running.
pub async fn run_server(
    settings: &ServerSettings,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = BindAddress(settings.host.clone(), settings.port).to_socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "Applet kernel listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
