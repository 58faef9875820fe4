//! HTTP endpoints for the public and internal RPC surfaces.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use http_body_util::LengthLimitError;
use tracing::debug;

use crate::host::EngineState;
use crate::rpc::envelope::{RpcError, RpcReply, RpcResponse};
use crate::rpc::{Dispatcher, Transport};

/// RPC routes mounted at the given paths. Only `POST` is routed, so other
/// verbs answer `405`.
pub fn routes(public_path: &str, internal_path: &str) -> Router<Arc<EngineState>> {
    Router::new()
        .route(public_path, post(public_rpc))
        .route(internal_path, post(internal_rpc))
}

async fn public_rpc(
    State(state): State<Arc<EngineState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    serve(state.dispatcher(), Transport::Public, &headers, body).await
}

async fn internal_rpc(
    State(state): State<Arc<EngineState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    serve(state.dispatcher(), Transport::Internal, &headers, body).await
}

async fn serve(
    dispatcher: &Dispatcher,
    transport: Transport,
    headers: &HeaderMap,
    body: Body,
) -> Response {
    let limit = dispatcher.max_body_bytes();
    if declared_length(headers).is_some_and(|len| len > limit) {
        return reply(Dispatcher::oversize_reply());
    }
    let bytes = match to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) if exceeded_limit(&e) => return reply(Dispatcher::oversize_reply()),
        Err(e) => {
            debug!(error = %e, "Failed to read RPC body");
            return reply((
                StatusCode::BAD_REQUEST,
                RpcReply::Single(RpcResponse::failure(None, RpcError::invalid_request())),
            ));
        }
    };
    reply(dispatcher.handle_payload(transport, headers, &bytes).await)
}

fn reply((status, body): (StatusCode, RpcReply)) -> Response {
    (status, Json(body)).into_response()
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}
