//! HTTP client for applet runtimes running out of process.
//!
//! Each applet registers a base URL. The runtime serves three endpoints
//! below it: `__public_rpc` for delegated public methods, `__job` for job
//! work and `__ws` for socket events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::RwLock;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{RuntimeError, SecondaryRuntime, WorkDispatcher, WorkKind, WorkUnit};
use crate::rpc::context::{
    APPLET_ID_HEADER, REQUEST_ID_HEADER, RequestContext, TENANT_ID_HEADER, USER_ID_HEADER,
};
use crate::rpc::envelope::{ErrorCode, JSONRPC_VERSION, RpcError};
use crate::rpc::error::HandlerError;
use crate::rpc::registry::MethodHandler;

const PUBLIC_RPC_ENDPOINT: &str = "__public_rpc";
const JOB_ENDPOINT: &str = "__job";
const WS_ENDPOINT: &str = "__ws";
const FORWARD_REQUEST_ID: &str = "kernel-forward";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// Permission assertions from public callers are never relayed.
const FORWARDED_HEADERS: [&str; 3] = [TENANT_ID_HEADER, USER_ID_HEADER, REQUEST_ID_HEADER];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobPayload<'a> {
    job_id: &'a str,
    method: &'a str,
    params: &'a Value,
    applet: &'a str,
    tenant_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SocketEventPayload<'a> {
    applet_id: &'a str,
    tenant_id: &'a str,
    connection_id: &'a str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_base64: Option<&'a str>,
}

#[derive(Deserialize)]
struct PublicRpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Option<Value>,
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        let code = match err.code {
            Value::Number(n) => n.as_i64().map_or_else(|| ErrorCode::app(n.to_string()), ErrorCode::Protocol),
            Value::String(s) if !s.trim().is_empty() => ErrorCode::App(s),
            _ => ErrorCode::app("error"),
        };
        let message = if err.message.trim().is_empty() {
            "request failed".to_string()
        } else {
            err.message
        };
        RpcError {
            code,
            message,
            details: err.details.filter(|d| !d.is_null()),
        }
    }
}

/// Client for applet runtimes reachable over HTTP.
pub struct HttpAppletRuntime {
    client: Client,
    timeout: Duration,
    endpoints: RwLock<HashMap<String, Url>>,
}

impl HttpAppletRuntime {
    /// Creates a runtime client with no registered applets.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Creates a runtime client using `client`.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers (or replaces) the base URL of `applet`'s runtime.
    pub fn register_applet(&self, applet: impl Into<String>, mut base_url: Url) {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let applet = applet.into();
        debug!(applet = %applet, url = %base_url, "Registered applet runtime");
        self.endpoints.write().insert(applet, base_url);
    }

    /// Returns whether `applet` has a registered runtime.
    #[must_use]
    pub fn has_applet(&self, applet: &str) -> bool {
        self.endpoints.read().contains_key(applet)
    }

    fn endpoint(&self, applet: &str, path: &str) -> Result<Url, RuntimeError> {
        let endpoints = self.endpoints.read();
        let base = endpoints
            .get(applet)
            .ok_or_else(|| RuntimeError::NotConfigured(applet.to_string()))?;
        base.join(path)
            .map_err(|_| RuntimeError::NotConfigured(applet.to_string()))
    }

    async fn post<T: Serialize + Sync>(
        &self,
        applet: &str,
        path: &'static str,
        headers: HeaderMap,
        body: &T,
    ) -> Result<reqwest::Response, RuntimeError> {
        let url = self.endpoint(applet, path)?;
        let res = self
            .client
            .post(url)
            .timeout(self.timeout)
            .headers(headers)
            .json(body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            warn!(applet, endpoint = path, status = status.as_u16(), "Applet runtime rejected request");
            return Err(RuntimeError::Status {
                endpoint: path,
                status: status.as_u16(),
            });
        }
        Ok(res)
    }

    async fn dispatch_job(&self, unit: &WorkUnit) -> Result<(), RuntimeError> {
        let payload = JobPayload {
            job_id: &unit.unit_id,
            method: &unit.method,
            params: &unit.params,
            applet: &unit.applet_id,
            tenant_id: &unit.tenant_id,
        };
        let headers = work_headers(&unit.tenant_id, &format!("job-{}", unit.unit_id));
        self.post(&unit.applet_id, JOB_ENDPOINT, headers, &payload)
            .await
            .map(drop)
    }

    async fn dispatch_socket_event(&self, unit: &WorkUnit) -> Result<(), RuntimeError> {
        let data = unit
            .params
            .get("dataBase64")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty());
        let payload = SocketEventPayload {
            applet_id: &unit.applet_id,
            tenant_id: &unit.tenant_id,
            connection_id: &unit.unit_id,
            event: &unit.method,
            data_base64: data,
        };
        let headers = work_headers(&unit.tenant_id, &format!("ws-{}", unit.unit_id));
        self.post(&unit.applet_id, WS_ENDPOINT, headers, &payload)
            .await
            .map(drop)
    }
}

impl Default for HttpAppletRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes raw socket bytes the way runtime endpoints expect them.
#[must_use]
pub fn encode_data(data: &[u8]) -> String {
    BASE64.encode(data)
}

fn work_headers(tenant_id: &str, request_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, TENANT_ID_HEADER, tenant_id);
    insert_header(&mut headers, REQUEST_ID_HEADER, request_id);
    headers
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if value.trim().is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn forwarded_headers(ctx: &RequestContext, applet_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, APPLET_ID_HEADER, applet_id);
    for name in FORWARDED_HEADERS {
        if let Some(value) = ctx.headers.get(name) {
            headers.insert(HeaderName::from_static(name), value.clone());
        }
    }
    for name in [header::COOKIE, header::AUTHORIZATION] {
        if let Some(value) = ctx.headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    headers
}

#[async_trait]
impl SecondaryRuntime for HttpAppletRuntime {
    async fn call_public_method(
        &self,
        ctx: &RequestContext,
        applet_id: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, HandlerError> {
        let body = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": FORWARD_REQUEST_ID,
            "method": method,
            "params": params,
        });
        let res = self
            .post(applet_id, PUBLIC_RPC_ENDPOINT, forwarded_headers(ctx, applet_id), &body)
            .await
            .map_err(|e| HandlerError::Other(e.into()))?;
        let bytes = res
            .bytes()
            .await
            .map_err(|e| HandlerError::Other(RuntimeError::from(e).into()))?;
        let reply: PublicRpcReply = serde_json::from_slice(&bytes)
            .map_err(|e| HandlerError::Other(RuntimeError::Decode(e).into()))?;
        match reply.error {
            Some(err) => Err(HandlerError::Remote(err.into())),
            None => Ok(reply.result),
        }
    }
}

/// Method handler whose logic lives in an applet runtime.
///
/// Lets a runtime-served public method answer on the internal transport too,
/// where the dispatcher always executes the registered handler.
pub struct RemoteMethod {
    runtime: Arc<HttpAppletRuntime>,
    applet_id: String,
    method: String,
}

impl RemoteMethod {
    /// Creates a handler forwarding `method` to `applet_id`'s runtime.
    pub fn new(
        runtime: Arc<HttpAppletRuntime>,
        applet_id: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            applet_id: applet_id.into(),
            method: method.into(),
        }
    }
}

#[async_trait]
impl MethodHandler for RemoteMethod {
    async fn call(&self, ctx: RequestContext, params: Value) -> Result<Value, HandlerError> {
        self.runtime
            .call_public_method(&ctx, &self.applet_id, &self.method, &params)
            .await
    }
}

#[async_trait]
impl WorkDispatcher for HttpAppletRuntime {
    async fn dispatch(&self, unit: WorkUnit) -> Result<(), RuntimeError> {
        match unit.kind {
            WorkKind::Job => self.dispatch_job(&unit).await,
            WorkKind::SocketEvent => self.dispatch_socket_event(&unit).await,
        }
    }
}
