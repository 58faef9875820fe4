//! HTTP applet runtime against a mocked runtime server.

#![allow(missing_docs)]

use std::sync::Arc;

use anyhow::Result;
use applet_kernel::host::{TrustedHeaderHostServices, load_applet};
use applet_kernel::infrastructure::config::Settings;
use applet_kernel::jobs::{CronCrateEvaluator, CronEvaluator, JobStore};
use applet_kernel::rpc::{
    Dispatcher, ErrorCode, HandlerError, MethodDef, Registry, RequestContext, Target, Transport,
};
use applet_kernel::runtime::http::encode_data;
use applet_kernel::runtime::{HttpAppletRuntime, RuntimeError, WorkDispatcher, WorkKind, WorkUnit};
use axum::http::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runtime_for(server: &MockServer, applet: &str) -> Result<Arc<HttpAppletRuntime>> {
    let runtime = HttpAppletRuntime::new();
    runtime.register_applet(applet, Url::parse(&format!("{}/applets/{applet}", server.uri()))?);
    Ok(Arc::new(runtime))
}

fn delegated_dispatcher(runtime: Arc<HttpAppletRuntime>) -> Result<Dispatcher> {
    let registry = Arc::new(Registry::new());
    registry.register_public_with_target(
        "bichat",
        "bichat.ask",
        MethodDef::new(|_ctx: RequestContext, _params: Value| async move {
            Ok::<_, HandlerError>(json!("native"))
        }),
        Target::Secondary,
    )?;
    Ok(Dispatcher::new(registry, None).with_secondary_runtime(runtime))
}

fn job_unit(applet: &str) -> WorkUnit {
    WorkUnit {
        kind: WorkKind::Job,
        applet_id: applet.to_string(),
        tenant_id: "acme".to_string(),
        unit_id: "j-1".to_string(),
        method: format!("{applet}.sync"),
        params: json!({"page": 1}),
    }
}

#[tokio::test]
async fn public_call_is_forwarded_with_identity_headers() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/applets/bichat/__public_rpc"))
        .and(header("x-applet-id", "bichat"))
        .and(header("x-applet-tenant-id", "acme"))
        .and(header("x-applet-user-id", "u-7"))
        .and(header("authorization", "Bearer abc"))
        .and(body_json(json!({
            "jsonrpc": "2.0",
            "id": "kernel-forward",
            "method": "bichat.ask",
            "params": {"q": "hi"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "kernel-forward",
            "result": {"answer": 42},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = delegated_dispatcher(runtime_for(&server, "bichat")?)?;
    let mut headers = HeaderMap::new();
    headers.insert("x-applet-tenant-id", HeaderValue::from_static("acme"));
    headers.insert("x-applet-user-id", HeaderValue::from_static("u-7"));
    headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
    headers.insert("x-unrelated", HeaderValue::from_static("dropped"));
    let ctx = RequestContext::from_headers(Transport::Public, &headers);

    let result = dispatcher.call(ctx, "bichat.ask", json!({"q": "hi"})).await?;
    assert_eq!(result, json!({"answer": 42}));

    let forwarded = server.received_requests().await.unwrap_or_default();
    assert_eq!(forwarded.len(), 1);
    assert!(!forwarded[0].headers.contains_key("x-unrelated"));
    Ok(())
}

#[tokio::test]
async fn runtime_errors_are_relayed_verbatim() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/applets/bichat/__public_rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "kernel-forward",
            "error": {"code": "quota_exceeded", "message": "too many questions", "details": {"limit": 5}},
        })))
        .mount(&server)
        .await;

    let dispatcher = delegated_dispatcher(runtime_for(&server, "bichat")?)?;
    let err = dispatcher
        .call(RequestContext::new(Transport::Public), "bichat.ask", Value::Null)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.code, ErrorCode::app("quota_exceeded"));
    assert_eq!(err.message, "too many questions");
    assert_eq!(err.details, Some(json!({"limit": 5})));
    Ok(())
}

#[tokio::test]
async fn runtime_failure_status_is_generic_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/applets/bichat/__public_rpc"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let dispatcher = delegated_dispatcher(runtime_for(&server, "bichat")?)?;
    let err = dispatcher
        .call(RequestContext::new(Transport::Public), "bichat.ask", Value::Null)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.code, ErrorCode::app("error"));
    assert_eq!(err.message, "request failed");
    Ok(())
}

#[tokio::test]
async fn internal_transport_never_delegates() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = delegated_dispatcher(runtime_for(&server, "bichat")?)?;
    let result = dispatcher
        .call(RequestContext::new(Transport::Internal), "bichat.ask", Value::Null)
        .await?;
    assert_eq!(result, json!("native"));
    Ok(())
}

#[tokio::test]
async fn job_is_posted_with_tenant_and_request_id() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/applets/crm/__job"))
        .and(header("x-applet-tenant-id", "acme"))
        .and(header("x-applet-request-id", "job-j-1"))
        .and(body_json(json!({
            "jobId": "j-1",
            "method": "crm.sync",
            "params": {"page": 1},
            "applet": "crm",
            "tenantId": "acme",
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    runtime_for(&server, "crm")?.dispatch(job_unit("crm")).await?;
    Ok(())
}

#[tokio::test]
async fn job_rejection_is_a_status_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/applets/crm/__job"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = runtime_for(&server, "crm")?.dispatch(job_unit("crm")).await;
    assert!(matches!(
        err,
        Err(RuntimeError::Status { endpoint: "__job", status: 500 })
    ));
    Ok(())
}

#[tokio::test]
async fn socket_event_carries_base64_data() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/applets/chat/__ws"))
        .and(header("x-applet-request-id", "ws-c-9"))
        .and(body_json(json!({
            "appletId": "chat",
            "tenantId": "acme",
            "connectionId": "c-9",
            "event": "message",
            "dataBase64": encode_data(b"hello"),
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let unit = WorkUnit {
        kind: WorkKind::SocketEvent,
        applet_id: "chat".into(),
        tenant_id: "acme".into(),
        unit_id: "c-9".into(),
        method: "message".into(),
        params: json!({"connectionId": "c-9", "dataBase64": encode_data(b"hello")}),
    };
    runtime_for(&server, "chat")?.dispatch(unit).await?;
    Ok(())
}

#[tokio::test]
async fn unknown_applet_is_not_configured() {
    let runtime = HttpAppletRuntime::new();
    let err = runtime.dispatch(job_unit("ghost")).await;
    assert!(matches!(err, Err(RuntimeError::NotConfigured(applet)) if applet == "ghost"));
}

#[tokio::test]
async fn configured_public_method_reaches_runtime() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/applets/bichat/__public_rpc"))
        .and(header("x-applet-user-id", "u-7"))
        .and(body_json(json!({
            "jsonrpc": "2.0",
            "id": "kernel-forward",
            "method": "bichat.ask",
            "params": {"q": "hi"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "kernel-forward",
            "result": {"answer": 42},
        })))
        .expect(2)
        .mount(&server)
        .await;

    let settings = Settings::from_toml(&format!(
        r#"
        [[applets]]
        name = "bichat"
        runtime_url = "{}/applets/bichat"
        public_target = "secondary"
        public_methods = [{{ name = "bichat.ask", permissions = ["bichat.use"] }}]
        "#,
        server.uri()
    ))?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let registry = Arc::new(Registry::new());
    let cron: Arc<dyn CronEvaluator> = Arc::new(CronCrateEvaluator);
    let runtime = Arc::new(HttpAppletRuntime::new());
    load_applet(
        &settings.applets[0],
        &registry,
        &JobStore::new(pool),
        &cron,
        &runtime,
    )?;
    let dispatcher = Dispatcher::new(
        registry,
        Some(Arc::new(TrustedHeaderHostServices::new().trusting_public(true))),
    )
    .with_secondary_runtime(runtime);

    let mut headers = HeaderMap::new();
    headers.insert("x-applet-user-id", HeaderValue::from_static("u-7"));
    headers.insert("x-applet-permissions", HeaderValue::from_static("bichat.use"));

    let public = RequestContext::from_headers(Transport::Public, &headers);
    let result = dispatcher.call(public, "bichat.ask", json!({"q": "hi"})).await?;
    assert_eq!(result, json!({"answer": 42}));

    let internal = RequestContext::from_headers(Transport::Internal, &headers);
    let result = dispatcher.call(internal, "bichat.ask", json!({"q": "hi"})).await?;
    assert_eq!(result, json!({"answer": 42}));

    let anonymous = RequestContext::from_headers(Transport::Public, &HeaderMap::new());
    let denied = dispatcher.call(anonymous, "bichat.ask", json!({"q": "hi"})).await;
    assert!(matches!(denied, Err(e) if e.code == ErrorCode::app("forbidden")));
    Ok(())
}
