//! Server-only job management methods registered per applet.
//!
//! Each applet gets `<applet>.jobs.enqueue`, `.schedule`, `.list` and
//! `.cancel`, scoped to the calling tenant and the owning applet.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::jobs::cron::CronEvaluator;
use crate::jobs::store::{JobStore, JobStoreError};
use crate::jobs::types::JobKey;
use crate::rpc::context::RequestContext;
use crate::rpc::error::HandlerError;
use crate::rpc::registry::{MethodDef, Registry, RegistryError};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobParams {
    method: String,
    cron: String,
    id: String,
    params: Value,
}

impl JobParams {
    fn from_value(params: Value) -> Result<Self, HandlerError> {
        if !params.is_object() {
            return Err(HandlerError::Invalid("params must be an object".into()));
        }
        serde_json::from_value(params).map_err(|e| HandlerError::Invalid(e.to_string()))
    }

    fn method_for(&self, applet: &str) -> Result<String, HandlerError> {
        let method = self.method.trim();
        if method.is_empty() {
            return Err(HandlerError::Invalid("method is required".into()));
        }
        let owned = method
            .strip_prefix(applet)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|suffix| !suffix.is_empty());
        if !owned {
            return Err(HandlerError::Invalid(format!(
                "method '{method}' is not owned by applet '{applet}'"
            )));
        }
        Ok(method.to_string())
    }
}

fn store_error(e: JobStoreError) -> HandlerError {
    HandlerError::Internal(e.to_string())
}

fn to_json(value: &impl serde::Serialize) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::Internal(e.to_string()))
}

/// Registers the job management methods of `applet`.
///
/// # Errors
///
/// Returns an error if any of the names is already registered.
pub fn register_job_methods(
    registry: &Registry,
    applet: &str,
    store: &JobStore,
    cron: &Arc<dyn CronEvaluator>,
) -> Result<(), RegistryError> {
    let s = store.clone();
    registry.register_server_only(
        applet,
        &format!("{applet}.jobs.enqueue"),
        MethodDef::new(move |ctx: RequestContext, params: Value| {
            let store = s.clone();
            async move {
                let req = JobParams::from_value(params)?;
                let method = req.method_for(&ctx.applet_id)?;
                let record = store
                    .enqueue(ctx.tenant_or_default(), &ctx.applet_id, &method, req.params, Utc::now())
                    .await
                    .map_err(store_error)?;
                to_json(&record)
            }
        }),
    )?;

    let s = store.clone();
    let evaluator = Arc::clone(cron);
    registry.register_server_only(
        applet,
        &format!("{applet}.jobs.schedule"),
        MethodDef::new(move |ctx: RequestContext, params: Value| {
            let store = s.clone();
            let evaluator = Arc::clone(&evaluator);
            async move {
                let req = JobParams::from_value(params)?;
                let cron_expr = req.cron.trim().to_string();
                if cron_expr.is_empty() {
                    return Err(HandlerError::Invalid("cron is required".into()));
                }
                let method = req.method_for(&ctx.applet_id)?;
                let now = Utc::now();
                let next_run_at = evaluator
                    .next_run(&cron_expr, now)
                    .map_err(|e| HandlerError::Invalid(e.to_string()))?;
                let record = store
                    .schedule(
                        ctx.tenant_or_default(),
                        &ctx.applet_id,
                        &cron_expr,
                        &method,
                        req.params,
                        next_run_at,
                        now,
                    )
                    .await
                    .map_err(store_error)?;
                to_json(&record)
            }
        }),
    )?;

    let s = store.clone();
    registry.register_server_only(
        applet,
        &format!("{applet}.jobs.list"),
        MethodDef::new(move |ctx: RequestContext, _params: Value| {
            let store = s.clone();
            async move {
                let jobs = store
                    .list(ctx.tenant_or_default(), &ctx.applet_id)
                    .await
                    .map_err(store_error)?;
                to_json(&jobs)
            }
        }),
    )?;

    let s = store.clone();
    registry.register_server_only(
        applet,
        &format!("{applet}.jobs.cancel"),
        MethodDef::new(move |ctx: RequestContext, params: Value| {
            let store = s.clone();
            async move {
                let req = JobParams::from_value(params)?;
                let job_id = req.id.trim();
                if job_id.is_empty() {
                    return Err(HandlerError::Invalid("id is required".into()));
                }
                let key = JobKey {
                    tenant_id: ctx.tenant_or_default().to_string(),
                    applet_id: ctx.applet_id.clone(),
                    job_id: job_id.to_string(),
                };
                let canceled = store.cancel(&key, Utc::now()).await.map_err(store_error)?;
                Ok(json!({ "ok": canceled }))
            }
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::cron::CronCrateEvaluator;
    use crate::rpc::envelope::{ErrorCode, METHOD_NOT_FOUND};
    use crate::rpc::{Dispatcher, Transport};
    use anyhow::Result;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> Result<Dispatcher> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = JobStore::new(pool);
        store.migrate().await?;
        let registry = Arc::new(Registry::new());
        let cron: Arc<dyn CronEvaluator> = Arc::new(CronCrateEvaluator);
        register_job_methods(&registry, "crm", &store, &cron)?;
        register_job_methods(&registry, "chat", &store, &cron)?;
        Ok(Dispatcher::new(registry, None))
    }

    fn internal(tenant: &str) -> RequestContext {
        RequestContext::new(Transport::Internal).with_tenant(tenant)
    }

    #[tokio::test]
    async fn job_methods_are_server_only() -> Result<()> {
        let dispatcher = setup().await?;
        let err = dispatcher
            .call(
                RequestContext::new(Transport::Public),
                "crm.jobs.list",
                Value::Null,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Protocol(METHOD_NOT_FOUND));
        Ok(())
    }

    #[tokio::test]
    async fn enqueue_list_cancel_round() -> Result<()> {
        let dispatcher = setup().await?;
        let job = dispatcher
            .call(
                internal("t"),
                "crm.jobs.enqueue",
                json!({"method": "crm.sync", "params": {"full": true}}),
            )
            .await?;
        assert_eq!(job["type"], json!("one_off"));
        assert_eq!(job["status"], json!("queued"));
        assert_eq!(job["params"], json!({"full": true}));
        assert!(job.get("nextRunAt").is_none());

        let listed = dispatcher
            .call(internal("t"), "crm.jobs.list", Value::Null)
            .await?;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        let other_tenant = dispatcher
            .call(internal("u"), "crm.jobs.list", Value::Null)
            .await?;
        assert_eq!(other_tenant, json!([]));
        let other_applet = dispatcher
            .call(internal("t"), "chat.jobs.list", Value::Null)
            .await?;
        assert_eq!(other_applet, json!([]));

        let canceled = dispatcher
            .call(internal("t"), "crm.jobs.cancel", json!({"id": job["id"]}))
            .await?;
        assert_eq!(canceled, json!({"ok": true}));
        let missing = dispatcher
            .call(internal("t"), "crm.jobs.cancel", json!({"id": "nope"}))
            .await?;
        assert_eq!(missing, json!({"ok": false}));

        let listed = dispatcher
            .call(internal("t"), "crm.jobs.list", Value::Null)
            .await?;
        assert_eq!(listed[0]["status"], json!("canceled"));
        Ok(())
    }

    #[tokio::test]
    async fn schedule_validates_cron_up_front() -> Result<()> {
        let dispatcher = setup().await?;
        let job = dispatcher
            .call(
                internal("t"),
                "crm.jobs.schedule",
                json!({"cron": "*/10 * * * *", "method": "crm.report"}),
            )
            .await?;
        assert_eq!(job["status"], json!("scheduled"));
        assert!(job["nextRunAt"].is_string());

        let err = dispatcher
            .call(
                internal("t"),
                "crm.jobs.schedule",
                json!({"cron": "whenever", "method": "crm.report"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::app("invalid"));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_requests_are_invalid() -> Result<()> {
        let dispatcher = setup().await?;
        for (method, params) in [
            ("crm.jobs.enqueue", json!("not an object")),
            ("crm.jobs.enqueue", json!({})),
            ("crm.jobs.enqueue", json!({"method": "chat.steal"})),
            ("crm.jobs.schedule", json!({"method": "crm.report"})),
            ("crm.jobs.cancel", json!({})),
        ] {
            let err = dispatcher
                .call(internal("t"), method, params)
                .await
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::app("invalid"), "{method}");
        }
        Ok(())
    }
}
