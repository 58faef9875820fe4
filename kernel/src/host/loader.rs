//! Startup loading of configured applets.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use tracing::info;

use crate::infrastructure::audit::{self, AuditEvent};
use crate::infrastructure::config::AppletSettings;
use crate::jobs::{CronEvaluator, JobStore, register_job_methods};
use crate::rpc::{MethodDef, Registry, Target};
use crate::runtime::{HttpAppletRuntime, RemoteMethod};

/// Registers everything one configured applet exposes.
///
/// That is its job methods, its runtime endpoint and the public methods the
/// runtime serves. A non-native `public_target` is then applied to every
/// public method of the applet and audited.
///
/// # Errors
///
/// Returns an error if the runtime URL is invalid, public methods are declared
/// without a runtime, or a registration is rejected.
pub fn load_applet(
    applet: &AppletSettings,
    registry: &Registry,
    store: &JobStore,
    cron: &Arc<dyn CronEvaluator>,
    http_runtime: &Arc<HttpAppletRuntime>,
) -> Result<()> {
    register_job_methods(registry, &applet.name, store, cron)?;

    match applet.runtime_url.as_deref() {
        Some(raw) => {
            let url = Url::parse(raw)
                .with_context(|| format!("Invalid runtime URL for applet '{}'", applet.name))?;
            http_runtime.register_applet(applet.name.clone(), url);
        }
        None if !applet.public_methods.is_empty() => {
            bail!(
                "Applet '{}' declares public methods but has no runtime_url",
                applet.name
            );
        }
        None => {}
    }

    for method in &applet.public_methods {
        let def = method.permissions.iter().fold(
            MethodDef::new(RemoteMethod::new(
                Arc::clone(http_runtime),
                applet.name.clone(),
                method.name.clone(),
            )),
            |def, permission| def.require_permission(permission.clone()),
        );
        registry
            .register_public(&applet.name, &method.name, def)
            .with_context(|| format!("Failed to register '{}'", method.name))?;
    }

    if applet.public_target != Target::Native {
        let methods = registry.set_public_target_for_applet(&applet.name, applet.public_target);
        audit::log_audit(&AuditEvent::AppletRetargeted {
            applet: applet.name.clone(),
            target: applet.public_target.as_str().to_string(),
            methods,
        });
    }

    info!(
        applet = %applet.name,
        methods = registry.list_for_applet(&applet.name).len(),
        "Applet loaded"
    );
    Ok(())
}
