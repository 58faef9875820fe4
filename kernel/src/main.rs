//! Applet kernel binary.

use std::sync::Arc;

use applet_kernel::host::{EngineState, TrustedHeaderHostServices, load_applet};
use applet_kernel::infrastructure::{
    audit::{self, AuditEvent},
    config::Settings,
    server,
    telemetry::TelemetryBuilder,
};
use applet_kernel::jobs::{CronCrateEvaluator, CronEvaluator, JobRunner, JobStore};
use applet_kernel::rpc::{Dispatcher, Registry};
use applet_kernel::runtime::{HttpAppletRuntime, NativeWorkDispatcher, RoutingWorkDispatcher};
use applet_kernel::ws::WsBridge;
use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::ExposeSecret;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::new().expect("Failed to load configuration");

    let _telemetry = TelemetryBuilder::from_settings(&config.telemetry, env!("CARGO_PKG_VERSION"))
        .init()
        .expect("Failed to initialize telemetry");

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))?;

    info!("Applet Kernel Starting...");
    audit::log_audit(&AuditEvent::SystemStartup {
        component: "kernel".into(),
    });

    let pool = SqlitePoolOptions::new()
        .connect(config.database.url.expose_secret())
        .await?;
    let store = JobStore::new(pool.clone());
    store.migrate().await?;

    let registry = Arc::new(Registry::new());
    let cron: Arc<dyn CronEvaluator> = Arc::new(CronCrateEvaluator);
    let http_runtime = Arc::new(HttpAppletRuntime::new());

    for applet in &config.applets {
        load_applet(applet, &registry, &store, &cron, &http_runtime)?;
    }

    let dispatcher = Arc::new(
        Dispatcher::new(
            Arc::clone(&registry),
            Some(Arc::new(
                TrustedHeaderHostServices::new()
                    .trusting_public(config.server.trust_public_identity_headers),
            )),
        )
        .with_max_body_bytes(config.server.max_body_bytes)
        .with_secondary_runtime(http_runtime.clone()),
    );

    let work = Arc::new(RoutingWorkDispatcher::new(
        Arc::new(NativeWorkDispatcher::new(Arc::clone(&dispatcher))),
        http_runtime,
    ));
    let bridge = Arc::new(WsBridge::new().with_runtime(work.clone()));

    info!(
        applets = ?registry.applets(),
        public = registry.count_public(),
        server_only = registry.count_server_only(),
        "Registry loaded"
    );

    let shutdown = CancellationToken::new();
    let runner = if config.jobs.enabled {
        let runner = JobRunner::new(store, work, cron).with_interval(config.jobs.poll_interval());
        Some(tokio::spawn(runner.run(shutdown.clone())))
    } else {
        info!("Job runner disabled");
        None
    };

    let state = Arc::new(EngineState::new(dispatcher, bridge).with_db(pool));
    let app = server::build_router(&config.server, state, Some(metrics));

    let server_shutdown = shutdown.clone();
    let server_config = config.server.clone();
    let server = tokio::spawn(async move {
        if let Err(e) =
            server::run_server(&server_config, app, server_shutdown.cancelled_owned()).await
        {
            error!("Server failed: {:?}", e);
        }
    });

    info!("Applet Kernel Initialized. Waiting for shutdown signal...");

    shutdown_signal().await;

    info!("Shutdown signal received, cleaning up...");
    audit::log_audit(&AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });

    shutdown.cancel();
    if let Some(runner) = runner
        && let Err(e) = runner.await
    {
        error!("Job runner task failed: {:?}", e);
    }
    if let Err(e) = server.await {
        error!("Server task failed: {:?}", e);
    }

    info!("Applet Kernel Shutdown Complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
