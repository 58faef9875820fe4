//! Logging and trace export setup.
//!
//! Logs are JSON lines filtered by `RUST_LOG` (falling back to the builder's
//! level). When an OTLP endpoint is configured, spans are also exported over
//! gRPC. Audit events always pass the filter.

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchSpanProcessor, Sampler, SdkTracerProvider};
use opentelemetry_sdk::{Resource, propagation::TraceContextPropagator};
use opentelemetry_semantic_conventions::resource;
use tracing::warn;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::infrastructure::config::TelemetrySettings;

/// Keeps the trace pipeline alive; flushes pending spans when dropped.
#[derive(Default)]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            warn!(error = %e, "Trace provider shutdown failed");
        }
    }
}

/// Builder for setting up logging and tracing.
pub struct TelemetryBuilder {
    service_name: String,
    service_version: String,
    otlp_endpoint: Option<String>,
    log_level: String,
    sampling_ratio: f64,
}

impl TelemetryBuilder {
    /// Creates a builder logging at `info` with trace export disabled.
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            otlp_endpoint: None,
            log_level: "info".to_string(),
            sampling_ratio: 1.0,
        }
    }

    /// Creates a builder from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &TelemetrySettings, service_version: &str) -> Self {
        let builder = Self::new(settings.service_name.clone(), service_version)
            .with_sampling_ratio(settings.sampling_ratio);
        match settings.otlp_endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => builder.with_tracing(endpoint),
            _ => builder,
        }
    }

    /// Enables OTLP span export to `endpoint`.
    #[must_use]
    pub fn with_tracing(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the fallback log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Sets the trace sampling ratio, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_sampling_ratio(mut self, ratio: f64) -> Self {
        self.sampling_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    fn filter(&self) -> EnvFilter {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));
        match "audit=info".parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    }

    fn tracer_provider(&self, endpoint: &str) -> Result<SdkTracerProvider> {
        let resource = Resource::builder()
            .with_attributes(vec![
                opentelemetry::KeyValue::new(resource::SERVICE_NAME, self.service_name.clone()),
                opentelemetry::KeyValue::new(
                    resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .context("Failed to build OTLP span exporter")?;

        Ok(SdkTracerProvider::builder()
            .with_span_processor(BatchSpanProcessor::builder(exporter).build())
            .with_resource(resource)
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.sampling_ratio,
            ))))
            .build())
    }

    /// Installs the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The OTLP span exporter cannot be built
    /// - A global subscriber is already installed
    pub fn init(self) -> Result<TelemetryGuard> {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

        let fmt_layer = fmt::layer().json().with_span_events(FmtSpan::CLOSE).boxed();
        let registry = Registry::default().with(self.filter()).with(fmt_layer);

        let Some(endpoint) = self.otlp_endpoint.as_deref() else {
            registry.try_init().context("Failed to init subscriber")?;
            return Ok(TelemetryGuard::default());
        };

        let provider = self.tracer_provider(endpoint)?;
        opentelemetry::global::set_tracer_provider(provider.clone());
        let tracer = provider.tracer(self.service_name.clone());

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .context("Failed to init subscriber")?;

        Ok(TelemetryGuard {
            provider: Some(provider),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_without_endpoint_disable_export() {
        let settings = TelemetrySettings {
            service_name: "applet-kernel".into(),
            otlp_endpoint: Some("   ".into()),
            sampling_ratio: 4.0,
        };
        let builder = TelemetryBuilder::from_settings(&settings, "0.1.0");
        assert_eq!(builder.otlp_endpoint, None);
        assert!((builder.sampling_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn settings_with_endpoint_enable_export() {
        let settings = TelemetrySettings {
            service_name: "applet-kernel".into(),
            otlp_endpoint: Some("http://collector:4317".into()),
            sampling_ratio: 0.25,
        };
        let builder = TelemetryBuilder::from_settings(&settings, "0.1.0");
        assert_eq!(builder.otlp_endpoint.as_deref(), Some("http://collector:4317"));
    }
}
