//! Tracing Setup
//!
//! One `tracing` subscriber for the process: env-filtered fmt output, and an
//! OTLP span exporter layered on top when `OTEL_ENABLED=true`. Spans carry the
//! deployment environment tag so traces from different `ENV`s stay apart.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "true" to export traces (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: dnse-ingestion)
//! - `ENV`: Deployment environment attached to exported spans
//! - `RUST_LOG`: Extra filter directives

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "dnse-ingestion";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Directives applied on top of `RUST_LOG`. The MQTT and HTTP stacks are
/// noisy at info.
const DEFAULT_DIRECTIVES: &[&str] = &[
    "dnse_ingestion=info",
    "rumqttc=warn",
    "hyper=warn",
    "h2=warn",
    "reqwest=warn",
];

// =============================================================================
// Config
// =============================================================================

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether spans are exported over OTLP.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name reported on spans.
    pub service_name: String,
    /// Deployment environment reported on spans.
    pub deployment_env: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            deployment_env: None,
        }
    }
}

impl TelemetryConfig {
    /// Read configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("OTEL_ENABLED").is_ok_and(|v| v.eq_ignore_ascii_case("true")),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            deployment_env: std::env::var("ENV").ok().filter(|v| !v.trim().is_empty()),
        }
    }

    fn resource(&self) -> Resource {
        let builder = Resource::builder().with_service_name(self.service_name.clone());
        match &self.deployment_env {
            Some(env) => builder
                .with_attribute(KeyValue::new("deployment.environment", env.clone()))
                .build(),
            None => builder.build(),
        }
    }
}

// =============================================================================
// Init
// =============================================================================

/// Flushes and shuts down the span exporter when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shut down tracer provider: {e}");
        }
    }
}

/// Initialize telemetry from the environment.
///
/// Keep the guard alive for the lifetime of the process.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with explicit configuration.
///
/// An exporter that cannot be built is reported once logging is up; the
/// process continues with stdout logging only.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let (tracer_provider, exporter_error) = if config.enabled {
        match build_tracer_provider(&config) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        }
    } else {
        (None, None)
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(otel_layer)
        .init();

    if let Some(error) = exporter_error {
        tracing::warn!(
            error = %error,
            endpoint = %config.otlp_endpoint,
            "OTLP exporter unavailable, logging to stdout only"
        );
    }

    TelemetryGuard { tracer_provider }
}

fn build_tracer_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider, String> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| e.to_string())?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .build())
}

fn env_filter() -> EnvFilter {
    default_directives()
        .into_iter()
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

fn default_directives() -> Vec<Directive> {
    DEFAULT_DIRECTIVES
        .iter()
        .filter_map(|d| d.parse().ok())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
