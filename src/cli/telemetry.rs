//! Log output plus optional OTLP trace export.

use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use std::{env, sync::OnceLock, time::Duration};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

// Crates that are noisy below these levels.
const QUIET: [&str; 4] = [
    "hyper=error",
    "tokio=error",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

static PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Collector address from the environment; a bare `host:port` gets `http://`.
fn otlp_endpoint() -> Option<String> {
    let endpoint = env::var(OTLP_ENDPOINT).ok()?;
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return None;
    }
    if endpoint.contains("://") {
        Some(endpoint.to_string())
    } else {
        Some(format!("http://{endpoint}"))
    }
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    for directive in QUIET {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

fn tracer_provider(endpoint: String) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    let resource = Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", Ulid::new().to_string()),
        ])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// Install the global subscriber. `None` logs at ERROR; `RUST_LOG` overrides.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a subscriber is
/// already installed
pub fn init(level: Option<Level>) -> Result<()> {
    let filter = env_filter(level.unwrap_or(Level::ERROR))?;
    let fmt_layer = fmt::layer().with_target(false);

    let otel_layer = match otlp_endpoint() {
        Some(endpoint) => {
            let provider = tracer_provider(endpoint)?;
            global::set_tracer_provider(provider.clone());
            let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
            let _ = PROVIDER.set(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans. Does nothing when export is disabled.
pub fn shutdown_tracer() {
    if let Some(provider) = PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown: {err}");
        }
    }
}
