//! Tracing and OpenTelemetry setup for the server and worker binaries.
//!
//! Logs always go to stderr through the fmt layer. With an OTLP endpoint,
//! spans, metrics and log records are also exported, all tagged with the
//! resource built by [`resource`].

pub mod metrics;
pub mod task;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::error::{Error, Result};

/// `service.namespace` shared by every taskq process.
pub const SERVICE_NAMESPACE: &str = "taskq";

/// Instrumentation scope of the tracer handed to `tracing-opentelemetry`.
const TRACER_SCOPE: &str = "taskq";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`. `None` means
    /// stderr only.
    pub endpoint: Option<String>,
    /// `service.name`: `taskq-server` or `taskq-worker`.
    pub service_name: String,
    /// `service.instance.id`. Workers use their worker name so their
    /// signals can be told apart in the backend.
    pub instance: Option<String>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            service_name: service_name.into(),
            instance: None,
            log_level: "info".to_string(),
        }
    }

    pub fn endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

/// Resource attached to every exported signal.
pub fn resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.namespace", SERVICE_NAMESPACE),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    if let Some(instance) = &config.instance {
        attributes.push(KeyValue::new("service.instance.id", instance.clone()));
    }

    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes(attributes)
        .build()
}

/// `RUST_LOG` when set, otherwise `fallback`.
fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn exporter_error(signal: &str, e: impl std::fmt::Display) -> Error {
    Error::Other(format!("failed to create OTLP {signal} exporter: {e}"))
}

/// The three SDK providers behind one OTLP endpoint.
struct OtlpProviders {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl OtlpProviders {
    fn build(endpoint: &str, resource: Resource) -> Result<Self> {
        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", e))?;
        let tracer = SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build();

        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", e))?;
        let meter = SdkMeterProvider::builder()
            .with_periodic_exporter(metrics)
            .with_resource(resource.clone())
            .build();

        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("log", e))?;
        let logger = SdkLoggerProvider::builder()
            .with_batch_exporter(logs)
            .with_resource(resource)
            .build();

        Ok(Self {
            tracer,
            meter,
            logger,
        })
    }

    fn force_flush(&self) {
        let _ = self.tracer.force_flush();
        let _ = self.meter.force_flush();
        let _ = self.logger.force_flush();
    }

    /// Reverse of construction order.
    fn shutdown(&self) {
        let _ = self.logger.shutdown();
        let _ = self.meter.shutdown();
        let _ = self.tracer.shutdown();
    }
}

/// Flushes and shuts down the OTLP pipelines when dropped. Hold it for the
/// life of the process.
pub struct TelemetryGuard {
    otlp: Option<OtlpProviders>,
}

impl TelemetryGuard {
    /// Whether signals are being exported over OTLP.
    pub fn is_exporting(&self) -> bool {
        self.otlp.is_some()
    }

    pub fn force_flush(&self) {
        if let Some(otlp) = &self.otlp {
            otlp.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(otlp) = self.otlp.take() {
            otlp.shutdown();
        }
    }
}

/// Install the global tracing subscriber and, with an endpoint, the global
/// meter provider.
///
/// # Errors
///
/// Fails when an exporter cannot be built or a global subscriber is
/// already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let filter = env_filter(&config.log_level);
    let registry = tracing_subscriber::registry().with(filter);

    let Some(endpoint) = config.endpoint.as_deref() else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;
        return Ok(TelemetryGuard { otlp: None });
    };

    let otlp = OtlpProviders::build(endpoint, resource(&config))?;
    opentelemetry::global::set_meter_provider(otlp.meter.clone());

    let traces = tracing_opentelemetry::layer().with_tracer(otlp.tracer.tracer(TRACER_SCOPE));
    let logs =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&otlp.logger);

    registry
        .with(tracing_subscriber::fmt::layer().compact())
        .with(traces)
        .with(logs)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    Ok(TelemetryGuard { otlp: Some(otlp) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    fn attr(resource: &Resource, key: &'static str) -> Option<Value> {
        resource.get(&Key::from_static_str(key))
    }

    #[test]
    fn worker_resource_names_its_instance() {
        let config = TelemetryConfig::new("taskq-worker").instance("gpu-01");
        let resource = resource(&config);

        assert_eq!(attr(&resource, "service.name"), Some(Value::from("taskq-worker")));
        assert_eq!(attr(&resource, "service.namespace"), Some(Value::from("taskq")));
        assert_eq!(
            attr(&resource, "service.version"),
            Some(Value::from(env!("CARGO_PKG_VERSION")))
        );
        assert_eq!(attr(&resource, "service.instance.id"), Some(Value::from("gpu-01")));
    }

    #[test]
    fn server_resource_has_no_instance() {
        let resource = resource(&TelemetryConfig::new("taskq-server"));
        assert_eq!(attr(&resource, "service.instance.id"), None);
    }

    #[test]
    fn config_defaults_to_stderr_at_info() {
        let config = TelemetryConfig::new("taskq-server");
        assert!(config.endpoint.is_none());
        assert_eq!(config.log_level, "info");

        let config = config
            .endpoint(Some("http://collector:4317".into()))
            .log_level("taskq=debug");
        assert_eq!(config.endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(config.log_level, "taskq=debug");
    }
}
