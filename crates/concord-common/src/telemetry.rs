//! Logging and OpenTelemetry export for the broker
//!
//! Logs always go to stdout, filtered by `RUST_LOG`. When an OTLP endpoint is
//! configured, spans from the `concord_*` crates and all metrics are exported
//! too. Exported resources describe which namespace this replica watches and
//! which controllers it runs, so traces from several broker deployments in one
//! collector can be told apart.

use std::fmt;
use std::str::FromStr;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Name of the span wrapping one credential request evaluation
pub const CREDENTIAL_REQUEST_SPAN: &str = "credential_request";

/// Resource attribute naming the namespace watched for issuer configuration
pub const WATCH_NAMESPACE_ATTRIBUTE: &str = "concord.watch_namespace";

/// Resource attribute listing the controllers running in this process
pub const CONTROLLERS_ATTRIBUTE: &str = "concord.controllers";

const DEFAULT_LOG_FILTER: &str = "info,concord=debug,kube=info,tower=warn,hyper=warn";

/// Downward API variables copied onto the exported resource
const POD_ATTRIBUTES: [(&str, &str); 3] = [
    ("POD_NAME", "k8s.pod.name"),
    ("POD_NAMESPACE", "k8s.namespace.name"),
    ("NODE_NAME", "k8s.node.name"),
];

/// Errors raised while installing telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// OTLP span exporter could not be built
    #[error("failed to initialize tracer: {0}")]
    TracerInit(String),

    /// OTLP metric exporter could not be built
    #[error("failed to initialize metrics exporter: {0}")]
    MetricsInit(String),

    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Log line encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable lines, for local runs
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown log format {other:?}, expected json or text")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Text => f.write_str("text"),
        }
    }
}

/// Telemetry settings for one broker process
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` on exported resources
    pub service_name: String,
    /// OTLP gRPC endpoint; logs only when unset
    pub otlp_endpoint: Option<String>,
    /// Log line encoding
    pub log_format: LogFormat,
    /// Namespace watched for OIDCProvider resources
    pub watch_namespace: Option<String>,
    /// Names of the controllers this process runs
    pub controllers: Vec<String>,
}

impl TelemetryConfig {
    /// Settings for the operator binary watching `namespace`
    ///
    /// The OTLP endpoint comes from `OTEL_EXPORTER_OTLP_ENDPOINT`.
    pub fn for_operator(namespace: impl Into<String>) -> Self {
        Self {
            service_name: "concord-operator".to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            log_format: LogFormat::default(),
            watch_namespace: Some(namespace.into()),
            controllers: Vec::new(),
        }
    }

    /// Record the controllers this process runs
    pub fn with_controllers<I, S>(mut self, controllers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.controllers = controllers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the log line encoding
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    fn resource_attributes(&self, lookup: impl Fn(&str) -> Option<String>) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new(SERVICE_NAME, self.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ];
        if let Some(namespace) = &self.watch_namespace {
            attributes.push(KeyValue::new(WATCH_NAMESPACE_ATTRIBUTE, namespace.clone()));
        }
        if !self.controllers.is_empty() {
            attributes.push(KeyValue::new(
                CONTROLLERS_ATTRIBUTE,
                self.controllers.join(","),
            ));
        }
        for (var, key) in POD_ATTRIBUTES {
            if let Some(value) = lookup(var) {
                attributes.push(KeyValue::new(key, value));
            }
        }
        attributes
    }
}

/// Flushes and shuts down the OTLP pipelines when dropped
///
/// Hold it for the life of the process; dropping it early stops export.
#[must_use = "dropping the guard stops telemetry export"]
pub struct TelemetryGuard {
    tracer: Option<TracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            if let Err(e) = tracer.shutdown() {
                eprintln!("failed to flush spans: {e}");
            }
        }
        if let Some(meter) = self.meter.take() {
            if let Err(e) = meter.shutdown() {
                eprintln!("failed to flush metrics: {e}");
            }
        }
    }
}

/// Install the global subscriber and, when configured, OTLP export
///
/// Call once, inside the Tokio runtime when exporting.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let mut guard = TelemetryGuard {
        tracer: None,
        meter: None,
    };

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let attributes = config.resource_attributes(|var| std::env::var(var).ok());
            let resource = Resource::new(attributes);
            let meter = otlp_meter_provider(endpoint, resource.clone())?;
            global::set_meter_provider(meter.clone());
            let tracer = otlp_tracer_provider(endpoint, resource)?;
            global::set_tracer_provider(tracer.clone());

            let layer = tracing_opentelemetry::layer()
                .with_tracer(tracer.tracer(config.service_name.clone()))
                .with_filter(filter_fn(|meta| is_broker_target(meta.target())));
            guard.meter = Some(meter);
            guard.tracer = Some(tracer);
            Some(layer)
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    Ok(guard)
}

/// Spans worth exporting: the broker's own, not client library internals
fn is_broker_target(target: &str) -> bool {
    target.starts_with("concord")
}

fn otlp_tracer_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build())
}

fn otlp_meter_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    Ok(SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
        .with_resource(resource)
        .build())
}
