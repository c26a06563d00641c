//! Telemetry initialization
//!
//! Sets up a `tracing` subscriber with:
//! - `RUST_LOG`-style filtering through `EnvFilter`
//! - JSON structured logging (or plain text for local runs)
//! - Kubernetes pod identity attached to a root span when available

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,interconnect=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable text
    Text,
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on every log line (e.g., "interconnect-controller")
    pub service_name: String,
    /// Log line format
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "interconnect".to_string(),
            format: LogFormat::default(),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// Initialize telemetry with the given configuration
///
/// Must be called once at process start. A second call fails with
/// [`TelemetryError::SubscriberInit`].
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    let attributes = pod_attributes();
    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        pod = attributes.pod_name.as_deref().unwrap_or("-"),
        namespace = attributes.namespace.as_deref().unwrap_or("-"),
        "telemetry initialized"
    );
    Ok(())
}

/// Pod identity taken from the downward API environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodAttributes {
    /// `POD_NAME`
    pub pod_name: Option<String>,
    /// `POD_NAMESPACE`
    pub namespace: Option<String>,
    /// `NODE_NAME`
    pub node_name: Option<String>,
}

/// Read pod identity from the environment
pub fn pod_attributes() -> PodAttributes {
    PodAttributes {
        pod_name: std::env::var("POD_NAME").ok(),
        namespace: std::env::var("POD_NAMESPACE").ok(),
        node_name: std::env::var("NODE_NAME").ok(),
    }
}
