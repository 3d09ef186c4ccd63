//! Tracing and OpenTelemetry Export
//!
//! Installs the process-wide `tracing` subscriber: an [`EnvFilter`], a fmt
//! layer, and an OTLP span exporter when export is enabled.
//!
//! # Environment Variables
//!
//! - `MARKETDATA_LOG_LEVEL`: Level for this crate (default: info)
//! - `MARKETDATA_OTEL_ENABLED`: Set to "false" to skip OTLP export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: marketdata-stream)
//! - `RUST_LOG`: Extra directives, applied before the built-in ones
//!
//! Every stream session runs inside a [`session_span`], so feed logs from
//! one connection attempt share a span in the exported trace.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "marketdata-stream";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Dependencies that log per request or per frame at `info`/`debug`.
const QUIET_TARGETS: &[&str] = &[
    "tokio_tungstenite=warn",
    "tungstenite=warn",
    "reqwest=warn",
    "hyper=warn",
    "hyper_util=warn",
    "h2=warn",
    "rustls=warn",
    "opentelemetry_sdk=warn",
];

/// Telemetry setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A filter directive did not parse.
    #[error("invalid log directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),

    /// The OTLP exporter could not be built.
    #[error("OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber was already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shut down span exporter: {e}");
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Level applied to this crate's targets.
    pub log_level: String,
    /// Whether spans are exported over OTLP.
    pub export_enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name attached to exported spans.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            export_enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            log_level: non_empty("MARKETDATA_LOG_LEVEL").unwrap_or(defaults.log_level),
            export_enabled: non_empty("MARKETDATA_OTEL_ENABLED")
                .is_none_or(|v| !v.eq_ignore_ascii_case("false")),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: non_empty("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }

    /// Build the log filter: `RUST_LOG` first, then the crate level and the
    /// quiet dependency targets.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Directive`] if the crate level is invalid.
    pub fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        let crate_directive = format!("{}={}", env!("CARGO_CRATE_NAME"), self.log_level);
        let mut filter = EnvFilter::from_default_env().add_directive(crate_directive.parse()?);
        for target in QUIET_TARGETS {
            filter = filter.add_directive(target.parse()?);
        }
        Ok(filter)
    }
}

/// Install telemetry using settings from the environment.
///
/// Keep the returned guard alive until shutdown.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the filter, exporter or subscriber fails.
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install telemetry with explicit settings.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the filter, exporter or subscriber fails.
pub fn init_with_config(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.export_enabled {
        tracing_subscriber::registry()
            .with(config.filter()?)
            .with(fmt_layer)
            .try_init()?;
        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();
    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(config.service_name.clone()));

    tracing_subscriber::registry()
        .with(config.filter()?)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}

/// Span covering one stream session, from handshake to close.
#[must_use]
pub fn session_span(url: &str, session: u64) -> tracing::Span {
    tracing::info_span!("stream_session", %url, session)
}
