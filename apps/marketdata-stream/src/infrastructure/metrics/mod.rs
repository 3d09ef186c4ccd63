//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Data frames received, ticks dispatched, dropped and failed
//! - **Connection**: Session state, reconnects and heartbeat failures
//! - **Subscriptions**: Subscribed instrument count and control frames sent
//!
//! # Integration
//!
//! When a port is configured the exporter serves `/metrics` on it.
//! Recording functions are no-ops until a recorder is installed.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{ConnectionState, TickKind};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),

    /// Another global recorder is already installed.
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Initialize the Prometheus metrics recorder.
///
/// With `Some(port)` an HTTP listener serving `/metrics` is spawned on the
/// current tokio runtime. Calling this again returns the existing handle.
///
/// # Errors
///
/// Returns [`MetricsError`] if the recorder cannot be installed.
pub fn init_metrics(port: Option<u16>) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let mut builder = PrometheusBuilder::new();
    if let Some(port) = port {
        builder = builder.with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    let (recorder, exporter) = builder.build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    tokio::spawn(async move {
        if let Err(error) = exporter.await {
            tracing::error!(?error, "Prometheus exporter stopped");
        }
    });

    register_metrics();
    if let Some(port) = port {
        tracing::info!(port, "Prometheus exporter listening");
    }

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "marketdata_stream_frames_received_total",
        "Total data frames received from the feed"
    );
    describe_counter!(
        "marketdata_stream_ticks_dispatched_total",
        "Total ticks delivered to the consumer"
    );
    describe_counter!(
        "marketdata_stream_ticks_dropped_total",
        "Total frames dropped before dispatch"
    );
    describe_counter!(
        "marketdata_stream_decode_failures_total",
        "Total frames that failed to decode"
    );

    // Connection
    describe_gauge!(
        "marketdata_stream_connection_state",
        "Session state (0 disconnected, 1 connecting, 2 connected, 3 closing)"
    );
    describe_counter!(
        "marketdata_stream_reconnects_total",
        "Total scheduled reconnection attempts"
    );
    describe_counter!(
        "marketdata_stream_heartbeat_failures_total",
        "Total keep-alive frames that could not be sent"
    );

    // Subscriptions
    describe_gauge!(
        "marketdata_stream_subscriptions",
        "Number of subscribed instruments"
    );
    describe_counter!(
        "marketdata_stream_control_frames_sent_total",
        "Total subscribe and unsubscribe frames sent"
    );

    // Latency
    describe_histogram!(
        "marketdata_stream_dispatch_seconds",
        "Time spent decoding and delivering one tick"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for dropped frames.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Dispatch queue was full.
    QueueFull,
    /// No consumer was registered.
    NoConsumer,
    /// The consumer panicked.
    ConsumerPanic,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::NoConsumer => "no_consumer",
            Self::ConsumerPanic => "consumer_panic",
        }
    }
}

/// Record a data frame received from the feed.
pub fn record_frame_received(binary: bool) {
    counter!(
        "marketdata_stream_frames_received_total",
        "encoding" => if binary { "binary" } else { "base64" }
    )
    .increment(1);
}

/// Record a tick delivered to the consumer.
pub fn record_tick_dispatched(kind: TickKind) {
    counter!(
        "marketdata_stream_ticks_dispatched_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record frames dropped before dispatch.
pub fn record_ticks_dropped(reason: DropReason, count: u64) {
    counter!(
        "marketdata_stream_ticks_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Record a decode failure.
pub fn record_decode_failure(error_type: &'static str) {
    counter!(
        "marketdata_stream_decode_failures_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("marketdata_stream_connection_state").set(f64::from(state.code()));
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("marketdata_stream_reconnects_total").increment(1);
}

/// Record a failed keep-alive send.
pub fn record_heartbeat_failure() {
    counter!("marketdata_stream_heartbeat_failures_total").increment(1);
}

/// Update the subscribed instrument count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("marketdata_stream_subscriptions").set(count as f64);
}

/// Record a control frame sent to the feed.
pub fn record_control_frame(action: &'static str) {
    counter!(
        "marketdata_stream_control_frames_sent_total",
        "action" => action
    )
    .increment(1);
}

/// Record tick dispatch duration.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("marketdata_stream_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::QueueFull.as_str(), "queue_full");
        assert_eq!(DropReason::NoConsumer.as_str(), "no_consumer");
        assert_eq!(DropReason::ConsumerPanic.as_str(), "consumer_panic");
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_frame_received(false);
        record_ticks_dropped(DropReason::QueueFull, 3);
        set_connection_state(ConnectionState::Connected);
        set_subscriptions(12);
    }
}
