//! Market Data Stream Binary
//!
//! Logs in, loads the instrument catalog, connects to the feed and
//! subscribes to the configured instruments until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin marketdata-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKETDATA_APP_KEY`: Application key
//! - `MARKETDATA_USER_ID`: User identifier
//! - `MARKETDATA_AUTH_URL`: Auth service base URL
//! - `MARKETDATA_API_URL`: REST API base URL
//! - `MARKETDATA_STREAM_URL`: Stream base URL
//! - `MARKETDATA_INSTRUMENT_URL`: Instrument catalog URL
//!
//! ## Optional
//! - `MARKETDATA_INSTRUMENTS`: Comma-separated symbols or ids to subscribe
//! - `MARKETDATA_HEARTBEAT_INTERVAL_SECS`: Keep-alive interval (default: 30)
//! - `MARKETDATA_RECONNECT_DELAY_SECS`: Reconnect delay (default: 5)
//! - `MARKETDATA_AUTO_RECONNECT`: Reconnect after loss (default: true)
//! - `MARKETDATA_CONNECT_TIMEOUT_SECS`: Handshake timeout (default: 10)
//! - `MARKETDATA_TICK_QUEUE_CAPACITY`: Dispatch queue size (default: 10000)
//! - `MARKETDATA_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `MARKETDATA_LOG_LEVEL`: Log level for this crate (default: info)
//! - `MARKETDATA_OTEL_ENABLED`: Export spans over OTLP (default: true)
//! - `RUST_LOG`: Extra log directives

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use marketdata_stream::infrastructure::telemetry;
use marketdata_stream::{
    AuthClient, CatalogClient, ClientConfig, ConnectionEvent, DirectoryHandle, MarketDataClient,
    Tick, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;

/// How long startup waits for the first session.
const STARTUP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting market data stream");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    if let Some(port) = config.metrics_port() {
        init_metrics(Some(port)).context("metrics exporter")?;
        tracing::info!(port, "Prometheus metrics enabled");
    }

    let auth = Arc::new(AuthClient::new(
        &config.endpoints.auth_url,
        config.credentials.clone(),
    )?);

    let directory = DirectoryHandle::empty();
    let catalog = CatalogClient::new(config.endpoints.instrument_url.clone())?;
    let instruments = catalog
        .refresh(&directory)
        .await
        .context("instrument catalog download")?;
    tracing::info!(instruments, "Instrument directory ready");

    let client = MarketDataClient::new(directory, config.stream_config(), auth);

    let ticks = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&ticks);
    client.set_on_tick(move |tick: Tick| {
        let seen = counter.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            instrument_id = tick.instrument_id,
            kind = tick.kind.as_str(),
            ltp = tick.ltp(),
            seen,
            "Tick"
        );
    });

    let events = client.events();
    tokio::spawn(log_events(events));

    // Resolved before the stream starts; the set is replayed once connected.
    if !config.instruments.is_empty() {
        let changes = client
            .subscribe(config.instruments.iter())
            .context("configured instruments")?;
        tracing::info!(added = changes.added.len(), "Subscribed to configured instruments");
    }

    if let Err(e) = client.connect(STARTUP_CONNECT_TIMEOUT).await {
        tracing::warn!(error = %e, "Initial connect did not complete, retrying in background");
    }

    tracing::info!("Market data stream ready");

    await_shutdown().await;

    client.stop().await;
    tracing::info!(ticks = ticks.load(Ordering::Relaxed), "Market data stream stopped");
    Ok(())
}

/// Log connection lifecycle events until the stream stops.
async fn log_events(mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Connecting) => tracing::debug!("Feed connecting"),
            Ok(ConnectionEvent::Connected) => tracing::info!("Feed connected"),
            Ok(ConnectionEvent::Disconnected { code, reason }) => {
                tracing::warn!(?code, %reason, "Feed disconnected");
            }
            Ok(ConnectionEvent::Reconnecting { attempt, delay }) => {
                tracing::info!(attempt, delay_secs = delay.as_secs(), "Feed reconnecting");
            }
            Ok(ConnectionEvent::Stopped) | Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event log lagged");
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        user_id = %config.credentials.user_id,
        instruments = config.instruments.len(),
        auto_reconnect = config.stream.auto_reconnect,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        auth_url = %config.endpoints.auth_url,
        api_url = %config.endpoints.api_url,
        stream_url = %config.endpoints.stream_url,
        instrument_url = %config.endpoints.instrument_url,
        "Endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
