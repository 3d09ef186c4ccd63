//! Client Configuration Settings
//!
//! Configuration types for the market data client, loaded from environment
//! variables.
//!
//! # Variables
//!
//! Required: `MARKETDATA_APP_KEY`, `MARKETDATA_USER_ID`,
//! `MARKETDATA_AUTH_URL`, `MARKETDATA_API_URL`, `MARKETDATA_STREAM_URL`,
//! `MARKETDATA_INSTRUMENT_URL`.
//!
//! Optional: `MARKETDATA_HEARTBEAT_INTERVAL_SECS`,
//! `MARKETDATA_RECONNECT_DELAY_SECS`, `MARKETDATA_AUTO_RECONNECT`,
//! `MARKETDATA_CONNECT_TIMEOUT_SECS`, `MARKETDATA_TICK_QUEUE_CAPACITY`,
//! `MARKETDATA_METRICS_PORT`, `MARKETDATA_INSTRUMENTS`.

use std::time::Duration;

use crate::infrastructure::feed::auth::Credentials;
use crate::infrastructure::feed::connection::StreamConfig;
use crate::infrastructure::feed::dispatcher::DEFAULT_TICK_QUEUE_CAPACITY;
use crate::infrastructure::feed::heartbeat::HeartbeatConfig;
use crate::infrastructure::feed::reconnect::ReconnectConfig;

/// Service endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Auth service base URL.
    pub auth_url: String,
    /// REST API base URL.
    pub api_url: String,
    /// Stream base URL; the access token is appended.
    pub stream_url: String,
    /// Instrument catalog URL.
    pub instrument_url: String,
}

/// Stream connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Keep-alive interval.
    pub heartbeat_interval: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Whether to reconnect after the session is lost.
    pub auto_reconnect: bool,
    /// Upper bound for one WebSocket handshake.
    pub connect_timeout: Duration,
    /// Dispatch queue capacity in frames.
    pub tick_queue_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            auto_reconnect: true,
            connect_timeout: Duration::from_secs(10),
            tick_queue_capacity: DEFAULT_TICK_QUEUE_CAPACITY,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Login credentials.
    pub credentials: Credentials,
    /// Service endpoints.
    pub endpoints: EndpointSettings,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Instruments the runner subscribes to.
    pub instruments: Vec<String>,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(ConfigError::EmptyValue(key.to_string()));
            }
            Ok(value)
        };

        let credentials = Credentials::new(
            required("MARKETDATA_APP_KEY")?,
            required("MARKETDATA_USER_ID")?,
        );

        let endpoints = EndpointSettings {
            auth_url: required("MARKETDATA_AUTH_URL")?,
            api_url: required("MARKETDATA_API_URL")?,
            stream_url: required("MARKETDATA_STREAM_URL")?,
            instrument_url: required("MARKETDATA_INSTRUMENT_URL")?,
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "MARKETDATA_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            reconnect_delay: parse_duration_secs(
                &lookup,
                "MARKETDATA_RECONNECT_DELAY_SECS",
                defaults.reconnect_delay,
            ),
            auto_reconnect: parse_bool(&lookup, "MARKETDATA_AUTO_RECONNECT", defaults.auto_reconnect),
            connect_timeout: parse_duration_secs(
                &lookup,
                "MARKETDATA_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            tick_queue_capacity: parse_usize(
                &lookup,
                "MARKETDATA_TICK_QUEUE_CAPACITY",
                defaults.tick_queue_capacity,
            ),
        };

        let instruments = lookup("MARKETDATA_INSTRUMENTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            credentials,
            endpoints,
            stream,
            metrics_port: parse_u16(&lookup, "MARKETDATA_METRICS_PORT", 0),
            instruments,
        })
    }

    /// Build the stream connection configuration.
    #[must_use]
    pub fn stream_config(&self) -> StreamConfig {
        let mut config = StreamConfig::new(self.endpoints.stream_url.clone());
        config.heartbeat = HeartbeatConfig::new(self.stream.heartbeat_interval);
        config.reconnect = ReconnectConfig::new(self.stream.reconnect_delay, self.stream.auto_reconnect);
        config.connect_timeout = self.stream.connect_timeout;
        config.tick_queue_capacity = self.stream.tick_queue_capacity;
        config
    }

    /// Metrics port, if enabled.
    #[must_use]
    pub const fn metrics_port(&self) -> Option<u16> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(self.metrics_port)
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| match v.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    })
}

fn parse_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
