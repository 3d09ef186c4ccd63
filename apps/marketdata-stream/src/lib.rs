#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Market Data Stream - Real-Time Feed Client
//!
//! Maintains one authenticated WebSocket session to the market data feed,
//! keeps the desired instrument subscriptions alive across reconnects, and
//! hands decoded ticks to a single consumer.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core data types with no I/O
//!   - `instrument`: Instrument directory and symbol resolution
//!   - `streaming`: Ticks, connection states and lifecycle events
//!   - `subscription`: Desired subscription set and control frames
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed session, tick consumer and token provider traits
//!   - `services`: Subscription management, shared directory handle
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Stream connection, dispatcher, auth, catalog and REST clients
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OpenTelemetry export
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐   frames   ┌──────────────┐   ticks
//! Feed WS ───────►│  Connection  │───────────►│  Dispatcher  │──────────► consumer
//!                 │  (reader)    │  bounded   │  (decode)    │
//!                 └──────▲───────┘   queue    └──────────────┘
//!                        │ replay + control frames
//!                 ┌──────┴───────┐
//! caller ────────►│ Subscription │◄──── Instrument directory
//!                 │   Manager    │
//!                 └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{
    BatchError, BatchResolution, InstrumentDirectory, InstrumentError, InstrumentId,
    InstrumentRecord, InstrumentRef,
};
pub use domain::streaming::{ConnectionEvent, ConnectionState, DepthLevel, Tick, TickKind};
pub use domain::subscription::{
    SubscriptionAction, SubscriptionChanges, SubscriptionRequest, SubscriptionSet,
};

// Ports and services
pub use application::ports::{
    AuthError, FeedSession, SendError, StaticToken, TickConsumer, TokenProvider,
};
pub use application::services::{DirectoryHandle, SubscriptionManager};

// Feed clients
pub use infrastructure::feed::{
    AuthClient, CatalogClient, Credentials, MarketDataClient, RestClient, StreamConfig,
    StreamConnection, StreamError,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
