//! Market Data Streaming Types
//!
//! Decoded tick representation delivered to consumers. These types are
//! independent of the wire encoding; the feed codec converts into them.
//!
//! Prices travel as integer paise (1/100 rupee). The raw integers are kept
//! as-is and rupee accessors are provided for display.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::instrument::InstrumentId;

/// Number of price units per rupee.
pub const PRICE_SCALE: i64 = 100;

/// Convert an integer price in paise to rupees.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn to_rupees(price: i64) -> f64 {
    price as f64 / PRICE_SCALE as f64
}

// =============================================================================
// Tick Kind
// =============================================================================

/// Kind of update carried by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    /// Top-of-book and last trade summary.
    Touchline,
    /// Order book depth update.
    Depth,
    /// Individual trade print.
    Trade,
    /// Message type this client does not recognize.
    Unknown(i32),
}

impl TickKind {
    /// Map the wire message type to a tick kind.
    #[must_use]
    pub const fn from_wire(value: i32) -> Self {
        match value {
            1 => Self::Touchline,
            2 => Self::Depth,
            3 => Self::Trade,
            other => Self::Unknown(other),
        }
    }

    /// Wire message type for this kind.
    #[must_use]
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Touchline => 1,
            Self::Depth => 2,
            Self::Trade => 3,
            Self::Unknown(other) => other,
        }
    }

    /// Label used for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Touchline => "touchline",
            Self::Depth => "depth",
            Self::Trade => "trade",
            Self::Unknown(_) => "unknown",
        }
    }
}

// =============================================================================
// Depth
// =============================================================================

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Price in paise.
    pub price: i64,
    /// Aggregate quantity at this level.
    pub quantity: i64,
    /// Number of orders at this level.
    pub orders: i32,
}

impl DepthLevel {
    /// Price in rupees.
    #[must_use]
    pub fn price_rupees(&self) -> f64 {
        to_rupees(self.price)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// A decoded market data update for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument the update refers to.
    pub instrument_id: InstrumentId,
    /// Kind of update.
    pub kind: TickKind,
    /// Exchange timestamp, if the feed supplied one.
    pub exchange_time: Option<DateTime<Utc>>,
    /// Last traded price in paise.
    pub last_traded_price: i64,
    /// Last traded quantity.
    pub last_traded_quantity: i64,
    /// Cumulative traded volume for the session.
    pub volume: i64,
    /// Session open in paise.
    pub open: i64,
    /// Session high in paise.
    pub high: i64,
    /// Session low in paise.
    pub low: i64,
    /// Previous close in paise.
    pub close: i64,
    /// Bid levels, best first.
    pub bids: Vec<DepthLevel>,
    /// Ask levels, best first.
    pub asks: Vec<DepthLevel>,
}

impl Tick {
    /// Create an empty tick of the given kind.
    #[must_use]
    pub const fn new(instrument_id: InstrumentId, kind: TickKind) -> Self {
        Self {
            instrument_id,
            kind,
            exchange_time: None,
            last_traded_price: 0,
            last_traded_quantity: 0,
            volume: 0,
            open: 0,
            high: 0,
            low: 0,
            close: 0,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Last traded price in rupees.
    #[must_use]
    pub fn ltp(&self) -> f64 {
        to_rupees(self.last_traded_price)
    }

    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first()
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid, in paise.
    #[must_use]
    pub fn spread(&self) -> Option<i64> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the logical feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session is open.
    #[default]
    Disconnected,
    /// A session is being established.
    Connecting,
    /// A session is open and accepting frames.
    Connected,
    /// The client is shutting down.
    Closing,
}

impl ConnectionState {
    /// Numeric code used by the state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Closing => 3,
        }
    }

    /// Label used for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications published by the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connect attempt started.
    Connecting,
    /// The session is open and the subscription set was replayed.
    Connected,
    /// The session ended.
    Disconnected {
        /// WebSocket close code, if the remote sent one.
        code: Option<u16>,
        /// Close reason or error description.
        reason: String,
    },
    /// A reconnect was scheduled.
    Reconnecting {
        /// Attempt number since the last successful connect.
        attempt: u32,
        /// Delay before the attempt.
        delay: std::time::Duration,
    },
    /// The client stopped and will not reconnect.
    Stopped,
}
