//! Tick Codec
//!
//! Converts feed frames into [`Tick`] values.
//!
//! - **Text frames**: base64 of a protobuf `MarketDataMessageBase`
//! - **Binary frames**: the protobuf bytes directly
//!
//! Decoding is per frame; a bad frame yields an error for that frame only.
//! An empty payload is a valid message with every field at its default, so it
//! decodes to a tick for instrument 0.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use prost::Message;

use crate::domain::streaming::{DepthLevel, Tick, TickKind};
use crate::infrastructure::feed::messages::{MarketDataMessageBase, RawFrame, WireDepthLevel};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The text frame is not valid base64.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload is not a valid protobuf message.
    #[error("protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

impl DecodeError {
    /// Label used for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Base64(_) => "base64",
            Self::Protobuf(_) => "protobuf",
        }
    }
}

/// Protobuf tick decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickDecoder;

impl TickDecoder {
    /// Create a new decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode any inbound data frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the frame is malformed.
    pub fn decode(&self, frame: &RawFrame) -> Result<Tick, DecodeError> {
        match frame {
            RawFrame::Text(text) => self.decode_text(text),
            RawFrame::Binary(bytes) => self.decode_binary(bytes),
        }
    }

    /// Decode a base64 text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if base64 or protobuf decoding fails.
    pub fn decode_text(&self, text: &str) -> Result<Tick, DecodeError> {
        let bytes = STANDARD.decode(text.trim())?;
        self.decode_binary(&bytes)
    }

    /// Decode raw protobuf bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if protobuf decoding fails.
    pub fn decode_binary(&self, bytes: &[u8]) -> Result<Tick, DecodeError> {
        let wire = MarketDataMessageBase::decode(bytes)?;
        Ok(tick_from_wire(wire))
    }

    /// Encode a tick as a base64 text frame payload.
    #[must_use]
    pub fn encode(&self, tick: &Tick) -> String {
        STANDARD.encode(wire_from_tick(tick).encode_to_vec())
    }
}

fn tick_from_wire(wire: MarketDataMessageBase) -> Tick {
    Tick {
        instrument_id: wire.instrument_id,
        kind: TickKind::from_wire(wire.message_type),
        exchange_time: (wire.exchange_timestamp > 0)
            .then(|| DateTime::from_timestamp_millis(wire.exchange_timestamp))
            .flatten(),
        last_traded_price: wire.last_traded_price,
        last_traded_quantity: wire.last_traded_quantity,
        volume: wire.volume,
        open: wire.open,
        high: wire.high,
        low: wire.low,
        close: wire.close,
        bids: wire.bids.into_iter().map(level_from_wire).collect(),
        asks: wire.asks.into_iter().map(level_from_wire).collect(),
    }
}

const fn level_from_wire(level: WireDepthLevel) -> DepthLevel {
    DepthLevel {
        price: level.price,
        quantity: level.quantity,
        orders: level.orders,
    }
}

fn wire_from_tick(tick: &Tick) -> MarketDataMessageBase {
    let level = |l: &DepthLevel| WireDepthLevel {
        price: l.price,
        quantity: l.quantity,
        orders: l.orders,
    };
    MarketDataMessageBase {
        message_type: tick.kind.to_wire(),
        instrument_id: tick.instrument_id,
        exchange_timestamp: tick.exchange_time.map_or(0, |t| t.timestamp_millis()),
        last_traded_price: tick.last_traded_price,
        last_traded_quantity: tick.last_traded_quantity,
        volume: tick.volume,
        open: tick.open,
        high: tick.high,
        low: tick.low,
        close: tick.close,
        bids: tick.bids.iter().map(level).collect(),
        asks: tick.asks.iter().map(level).collect(),
    }
}
