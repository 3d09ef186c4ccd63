//! Feed Message Types
//!
//! Wire structures exchanged with the market data feed.
//!
//! # Inbound
//!
//! Every data frame is a protobuf `MarketDataMessageBase`, normally sent as
//! base64 text. Binary frames carry the same message without base64.
//!
//! # Outbound
//!
//! Control frames are JSON text (`{"action": ..., "instrumentIds": [...]}`)
//! and the keep-alive is the literal text `ping`.

use tokio_tungstenite::tungstenite::Message;

use crate::domain::subscription::SubscriptionRequest;

/// Keep-alive frame text.
pub const HEARTBEAT_TEXT: &str = "ping";

/// Text the feed may send in answer to a keep-alive.
pub const HEARTBEAT_REPLY_TEXT: &str = "pong";

// =============================================================================
// Inbound Protobuf Messages
// =============================================================================

/// One order book level as encoded on the wire.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct WireDepthLevel {
    /// Price in paise.
    #[prost(int64, tag = "1")]
    pub price: i64,
    /// Aggregate quantity.
    #[prost(int64, tag = "2")]
    pub quantity: i64,
    /// Order count.
    #[prost(int32, tag = "3")]
    pub orders: i32,
}

/// Market data message as encoded on the wire.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct MarketDataMessageBase {
    /// 1 touchline, 2 depth, 3 trade.
    #[prost(int32, tag = "1")]
    pub message_type: i32,
    /// Instrument identifier.
    #[prost(int64, tag = "2")]
    pub instrument_id: i64,
    /// Exchange timestamp in epoch milliseconds.
    #[prost(int64, tag = "3")]
    pub exchange_timestamp: i64,
    /// Last traded price in paise.
    #[prost(int64, tag = "4")]
    pub last_traded_price: i64,
    /// Last traded quantity.
    #[prost(int64, tag = "5")]
    pub last_traded_quantity: i64,
    /// Session volume.
    #[prost(int64, tag = "6")]
    pub volume: i64,
    /// Session open in paise.
    #[prost(int64, tag = "7")]
    pub open: i64,
    /// Session high in paise.
    #[prost(int64, tag = "8")]
    pub high: i64,
    /// Session low in paise.
    #[prost(int64, tag = "9")]
    pub low: i64,
    /// Previous close in paise.
    #[prost(int64, tag = "10")]
    pub close: i64,
    /// Bid levels, best first.
    #[prost(message, repeated, tag = "11")]
    pub bids: Vec<WireDepthLevel>,
    /// Ask levels, best first.
    #[prost(message, repeated, tag = "12")]
    pub asks: Vec<WireDepthLevel>,
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// A data frame as received, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// Base64 text frame.
    Text(String),
    /// Raw protobuf binary frame.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Frame size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// A frame queued for the session writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Subscribe or unsubscribe request.
    Control(SubscriptionRequest),
    /// Keep-alive.
    Heartbeat,
}

impl OutboundFrame {
    /// Encode as a WebSocket message.
    ///
    /// # Errors
    ///
    /// Returns an error if the control request cannot be serialized.
    pub fn into_message(self) -> Result<Message, serde_json::Error> {
        match self {
            Self::Control(request) => Ok(Message::text(serde_json::to_string(&request)?)),
            Self::Heartbeat => Ok(Message::text(HEARTBEAT_TEXT)),
        }
    }

    /// Label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Control(_) => "control",
            Self::Heartbeat => "heartbeat",
        }
    }
}

// =============================================================================
// Close Details
// =============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code, if the remote sent one.
    pub code: Option<u16>,
    /// Close reason or error description.
    pub reason: String,
}

impl CloseInfo {
    /// Close details for a local or transport-level failure.
    #[must_use]
    pub fn from_error(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_is_json_text() {
        let message = OutboundFrame::Control(SubscriptionRequest::subscribe(vec![100, 200]))
            .into_message()
            .unwrap();
        assert_eq!(
            message.into_text().unwrap().as_str(),
            r#"{"action":"subscribe","instrumentIds":[100,200]}"#
        );
    }

    #[test]
    fn heartbeat_frame_is_ping_text() {
        let message = OutboundFrame::Heartbeat.into_message().unwrap();
        assert_eq!(message.into_text().unwrap().as_str(), "ping");
        assert_eq!(OutboundFrame::Heartbeat.kind(), "heartbeat");
    }

    #[test]
    fn raw_frame_len() {
        assert_eq!(RawFrame::Text("abcd".to_string()).len(), 4);
        assert!(RawFrame::Binary(Vec::new()).is_empty());
    }
}
