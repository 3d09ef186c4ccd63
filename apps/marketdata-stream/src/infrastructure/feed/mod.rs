//! Market Data Feed Adapters
//!
//! Implements the clients for the market data platform:
//!
//! - **Stream**: WebSocket session with heartbeat, replay and reconnect
//! - **Dispatch**: Bounded decode-and-deliver stage for ticks (protobuf codec)
//! - **Auth**: App login and token caching
//! - **Catalog**: Instrument catalog download
//! - **REST**: Market data snapshots, orders, positions and trades

pub mod auth;
pub mod catalog;
pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod rest;

pub use auth::{AuthClient, Credentials};
pub use catalog::{CatalogClient, CatalogFetchError};
pub use client::MarketDataClient;
pub use codec::{DecodeError, TickDecoder};
pub use connection::{StreamConfig, StreamConnection, StreamError};
pub use dispatcher::{DispatchStats, TickDispatcher};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatManager, HeartbeatState, HeartbeatTarget};
pub use messages::{CloseInfo, OutboundFrame, RawFrame};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{ApiError, ApiResponse, RestClient};
