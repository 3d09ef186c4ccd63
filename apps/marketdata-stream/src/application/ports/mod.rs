//! Application Ports (Driver and Driven)
//!
//! Ports define the seams between the subscription logic and the outside
//! world.
//! - **Driven Ports**: token acquisition and the live feed session
//! - **Driver Ports**: the tick consumer registered by the application

mod feed_session_port;
mod tick_consumer_port;
mod token_provider_port;

#[cfg(test)]
pub use feed_session_port::MockFeedSession;
pub use feed_session_port::{FeedSession, SendError};
pub use tick_consumer_port::TickConsumer;
#[cfg(test)]
pub use token_provider_port::MockTokenProvider;
pub use token_provider_port::{AuthError, StaticToken, TokenProvider};
