//! Feed Session Port (Driven Port)
//!
//! Interface the subscription manager uses to reach the live stream.

use crate::domain::subscription::SubscriptionRequest;

/// Failure to hand a control message to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No session is currently open.
    #[error("stream is not connected")]
    NotConnected,
}

/// Port for sending control messages over the current session.
#[cfg_attr(test, mockall::automock)]
pub trait FeedSession: Send + Sync {
    /// Whether a session is open.
    fn is_connected(&self) -> bool;

    /// Queue a control message on the open session.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] if no session is open.
    fn send_request(&self, request: SubscriptionRequest) -> Result<(), SendError>;
}
