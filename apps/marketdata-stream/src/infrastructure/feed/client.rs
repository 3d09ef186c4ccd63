//! Market Data Client
//!
//! Wires the instrument directory, the stream connection and the
//! subscription manager into one handle for applications.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::application::ports::{FeedSession, TickConsumer, TokenProvider};
use crate::application::services::{DirectoryHandle, SubscriptionManager};
use crate::domain::instrument::{BatchError, InstrumentId, InstrumentRef};
use crate::domain::streaming::{ConnectionEvent, ConnectionState};
use crate::domain::subscription::{SubscriptionChanges, SubscriptionSet};
use crate::infrastructure::feed::connection::{StreamConfig, StreamConnection, StreamError};
use crate::infrastructure::metrics;

/// Streaming market data client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use marketdata_stream::application::ports::StaticToken;
/// use marketdata_stream::application::services::DirectoryHandle;
/// use marketdata_stream::domain::streaming::Tick;
/// use marketdata_stream::infrastructure::feed::{MarketDataClient, StreamConfig};
///
/// async fn example(directory: DirectoryHandle) -> Result<(), Box<dyn std::error::Error>> {
///     let client = MarketDataClient::new(
///         directory,
///         StreamConfig::new("wss://feed.example.com/ws"),
///         Arc::new(StaticToken::new("token")),
///     );
///
///     client.set_on_tick(|tick: Tick| println!("{} {}", tick.instrument_id, tick.ltp()));
///     client.connect(Duration::from_secs(10)).await?;
///     client.subscribe(["NSECM|RELIANCE", "NSECM|TCS"])?;
///
///     client.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MarketDataClient {
    connection: Arc<StreamConnection>,
    manager: SubscriptionManager,
}

impl MarketDataClient {
    /// Create a client. Nothing connects until [`Self::connect`].
    #[must_use]
    pub fn new(
        directory: DirectoryHandle,
        config: StreamConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let subscriptions = SubscriptionSet::shared();
        let connection = Arc::new(StreamConnection::new(
            config,
            tokens,
            Arc::clone(&subscriptions),
        ));
        let session: Arc<dyn FeedSession> = Arc::clone(&connection) as Arc<dyn FeedSession>;
        let manager = SubscriptionManager::new(directory, subscriptions, session);

        Self {
            connection,
            manager,
        }
    }

    /// Start the connection and wait until it is open.
    ///
    /// The connection keeps retrying in the background after a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Timeout`] if not connected in time, or
    /// [`StreamError::Stopped`] if the client was stopped.
    pub async fn connect(&self, timeout: Duration) -> Result<(), StreamError> {
        self.connection.start()?;
        self.connection.wait_until_connected(timeout).await
    }

    /// Subscribe to instruments.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] if any instrument cannot be resolved.
    pub fn subscribe<I, T>(&self, items: I) -> Result<SubscriptionChanges, BatchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let changes = self.manager.subscribe(items)?;
        metrics::set_subscriptions(self.manager.subscription_count());
        Ok(changes)
    }

    /// Unsubscribe from instruments.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] if any instrument cannot be resolved.
    pub fn unsubscribe<I, T>(&self, items: I) -> Result<SubscriptionChanges, BatchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let changes = self.manager.unsubscribe(items)?;
        metrics::set_subscriptions(self.manager.subscription_count());
        Ok(changes)
    }

    /// Register the tick callback, replacing any previous one.
    pub fn set_on_tick(&self, consumer: impl TickConsumer + 'static) {
        self.connection.set_consumer(Arc::new(consumer));
    }

    /// Remove the tick callback.
    pub fn clear_on_tick(&self) {
        self.connection.clear_consumer();
    }

    /// Currently subscribed ids.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<InstrumentId> {
        self.manager.subscriptions()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receive lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe_events()
    }

    /// The instrument directory used for resolution.
    #[must_use]
    pub const fn directory(&self) -> &DirectoryHandle {
        self.manager.directory()
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<StreamConnection> {
        &self.connection
    }

    /// Stop streaming for good.
    pub async fn stop(&self) {
        self.connection.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::StaticToken;
    use crate::domain::instrument::{InstrumentDirectory, InstrumentRecord};

    fn client() -> MarketDataClient {
        let directory = DirectoryHandle::new(InstrumentDirectory::from_records([
            InstrumentRecord::new("NSECM", "RELIANCE", 100),
            InstrumentRecord::new("NSECM", "TCS", 200),
        ]));
        MarketDataClient::new(
            directory,
            StreamConfig::new("ws://127.0.0.1:1"),
            Arc::new(StaticToken::new("token")),
        )
    }

    #[test]
    fn subscriptions_recorded_before_connect() {
        let client = client();

        let changes = client.subscribe(["NSECM|TCS", "100"]).unwrap();
        assert!(!changes.sent);
        assert_eq!(client.subscriptions(), vec![100, 200]);

        let changes = client.unsubscribe([200_i64]).unwrap();
        assert_eq!(changes.removed, vec![200]);
        assert_eq!(client.subscriptions(), vec![100]);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connection_shares_subscription_set() {
        let client = client();
        client.subscribe([100_i64]).unwrap();
        assert!(client.connection().subscriptions().lock().contains(100));
    }

    #[test]
    fn unresolved_startup_instrument_leaves_stream_idle() {
        let client = client();

        let err = client.subscribe(["NSECM|RELIANCE", "NSECM|UNKNOWN"]).unwrap_err();

        assert_eq!(err.index, 1);
        assert!(client.subscriptions().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.connection().is_stopped());
    }

    #[tokio::test]
    async fn connect_after_stop_is_rejected() {
        let client = client();
        client.stop().await;
        assert!(matches!(
            client.connect(Duration::from_millis(10)).await,
            Err(StreamError::Stopped)
        ));
    }
}
