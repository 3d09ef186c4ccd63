//! Stream Connection
//!
//! Owns one logical streaming session to the market data feed and replaces
//! the physical WebSocket whenever it fails.
//!
//! # Stream URL
//!
//! `<stream-url>/<access-token>`; the token is fetched from the
//! [`TokenProvider`] on every attempt and refreshed after a 401/403
//! handshake rejection.
//!
//! # Tasks
//!
//! - **Supervisor**: connect, read/write until the session ends, wait the
//!   fixed reconnect delay, repeat
//! - **Heartbeat**: one keep-alive loop for the lifetime of the client
//! - **Dispatcher**: decodes queued frames and calls the tick consumer
//!
//! # State Machine
//!
//! ```text
//! Disconnected --start--> Connecting --handshake--> Connected
//!      ^                      |                         |
//!      +------ failure -------+------ close/error ------+
//!
//! any --stop--> Closing --> Disconnected (terminal)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{
    AuthError, FeedSession, SendError, TickConsumer, TokenProvider,
};
use crate::domain::streaming::{ConnectionEvent, ConnectionState};
use crate::domain::subscription::{
    SharedSubscriptionSet, SubscriptionAction, SubscriptionRequest,
};
use crate::infrastructure::feed::dispatcher::{
    DEFAULT_TICK_QUEUE_CAPACITY, DispatchStats, TickDispatcher,
};
use crate::infrastructure::feed::heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatManager, HeartbeatState, HeartbeatTarget,
};
use crate::infrastructure::feed::messages::{
    CloseInfo, HEARTBEAT_REPLY_TEXT, OutboundFrame, RawFrame,
};
use crate::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy, sleep_or_cancelled};
use crate::infrastructure::metrics;
use crate::infrastructure::telemetry::session_span;

const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur on the stream connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A frame was sent while no session is open.
    #[error("stream is not connected")]
    NotConnected,

    /// The connection has been stopped.
    #[error("stream connection stopped")]
    Stopped,

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The handshake was rejected because of the access token.
    #[error("access token rejected with HTTP {0}")]
    TokenRejected(u16),

    /// No access token could be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// A control frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream base URL; the access token is appended as a path segment.
    pub url: String,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Upper bound for one WebSocket handshake.
    pub connect_timeout: Duration,
    /// Dispatch queue capacity in frames.
    pub tick_queue_capacity: usize,
    /// How long `stop` waits for each background task.
    pub shutdown_timeout: Duration,
}

impl StreamConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            tick_queue_capacity: DEFAULT_TICK_QUEUE_CAPACITY,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    fn session_url(&self, token: &str) -> String {
        format!("{}/{token}", self.url.trim_end_matches('/'))
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

struct SessionHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    lost: CancellationToken,
}

#[derive(Default)]
struct TaskHandles {
    supervisor: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Self-healing WebSocket connection to the market data feed.
///
/// Manages the connection lifecycle including:
/// - Token lookup and refresh
/// - Subscription replay on every connect
/// - Heartbeat
/// - Fixed-delay reconnection
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use marketdata_stream::application::ports::StaticToken;
/// use marketdata_stream::domain::subscription::SubscriptionSet;
/// use marketdata_stream::infrastructure::feed::connection::{StreamConfig, StreamConnection};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let connection = Arc::new(StreamConnection::new(
///         StreamConfig::new("wss://feed.example.com/ws"),
///         Arc::new(StaticToken::new("token")),
///         SubscriptionSet::shared(),
///     ));
///
///     connection.start()?;
///     connection.wait_until_connected(Duration::from_secs(10)).await?;
///     connection.stop().await;
///     Ok(())
/// }
/// ```
pub struct StreamConnection {
    config: StreamConfig,
    tokens: Arc<dyn TokenProvider>,
    state_tx: watch::Sender<ConnectionState>,
    session: RwLock<Option<SessionHandle>>,
    subscriptions: SharedSubscriptionSet,
    dispatcher: Arc<TickDispatcher>,
    heartbeat: Arc<HeartbeatState>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    tasks: Mutex<TaskHandles>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Create a new connection. Nothing happens until [`Self::start`].
    ///
    /// `subscriptions` is replayed on every connect.
    #[must_use]
    pub fn new(
        config: StreamConfig,
        tokens: Arc<dyn TokenProvider>,
        subscriptions: SharedSubscriptionSet,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dispatcher = Arc::new(TickDispatcher::new(config.tick_queue_capacity));

        Self {
            config,
            tokens,
            state_tx,
            session: RwLock::new(None),
            subscriptions,
            dispatcher,
            heartbeat: Arc::new(HeartbeatState::new()),
            events,
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(TaskHandles::default()),
        }
    }

    /// Start connecting in the background.
    ///
    /// Does nothing if a supervisor is already running. Must be called
    /// inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Stopped`] after [`Self::stop`].
    pub fn start(self: &Arc<Self>) -> Result<(), StreamError> {
        if self.is_stopped() {
            return Err(StreamError::Stopped);
        }

        let mut tasks = self.tasks.lock();
        if tasks.supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!(state = %self.state(), "Stream connection already running");
            return Ok(());
        }

        if tasks.dispatcher.is_none() {
            let dispatcher = Arc::clone(&self.dispatcher);
            tasks.dispatcher = Some(tokio::spawn(dispatcher.run(self.shutdown.clone())));
        }

        self.set_state(ConnectionState::Connecting);
        tasks.supervisor = Some(tokio::spawn(Arc::clone(self).supervise()));
        drop(tasks);

        Ok(())
    }

    /// Stop the connection for good.
    ///
    /// Cancels any pending reconnect, closes the session and waits for the
    /// background tasks. Calling it again does nothing.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Stopping market data stream");
        self.set_state(ConnectionState::Closing);
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            [
                tasks.supervisor.take(),
                tasks.heartbeat.take(),
                tasks.dispatcher.take(),
            ]
            .into_iter()
            .flatten()
            .collect()
        };

        for mut handle in handles {
            if tokio::time::timeout(self.config.shutdown_timeout, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("Background task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.session.write().take();
        self.set_state(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Stopped);
        tracing::info!("Market data stream stopped");
    }

    /// Queue a frame on the open session.
    ///
    /// Never blocks and never buffers while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotConnected`] if no session is open.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), StreamError> {
        let session = self.session.read();
        let Some(handle) = session.as_ref() else {
            return Err(StreamError::NotConnected);
        };
        if self.state() != ConnectionState::Connected {
            return Err(StreamError::NotConnected);
        }
        handle
            .outbound
            .send(frame)
            .map_err(|_| StreamError::NotConnected)
    }

    /// Wait until the session is open.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Timeout`] if not connected in time, or
    /// [`StreamError::Stopped`] if the connection stops meanwhile.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), StreamError> {
        if self.is_stopped() {
            return Err(StreamError::Stopped);
        }

        let mut state_rx = self.state_tx.subscribe();
        let wait = async move {
            state_rx
                .wait_for(|state| *state == ConnectionState::Connected)
                .await
                .map(|_| ())
        };

        tokio::select! {
            () = self.shutdown.cancelled() => Err(StreamError::Stopped),
            result = tokio::time::timeout(timeout, wait) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(StreamError::Stopped),
                Err(_) => Err(StreamError::Timeout(timeout)),
            },
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Whether a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.session.read().is_some()
    }

    /// Whether [`Self::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Receive lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Register the tick consumer.
    pub fn set_consumer(&self, consumer: Arc<dyn TickConsumer>) {
        self.dispatcher.set_consumer(consumer);
    }

    /// Remove the tick consumer.
    pub fn clear_consumer(&self) {
        self.dispatcher.clear_consumer();
    }

    /// Dispatcher counters.
    #[must_use]
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Heartbeat counters.
    #[must_use]
    pub fn heartbeat_state(&self) -> Arc<HeartbeatState> {
        Arc::clone(&self.heartbeat)
    }

    /// The subscription set replayed on connect.
    #[must_use]
    pub fn subscriptions(&self) -> SharedSubscriptionSet {
        Arc::clone(&self.subscriptions)
    }

    // -------------------------------------------------------------------------
    // Supervisor
    // -------------------------------------------------------------------------

    async fn supervise(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut session: u64 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            session += 1;
            self.set_state(ConnectionState::Connecting);
            self.emit(ConnectionEvent::Connecting);

            let span = session_span(&self.config.url, session);
            let close = match self.connect_and_run(&mut policy).instrument(span).await {
                Ok(close) => close,
                Err(error) => {
                    tracing::warn!(%error, "Market data stream error");
                    if let StreamError::TokenRejected(status) = &error {
                        self.refresh_token(*status).await;
                    }
                    CloseInfo::from_error(error.to_string())
                }
            };

            if self.shutdown.is_cancelled() {
                break;
            }
            self.on_close(close);

            let Some(delay) = policy.next_delay() else {
                tracing::info!("Auto-reconnect disabled, supervisor exiting");
                break;
            };
            let attempt = policy.attempt_count();

            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to market data stream"
            );
            self.emit(ConnectionEvent::Reconnecting { attempt, delay });

            if !sleep_or_cancelled(delay, &self.shutdown).await {
                tracing::info!("Stream cancelled during reconnect delay");
                break;
            }
        }
    }

    async fn refresh_token(&self, status: u16) {
        tracing::info!(status, "Access token rejected, refreshing");
        if let Err(error) = self.tokens.refresh().await {
            tracing::warn!(%error, "Token refresh failed");
        }
    }

    /// Connect and run until the session ends or the client stops.
    async fn connect_and_run(
        self: &Arc<Self>,
        policy: &mut ReconnectPolicy,
    ) -> Result<CloseInfo, StreamError> {
        let token = self.tokens.access_token().await?;
        let url = self.config.session_url(&token);

        tracing::info!(url = %self.config.url, "Connecting to market data stream");

        let handshake = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.shutdown.cancelled() => return Ok(CloseInfo::from_error("client stopped")),
            result = handshake => match result {
                Err(_) => return Err(StreamError::Timeout(self.config.connect_timeout)),
                Ok(Err(tungstenite::Error::Http(response)))
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    return Err(StreamError::TokenRejected(response.status().as_u16()));
                }
                Ok(Err(error)) => return Err(error.into()),
                Ok(Ok(pair)) => pair,
            },
        };

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let lost = CancellationToken::new();

        self.on_connect(outbound_tx, lost.clone());
        policy.reset();

        let close = loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break CloseInfo::from_error("client stopped");
                }
                () = lost.cancelled() => {
                    break CloseInfo::from_error("heartbeat send failed");
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        break CloseInfo::from_error("outbound channel closed");
                    };
                    let kind = frame.kind();
                    if let OutboundFrame::Control(request) = &frame {
                        metrics::record_control_frame(action_label(request));
                    }
                    write.send(frame.into_message()?).await?;
                    tracing::debug!(kind, "Frame sent");
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if text.as_str() == HEARTBEAT_REPLY_TEXT {
                                tracing::trace!("Heartbeat reply received");
                                continue;
                            }
                            metrics::record_frame_received(false);
                            self.dispatcher.enqueue(RawFrame::Text(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            metrics::record_frame_received(true);
                            self.dispatcher.enqueue(RawFrame::Binary(bytes.to_vec()));
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("Server sent close frame");
                            break CloseInfo {
                                code: frame.as_ref().map(|f| u16::from(f.code)),
                                reason: frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default(),
                            };
                        }
                        Some(Ok(_)) => {
                            // Pong and raw frames
                        }
                        Some(Err(error)) => return Err(error.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            break CloseInfo::from_error("stream ended");
                        }
                    }
                }
            }
        };

        Ok(close)
    }

    /// Replay subscriptions and open the session for senders.
    ///
    /// The set stays locked until the session is installed, so the replay
    /// is always the first frame and concurrent deltas queue behind it.
    fn on_connect(self: &Arc<Self>, outbound: mpsc::UnboundedSender<OutboundFrame>, lost: CancellationToken) {
        let subscriptions = self.subscriptions.lock();
        let replayed = subscriptions.len();
        if let Some(request) = subscriptions.replay_request() {
            let _ = outbound.send(OutboundFrame::Control(request));
        }
        *self.session.write() = Some(SessionHandle { outbound, lost });
        self.set_state(ConnectionState::Connected);
        drop(subscriptions);

        metrics::set_subscriptions(replayed);
        tracing::info!(replayed, "Connected to market data stream");

        self.ensure_heartbeat();
        self.emit(ConnectionEvent::Connected);
    }

    fn on_close(&self, close: CloseInfo) {
        self.session.write().take();
        self.set_state(ConnectionState::Disconnected);

        tracing::warn!(
            code = ?close.code,
            reason = %close.reason,
            "Market data stream disconnected"
        );
        self.emit(ConnectionEvent::Disconnected {
            code: close.code,
            reason: close.reason,
        });
    }

    fn ensure_heartbeat(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() || !self.heartbeat.try_start() {
            return;
        }

        let manager = HeartbeatManager::new(
            self.config.heartbeat.clone(),
            Arc::clone(&self.heartbeat),
            Arc::downgrade(self),
            self.shutdown.clone(),
        );
        self.tasks.lock().heartbeat = Some(tokio::spawn(manager.run()));
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
        metrics::set_connection_state(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

const fn action_label(request: &SubscriptionRequest) -> &'static str {
    match request.action {
        SubscriptionAction::Subscribe => "subscribe",
        SubscriptionAction::Unsubscribe => "unsubscribe",
    }
}

impl HeartbeatTarget for StreamConnection {
    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    fn send_heartbeat(&self) -> Result<(), HeartbeatError> {
        self.send(OutboundFrame::Heartbeat)
            .map_err(|_| HeartbeatError::SessionClosed)
    }

    fn heartbeat_failed(&self, _error: &HeartbeatError) {
        metrics::record_heartbeat_failure();
        if let Some(session) = self.session.read().as_ref() {
            session.lost.cancel();
        }
    }
}

impl FeedSession for StreamConnection {
    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    fn send_request(&self, request: SubscriptionRequest) -> Result<(), SendError> {
        self.send(OutboundFrame::Control(request))
            .map_err(|_| SendError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockTokenProvider, StaticToken};
    use crate::domain::subscription::SubscriptionSet;

    fn unreachable_config() -> StreamConfig {
        let mut config = StreamConfig::new("ws://127.0.0.1:1/stream");
        config.reconnect = ReconnectConfig::new(Duration::from_millis(50), true);
        config.connect_timeout = Duration::from_millis(500);
        config.shutdown_timeout = Duration::from_secs(1);
        config
    }

    fn connection(config: StreamConfig) -> Arc<StreamConnection> {
        Arc::new(StreamConnection::new(
            config,
            Arc::new(StaticToken::new("token")),
            SubscriptionSet::shared(),
        ))
    }

    #[test]
    fn session_url_appends_token() {
        assert_eq!(
            StreamConfig::new("wss://feed.example.com/ws/").session_url("abc"),
            "wss://feed.example.com/ws/abc"
        );
        assert_eq!(
            StreamConfig::new("wss://feed.example.com/ws").session_url("abc"),
            "wss://feed.example.com/ws/abc"
        );
    }

    #[test]
    fn send_requires_connection() {
        let connection = connection(unreachable_config());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            connection.send(OutboundFrame::Heartbeat),
            Err(StreamError::NotConnected)
        ));
        assert_eq!(
            connection.send_request(SubscriptionRequest::subscribe(vec![1])),
            Err(SendError::NotConnected)
        );
    }

    #[tokio::test]
    async fn failed_attempts_keep_reconnecting() {
        let connection = connection(unreachable_config());
        let mut events = connection.subscribe_events();

        connection.start().unwrap();

        let mut reconnects = 0;
        while reconnects < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ConnectionEvent::Reconnecting { attempt, delay } = event {
                reconnects += 1;
                assert_eq!(attempt, reconnects);
                assert_eq!(delay, Duration::from_millis(50));
            }
        }

        assert!(!connection.is_connected());
        connection.stop().await;
    }

    #[tokio::test]
    async fn wait_until_connected_times_out() {
        let connection = connection(unreachable_config());
        connection.start().unwrap();

        let result = connection
            .wait_until_connected(Duration::from_millis(200))
            .await;

        assert!(matches!(result, Err(StreamError::Timeout(_))));
        connection.stop().await;
    }

    #[tokio::test]
    async fn start_after_stop_fails() {
        let connection = connection(unreachable_config());
        connection.start().unwrap();
        connection.stop().await;
        connection.stop().await;

        assert!(matches!(connection.start(), Err(StreamError::Stopped)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            connection.wait_until_connected(Duration::from_millis(10)).await,
            Err(StreamError::Stopped)
        ));
    }

    #[tokio::test]
    async fn stop_emits_stopped_event() {
        let connection = connection(unreachable_config());
        let mut events = connection.subscribe_events();
        connection.start().unwrap();
        connection.stop().await;

        let mut saw_stopped = false;
        while let Ok(event) = events.try_recv() {
            saw_stopped |= event == ConnectionEvent::Stopped;
        }
        assert!(saw_stopped);
    }

    #[tokio::test]
    async fn disabled_reconnect_stops_after_first_failure() {
        let mut config = unreachable_config();
        config.reconnect = ReconnectConfig::disabled();
        let connection = connection(config);
        let mut events = connection.subscribe_events();

        connection.start().unwrap();

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(!matches!(event, ConnectionEvent::Reconnecting { .. }));
            if matches!(event, ConnectionEvent::Disconnected { .. }) {
                break;
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        connection.stop().await;
    }

    #[tokio::test]
    async fn token_failure_is_a_connection_failure() {
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_access_token()
            .returning(|| Err(AuthError::LoginFailed("bad credentials".to_string())));
        let connection = Arc::new(StreamConnection::new(
            unreachable_config(),
            Arc::new(tokens),
            SubscriptionSet::shared(),
        ));
        let mut events = connection.subscribe_events();

        connection.start().unwrap();

        let reason = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ConnectionEvent::Disconnected { reason, .. } = event {
                break reason;
            }
        };
        assert!(reason.contains("bad credentials"));
        connection.stop().await;
    }
}
