//! Heartbeat Manager
//!
//! Sends a periodic keep-alive text frame while the feed session is open.
//! One manager runs per logical connection and survives reconnects; while
//! no session is open its ticks are skipped. A failed send marks the
//! session as lost, which hands control to the reconnect supervisor.

use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Default interval between keep-alive frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between keep-alive frames.
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }
}

/// The connection the heartbeat keeps alive.
pub trait HeartbeatTarget: Send + Sync + 'static {
    /// Whether a session is currently open.
    fn is_connected(&self) -> bool;

    /// Queue one keep-alive frame on the open session.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be queued.
    fn send_heartbeat(&self) -> Result<(), HeartbeatError>;

    /// Called after a failed send; the target should drop the session.
    fn heartbeat_failed(&self, error: &HeartbeatError);
}

/// Counters shared between the heartbeat manager and its owner.
#[derive(Debug)]
pub struct HeartbeatState {
    last_ping: RwLock<Option<Instant>>,
    pings_sent: AtomicU64,
    failures: AtomicU64,
    loops_started: AtomicU32,
    running: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_ping: RwLock::new(None),
            pings_sent: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            loops_started: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Claim the right to run the heartbeat loop.
    ///
    /// Returns `false` if a loop is already running.
    pub fn try_start(&self) -> bool {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if claimed {
            self.loops_started.fetch_add(1, Ordering::SeqCst);
        }
        claimed
    }

    /// Release the loop claim.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether a loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Record a successful keep-alive send.
    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Instant::now());
        self.pings_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed keep-alive send.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Keep-alive frames sent so far.
    #[must_use]
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::SeqCst)
    }

    /// Failed keep-alive sends so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// How many heartbeat loops have ever been started.
    #[must_use]
    pub fn loops_started(&self) -> u32 {
        self.loops_started.load(Ordering::SeqCst)
    }

    /// Time since the last successful send.
    #[must_use]
    pub fn time_since_ping(&self) -> Option<Duration> {
        self.last_ping.read().map(|at| at.elapsed())
    }
}

/// Heartbeat manager that keeps the session alive.
///
/// Holds its target weakly so a dropped connection ends the loop.
pub struct HeartbeatManager<T: HeartbeatTarget> {
    config: HeartbeatConfig,
    state: std::sync::Arc<HeartbeatState>,
    target: Weak<T>,
    cancel: CancellationToken,
}

impl<T: HeartbeatTarget> HeartbeatManager<T> {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: std::sync::Arc<HeartbeatState>,
        target: Weak<T>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            target,
            cancel,
        }
    }

    /// Run the heartbeat loop until cancelled or the target is dropped.
    ///
    /// The first frame goes out one full interval after start.
    pub async fn run(self) {
        let period = self.config.ping_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::debug!(interval_secs = period.as_secs(), "Heartbeat loop started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let Some(target) = self.target.upgrade() else {
                        tracing::debug!("Heartbeat target dropped, stopping heartbeat");
                        break;
                    };
                    self.beat(target.as_ref());
                }
            }
        }

        self.state.mark_stopped();
    }

    fn beat(&self, target: &T) {
        if !target.is_connected() {
            return;
        }
        match target.send_heartbeat() {
            Ok(()) => {
                self.state.record_ping();
                tracing::trace!("Heartbeat sent");
            }
            Err(error) => {
                self.state.record_failure();
                tracing::warn!(%error, "Heartbeat send failed, dropping session");
                target.heartbeat_failed(&error);
            }
        }
    }
}

/// Error type for heartbeat operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// No session was open when the frame was due.
    #[error("heartbeat could not be sent: session closed")]
    SessionClosed,
}
