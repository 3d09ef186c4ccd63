//! Reconnection Policy
//!
//! Fixed-delay reconnection for the feed WebSocket. Every attempt waits the
//! same configured delay; attempts continue until the connection is
//! stopped or auto-reconnect is disabled.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before every reconnection attempt.
    pub delay: Duration,
    /// Whether to reconnect at all after the session is lost.
    pub enabled: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            enabled: true,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(delay: Duration, enabled: bool) -> Self {
        Self { delay, enabled }
    }

    /// Configuration that never reconnects.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            enabled: false,
        }
    }
}

/// Reconnection policy with a fixed delay.
///
/// # Example
///
/// ```rust
/// use marketdata_stream::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.attempt_count(), 2);
///
/// // Successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// Returns `None` if reconnection is disabled.
    #[must_use]
    pub const fn next_delay(&mut self) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        self.attempt_count = self.attempt_count.saturating_add(1);
        Some(self.config.delay)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.enabled
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `true` if the full delay elapsed.
pub async fn sleep_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay, Duration::from_secs(5));
        assert!(config.enabled);
    }

    #[test]
    fn delay_is_fixed() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::new(Duration::from_millis(250), true));

        for attempt in 1..=20 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(250)));
            assert_eq!(policy.attempt_count(), attempt);
        }
    }

    #[test]
    fn disabled_policy_never_retries() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::disabled());
        assert!(!policy.should_retry());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 0);
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_full_delay() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        assert!(sleep_or_cancelled(Duration::from_secs(5), &cancel).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(!sleep_or_cancelled(Duration::from_secs(5), &cancel).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
