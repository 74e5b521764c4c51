use std::time::Duration;

use backoff::backoff::Backoff;
use bon::Builder;

use super::endpoint::Start;

const DEFAULT_INITIAL_WATCHDOG_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_WATCHDOG_STEP_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_MAX_MESSAGE_SIZE: usize = 100_000_000;

/// Configuration for WebSocket connection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// How long the first attempt may take to open before it counts as failed
    #[builder(default = DEFAULT_INITIAL_WATCHDOG_DURATION)]
    pub initial_watchdog: Duration,
    /// Added to the watchdog after every failed attempt
    #[builder(default = DEFAULT_WATCHDOG_STEP_DURATION)]
    pub watchdog_step: Duration,
    /// Upper bound for the watchdog. `None` lets it grow without limit.
    pub max_watchdog: Option<Duration>,
    /// Interval for sending protocol-level PING frames on an open connection
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Maximum time to wait for a PONG before considering the connection dead.
    /// `None` never closes the connection for a missing PONG.
    pub heartbeat_timeout: Option<Duration>,
    /// Largest inbound message accepted, in bytes
    #[builder(default = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
    /// Which pool member the first attempt targets
    #[builder(default)]
    pub start: Start,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Watchdog duration that grows by a fixed step after every failure.
///
/// `next_backoff` never returns `None`: connection attempts are never abandoned.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    initial: Duration,
    step: Duration,
    max: Option<Duration>,
    current: Duration,
}

impl LinearBackoff {
    #[must_use]
    pub fn new(initial: Duration, step: Duration, max: Option<Duration>) -> Self {
        Self {
            initial,
            step,
            max,
            current: initial,
        }
    }

    /// Watchdog for the current attempt.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.current = self.initial;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let next = self.current.saturating_add(self.step);
        self.current = match self.max {
            Some(max) => next.min(max),
            None => next,
        };

        Some(self.current)
    }
}

impl From<&Config> for LinearBackoff {
    fn from(config: &Config) -> Self {
        Self::new(
            config.initial_watchdog,
            config.watchdog_step,
            config.max_watchdog,
        )
    }
}
