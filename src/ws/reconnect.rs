//! The reconnect/failover state machine, free of any I/O.
//!
//! [`super::ConnectionManager`] drives a [`Reconnector`] from its connection task: it asks for
//! the next [`Attempt`], races the transport against the attempt's watchdog and reports the
//! outcome back as an [`Event`].
//!
//! ```text
//!                 begin_attempt
//!  Disconnected ─────────────────▶ Connecting
//!       ▲  ▲                          │   │
//!       │  └───── WatchdogExpired ────┘   │ TransportOpened
//!       │                                 ▼
//!       └──────── TransportClosed ────── Open
//! ```

use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;
use url::Url;

use super::config::{Config, LinearBackoff};
use super::connection::ConnectionState;
use super::endpoint::EndpointPool;

/// External events that drive the state machine.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The current attempt did not open before its watchdog fired
    WatchdogExpired,
    /// The current attempt opened before its watchdog fired
    TransportOpened,
    /// An open transport closed, for whatever reason
    TransportClosed,
}

/// One connection attempt as planned by [`Reconnector::begin_attempt`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt counter over the life of the state machine
    pub number: u64,
    /// Index into the endpoint pool
    pub endpoint: usize,
    pub url: Url,
    /// How long the transport may take to open
    pub watchdog: Duration,
}

/// Tracks the targeted endpoint, the watchdog duration and the connection state.
///
/// - A failed attempt advances to the next pool member and grows the watchdog by one step.
/// - A successful open leaves both untouched: the next failure continues from where the
///   watchdog was, not from its initial value.
/// - A close after open re-targets the same endpoint with the same watchdog.
#[derive(Debug, Clone)]
pub struct Reconnector {
    pool: EndpointPool,
    endpoint: usize,
    backoff: LinearBackoff,
    state: ConnectionState,
    attempts: u64,
}

impl Reconnector {
    #[must_use]
    pub fn new(pool: EndpointPool, config: &Config) -> Self {
        let endpoint = pool.start_index(config.start);

        Self {
            pool,
            endpoint,
            backoff: config.into(),
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    /// Moves to [`ConnectionState::Connecting`] and returns what to connect to, for how long.
    pub fn begin_attempt(&mut self) -> Attempt {
        self.attempts += 1;
        self.state = ConnectionState::Connecting {
            endpoint: self.endpoint,
            attempt: self.attempts,
        };

        Attempt {
            number: self.attempts,
            endpoint: self.endpoint,
            url: self.pool.get(self.endpoint).clone(),
            watchdog: self.backoff.current(),
        }
    }

    /// Applies `event`. Returns `false`, leaving everything untouched, when the event does not
    /// apply to the current state, e.g. a late watchdog for an attempt that already opened.
    pub fn handle(&mut self, event: Event) -> bool {
        match (self.state, event) {
            (ConnectionState::Connecting { .. }, Event::WatchdogExpired) => {
                self.endpoint = self.pool.next(self.endpoint);
                _ = self.backoff.next_backoff();
                self.state = ConnectionState::Disconnected;
                true
            }
            (ConnectionState::Connecting { endpoint, .. }, Event::TransportOpened) => {
                self.state = ConnectionState::Open {
                    endpoint,
                    since: Instant::now(),
                };
                true
            }
            (ConnectionState::Open { .. }, Event::TransportClosed) => {
                self.state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Moves to [`ConnectionState::Disconnected`] without touching endpoint or watchdog.
    pub fn stop(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Index of the endpoint the next (or current) attempt targets.
    #[must_use]
    pub fn endpoint_index(&self) -> usize {
        self.endpoint
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        self.pool.get(self.endpoint)
    }

    /// Watchdog of the next (or current) attempt.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.backoff.current()
    }

    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    #[must_use]
    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }
}
