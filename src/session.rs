//! An authenticated streaming session on top of [`ConnectionManager`] and [`CredentialManager`].
//!
//! On every open the session fetches a token and sends the subscription with it. While a
//! connection is open it pushes a fresh token on a fixed interval so the server never sees an
//! expired one. A `forbidden` or `deactivated` notice from the server discards the cached token
//! and forces a reconnect, which logs in again and re-sends the subscription.

#![expect(
    clippy::module_name_repetitions,
    reason = "Session types are re-exported and read better with the prefix"
)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Result;
use crate::auth::{Clock, CredentialManager, IdentityProvider, SystemClock};
use crate::error::Error;
use crate::types::{ServerNotice, Subscription, TokenUpdate};
use crate::ws::{
    self, Channel, ConnectionManager, ConnectionState, EndpointPool, Frame, Handler, WithToken,
};

const DEFAULT_TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for [`Session`].
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Reconnect, failover and heartbeat behavior of the underlying connection
    #[builder(default)]
    pub connection: ws::Config,
    /// How often a fresh token is pushed on the open connection
    #[builder(default = DEFAULT_TOKEN_REFRESH_INTERVAL)]
    pub token_refresh_interval: Duration,
    /// Events buffered per subscriber before the slowest one starts lagging
    #[builder(default = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// What a [`Session`] reports to its subscribers.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A connection opened and the subscription went out with a valid token
    Opened { endpoint: Url },
    /// An inbound frame, including server notices
    Message(Frame),
    /// A token could not be obtained for the subscription or a token push
    AuthenticationFailed(Arc<Error>),
}

/// A resilient, authenticated subscription to the streaming service.
///
/// # Example
///
/// ```rust,no_run
/// use deepmm_session::auth::{Cognito, CredentialManager, Credentials};
/// use deepmm_session::session::{Config, Session, SessionEvent};
/// use deepmm_session::types::{InferenceRequest, Side, Subscription};
/// use deepmm_session::ws::EndpointPool;
/// use deepmm_session::{DEFAULT_CLIENT_ID, DEFAULT_ENDPOINT, DEFAULT_REGION};
///
/// # async fn example() -> deepmm_session::Result<()> {
/// let credentials = CredentialManager::new(
///     Cognito::new(DEFAULT_REGION, DEFAULT_CLIENT_ID)?,
///     Credentials::from_env()?,
/// );
/// let subscription = Subscription::builder()
///     .inference(vec![
///         InferenceRequest::builder()
///             .rfq_label("spread")
///             .figi("BBG003LZRTD5")
///             .quantity(1_000_000)
///             .side(Side::Bid)
///             .subscribe(true)
///             .build(),
///     ])
///     .build();
///
/// let session = Session::connect(
///     EndpointPool::single(DEFAULT_ENDPOINT)?,
///     Config::default(),
///     credentials,
///     subscription,
/// );
///
/// let mut events = session.subscribe();
/// while let Ok(event) = events.recv().await {
///     if let SessionEvent::Message(frame) = event {
///         println!("{:?}", frame.as_text());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Session<P: IdentityProvider, C: Clock = SystemClock> {
    connection: ConnectionManager,
    credentials: Arc<CredentialManager<P, C>>,
    events: broadcast::Sender<SessionEvent>,
}

impl<P: IdentityProvider, C: Clock> Clone for Session<P, C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            credentials: Arc::clone(&self.credentials),
            events: self.events.clone(),
        }
    }
}

impl<P: IdentityProvider, C: Clock> Session<P, C> {
    /// Start connecting in the background and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        pool: EndpointPool,
        config: Config,
        credentials: CredentialManager<P, C>,
        subscription: Subscription,
    ) -> Self {
        let credentials = Arc::new(credentials);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let handler = SessionHandler {
            credentials: Arc::clone(&credentials),
            subscription,
            events: events.clone(),
        };
        let connection = ConnectionManager::new(pool, config.connection, handler);

        tokio::spawn(refresh_tokens(
            Arc::clone(&credentials),
            connection.channel_receiver(),
            events.clone(),
            config.token_refresh_interval,
            connection.shutdown_token(),
        ));

        Self {
            connection,
            credentials,
            events,
        }
    }

    /// Subscribe to session events. Only events published after this call are received.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialManager<P, C> {
        &self.credentials
    }

    /// Send `request` with a valid token merged in on the open connection.
    pub async fn send<R: WithToken>(&self, request: &R) -> Result<()> {
        let token = self.credentials.get_token().await?;
        self.connection.send(request.with_token(&token)?)
    }

    /// Stop the connection and the token pushes for good.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

struct SessionHandler<P: IdentityProvider, C: Clock> {
    credentials: Arc<CredentialManager<P, C>>,
    subscription: Subscription,
    events: broadcast::Sender<SessionEvent>,
}

impl<P: IdentityProvider, C: Clock> SessionHandler<P, C> {
    async fn authenticate(&self, channel: &Channel) -> Result<()> {
        let token = self.credentials.get_token().await?;
        channel.send(self.subscription.with_token(&token)?)
    }
}

#[async_trait]
impl<P: IdentityProvider, C: Clock> Handler for SessionHandler<P, C> {
    async fn on_open(&self, channel: &Channel) {
        match self.authenticate(channel).await {
            Ok(()) => {
                _ = self.events.send(SessionEvent::Opened {
                    endpoint: channel.endpoint().clone(),
                });
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(endpoint = %channel.endpoint(), error = %e, "Unable to subscribe");

                _ = self.events.send(SessionEvent::AuthenticationFailed(Arc::new(e)));
            }
        }
    }

    async fn on_message(&self, channel: &Channel, frame: Frame) {
        if let Some(notice) = ServerNotice::parse(&frame) {
            #[cfg(feature = "tracing")]
            tracing::warn!(endpoint = %channel.endpoint(), ?notice, "Session rejected, logging in again");
            #[cfg(not(feature = "tracing"))]
            let _ = notice;

            // The rejected token is not offered again, the next open performs a full login
            self.credentials.invalidate().await;
            channel.reconnect();
        }

        _ = self.events.send(SessionEvent::Message(frame));
    }
}

/// Push a fresh token on whatever connection is open, every `interval`, until `shutdown`.
async fn refresh_tokens<P: IdentityProvider, C: Clock>(
    credentials: Arc<CredentialManager<P, C>>,
    channels: watch::Receiver<Option<Channel>>,
    events: broadcast::Sender<SessionEvent>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let channel = channels.borrow().clone();
        let Some(channel) = channel else {
            continue;
        };

        let pushed = match credentials.get_token().await {
            Ok(token) => TokenUpdate::default()
                .with_token(&token)
                .map_err(Error::from)
                .and_then(|payload| channel.send(payload)),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Unable to refresh token");

                _ = events.send(SessionEvent::AuthenticationFailed(Arc::new(e)));
                continue;
            }
        };

        // The connection may have closed while the token was fetched; the next open sends one
        if let Err(e) = pushed {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Token push skipped");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
