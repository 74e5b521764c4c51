#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior, sleep_until, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use super::config::Config;
use super::endpoint::EndpointPool;
use super::error::WsError;
use super::reconnect::{Attempt, Event, Reconnector};
use super::traits::Handler;
use crate::Result;
use crate::error::{Error, Kind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and no attempt in flight
    Disconnected,
    /// An attempt is in flight
    Connecting {
        /// Index of the targeted endpoint in the pool
        endpoint: usize,
        /// 1-based attempt counter
        attempt: u64,
    },
    /// The transport is open
    Open {
        /// Index of the connected endpoint in the pool
        endpoint: usize,
        /// When the connection was established
        since: Instant,
    },
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// An inbound WebSocket frame, passed through without interpretation.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

#[derive(Debug)]
enum Command {
    Send(Message),
    Reconnect,
}

/// Handle to one open transport.
///
/// A new channel is created for every successful open. Once its transport has closed, sending
/// through it fails with [`WsError::ConnectionClosed`].
#[derive(Clone, Debug)]
pub struct Channel {
    endpoint: Url,
    commands: mpsc::UnboundedSender<Command>,
}

impl Channel {
    /// The endpoint this channel's transport is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Queue a text frame for sending.
    pub fn send<S: Into<String>>(&self, text: S) -> Result<()> {
        let text: String = text.into();
        self.commands
            .send(Command::Send(Message::Text(text.into())))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Serialize `request` as JSON and queue it for sending.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send(json)
    }

    /// Close the transport; the connection loop then connects again.
    pub fn reconnect(&self) {
        _ = self.commands.send(Command::Reconnect);
    }

    /// Whether the transport behind this channel has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Keeps one connection to one of the pool's endpoints alive for the life of the process.
///
/// Failures to connect are never surfaced: every attempt that does not open within its watchdog
/// is abandoned, the next endpoint of the pool is targeted and the watchdog grows by one step.
/// An open connection that later closes is re-established against the same endpoint. Each
/// successful open is reported to the [`Handler`] through `on_open`, each inbound frame through
/// `on_message`.
///
/// The loop stops on [`ConnectionManager::shutdown`] or once every clone is dropped.
///
/// # Example
///
/// ```ignore
/// let pool = EndpointPool::new(["wss://a.example.com", "wss://b.example.com"])?;
/// let connection = ConnectionManager::new(pool, Config::default(), MyHandler);
///
/// let mut state = connection.state_receiver();
/// while state.changed().await.is_ok() {
///     println!("{:?}", *state.borrow());
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    /// Watch channel sender for state changes
    state_tx: watch::Sender<ConnectionState>,
    /// Watch channel receiver for state changes (for use in checking the current state)
    state_rx: watch::Receiver<ConnectionState>,
    /// The channel of the currently open transport, if any
    channel_rx: watch::Receiver<Option<Channel>>,
    /// Endpoint and watchdog bookkeeping, shared with the connection task
    reconnector: Arc<Mutex<Reconnector>>,
    shutdown: CancellationToken,
    /// Cancels `shutdown` once the last clone is dropped
    _guard: Arc<DropGuard>,
}

impl ConnectionManager {
    /// Start the connection loop in a background task and return immediately.
    pub fn new<H: Handler>(pool: EndpointPool, config: Config, handler: H) -> Self {
        let reconnector = Arc::new(Mutex::new(Reconnector::new(pool, &config)));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (channel_tx, channel_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();

        tokio::spawn(Self::connection_loop(
            Arc::clone(&reconnector),
            config,
            handler,
            state_tx.clone(),
            channel_tx,
            shutdown.clone(),
        ));

        Self {
            state_tx,
            state_rx,
            channel_rx,
            reconnector,
            _guard: Arc::new(shutdown.clone().drop_guard()),
            shutdown,
        }
    }

    fn lock(reconnector: &Mutex<Reconnector>) -> MutexGuard<'_, Reconnector> {
        reconnector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Main connection loop with automatic failover and reconnection.
    async fn connection_loop<H: Handler>(
        reconnector: Arc<Mutex<Reconnector>>,
        config: Config,
        handler: H,
        state_tx: watch::Sender<ConnectionState>,
        channel_tx: watch::Sender<Option<Channel>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let attempt = {
                let mut machine = Self::lock(&reconnector);
                let attempt = machine.begin_attempt();
                state_tx.send_replace(machine.state());
                attempt
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                endpoint = %attempt.url,
                attempt = attempt.number,
                watchdog = ?attempt.watchdog,
                "Attempting connection"
            );

            let opened = tokio::select! {
                () = shutdown.cancelled() => break,
                opened = Self::open(&attempt, &config) => opened,
            };

            let Some(ws_stream) = opened else {
                let mut machine = Self::lock(&reconnector);
                machine.handle(Event::WatchdogExpired);
                state_tx.send_replace(machine.state());

                #[cfg(feature = "tracing")]
                tracing::warn!(
                    endpoint = %attempt.url,
                    next_endpoint = %machine.endpoint(),
                    next_watchdog = ?machine.retry_delay(),
                    "Unsuccessful connection"
                );
                continue;
            };

            {
                let mut machine = Self::lock(&reconnector);
                machine.handle(Event::TransportOpened);
                state_tx.send_replace(machine.state());
            }

            #[cfg(feature = "tracing")]
            tracing::info!(endpoint = %attempt.url, "Successful connection");

            let (commands_tx, commands_rx) = mpsc::unbounded_channel();
            let channel = Channel {
                endpoint: attempt.url.clone(),
                commands: commands_tx,
            };
            let result = tokio::select! {
                () = shutdown.cancelled() => Ok(()),
                result = Self::handle_connection(ws_stream, &channel, commands_rx, &handler, &channel_tx, &config) => result,
            };

            channel_tx.send_replace(None);
            {
                let mut machine = Self::lock(&reconnector);
                machine.handle(Event::TransportClosed);
                state_tx.send_replace(machine.state());
            }

            match result {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %attempt.url, "Connection closed");
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(endpoint = %attempt.url, error = %e, "Connection lost");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }

            if shutdown.is_cancelled() {
                break;
            }
        }

        Self::lock(&reconnector).stop();
        channel_tx.send_replace(None);
        state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Open a transport to `attempt.url` before the attempt's watchdog fires.
    ///
    /// An attempt that fails early still uses up its whole watchdog, so that every failure
    /// costs the same time whether it was a refusal or a timeout. A transport that did not open
    /// is simply dropped.
    async fn open(attempt: &Attempt, config: &Config) -> Option<WsStream> {
        let deadline = time::Instant::now() + attempt.watchdog;
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));

        match timeout_at(
            deadline,
            connect_async_with_config(attempt.url.as_str(), Some(ws_config), false),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => Some(ws_stream),
            Ok(Err(e)) => {
                let error = Error::with_source(Kind::WebSocket, WsError::Connection(e));
                #[cfg(feature = "tracing")]
                tracing::debug!(endpoint = %attempt.url, error = %error, "Unable to connect");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;

                sleep_until(deadline).await;
                None
            }
            Err(_elapsed) => None,
        }
    }

    /// Handle an active WebSocket connection until it closes.
    ///
    /// The channel is only published once `on_open` has returned, so nothing sent through
    /// [`ConnectionManager::channel`] can overtake what `on_open` sends.
    ///
    /// Returns `Ok(())` for a requested reconnect and an error for anything the remote side or
    /// the network did.
    async fn handle_connection<H: Handler>(
        ws_stream: WsStream,
        channel: &Channel,
        mut commands_rx: mpsc::UnboundedReceiver<Command>,
        handler: &H,
        channel_tx: &watch::Sender<Option<Channel>>,
        config: &Config,
    ) -> Result<()> {
        handler.on_open(channel).await;
        channel_tx.send_replace(Some(channel.clone()));

        let (mut write, mut read) = ws_stream.split();

        let mut heartbeat = time::interval_at(
            time::Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Set when a PING goes out, cleared by the matching PONG
        let mut awaiting_pong: Option<time::Instant> = None;

        loop {
            tokio::select! {
                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");

                            handler.on_message(channel, Frame::Text(text.as_str().to_owned())).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            handler.on_message(channel, Frame::Binary(bytes.to_vec())).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = None;
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // The PONG reply is queued by tungstenite, flush it out
                            write.flush().await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(WsError::ConnectionClosed.into());
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }

                // Handle outgoing messages and commands from the channel
                Some(command) = commands_rx.recv() => {
                    match command {
                        Command::Send(message) => write.send(message).await?,
                        Command::Reconnect => {
                            _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                // Keep the connection alive
                _ = heartbeat.tick() => {
                    if let (Some(limit), Some(sent)) = (config.heartbeat_timeout, awaiting_pong)
                        && sent.elapsed() >= limit
                    {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Heartbeat timeout: no PONG received within {limit:?}");
                        return Err(WsError::Timeout.into());
                    }

                    write.send(Message::Ping(Default::default())).await?;
                    if awaiting_pong.is_none() {
                        awaiting_pong = Some(time::Instant::now());
                    }
                }
            }
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Watchdog duration of the current or next attempt.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Self::lock(&self.reconnector).retry_delay()
    }

    /// The endpoint the current or next attempt targets.
    #[must_use]
    pub fn endpoint(&self) -> Url {
        Self::lock(&self.reconnector).endpoint().clone()
    }

    /// The channel of the currently open transport, if any.
    #[must_use]
    pub fn channel(&self) -> Option<Channel> {
        self.channel_rx.borrow().clone()
    }

    /// Subscribe to changes of the open channel.
    #[must_use]
    pub fn channel_receiver(&self) -> watch::Receiver<Option<Channel>> {
        self.channel_rx.clone()
    }

    /// Send a text frame on the open transport.
    pub fn send<S: Into<String>>(&self, text: S) -> Result<()> {
        self.channel()
            .ok_or(WsError::ConnectionClosed)?
            .send(text)
    }

    /// Serialize `request` as JSON and send it on the open transport.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send(json)
    }

    /// Close the open transport, if any; the loop connects again right away.
    pub fn reconnect(&self) {
        if let Some(channel) = self.channel() {
            channel.reconnect();
        }
    }

    /// Stop the connection loop for good.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token cancelled once the connection loop is asked to stop.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
