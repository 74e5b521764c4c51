#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::{SinkExt as _, StreamExt as _};
use httpmock::{Mock, MockServer};
use reqwest::StatusCode;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

pub const CLIENT_ID: &str = "test-client-id";
pub const USERNAME: &str = "trader@example.com";
pub const PASSWORD: &str = "hunter2";
pub const REFRESH_TOKEN: &str = "refresh-token";

pub const AMZ_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
pub const AMZ_JSON: &str = "application/x-amz-json-1.1";

/// How long tests wait for anything the client is expected to do.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Routes client logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}

/// Builds an unsigned JWT carrying the given claims.
#[must_use]
pub fn unsigned_token(auth_time: i64, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "sub": "8f2c0d6e-0000-4000-8000-000000000000",
            "auth_time": auth_time,
            "iat": auth_time,
            "exp": exp,
        })
        .to_string(),
    );

    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[must_use]
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Mocks a successful `USER_PASSWORD_AUTH` login returning `id_token`.
pub fn mock_login<'a>(server: &'a MockServer, id_token: &str) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(httpmock::Method::POST)
            .path("/")
            .header("x-amz-target", AMZ_TARGET)
            .header("content-type", AMZ_JSON)
            .json_body(json!({
                "AuthFlow": "USER_PASSWORD_AUTH",
                "ClientId": CLIENT_ID,
                "AuthParameters": { "USERNAME": USERNAME, "PASSWORD": PASSWORD }
            }));
        then.status(StatusCode::OK).json_body(json!({
            "AuthenticationResult": {
                "AccessToken": "unused-access-token",
                "ExpiresIn": 3600,
                "IdToken": id_token,
                "RefreshToken": REFRESH_TOKEN,
                "TokenType": "Bearer"
            },
            "ChallengeParameters": {}
        }));
    })
}

/// Mocks a successful `REFRESH_TOKEN_AUTH` renewal returning `id_token` and no refresh token.
pub fn mock_renewal<'a>(server: &'a MockServer, id_token: &str) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(httpmock::Method::POST)
            .path("/")
            .header("x-amz-target", AMZ_TARGET)
            .json_body(json!({
                "AuthFlow": "REFRESH_TOKEN_AUTH",
                "ClientId": CLIENT_ID,
                "AuthParameters": { "REFRESH_TOKEN": REFRESH_TOKEN }
            }));
        then.status(StatusCode::OK).json_body(json!({
            "AuthenticationResult": {
                "AccessToken": "unused-access-token",
                "ExpiresIn": 3600,
                "IdToken": id_token,
                "TokenType": "Bearer"
            },
            "ChallengeParameters": {}
        }));
    })
}

#[derive(Clone, Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Mock WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast to ALL connected clients
    outbound_tx: broadcast::Sender<Outbound>,
    /// Text frames received from any client
    received_rx: mpsc::UnboundedReceiver<String>,
    /// Number of accepted WebSocket handshakes
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outbound_tx, _) = broadcast::channel::<Outbound>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let connections = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = outbound_tx.clone();
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                // Subscribe before counting, so a client seen as connected also receives
                let mut outbound_rx = broadcast_tx.subscribe();
                accepted.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            msg = outbound_rx.recv() => {
                                match msg {
                                    Ok(Outbound::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Outbound::Close) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            outbound_tx,
            received_rx,
            connections,
        }
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.outbound_tx.send(Outbound::Text(message.to_owned())));
    }

    /// Close every connected client's connection.
    pub fn close_all(&self) {
        drop(self.outbound_tx.send(Outbound::Close));
    }

    /// Number of WebSocket handshakes accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Receive the next text frame sent by a client.
    pub async fn recv(&mut self) -> Option<String> {
        timeout(PATIENCE, self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// A `ws://` URL on which nothing listens, so connections are refused right away.
pub async fn refusing_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    format!("ws://{addr}/")
}

/// A `ws://` URL whose listener accepts TCP connections but never answers the handshake.
pub async fn hanging_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    format!("ws://{addr}/")
}

/// A WebSocket server that completes handshakes and then never reads, so PINGs go unanswered.
pub struct SilentWsServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl SilentWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    held.push(ws_stream);
                }
            }
        });

        Self { addr, connections }
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}
