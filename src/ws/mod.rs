//! Core WebSocket infrastructure.
//!
//! This module keeps one transport to one member of an endpoint pool alive, reconnecting and
//! failing over on its own, and reports opens and inbound frames through callbacks.
//!
//! # Architecture
//!
//! - [`Reconnector`]: I/O-free state machine deciding which endpoint to try and for how long
//! - [`ConnectionManager`]: drives the state machine over `tokio-tungstenite` transports
//! - [`Handler`]: `on_open` / `on_message` callbacks supplied by the application
//!
//! # Example
//!
//! ```ignore
//! let pool = EndpointPool::new(["wss://a.example.com", "wss://b.example.com"])?;
//! let connection = ConnectionManager::new(pool, Config::default(), MyHandler);
//!
//! assert!(!connection.state().is_connected());
//! ```

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod reconnect;
pub mod traits;

pub use config::Config;
pub use connection::{Channel, ConnectionManager, ConnectionState, Frame};
pub use endpoint::{EndpointPool, Start};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use reconnect::{Attempt, Event, Reconnector};
pub use traits::*;
