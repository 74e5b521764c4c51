//! A long-lived, authenticated streaming session to the deepmm inference service.
//!
//! - [`ws`]: one WebSocket connection kept alive across an endpoint pool, reconnecting and failing
//!   over with a linearly growing watchdog
//! - [`auth`]: login and silent renewal of the bearer token
//! - [`session`]: both of the above combined, sending the subscription on every open and keeping
//!   the server-side token fresh
//! - [`types`]: the request documents sent to the service
//!
//! Logging goes through `tracing` when the `tracing` feature is enabled (the default).

pub mod auth;
pub mod error;
pub mod session;
pub mod types;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Timestamp in seconds since [`std::time::UNIX_EPOCH`]
pub type Timestamp = i64;

/// The production streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://api.deepmm.com";

/// Region hosting the identity provider
pub const DEFAULT_REGION: &str = "us-west-2";

/// Public client identifier registered with the identity provider
pub const DEFAULT_CLIENT_ID: &str = "1hpqr0c8pbiiufsb8n95414jjh";
