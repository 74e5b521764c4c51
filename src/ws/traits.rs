//! Core traits for the WebSocket layer.

use async_trait::async_trait;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use serde_json::Value;

use super::connection::{Channel, Frame};

/// Lifecycle callbacks invoked by [`super::ConnectionManager`].
///
/// Callbacks for one connection never run concurrently, and `on_open` always completes before
/// the first `on_message` of the same transport is delivered.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// #[async_trait]
/// impl Handler for Printer {
///     async fn on_open(&self, channel: &Channel) {
///         channel.send(r#"{"inference": []}"#).ok();
///     }
///
///     async fn on_message(&self, _channel: &Channel, frame: Frame) {
///         println!("{:?}", frame.as_text());
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Called once per successful open, with the channel bound to the new transport.
    async fn on_open(&self, channel: &Channel);

    /// Called once per inbound text or binary frame.
    async fn on_message(&self, channel: &Channel, frame: Frame);
}

/// Outbound documents that carry the bearer token as a top-level `token` field.
pub trait WithToken: Serialize + Sized {
    fn with_token(&self, token: &SecretString) -> Result<String, serde_json::Error> {
        let mut payload_json = serde_json::to_value(self)?;

        if let Value::Object(ref mut obj) = payload_json {
            obj.insert(
                "token".to_owned(),
                Value::String(token.expose_secret().to_owned()),
            );
        }

        serde_json::to_string(&payload_json)
    }
}
