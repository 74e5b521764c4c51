//! Outbound request documents and the few inbound fields the session reacts to.
//!
//! Request objects are passed through to the service as-is. The typed fields cover what the
//! service documents today; anything else goes into `extra` and is flattened into the object.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ws::{Frame, WithToken};

/// Which side of the market an inference is requested for.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Offer,
    Dealer,
}

/// One inference request, e.g. a 1mm bid-side spread for a FIGI.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
pub struct InferenceRequest {
    /// What to infer, e.g. `price` or `spread`
    #[builder(into)]
    pub rfq_label: String,
    #[builder(into)]
    pub figi: String,
    pub quantity: u64,
    pub side: Side,
    /// `Y` or `N`
    #[builder(into)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ats_indicator: Option<String>,
    /// Historical points in time to infer at, instead of now
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Vec<DateTime<Utc>>>,
    /// Keep streaming updates after the first answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[builder(default)]
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One trade feed request for a FIGI.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
pub struct TradeRequest {
    #[builder(into)]
    pub figi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_inference: Option<bool>,
    #[builder(default)]
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The document sent on every open, and re-sent after every reconnect.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Builder)]
pub struct Subscription {
    #[builder(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inference: Vec<InferenceRequest>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trade: Vec<TradeRequest>,
}

impl WithToken for Subscription {}

/// A document carrying nothing but a fresh token, keeping the server-side session alive.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[expect(
    clippy::empty_structs_with_brackets,
    reason = "A unit struct serializes as null, the token needs an object to merge into"
)]
pub struct TokenUpdate {}

impl WithToken for TokenUpdate {}

/// Server notices that invalidate the current connection's session.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerNotice {
    /// The token on this connection is no longer accepted
    Forbidden,
    /// The account has been deactivated on this connection
    Deactivated,
}

impl ServerNotice {
    /// Looks for a top-level `"message": "forbidden" | "deactivated"` in a text frame.
    #[must_use]
    pub fn parse(frame: &Frame) -> Option<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            message: Option<Value>,
        }

        let envelope: Envelope = serde_json::from_str(frame.as_text()?).ok()?;
        serde_json::from_value(envelope.message?).ok()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;

    #[test]
    fn subscription_serializes_like_the_service_expects() -> Result<(), serde_json::Error> {
        let subscription = Subscription::builder()
            .inference(vec![
                InferenceRequest::builder()
                    .rfq_label("spread")
                    .figi("BBG003LZRTD5")
                    .quantity(1_000_000)
                    .side(Side::Bid)
                    .ats_indicator("N")
                    .subscribe(true)
                    .build(),
                InferenceRequest::builder()
                    .rfq_label("price")
                    .figi("BBG003LZRTD5")
                    .quantity(1_000_000)
                    .side(Side::Dealer)
                    .timestamp(vec![
                        Utc.with_ymd_and_hms(2023, 11, 1, 15, 10, 7).unwrap(),
                    ])
                    .subscribe(false)
                    .build(),
            ])
            .build();

        let payload = subscription.with_token(&SecretString::from("t0k3n".to_owned()))?;

        assert_eq!(
            serde_json::from_str::<Value>(&payload)?,
            json!({
                "token": "t0k3n",
                "inference": [
                    {
                        "rfq_label": "spread",
                        "figi": "BBG003LZRTD5",
                        "quantity": 1_000_000,
                        "side": "bid",
                        "ats_indicator": "N",
                        "subscribe": true
                    },
                    {
                        "rfq_label": "price",
                        "figi": "BBG003LZRTD5",
                        "quantity": 1_000_000,
                        "side": "dealer",
                        "timestamp": ["2023-11-01T15:10:07Z"],
                        "subscribe": false
                    }
                ]
            })
        );

        Ok(())
    }

    #[test]
    fn extra_fields_pass_through() -> Result<(), serde_json::Error> {
        let mut extra = Map::new();
        extra.insert("note".to_owned(), json!("desk-7"));

        let request = TradeRequest::builder()
            .figi("BBG00QN8CB85")
            .subscribe(true)
            .include_inference(true)
            .extra(extra)
            .build();

        assert_eq!(
            serde_json::to_value(&request)?,
            json!({
                "figi": "BBG00QN8CB85",
                "subscribe": true,
                "include_inference": true,
                "note": "desk-7"
            })
        );

        Ok(())
    }

    #[test]
    fn token_update_carries_only_the_token() -> Result<(), serde_json::Error> {
        let payload = TokenUpdate::default().with_token(&SecretString::from("abc".to_owned()))?;

        assert_eq!(payload, r#"{"token":"abc"}"#);

        Ok(())
    }

    #[test]
    fn server_notice_parse() {
        let frame = |value: Value| Frame::Text(value.to_string());

        assert_eq!(
            ServerNotice::parse(&frame(json!({ "message": "forbidden" }))),
            Some(ServerNotice::Forbidden)
        );
        assert_eq!(
            ServerNotice::parse(&frame(json!({ "message": "deactivated" }))),
            Some(ServerNotice::Deactivated)
        );
        assert_eq!(
            ServerNotice::parse(&frame(json!({ "message": "unrecognized figi" }))),
            None
        );
        assert_eq!(
            ServerNotice::parse(&frame(json!({ "inference": [] }))),
            None
        );
        assert_eq!(ServerNotice::parse(&Frame::Text("not json".to_owned())), None);
        assert_eq!(ServerNotice::parse(&Frame::Binary(b"{}".to_vec())), None);
    }
}
