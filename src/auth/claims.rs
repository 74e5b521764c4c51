use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::error::{Error, Kind};
use crate::{Result, Timestamp};

/// The subset of an access token's payload needed to schedule renewals.
///
/// The token is a JWT: `header.payload.signature`, each segment base64url encoded. The signature
/// is not verified here, the remote service does that.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// When the user last authenticated with a password. Survives renewals.
    pub auth_time: Option<Timestamp>,
    /// When this particular token was minted
    pub iat: Option<Timestamp>,
    /// When this particular token stops being accepted
    pub exp: Timestamp,
}

impl Claims {
    /// Decodes the middle segment of `token`.
    pub fn decode(token: &str) -> Result<Self> {
        let payload = token
            .split('.')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| Error::validation("access token has no payload segment"))?;

        // Some issuers keep the padding even though JWTs should not carry it
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;

        serde_json::from_slice(&bytes).map_err(|e| Error::with_source(Kind::Validation, e))
    }

    /// Start of the session's validity window: `auth_time`, falling back to `iat`.
    pub fn issued_at(&self) -> Result<Timestamp> {
        self.auth_time
            .or(self.iat)
            .ok_or_else(|| Error::validation("access token carries neither auth_time nor iat"))
    }
}

/// Builds an unsigned token with the given claims.
#[cfg(test)]
pub(crate) fn unsigned_token(auth_time: Timestamp, exp: Timestamp) -> String {
    use base64::engine::general_purpose::URL_SAFE;

    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE.encode(
        serde_json::json!({
            "sub": "8f2c0d6e-0000-4000-8000-000000000000",
            "auth_time": auth_time,
            "iat": exp - 3600,
            "exp": exp,
        })
        .to_string(),
    );

    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Validation;

    #[test]
    fn decode_should_succeed() -> Result<()> {
        let claims = Claims::decode(&unsigned_token(1_700_000_000, 1_700_003_600))?;

        assert_eq!(claims.auth_time, Some(1_700_000_000));
        assert_eq!(claims.exp, 1_700_003_600);
        assert_eq!(claims.issued_at()?, 1_700_000_000);

        Ok(())
    }

    #[test]
    fn issued_at_falls_back_to_iat() -> Result<()> {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"iat":100,"exp":200}"#);
        let claims = Claims::decode(&format!("e30.{payload}.sig"))?;

        assert_eq!(claims.auth_time, None);
        assert_eq!(claims.issued_at()?, 100);

        Ok(())
    }

    #[test]
    fn missing_issuance_should_fail() -> Result<()> {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"exp":200}"#);
        let claims = Claims::decode(&format!("e30.{payload}.sig"))?;

        let err = claims.issued_at().unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);

        Ok(())
    }

    #[test]
    fn opaque_token_should_fail() {
        let err = Claims::decode("not-a-jwt").unwrap_err();

        let validation = err.downcast_ref::<Validation>().unwrap();
        assert_eq!(validation.reason, "access token has no payload segment");
    }

    #[test]
    fn garbage_payload_should_fail() {
        let err = Claims::decode("e30.!!!.sig").unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);

        let payload = URL_SAFE_NO_PAD.encode("not json");
        let err = Claims::decode(&format!("e30.{payload}.sig")).unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }
}
