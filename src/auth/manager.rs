use secrecy::{ExposeSecret as _, SecretString};
use tokio::sync::Mutex;

use super::claims::Claims;
use super::clock::{Clock, SystemClock};
use super::{Credentials, IdentityProvider, Tokens};
use crate::error::Error;
use crate::{Result, Timestamp};

/// Age, in seconds, after which a session is treated as stale and a full login is forced,
/// whatever the nominal expiry of the current token says.
pub const SESSION_CEILING: i64 = 3600;

/// How close to expiry, in seconds, a token gets silently renewed.
pub const RENEWAL_WINDOW: i64 = 120;

/// The current authentication state. Replaced as a whole, never field by field.
#[derive(Clone, Debug)]
struct Credential {
    access_token: SecretString,
    renewal_token: SecretString,
    issued_at: Timestamp,
    expires_at: Timestamp,
}

impl Credential {
    /// `previous` supplies the renewal token when a renewal response does not carry a new one.
    fn from_tokens(tokens: Tokens, previous: Option<&Credential>) -> Result<Self> {
        let claims = Claims::decode(tokens.access_token.expose_secret())?;
        let renewal_token = tokens
            .renewal_token
            .or_else(|| previous.map(|credential| credential.renewal_token.clone()))
            .ok_or_else(|| Error::validation("identity provider did not return a renewal token"))?;

        Ok(Self {
            access_token: tokens.access_token,
            renewal_token,
            issued_at: claims.issued_at()?,
            expires_at: claims.exp,
        })
    }
}

/// What `get_token` has to do for the current credential at a given time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Cached,
    Renew,
    Login,
}

impl Step {
    fn plan(credential: Option<&Credential>, now: Timestamp) -> Self {
        match credential {
            None => Step::Login,
            Some(credential) if now.saturating_sub(credential.issued_at) >= SESSION_CEILING => {
                Step::Login
            }
            Some(credential) if credential.expires_at.saturating_sub(now) <= RENEWAL_WINDOW => {
                Step::Renew
            }
            Some(_) => Step::Cached,
        }
    }
}

/// Produces a currently valid bearer token on demand.
///
/// The first call logs in with the username and password. Later calls return the cached token
/// until it gets within [`RENEWAL_WINDOW`] seconds of its expiry, at which point it is renewed
/// silently, and force a full login once the session is [`SESSION_CEILING`] seconds old.
///
/// Refreshes are serialized: concurrent callers wait for the one in-flight login or renewal and
/// then all observe its result. Failures are returned to the caller and never retried here.
#[derive(Debug)]
pub struct CredentialManager<P: IdentityProvider, C: Clock = SystemClock> {
    provider: P,
    credentials: Credentials,
    clock: C,
    credential: Mutex<Option<Credential>>,
}

impl<P: IdentityProvider> CredentialManager<P> {
    #[must_use]
    pub fn new(provider: P, credentials: Credentials) -> Self {
        Self {
            provider,
            credentials,
            clock: SystemClock,
            credential: Mutex::new(None),
        }
    }
}

impl<P: IdentityProvider, C: Clock> CredentialManager<P, C> {
    /// Replaces the clock used for expiry decisions.
    #[must_use]
    pub fn with_clock<T: Clock>(self, clock: T) -> CredentialManager<P, T> {
        CredentialManager {
            provider: self.provider,
            credentials: self.credentials,
            clock,
            credential: self.credential,
        }
    }

    /// Returns a currently valid access token, logging in or renewing first if needed.
    pub async fn get_token(&self) -> Result<SecretString> {
        let mut guard = self.credential.lock().await;
        let now = self.clock.now();

        let credential = match (Step::plan(guard.as_ref(), now), guard.as_ref()) {
            (Step::Cached, Some(credential)) => return Ok(credential.access_token.clone()),
            (Step::Renew, Some(previous)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    expires_in = previous.expires_at - now,
                    "Renewing access token"
                );

                let tokens = self.provider.renew(&previous.renewal_token).await?;
                Credential::from_tokens(tokens, Some(previous))?
            }
            (_, previous) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    username = %self.credentials.username,
                    stale = previous.is_some(),
                    "Logging in"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = previous;

                let tokens = self.provider.login(&self.credentials).await?;
                Credential::from_tokens(tokens, None)?
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            issued_at = credential.issued_at,
            expires_at = credential.expires_at,
            "Access token refreshed"
        );

        let token = credential.access_token.clone();
        *guard = Some(credential);

        Ok(token)
    }

    /// Drops the current credential, so the next [`Self::get_token`] performs a full login.
    ///
    /// Used when the remote side stops accepting a token that has not expired yet.
    pub async fn invalidate(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Discarding access token");

        *self.credential.lock().await = None;
    }

    /// Expiry of the current access token, if one has been issued.
    pub async fn expires_at(&self) -> Option<Timestamp> {
        self.credential
            .lock()
            .await
            .as_ref()
            .map(|credential| credential.expires_at)
    }

    /// Start of the current session's validity window, if one has been issued.
    pub async fn issued_at(&self) -> Option<Timestamp> {
        self.credential
            .lock()
            .await
            .as_ref()
            .map(|credential| credential.issued_at)
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
