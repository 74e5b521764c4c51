//! Authentication against the identity provider and the lifecycle of the bearer token.
//!
//! - [`IdentityProvider`]: the two remote operations, full login and silent renewal
//! - [`cognito::Cognito`]: the identity provider the service actually uses
//! - [`CredentialManager`]: hands out a currently valid token, logging in or renewing as needed
//!
//! ```rust,no_run
//! use deepmm_session::auth::{Cognito, CredentialManager, Credentials};
//! use deepmm_session::{DEFAULT_CLIENT_ID, DEFAULT_REGION};
//!
//! # async fn example() -> deepmm_session::Result<()> {
//! let provider = Cognito::new(DEFAULT_REGION, DEFAULT_CLIENT_ID)?;
//! let manager = CredentialManager::new(provider, Credentials::from_env()?);
//!
//! let token = manager.get_token().await?;
//! # Ok(())
//! # }
//! ```

pub mod claims;
pub mod clock;
pub mod cognito;
pub mod manager;

use async_trait::async_trait;
/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};

pub use claims::Claims;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cognito::Cognito;
pub use manager::CredentialManager;

use crate::Result;
use crate::error::Error;

/// Environment variable holding the account e-mail address used to log in.
pub const USERNAME_VAR: &str = "DEEPMM_USERNAME";

/// Environment variable holding the account password.
pub const PASSWORD_VAR: &str = "DEEPMM_PASSWORD";

/// Username and password used for full logins. Captured once, never sent anywhere except the
/// identity provider.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub(crate) username: String,
    pub(crate) password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(username: String, password: String) -> Self {
        Self {
            username,
            password: SecretString::from(password),
        }
    }

    /// Reads [`USERNAME_VAR`] and [`PASSWORD_VAR`] from the environment.
    pub fn from_env() -> Result<Self> {
        let read = |var: &str| {
            std::env::var(var).map_err(|_e| Error::validation(format!("{var} is not set")))
        };

        Ok(Self::new(read(USERNAME_VAR)?, read(PASSWORD_VAR)?))
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

/// Tokens returned by a successful login or renewal.
///
/// Renewals usually do not hand out a new `renewal_token`; the previous one stays valid.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct Tokens {
    /// Bearer token presented to the streaming service
    pub access_token: SecretString,
    /// Longer-lived token used to mint a new `access_token` without the password
    pub renewal_token: Option<SecretString>,
}

impl Tokens {
    #[must_use]
    pub fn new(access_token: SecretString, renewal_token: Option<SecretString>) -> Self {
        Self {
            access_token,
            renewal_token,
        }
    }
}

/// The identity provider boundary. Both operations are single remote calls and are never
/// retried by this crate.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Full login with username and password.
    async fn login(&self, credentials: &Credentials) -> Result<Tokens>;

    /// Silent renewal with a previously issued renewal token.
    async fn renew(&self, renewal_token: &SecretString) -> Result<Tokens>;
}
