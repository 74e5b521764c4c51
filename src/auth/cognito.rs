use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Credentials, IdentityProvider, Tokens};
use crate::Result;
use crate::error::{Error, StatusCode};

const AMZ_TARGET: &str = "x-amz-target";
const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const AMZ_JSON: &str = "application/x-amz-json-1.1";
const OPERATION: &str = "InitiateAuth";

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum AuthFlow {
    UserPasswordAuth,
    RefreshTokenAuth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthRequest<'a> {
    auth_flow: AuthFlow,
    client_id: &'a str,
    auth_parameters: BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    id_token: SecretString,
    refresh_token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: String,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// AWS Cognito user pool, called through the unauthenticated `InitiateAuth` action.
///
/// The `IdToken` of the result is the bearer token the streaming service expects.
#[derive(Clone, Debug)]
pub struct Cognito {
    client: Client,
    host: Url,
    client_id: String,
}

impl Cognito {
    /// Targets the regional Cognito endpoint, e.g. `us-west-2`.
    pub fn new(region: &str, client_id: &str) -> Result<Self> {
        Self::with_host(&format!("https://cognito-idp.{region}.amazonaws.com/"), client_id)
    }

    /// Targets an arbitrary host speaking the Cognito JSON protocol.
    pub fn with_host(host: &str, client_id: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(AMZ_JSON));
        headers.insert(AMZ_TARGET, HeaderValue::from_static(INITIATE_AUTH_TARGET));

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            host: Url::parse(host)?,
            client_id: client_id.to_owned(),
        })
    }

    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, parameters), fields(status_code))
    )]
    async fn initiate_auth(
        &self,
        flow: AuthFlow,
        parameters: BTreeMap<&'static str, &str>,
    ) -> Result<Tokens> {
        let body = serde_json::to_vec(&InitiateAuthRequest {
            auth_flow: flow,
            client_id: &self.client_id,
            auth_parameters: parameters,
        })?;

        let response = self
            .client
            .post(self.host.clone())
            .body(body)
            .send()
            .await?;
        let status_code = response.status();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("status_code", status_code.as_u16());

        if !status_code.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_error(status_code, text));
        }

        let response: InitiateAuthResponse = response.json().await?;
        match response.authentication_result {
            Some(result) => Ok(Tokens::new(result.id_token, result.refresh_token)),
            None => Err(Error::authentication(
                "ChallengeRequired",
                format!(
                    "identity provider requires the {} challenge",
                    response.challenge_name.as_deref().unwrap_or("unknown")
                ),
            )),
        }
    }

    fn map_error(status_code: StatusCode, text: String) -> Error {
        // Client errors carry `{"__type": ..., "message": ...}`, server errors may not
        if status_code.is_client_error()
            && let Ok(body) = serde_json::from_str::<ErrorBody>(&text)
        {
            let code = body.kind.rsplit('#').next().unwrap_or(&body.kind);

            #[cfg(feature = "tracing")]
            tracing::warn!(status = %status_code, code, "Identity provider rejected the request");

            return Error::authentication(code, body.message.unwrap_or_default());
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(status = %status_code, message = %text, "Identity provider request failed");

        Error::status(status_code, OPERATION, text)
    }
}

#[async_trait]
impl IdentityProvider for Cognito {
    async fn login(&self, credentials: &Credentials) -> Result<Tokens> {
        let parameters = BTreeMap::from([
            ("USERNAME", credentials.username.as_str()),
            ("PASSWORD", credentials.password.expose_secret()),
        ]);

        self.initiate_auth(AuthFlow::UserPasswordAuth, parameters)
            .await
    }

    async fn renew(&self, renewal_token: &SecretString) -> Result<Tokens> {
        let parameters = BTreeMap::from([("REFRESH_TOKEN", renewal_token.expose_secret())]);

        self.initiate_auth(AuthFlow::RefreshTokenAuth, parameters)
            .await
    }
}
