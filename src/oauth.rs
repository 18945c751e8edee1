//! Client for the accounts service token endpoint.
//!
//! Supports the three grants this crate needs:
//! * `authorization_code` - turns a login callback into a [`CredentialPair`]
//! * `refresh_token` - mints a new access credential for a session
//! * `client_credentials` - mints a [`ServiceCredential`] for guest mode
//!
//! All requests are form-encoded and authenticate the application with HTTP
//! Basic credentials. Only this module ever sends a refresh credential over
//! the wire.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    StatusCode, Url,
};
use serde::Deserialize;

use crate::{
    config::Config,
    credentials::{Clock, CredentialPair, ServiceCredential, TokenResponse},
    error::{Error, Result},
    http::{self, Client as HttpClient},
    protocol,
};

pub struct TokenEndpoint {
    http_client: Arc<HttpClient>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

/// OAuth2 error body, as in RFC 6749 section 5.2.
#[derive(Clone, Debug, Default, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenEndpoint {
    #[must_use]
    pub fn new(http_client: Arc<HttpClient>, config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http_client,
            config,
            clock,
        }
    }

    /// Builds the URL that starts an interactive login.
    ///
    /// `state` must be unguessable; the host checks that the callback
    /// returns the same value before calling [`exchange_code`](Self::exchange_code).
    ///
    /// # Errors
    ///
    /// Will return a [`Configuration`](crate::error::ErrorKind::Configuration)
    /// error if the client id or redirect URI are missing. The client secret
    /// is not needed here.
    pub fn authorize_url(&self, state: &str) -> Result<Url> {
        let client_id = self.config.client_id()?;
        let redirect_uri = self
            .config
            .redirect_uri
            .as_ref()
            .ok_or_else(|| Error::configuration("redirect uri not configured"))?;

        let mut url = self.config.authorize_url()?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state);

        Ok(url)
    }

    /// Exchanges an authorization code for a new session's credentials.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the application identity or redirect URI is not configured
    /// - the code was rejected ([`Unauthenticated`](crate::error::ErrorKind::Unauthenticated))
    /// - the request failed or the response could not be decoded
    pub async fn exchange_code(&self, code: &str) -> Result<CredentialPair> {
        let redirect_uri = self
            .config
            .redirect_uri
            .as_ref()
            .ok_or_else(|| Error::configuration("redirect uri not configured"))?;

        let (response, issued_at) = self
            .grant(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .await?;

        debug!("authorization code exchanged");
        CredentialPair::from_grant(response, issued_at)
    }

    /// Mints the successor of `pair`.
    ///
    /// Makes exactly one request; retrying is up to the caller.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the refresh credential was rejected, the request
    /// failed or the response could not be decoded.
    pub async fn refresh(&self, pair: &CredentialPair) -> Result<CredentialPair> {
        let (response, issued_at) = self
            .grant(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", pair.refresh()),
            ])
            .await?;

        let refreshed = pair.refreshed(response, issued_at);
        debug!(
            "access token refreshed; valid for {}s",
            refreshed.time_to_live(issued_at).as_secs()
        );
        Ok(refreshed)
    }

    /// Mints a service-level credential.
    ///
    /// # Errors
    ///
    /// Will return a [`Configuration`](crate::error::ErrorKind::Configuration)
    /// error if the application identity is missing, or another error if the
    /// request failed.
    pub async fn client_credentials(&self) -> Result<ServiceCredential> {
        let (response, issued_at) = self.grant(&[("grant_type", "client_credentials")]).await?;
        debug!(
            "service credential issued; valid for {}s",
            response.expires_in.as_secs()
        );
        Ok(ServiceCredential::from_grant(response, issued_at))
    }

    /// Performs one grant request.
    ///
    /// Returns the response together with the instant the request was issued,
    /// which is what expiry is computed from.
    async fn grant(&self, params: &[(&str, &str)]) -> Result<(TokenResponse, SystemTime)> {
        let authorization = self.basic_authorization()?;
        let url = self.config.token_url()?;

        let mut request = self.http_client.form(url, params)?;
        request.headers_mut().try_insert(AUTHORIZATION, authorization)?;

        let issued_at = self.clock.now();
        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let retry_after = http::retry_after(response.headers());
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Self::grant_error(status, retry_after, &body));
        }

        let token = protocol::json::<TokenResponse>(&body, "token")?;
        if token.access_token.is_empty() {
            return Err(Error::invalid_response("token response lacks an access token"));
        }

        Ok((token, issued_at))
    }

    fn basic_authorization(&self) -> Result<HeaderValue> {
        let (client_id, client_secret) = self.config.client_identity()?;
        let credentials = BASE64.encode(format!("{client_id}:{client_secret}"));

        let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Maps a failed grant.
    ///
    /// A rejected code or refresh credential comes back as 400 `invalid_grant`,
    /// which means the user has to log in again. A rejected application
    /// identity (`invalid_client`) is a deployment problem.
    fn grant_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Error {
        let oauth = serde_json::from_str::<ErrorResponse>(body).unwrap_or_default();
        let message = match oauth.error_description {
            Some(description) => format!("{status}: {} ({description})", oauth.error),
            None if !oauth.error.is_empty() => format!("{status}: {}", oauth.error),
            None => status.to_string(),
        };

        match (status, oauth.error.as_str()) {
            (_, "invalid_client") => Error::configuration(message),
            (StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED, _) => {
                Error::unauthenticated(message)
            }
            _ => Error::from_status(status, false, retry_after, message),
        }
    }
}
