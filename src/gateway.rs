//! Authenticated access to the Web API.
//!
//! The gateway picks the credential for each [`Operation`], performs the
//! request and normalizes the outcome:
//!
//! | Status | Result |
//! |---|---|
//! | 2xx with body | decoded output |
//! | 204 or empty body | `None` |
//! | 401 | [`Unauthenticated`](crate::error::ErrorKind::Unauthenticated) |
//! | 403 | [`Forbidden`](crate::error::ErrorKind::Forbidden) |
//! | 404 on device-scoped operations | [`NoActiveDevice`](crate::error::ErrorKind::NoActiveDevice) |
//! | 404 elsewhere | [`NotFound`](crate::error::ErrorKind::NotFound) |
//! | 429 | [`RateLimited`](crate::error::ErrorKind::RateLimited), with `Retry-After` |
//! | 5xx | [`UpstreamUnavailable`](crate::error::ErrorKind::UpstreamUnavailable) |
//!
//! # Credential Selection
//!
//! Catalog operations use the user's credential when it resolves, and the
//! shared service credential otherwise. User operations never fall back:
//! without a usable user credential they fail as unauthenticated.

use std::sync::Arc;

use reqwest::StatusCode;

use crate::{
    authority::TokenAuthority,
    config::Config,
    credentials::CredentialPair,
    error::{Error, ErrorKind, Result},
    http::{self, Client as HttpClient},
    playback::{Command, PlaybackView},
    protocol::{
        self,
        catalog::{Search, Track},
        library::{Playlist, Playlists, Profile, SavedTrack, SavedTracks, UserProfile},
        player::{Device, Devices, PlaybackState},
        Access, ErrorResponse, Operation, Page,
    },
    service::ServiceCredentialProvider,
};

/// Which credential a call was made with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// The user's own credential.
    User,

    /// The shared service credential (guest mode).
    Service,
}

/// Result of a call, with the refreshed pair the caller must persist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorized<T> {
    pub value: T,
    pub updated: Option<CredentialPair>,
    pub mode: Mode,
}

impl<T> Authorized<T> {
    pub fn map<U, F>(self, f: F) -> Authorized<U>
    where
        F: FnOnce(T) -> U,
    {
        Authorized {
            value: f(self.value),
            updated: self.updated,
            mode: self.mode,
        }
    }
}

pub struct AuthenticatedGateway {
    http_client: Arc<HttpClient>,
    config: Arc<Config>,
    authority: Arc<TokenAuthority>,
    service: Arc<ServiceCredentialProvider>,
}

impl AuthenticatedGateway {
    #[must_use]
    pub fn new(
        http_client: Arc<HttpClient>,
        config: Arc<Config>,
        authority: Arc<TokenAuthority>,
        service: Arc<ServiceCredentialProvider>,
    ) -> Self {
        Self {
            http_client,
            config,
            authority,
            service,
        }
    }

    /// Performs `op` with the best credential available for `pair`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - a user operation has no usable user credential
    /// - a catalog operation falls back and no service credential can be
    ///   obtained
    /// - the service answers with an error status or an undecodable body
    pub async fn call<O>(
        &self,
        op: &O,
        pair: Option<&CredentialPair>,
    ) -> Result<Authorized<Option<O::Output>>>
    where
        O: Operation + Sync,
    {
        match self.authority.resolve(pair).await {
            Ok(resolved) => {
                let value = self.call_with(op, &resolved.access).await?;
                Ok(Authorized {
                    value,
                    updated: resolved.updated,
                    mode: Mode::User,
                })
            }
            Err(fallback) => match O::ACCESS {
                Access::User => Err(fallback.into()),
                Access::Catalog => {
                    let value = self.call_as_service(op).await?;
                    Ok(Authorized {
                        value,
                        updated: None,
                        mode: Mode::Service,
                    })
                }
            },
        }
    }

    /// Performs `op` with the service credential.
    ///
    /// A credential the service rejects is discarded and the call retried
    /// once with a fresh one.
    async fn call_as_service<O>(&self, op: &O) -> Result<Option<O::Output>>
    where
        O: Operation + Sync,
    {
        let access = self.service.access().await?;
        match self.call_with(op, &access).await {
            Err(e) if e.kind == ErrorKind::Unauthenticated => {
                self.service.invalidate(&access).await;
                let access = self.service.access().await?;
                self.call_with(op, &access).await
            }
            result => result,
        }
    }

    /// Performs `op` with an already resolved access credential.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails, the service answers with an
    /// error status or the body cannot be decoded.
    pub async fn call_with<O>(&self, op: &O, access: &str) -> Result<Option<O::Output>>
    where
        O: Operation + Sync,
    {
        let body = self.send(op, access).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        protocol::json(&body, O::NAME).map(Some)
    }

    /// Sends `op` and returns the body of a successful response.
    ///
    /// Responses without content yield an empty body.
    async fn send<O>(&self, op: &O, access: &str) -> Result<String>
    where
        O: Operation + Sync,
    {
        let mut url = self.config.api_endpoint(&op.path())?;
        let query = op.query();
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }

        let request = self
            .http_client
            .bearer(op.method(), url, access, op.body().as_ref())?;
        let response = self.http_client.execute(request).await?;

        let status = response.status();
        let retry_after = http::retry_after(response.headers());
        let body = response.text().await?;

        if status == StatusCode::NO_CONTENT {
            return Ok(String::new());
        }

        if !status.is_success() {
            let message = ErrorResponse::message(&body).unwrap_or_else(|| status.to_string());
            let err = Error::from_status(status, O::DEVICE_SCOPED, retry_after, message);
            if err.kind == ErrorKind::RateLimited {
                warn!(
                    "{}: rate limited; retry after {}s",
                    O::NAME,
                    retry_after.unwrap_or_default().as_secs()
                );
            } else {
                debug!("{}: {err}", O::NAME);
            }
            return Err(err);
        }

        Ok(body)
    }

    /// Searches the catalog for tracks.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn search(
        &self,
        search: &Search,
        pair: Option<&CredentialPair>,
    ) -> Result<Authorized<Page<Track>>> {
        let authorized = self.call(search, pair).await?;
        Ok(authorized.map(|response| {
            response.map_or_else(|| empty_page(search.limit), |response| response.tracks)
        }))
    }

    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn profile(&self, pair: Option<&CredentialPair>) -> Result<Authorized<UserProfile>> {
        let authorized = self.call(&Profile, pair).await?;
        let value = authorized
            .value
            .ok_or_else(|| Error::invalid_response("profile response is empty"))?;
        Ok(Authorized {
            value,
            updated: authorized.updated,
            mode: authorized.mode,
        })
    }

    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn saved_tracks(
        &self,
        op: SavedTracks,
        pair: Option<&CredentialPair>,
    ) -> Result<Authorized<Page<SavedTrack>>> {
        let authorized = self.call(&op, pair).await?;
        Ok(authorized.map(|page| page.unwrap_or_else(|| empty_page(op.limit))))
    }

    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn playlists(
        &self,
        op: Playlists,
        pair: Option<&CredentialPair>,
    ) -> Result<Authorized<Page<Playlist>>> {
        let authorized = self.call(&op, pair).await?;
        Ok(authorized.map(|page| page.unwrap_or_else(|| empty_page(op.limit))))
    }

    /// Reads the current playback state.
    ///
    /// Returns `None` when nothing is playing.
    ///
    /// # Errors
    ///
    /// See [`call_with`](Self::call_with).
    pub async fn playback_state(
        &self,
        access: &str,
    ) -> Result<Option<protocol::player::CurrentlyPlaying>> {
        let op = PlaybackState {
            market: self.config.market.clone(),
        };
        self.call_with(&op, access).await
    }

    /// Reads the current playback state as a view stamped with `read_at`.
    ///
    /// # Errors
    ///
    /// See [`call_with`](Self::call_with).
    pub async fn playback_view(
        &self,
        access: &str,
        read_at: std::time::SystemTime,
    ) -> Result<Option<PlaybackView>> {
        let state = self.playback_state(access).await?;
        Ok(state.map(|state| PlaybackView::from_state(state, read_at)))
    }

    /// # Errors
    ///
    /// See [`call_with`](Self::call_with).
    pub async fn devices(&self, access: &str) -> Result<Vec<Device>> {
        let devices = self.call_with(&Devices, access).await?;
        Ok(devices.map(|list| list.devices).unwrap_or_default())
    }

    /// Sends a transport command. The response body, if any, is ignored.
    ///
    /// # Errors
    ///
    /// Will return an [`InvalidArgument`](crate::error::ErrorKind::InvalidArgument)
    /// error for invalid commands, or see [`call_with`](Self::call_with).
    pub async fn control(&self, access: &str, command: &Command) -> Result<()> {
        command.validate()?;
        self.send(command, access).await?;
        debug!("{command}: accepted");
        Ok(())
    }
}

fn empty_page<T>(limit: u32) -> Page<T> {
    Page {
        items: Vec::new(),
        limit,
        offset: 0,
        total: 0,
        next: None,
    }
}
