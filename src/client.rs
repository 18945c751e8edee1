//! The surface a host application talks to.
//!
//! [`Tonearm`] wires the components together and exposes them per request:
//!
//! ```rust
//! let tonearm = Tonearm::new(config, Arc::new(MemoryStore::new()))?;
//!
//! // Guest or premium, depending on what the session has.
//! let pair = store.load(session)?;
//! let results = tonearm.search("never gonna", pair.as_ref()).await?;
//! tonearm.persist(session, results.updated.as_ref())?;
//!
//! // Premium only.
//! let access = tonearm.session_access(session).await?;
//! tonearm.control_playback(session, &access, Command::Pause).await?;
//! ```
//!
//! Credentials are always passed in explicitly. Whenever a call refreshed
//! them, the successor comes back alongside the result and must be persisted
//! by the host, or by [`Resolved::persist`].

use std::sync::Arc;

use tokio::sync::watch;
use url::Url;

use crate::{
    authority::{Fallback, Resolved, TokenAuthority},
    config::Config,
    credentials::{Clock, CredentialPair, SessionId, SystemClock},
    error::{Error, Result},
    gateway::{AuthenticatedGateway, Authorized},
    http::Client as HttpClient,
    oauth::TokenEndpoint,
    playback::{Command, PlaybackView},
    protocol::{
        catalog::{Search, Track},
        library::{Playlist, Playlists, SavedTrack, SavedTracks, UserProfile},
        player::Device,
        Page,
    },
    service::ServiceCredentialProvider,
    session::SessionStore,
    sync::{PlaybackStateSynchronizer, Snapshot},
};

pub struct Tonearm {
    config: Arc<Config>,
    endpoint: Arc<TokenEndpoint>,
    authority: Arc<TokenAuthority>,
    gateway: Arc<AuthenticatedGateway>,
    synchronizer: Arc<PlaybackStateSynchronizer>,
    store: Arc<dyn SessionStore>,
}

impl Tonearm {
    /// Creates a client on the wall clock.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: Config, store: Arc<dyn SessionStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Creates a client that evaluates expiry against `clock`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn with_clock(
        config: Config,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let http_client = Arc::new(HttpClient::new(&config)?);

        let endpoint = Arc::new(TokenEndpoint::new(
            Arc::clone(&http_client),
            Arc::clone(&config),
            Arc::clone(&clock),
        ));
        let authority = Arc::new(TokenAuthority::new(
            Arc::clone(&endpoint),
            Arc::clone(&clock),
        ));
        let service = Arc::new(ServiceCredentialProvider::new(
            Arc::clone(&endpoint),
            Arc::clone(&clock),
        ));
        let gateway = Arc::new(AuthenticatedGateway::new(
            http_client,
            Arc::clone(&config),
            Arc::clone(&authority),
            service,
        ));
        let synchronizer = Arc::new(PlaybackStateSynchronizer::new(
            Arc::clone(&gateway),
            Arc::clone(&authority),
            clock,
            &config,
        ));

        Ok(Self {
            config,
            endpoint,
            authority,
            gateway,
            synchronizer,
            store,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds a login URL with a fresh random `state`.
    ///
    /// Returns the URL and the state the callback must echo.
    ///
    /// # Errors
    ///
    /// Will return a [`Configuration`](crate::error::ErrorKind::Configuration)
    /// error if the client id or redirect URI is missing.
    pub fn authorize_url(&self) -> Result<(Url, String)> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = self.endpoint.authorize_url(&state)?;
        Ok((url, state))
    }

    /// Completes a login and stores the new session's credentials.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the code exchange fails or the store cannot be
    /// written.
    pub async fn login(&self, session: SessionId, code: &str) -> Result<CredentialPair> {
        let pair = self.endpoint.exchange_code(code).await?;
        self.store.store(session, &pair)?;
        info!("[{session}] logged in");
        Ok(pair)
    }

    /// Ends a session: stops watching playback and forgets its credentials.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store cannot be written.
    pub async fn logout(&self, session: SessionId) -> Result<()> {
        self.synchronizer.stop(session).await;
        self.store.remove(session)?;
        info!("[{session}] logged out");
        Ok(())
    }

    /// Resolves `pair` to a valid access credential.
    ///
    /// # Errors
    ///
    /// Will return [`Fallback`] if `pair` is absent or could not be
    /// refreshed.
    pub async fn resolve_access(
        &self,
        pair: Option<&CredentialPair>,
    ) -> std::result::Result<Resolved, Fallback> {
        self.authority.resolve(pair).await
    }

    /// Resolves the stored credentials of `session` and persists a refresh.
    ///
    /// # Errors
    ///
    /// Will return an [`Unauthenticated`](crate::error::ErrorKind::Unauthenticated)
    /// error if the session has no usable credentials.
    pub async fn session_access(&self, session: SessionId) -> Result<String> {
        let pair = self.store.load(session)?;
        let resolved = self.authority.resolve(pair.as_ref()).await?;
        resolved.persist(self.store.as_ref(), session)?;
        Ok(resolved.access)
    }

    /// Hands a refreshed pair to the session store, if there is one.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store cannot be written.
    pub fn persist(&self, session: SessionId, updated: Option<&CredentialPair>) -> Result<()> {
        if let Some(pair) = updated {
            self.store.on_credential_refreshed(session, pair)?;
        }
        Ok(())
    }

    /// Searches the catalog for tracks, as the user if possible and as a
    /// guest otherwise.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the search fails, or with a
    /// [`Configuration`](crate::error::ErrorKind::Configuration) error if
    /// guest mode is needed but not configured.
    pub async fn search(
        &self,
        query: &str,
        pair: Option<&CredentialPair>,
    ) -> Result<Authorized<Vec<Track>>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_argument("search query is empty"));
        }

        let mut search = Search::new(query);
        search.market.clone_from(&self.config.market);

        let authorized = self.gateway.search(&search, pair).await?;
        Ok(authorized.map(|page| page.items))
    }

    /// Reads current playback; `None` when nothing is playing.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the read fails.
    pub async fn playback_view(&self, access: &str) -> Result<Option<PlaybackView>> {
        self.synchronizer.poll(access).await
    }

    /// Sends a transport command and schedules a follow-up poll for
    /// `session`.
    ///
    /// The follow-up runs in the background; its result reaches subscribers
    /// of [`watch`](Self::watch).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the command is invalid or was refused.
    pub async fn control_playback(
        &self,
        session: SessionId,
        access: &str,
        command: Command,
    ) -> Result<()> {
        self.gateway.control(access, &command).await?;

        let synchronizer = Arc::clone(&self.synchronizer);
        let access = access.to_owned();
        tokio::spawn(async move {
            if let Err(e) = synchronizer
                .after_command(session, &access, &command)
                .await
            {
                debug!("[{session}] poll after {command} failed: {e}");
            }
        });

        Ok(())
    }

    /// Sends a transport command and waits for the state it settled in.
    ///
    /// Unlike [`control_playback`](Self::control_playback), the follow-up
    /// poll runs before returning. It is still published to subscribers of
    /// `session`. Returns `None` when nothing is playing afterwards, or when
    /// the session was stopped meanwhile.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the command is invalid or was refused, or if the
    /// follow-up read fails.
    pub async fn control_playback_settled(
        &self,
        session: SessionId,
        access: &str,
        command: Command,
    ) -> Result<Option<PlaybackView>> {
        self.gateway.control(access, &command).await?;
        self.synchronizer
            .after_command(session, access, &command)
            .await
    }

    /// Starts polling playback for `session` using its stored credentials.
    pub async fn watch(&self, session: SessionId) -> watch::Receiver<Snapshot> {
        self.synchronizer
            .start(session, Arc::clone(&self.store))
            .await
    }

    /// Subscribes to playback of `session` without polling it.
    ///
    /// Subscribers receive the follow-ups of
    /// [`control_playback`](Self::control_playback).
    pub async fn subscribe(&self, session: SessionId) -> watch::Receiver<Snapshot> {
        self.synchronizer.subscribe(session).await
    }

    /// Stops polling playback for `session`.
    pub async fn unwatch(&self, session: SessionId) {
        self.synchronizer.stop(session).await;
    }

    /// Whether playback of `session` is being polled.
    pub async fn is_watching(&self, session: SessionId) -> bool {
        self.synchronizer.is_polling(session).await
    }

    /// # Errors
    ///
    /// Will return an [`Unauthenticated`](crate::error::ErrorKind::Unauthenticated)
    /// error without usable user credentials, or another error if the read
    /// fails.
    pub async fn profile(&self, pair: Option<&CredentialPair>) -> Result<Authorized<UserProfile>> {
        self.gateway.profile(pair).await
    }

    /// # Errors
    ///
    /// See [`profile`](Self::profile).
    pub async fn saved_tracks(
        &self,
        pair: Option<&CredentialPair>,
        limit: u32,
        offset: u32,
    ) -> Result<Authorized<Page<SavedTrack>>> {
        self.gateway
            .saved_tracks(SavedTracks { limit, offset }, pair)
            .await
    }

    /// # Errors
    ///
    /// See [`profile`](Self::profile).
    pub async fn playlists(
        &self,
        pair: Option<&CredentialPair>,
        limit: u32,
        offset: u32,
    ) -> Result<Authorized<Page<Playlist>>> {
        self.gateway.playlists(Playlists { limit, offset }, pair).await
    }

    /// # Errors
    ///
    /// Will return `Err` if the read fails.
    pub async fn devices(&self, access: &str) -> Result<Vec<Device>> {
        self.gateway.devices(access).await
    }
}
