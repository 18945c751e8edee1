//! Resolution of user credentials to a usable access credential.
//!
//! The [`TokenAuthority`] is asked, once per outbound call, to turn the
//! session's [`CredentialPair`] into an access credential:
//!
//! 1. No pair: [`Fallback`]; the caller decides whether guest mode will do.
//! 2. Unexpired pair: its access credential, without touching the network.
//! 3. Expired pair: exactly one refresh. On success the successor pair is
//!    returned for the caller to persist; on any failure, [`Fallback`].
//!
//! # Concurrency
//!
//! Requests of the same session often arrive together, for example a page
//! load that searches and reads playback at once. All resolutions sharing a
//! refresh credential join a single in-flight refresh and receive the same
//! successor. A successful refresh stays available to resolvers that still
//! hold the stale pair until the successor itself expires; a failed one is
//! forgotten as soon as it completes.
//!
//! Refresh failures are logged here and never propagated: callers only see
//! that user credentials are unusable.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use thiserror::Error;
use tokio::sync::Mutex;
use veil::Redact;

use crate::{
    credentials::{Clock, CredentialPair, SessionId},
    error::{Error, Result},
    oauth::TokenEndpoint,
    session::SessionStore,
};

/// User credentials are absent or could not be refreshed.
#[derive(Clone, Copy, Debug, Default, Error, PartialEq, Eq, Hash)]
#[error("no usable user credentials")]
pub struct Fallback;

impl From<Fallback> for Error {
    fn from(fallback: Fallback) -> Self {
        Self::unauthenticated(fallback)
    }
}

/// A usable access credential, and the pair to persist if it was refreshed.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct Resolved {
    #[redact]
    pub access: String,

    /// Successor of the resolved pair; `None` if nothing changed.
    pub updated: Option<CredentialPair>,
}

impl Resolved {
    /// Hands a refreshed pair to the session store.
    ///
    /// Does nothing if the pair was still valid.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store fails.
    pub fn persist<S>(&self, store: &S, session: SessionId) -> Result<()>
    where
        S: SessionStore + ?Sized,
    {
        if let Some(pair) = &self.updated {
            store.on_credential_refreshed(session, pair)?;
        }
        Ok(())
    }
}

type Refresh = Shared<BoxFuture<'static, Option<CredentialPair>>>;

pub struct TokenAuthority {
    endpoint: Arc<TokenEndpoint>,
    clock: Arc<dyn Clock>,

    /// Refreshes keyed by the refresh credential they were started with.
    refreshes: Mutex<HashMap<String, Refresh>>,
}

impl TokenAuthority {
    #[must_use]
    pub fn new(endpoint: Arc<TokenEndpoint>, clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint,
            clock,
            refreshes: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `pair` to a valid access credential.
    ///
    /// # Errors
    ///
    /// Will return [`Fallback`] if `pair` is absent or expired and could not
    /// be refreshed.
    pub async fn resolve(
        &self,
        pair: Option<&CredentialPair>,
    ) -> std::result::Result<Resolved, Fallback> {
        let Some(pair) = pair else {
            trace!("no user credentials");
            return Err(Fallback);
        };

        let now = self.clock.now();
        if pair.is_valid_at(now) {
            return Ok(Resolved {
                access: pair.access().to_owned(),
                updated: None,
            });
        }

        let refresh = self.join_refresh(pair, now).await;
        match refresh.await {
            Some(updated) => Ok(Resolved {
                access: updated.access().to_owned(),
                updated: Some(updated),
            }),
            None => Err(Fallback),
        }
    }

    /// Returns the refresh for `pair`, starting one unless one is in flight
    /// or has already produced a successor that is still valid.
    ///
    /// The lock is only held to look up or insert; the refresh itself runs
    /// when the returned future is awaited.
    async fn join_refresh(&self, pair: &CredentialPair, now: SystemTime) -> Refresh {
        let mut refreshes = self.refreshes.lock().await;
        refreshes.retain(|_, refresh| match refresh.peek() {
            None => true,
            Some(Some(successor)) => successor.is_valid_at(now),
            Some(None) => false,
        });

        refreshes
            .entry(pair.refresh().to_owned())
            .or_insert_with(|| {
                debug!("access token expired; refreshing");
                let endpoint = Arc::clone(&self.endpoint);
                let pair = pair.clone();
                async move {
                    match endpoint.refresh(&pair).await {
                        Ok(successor) => Some(successor),
                        Err(e) => {
                            warn!("refreshing access token failed: {e}");
                            None
                        }
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }
}
