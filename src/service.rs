//! Service-level credential for guest mode.
//!
//! Anonymous catalog reads share one access credential obtained through the
//! client-credentials grant. It is cached process-wide and regenerated lazily
//! once it expires. Concurrent callers that find the cache empty join a single
//! shared exchange and all receive its outcome, so expiry never causes more
//! than one request to the token endpoint, even when that request fails.

use std::sync::Arc;

use futures_util::{
    future::{self, BoxFuture, Shared},
    FutureExt,
};
use tokio::sync::{Mutex, RwLock};

use crate::{
    credentials::{Clock, ServiceCredential},
    error::{Error, Result},
    oauth::TokenEndpoint,
};

type Exchange = Shared<BoxFuture<'static, std::result::Result<ServiceCredential, Arc<Error>>>>;

pub struct ServiceCredentialProvider {
    endpoint: Arc<TokenEndpoint>,
    clock: Arc<dyn Clock>,

    cached: Arc<RwLock<Option<ServiceCredential>>>,

    /// The exchange in flight, if any. Never locked by readers of a valid
    /// credential.
    exchange: Mutex<Option<Exchange>>,
}

impl ServiceCredentialProvider {
    #[must_use]
    pub fn new(endpoint: Arc<TokenEndpoint>, clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint,
            clock,
            cached: Arc::new(RwLock::new(None)),
            exchange: Mutex::new(None),
        }
    }

    /// Returns a valid service access credential.
    ///
    /// Callers arriving while an exchange is in flight receive its outcome,
    /// whether success or failure.
    ///
    /// # Errors
    ///
    /// Will return a [`Configuration`](crate::error::ErrorKind::Configuration)
    /// error if the application identity is missing, or another error if the
    /// exchange failed.
    pub async fn access(&self) -> Result<String> {
        if let Some(credential) = self.cached().await {
            return Ok(credential.access().to_owned());
        }

        match self.join_exchange().await.await {
            Ok(credential) => Ok(credential.access().to_owned()),
            Err(e) => Err(Error {
                retry_after: e.retry_after,
                ..Error::new(e.kind, e.error.to_string())
            }),
        }
    }

    /// Returns the exchange in flight, or starts one unless another caller
    /// has just completed one.
    async fn join_exchange(&self) -> Exchange {
        let mut exchange = self.exchange.lock().await;
        if let Some(in_flight) = exchange.as_ref().filter(|shared| shared.peek().is_none()) {
            return in_flight.clone();
        }

        if let Some(credential) = self.cached().await {
            return future::ready(Ok(credential)).boxed().shared();
        }

        debug!("requesting service credential");
        let endpoint = Arc::clone(&self.endpoint);
        let cached = Arc::clone(&self.cached);
        let started = async move {
            match endpoint.client_credentials().await {
                Ok(credential) => {
                    *cached.write().await = Some(credential.clone());
                    Ok(credential)
                }
                Err(e) => {
                    warn!("requesting service credential failed: {e}");
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared();

        *exchange = Some(started.clone());
        started
    }

    /// Drops the cached credential if it is still `stale`.
    ///
    /// Called when the service rejected `stale` before it expired. A
    /// credential that has already been replaced is left alone.
    pub async fn invalidate(&self, stale: &str) {
        let mut cached = self.cached.write().await;
        if cached
            .as_ref()
            .is_some_and(|credential| credential.access() == stale)
        {
            debug!("service credential rejected; discarding");
            *cached = None;
        }
    }

    /// Swaps in a new credential as a whole.
    pub async fn replace(&self, credential: ServiceCredential) {
        *self.cached.write().await = Some(credential);
    }

    async fn cached(&self) -> Option<ServiceCredential> {
        let now = self.clock.now();
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|credential| credential.is_valid_at(now))
            .cloned()
    }
}
