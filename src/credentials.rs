//! Credentials handed out by the accounts service.
//!
//! Two kinds exist:
//! * [`CredentialPair`] - user-delegated access and refresh credentials for
//!   one authenticated session
//! * [`ServiceCredential`] - a service-level access credential shared by all
//!   anonymous requests
//!
//! Credentials are opaque. Their expiry is always computed from the instant
//! they were issued plus the lifetime the service reported, never by looking
//! inside the token.

use std::{
    fmt,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, DurationSeconds, TimestampMilliSeconds};
use veil::Redact;

use crate::error::{Error, Result};

/// Source of the current time.
///
/// Injected wherever expiry is evaluated so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Access and refresh credentials of one authenticated session.
///
/// Superseded, not mutated: a refresh produces a new pair.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Redact)]
pub struct CredentialPair {
    #[redact]
    access: String,

    #[redact]
    refresh: String,

    #[serde_as(as = "TimestampMilliSeconds<i64, Flexible>")]
    expires_at: SystemTime,
}

impl CredentialPair {
    #[must_use]
    pub fn new(access: String, refresh: String, expires_at: SystemTime) -> Self {
        Self {
            access,
            refresh,
            expires_at,
        }
    }

    /// Builds a pair from an authorization-code grant response.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the response carries no refresh credential.
    pub fn from_grant(response: TokenResponse, issued_at: SystemTime) -> Result<Self> {
        let expires_at = response.expires_at(issued_at);
        let refresh = response
            .refresh_token
            .filter(|refresh| !refresh.is_empty())
            .ok_or_else(|| Error::invalid_response("grant response lacks a refresh token"))?;

        Ok(Self {
            access: response.access_token,
            refresh,
            expires_at,
        })
    }

    /// Builds the successor of `self` from a refresh grant response.
    ///
    /// The service does not rotate refresh credentials, so the current one is
    /// carried forward. Should a response ever contain a new one, that is
    /// adopted instead.
    #[must_use]
    pub fn refreshed(&self, response: TokenResponse, issued_at: SystemTime) -> Self {
        let expires_at = response.expires_at(issued_at);
        let refresh = response
            .refresh_token
            .filter(|refresh| !refresh.is_empty())
            .unwrap_or_else(|| self.refresh.clone());

        Self {
            access: response.access_token,
            refresh,
            expires_at,
        }
    }

    #[must_use]
    pub fn access(&self) -> &str {
        &self.access
    }

    /// Only ever send this to the token endpoint.
    #[must_use]
    pub fn refresh(&self) -> &str {
        &self.refresh
    }

    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Valid while the expiry is strictly in the future, without grace.
    #[must_use]
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.expires_at > now
    }

    #[must_use]
    pub fn time_to_live(&self, now: SystemTime) -> Duration {
        self.expires_at
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }
}

/// Service-level access credential from the client-credentials grant.
///
/// Scoped to catalog reads only. There is no refresh credential; a new one is
/// requested once this one expires.
#[derive(Clone, Eq, PartialEq, Hash, Redact)]
pub struct ServiceCredential {
    #[redact]
    access: String,

    expires_at: SystemTime,
}

impl ServiceCredential {
    #[must_use]
    pub fn new(access: String, expires_at: SystemTime) -> Self {
        Self { access, expires_at }
    }

    #[must_use]
    pub fn from_grant(response: TokenResponse, issued_at: SystemTime) -> Self {
        let expires_at = response.expires_at(issued_at);
        Self {
            access: response.access_token,
            expires_at,
        }
    }

    #[must_use]
    pub fn access(&self) -> &str {
        &self.access
    }

    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    #[must_use]
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.expires_at > now
    }
}

/// Token endpoint response, common to all grants.
///
/// # Example Response
///
/// ```json
/// {
///     "access_token": "BQD...",
///     "token_type": "Bearer",
///     "expires_in": 3600,
///     "refresh_token": "AQC...",
///     "scope": "user-read-playback-state"
/// }
/// ```
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
pub struct TokenResponse {
    #[redact]
    pub access_token: String,

    /// Lifetime of the access token as reported by the service.
    #[serde_as(as = "DurationSeconds<u64, Flexible>")]
    pub expires_in: Duration,

    /// Absent on client-credentials and most refresh responses.
    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn expires_at(&self, issued_at: SystemTime) -> SystemTime {
        issued_at + self.expires_in
    }
}

/// Identity of a host session.
///
/// The host decides what a session is (a cookie, a CLI profile); the core
/// only uses it to key poll tasks and persisted credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a random session identity.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The single session of a local, single-user host.
    #[must_use]
    pub fn local() -> Self {
        Self(uuid::Uuid::nil())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for SessionId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::invalid_argument(e.to_string()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
