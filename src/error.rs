//! Error handling for tonearm.
//!
//! Every failure is classified into an [`ErrorKind`] that tells the host what
//! to show the user and whether retrying makes sense:
//!
//! * Deployment problems ([`ErrorKind::Configuration`])
//! * Credential problems (401, 403)
//! * Playback context problems (no active device)
//! * Transient conditions (429, 5xx, transport failures)
//!
//! Refresh failures never surface here: the token authority turns them into a
//! [`Fallback`](crate::authority::Fallback) instead.
//!
//! # Example
//!
//! ```rust
//! use tonearm::error::{Error, ErrorKind, Result};
//!
//! fn set_volume(percent: u8) -> Result<()> {
//!     if percent > 100 {
//!         return Err(Error::invalid_argument("volume must be between 0 and 100"));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::{fmt, time::Duration};

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,

    /// Delay the service asked for before retrying, if any.
    ///
    /// Only set for [`ErrorKind::RateLimited`].
    pub retry_after: Option<Duration>,
}

/// Standard result type for tonearm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories exposed to the host.
///
/// Each variant maps to the HTTP status a route layer should answer with,
/// see [`ErrorKind::http_status`].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Application identity or endpoints are not configured.
    #[error("service misconfigured")]
    Configuration,

    /// Credential missing, invalid or not refreshable; prompt a new login.
    #[error("no valid authentication credentials")]
    Unauthenticated,

    /// Operation not allowed in the current context.
    #[error("forbidden")]
    Forbidden,

    /// Playback control without an active remote device.
    #[error("no active device")]
    NoActiveDevice,

    /// Requested resource does not exist.
    #[error("not found")]
    NotFound,

    /// Too many requests; back off for [`Error::retry_after`].
    #[error("rate limited")]
    RateLimited,

    /// The music service answered with a server error.
    #[error("upstream service unavailable")]
    UpstreamUnavailable,

    /// The request never got a response.
    #[error("network failure")]
    NetworkFailure,

    /// The music service answered with something we cannot decode.
    #[error("invalid response from upstream service")]
    InvalidResponse,

    /// The caller passed an unusable argument.
    #[error("invalid argument specified")]
    InvalidArgument,

    /// Failures that indicate a bug rather than an environment problem.
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// The HTTP status a route layer should answer with.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Configuration | Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NoActiveDevice | Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NetworkFailure | Self::InvalidResponse => StatusCode::BAD_GATEWAY,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::UpstreamUnavailable | Self::NetworkFailure
        )
    }
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
            retry_after: None,
        }
    }

    /// Creates an error for deployment misconfiguration.
    ///
    /// Use when the client id, client secret or an endpoint is missing or
    /// malformed. Not transient: retrying will not help.
    pub fn configuration<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Configuration, error)
    }

    /// Creates an error for authentication failures.
    ///
    /// Use when:
    /// * No user credentials are available for a user operation
    /// * The service rejected the bearer credential
    /// * The authorization code or refresh credential was rejected
    pub fn unauthenticated<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unauthenticated, error)
    }

    /// Creates an error for operations the service refused.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::forbidden("premium subscription required");
    /// assert_eq!(err.kind, ErrorKind::Forbidden);
    /// ```
    pub fn forbidden<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Forbidden, error)
    }

    /// Creates an error for playback control without an active device.
    pub fn no_active_device<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NoActiveDevice, error)
    }

    /// Creates an error for missing resources.
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    /// Creates an error for rate limiting.
    ///
    /// `retry_after` is the delay the service signaled, if it sent one.
    pub fn rate_limited<E>(retry_after: Option<Duration>, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimited, error)
        }
    }

    /// Creates an error for 5xx answers from the service.
    pub fn upstream_unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::UpstreamUnavailable, error)
    }

    /// Creates an error for transport-level failures.
    pub fn network_failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NetworkFailure, error)
    }

    /// Creates an error for undecodable service responses.
    pub fn invalid_response<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidResponse, error)
    }

    /// Creates an error for invalid caller input.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for internal errors.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Normalizes a non-success HTTP status from the music service.
    ///
    /// A 404 means "no active device" on device-scoped operations and a plain
    /// "not found" everywhere else. Other 4xx statuses that have no dedicated
    /// kind are treated as invalid arguments.
    pub fn from_status(
        status: StatusCode,
        device_scoped: bool,
        retry_after: Option<Duration>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        match status {
            StatusCode::UNAUTHORIZED => Self::unauthenticated(message),
            StatusCode::FORBIDDEN => Self::forbidden(message),
            StatusCode::NOT_FOUND if device_scoped => Self::no_active_device(message),
            StatusCode::NOT_FOUND => Self::not_found(message),
            StatusCode::TOO_MANY_REQUESTS => Self::rate_limited(retry_after, message),
            status if status.is_server_error() => Self::upstream_unavailable(message),
            _ => Self::invalid_argument(message),
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// IO only happens when reading configuration or session files, so most
/// failures point at the deployment.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound | PermissionDenied | InvalidData | InvalidInput => Self::configuration(err),
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | BrokenPipe | TimedOut => Self::network_failure(err),
            _ => Self::internal(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// * Decode errors -> `InvalidResponse`
/// * Builder errors -> `Internal`
/// * Status errors -> normalized like any other status
/// * Everything else (connect, timeout, body) -> `NetworkFailure`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::invalid_response(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if let Some(status) = err.status() {
            return Self::from_status(status, false, None, err.to_string());
        }

        Self::network_failure(err)
    }
}

/// Converts JSON errors to `InvalidResponse`.
///
/// JSON is only ever parsed from service responses.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_response(err)
    }
}

/// Converts URL parsing errors to `Configuration`.
///
/// URLs are built from configured base URLs.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::configuration(e.to_string())
    }
}

/// Converts header size errors to `Internal`.
impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts TOML parsing errors to `Configuration`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::configuration(e.to_string())
    }
}

/// Converts TOML serialization errors to `Internal`.
impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::internal(e.to_string())
    }
}
