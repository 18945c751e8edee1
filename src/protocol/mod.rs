//! Wire types of the Spotify Web API.
//!
//! # Submodules
//!
//! * [`catalog`] - tracks, albums, artists and search results
//! * [`library`] - user profile, saved tracks and playlists
//! * [`player`] - playback state and devices
//!
//! Only the fields this crate uses are modelled; unknown fields are ignored
//! so that additions to the API do not break decoding.

pub mod catalog;
pub mod library;
pub mod player;

use std::{borrow::Cow, fmt::Debug};

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which credential an operation may be performed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Public catalog reads; the service credential will do.
    Catalog,

    /// Per-user data and transport control; needs the user's own credential.
    User,
}

/// A Web API call.
///
/// Implemented by request types, mirroring how each endpoint is described:
/// ```rust
/// impl Operation for Devices {
///     const NAME: &'static str = "devices";
///     const ACCESS: Access = Access::User;
///     type Output = DeviceList;
///
///     fn path(&self) -> Cow<'_, str> {
///         "me/player/devices".into()
///     }
/// }
/// ```
pub trait Operation {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Credential class of the endpoint.
    const ACCESS: Access;

    /// Whether a 404 means that no device is active rather than that the
    /// resource does not exist.
    const DEVICE_SCOPED: bool = false;

    /// Decoded response body.
    type Output: for<'de> Deserialize<'de> + Debug;

    fn method(&self) -> Method {
        Method::GET
    }

    /// Path relative to the API root.
    fn path(&self) -> Cow<'_, str>;

    fn query(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn body(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Parses and logs JSON responses from the Web API.
///
/// # Arguments
///
/// * `body` - Response body text to parse
/// * `origin` - Description of API endpoint for logging
///
/// # Errors
///
/// Returns an [`InvalidResponse`](crate::error::ErrorKind::InvalidResponse)
/// error if the body is not valid JSON or does not match `T`.
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error and raw text at ERROR level
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{}: {result:#?}", origin);
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{}: {json:#?}", origin);
            } else {
                error!("{}: failed parsing response ({e:?})", origin);
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}

/// Error body of the Web API.
///
/// ```json
/// {
///     "error": {
///         "status": 404,
///         "message": "Player command failed: No active device found",
///         "reason": "NO_ACTIVE_DEVICE"
///     }
/// }
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ErrorDetails {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ErrorResponse {
    /// Extracts a human-readable message from an error body, if it has one.
    #[must_use]
    pub fn message(body: &str) -> Option<String> {
        let details = serde_json::from_str::<Self>(body).ok()?.error;
        if details.message.is_empty() {
            return None;
        }

        Some(match details.reason {
            Some(reason) => format!("{} ({reason})", details.message),
            None => details.message,
        })
    }
}

/// Page of results.
///
/// ```json
/// {
///     "items": [...],
///     "limit": 20,
///     "offset": 0,
///     "total": 153,
///     "next": "https://api.spotify.com/v1/me/tracks?offset=20&limit=20"
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub next: Option<String>,
}
