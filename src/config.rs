//! Runtime configuration.
//!
//! Application identity (client id and secret) usually lives in a
//! `secrets.toml` file next to the binary:
//!
//! ```toml
//! client_id = "0123456789abcdef0123456789abcdef"
//! client_secret = "fedcba9876543210fedcba9876543210"
//! redirect_uri = "http://127.0.0.1:8888/callback"
//! market = "NL"
//! ```
//!
//! A missing identity is not an error when loading: guest search simply
//! fails with [`ErrorKind::Configuration`](crate::error::ErrorKind) when the
//! client-credentials grant needs it. That keeps a misconfigured deployment
//! visible to the caller instead of crashing at startup.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

#[derive(Clone, Eq, PartialEq, Redact)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub client_id: Option<String>,
    #[redact]
    pub client_secret: Option<String>,
    pub redirect_uri: Option<Url>,
    pub scopes: Vec<String>,
    pub market: Option<String>,

    /// Base URL of the accounts service, with a trailing slash.
    pub accounts_url: Url,
    /// Base URL of the Web API, with a trailing slash.
    pub api_url: Url,

    /// Steady-state cadence of the playback poll.
    pub poll_interval: Duration,
    /// Delay between a control command and its follow-up poll.
    pub command_settle: Duration,

    pub user_agent: String,
}

/// Contents of the secrets file. Everything is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Secrets {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<Url>,
    scopes: Option<Vec<String>>,
    market: Option<String>,
}

impl Config {
    /// Accounts service, hosting the authorize and token endpoints.
    pub const ACCOUNTS_URL: &'static str = "https://accounts.spotify.com/";

    /// Web API root.
    pub const API_URL: &'static str = "https://api.spotify.com/v1/";

    /// Scopes needed for library access and transport control.
    pub const DEFAULT_SCOPES: [&'static str; 7] = [
        "user-read-private",
        "user-read-email",
        "user-library-read",
        "playlist-read-private",
        "user-read-playback-state",
        "user-modify-playback-state",
        "user-read-currently-playing",
    ];

    /// Steady-state poll cadence.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Playback transitions lag behind the acknowledgement of a command.
    pub const COMMAND_SETTLE: Duration = Duration::from_secs(1);

    /// Upper bound for the secrets file; it only holds a few short strings.
    const MAX_SECRETS_SIZE: u64 = 4096;

    /// Creates a configuration with default endpoints and no application
    /// identity.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the application name or version cannot be used in
    /// a `User-Agent` header.
    pub fn new() -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            return Err(Error::internal(format!(
                "application name and/or version invalid (\"{app_name}\"; \"{app_version}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let user_agent = format!(
            "{app_name}/{app_version} (Rust; {os_name}; {})",
            std::env::consts::ARCH
        );
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,

            client_id: None,
            client_secret: None,
            redirect_uri: None,
            scopes: Self::DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            market: None,

            accounts_url: Url::parse(Self::ACCOUNTS_URL)?,
            api_url: Url::parse(Self::API_URL)?,

            poll_interval: Self::POLL_INTERVAL,
            command_settle: Self::COMMAND_SETTLE,

            user_agent,
        })
    }

    /// Loads a configuration from a secrets file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file is missing, too large or not valid TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: the secrets file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_SECRETS_SIZE {
            return Err(Error::configuration(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let mut config = Self::new()?;
        config.apply(&contents)?;
        Ok(config)
    }

    fn apply(&mut self, contents: &str) -> Result<()> {
        let secrets: Secrets = toml::from_str(contents)?;

        if secrets.client_id.is_some() {
            self.client_id = secrets.client_id;
        }
        if secrets.client_secret.is_some() {
            self.client_secret = secrets.client_secret;
        }
        if secrets.redirect_uri.is_some() {
            self.redirect_uri = secrets.redirect_uri;
        }
        if let Some(scopes) = secrets.scopes {
            self.scopes = scopes;
        }
        if secrets.market.is_some() {
            self.market = secrets.market;
        }

        Ok(())
    }

    /// Sets the accounts service base URL, adding the trailing slash that
    /// [`Url::join`] needs.
    #[must_use]
    pub fn with_accounts_url(mut self, url: Url) -> Self {
        self.accounts_url = with_trailing_slash(url);
        self
    }

    /// Sets the Web API base URL, adding the trailing slash that
    /// [`Url::join`] needs.
    #[must_use]
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = with_trailing_slash(url);
        self
    }

    /// Returns the application client id.
    ///
    /// # Errors
    ///
    /// Will return a [`Configuration`](crate::error::ErrorKind::Configuration)
    /// error if it is missing or empty.
    pub fn client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::configuration("client id not configured"))
    }

    /// Returns the application client id and secret.
    ///
    /// # Errors
    ///
    /// Will return a [`Configuration`](crate::error::ErrorKind::Configuration)
    /// error if either one is missing or empty.
    pub fn client_identity(&self) -> Result<(&str, &str)> {
        let client_id = self.client_id()?;
        let client_secret = self
            .client_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| Error::configuration("client secret not configured"))?;

        Ok((client_id, client_secret))
    }

    /// # Errors
    ///
    /// Will return `Err` if the accounts URL cannot be joined.
    pub fn token_url(&self) -> Result<Url> {
        self.accounts_url.join("api/token").map_err(Into::into)
    }

    /// # Errors
    ///
    /// Will return `Err` if the accounts URL cannot be joined.
    pub fn authorize_url(&self) -> Result<Url> {
        self.accounts_url.join("authorize").map_err(Into::into)
    }

    /// Resolves a Web API path such as `me/player` against the API root.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the path cannot be joined.
    pub fn api_endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path.trim_start_matches('/'))
            .map_err(Into::into)
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
