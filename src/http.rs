//! HTTP client with rate limiting for the Spotify accounts service and Web API.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to stay clear of the Web API's rolling window
//! * Consistent timeouts and headers
//! * Helpers for bearer and form-encoded requests
//!
//! # Rate Limiting
//!
//! Spotify computes its limit over a rolling 30-second window and does not
//! publish the quota. The limiter allows bursts up to the maximum calls per
//! interval and delays requests beyond that, so that a misbehaving poll loop
//! cannot get the whole application rate limited.
//!
//! # Example
//!
//! ```rust
//! use tonearm::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.bearer(Method::GET, url, access)?;
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
    Body, Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Unlimited request client for special cases.
    ///
    /// Direct access to underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    /// Rate limiter for API quota compliance.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Interval over which calls are counted.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Maximum allowed API calls per interval.
    ///
    /// A handful of sessions polling every five seconds stays well below
    /// this.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u16 = 180;

    /// Duration to keep idle connections alive.
    ///
    /// Playback polls hit the same host every few seconds.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Overall deadline for a single request.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// `Content-Type` of token endpoint requests.
    const FORM_CONTENT: HeaderValue = HeaderValue::from_static("application/x-www-form-urlencoded");

    /// `Content-Type` of Web API request bodies.
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client creation fails.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, Self::JSON_CONTENT);

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    /// Builds a Web API request authorized with a bearer credential.
    ///
    /// `body` is sent as JSON when present.
    ///
    /// # Errors
    ///
    /// Returns error if the credential cannot be used as a header value.
    pub fn bearer<U>(
        &self,
        method: Method,
        url: U,
        access: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        let mut request = match body {
            Some(json) => {
                let mut request = self.request(method, url, json.to_string());
                request
                    .headers_mut()
                    .try_insert(CONTENT_TYPE, Self::JSON_CONTENT)?;
                request
            }
            None => reqwest::Request::new(method, url.into()),
        };

        let mut authorization = HeaderValue::from_str(&format!("Bearer {access}"))?;
        authorization.set_sensitive(true);
        request.headers_mut().try_insert(AUTHORIZATION, authorization)?;

        Ok(request)
    }

    /// Builds a form-encoded POST request.
    ///
    /// # Errors
    ///
    /// Returns error if the header cannot be inserted.
    pub fn form<U>(&self, url: U, params: &[(&str, &str)]) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let mut request = self.request(Method::POST, url, body);
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, Self::FORM_CONTENT)?;

        Ok(request)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Request execution fails
    /// * Network error occurs
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        trace!("{} {}", request.method(), request.url());
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}

/// Parses `Retry-After` given in seconds.
///
/// Neither the accounts service nor the Web API sends the HTTP-date form.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(&Config::new().unwrap()).unwrap()
    }

    #[test]
    fn bearer_requests_carry_sensitive_authorization() {
        let url = Url::parse("https://api.spotify.com/v1/me").unwrap();
        let request = client().bearer(Method::GET, url, "abc", None).unwrap();

        let authorization = request.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(authorization, "Bearer abc");
        assert!(authorization.is_sensitive());
        assert!(request.body().is_none());
    }

    #[test]
    fn bearer_bodies_are_json() {
        let url = Url::parse("https://api.spotify.com/v1/me/player/play").unwrap();
        let body = serde_json::json!({ "uris": ["spotify:track:X"] });
        let request = client()
            .bearer(Method::PUT, url, "abc", Some(&body))
            .unwrap();

        assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        let sent = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        assert_eq!(sent, br#"{"uris":["spotify:track:X"]}"#);
    }

    #[test]
    fn forms_are_url_encoded() {
        let url = Url::parse("https://accounts.spotify.com/api/token").unwrap();
        let request = client()
            .form(url, &[("grant_type", "refresh_token"), ("refresh_token", "a b&c")])
            .unwrap();

        let sent = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        assert_eq!(sent, b"grant_type=refresh_token&refresh_token=a+b%26c");
    }

    #[test]
    fn retry_after_is_read_in_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }
}
