//! Resolution and refresh of user credentials, and the service credential.

mod common;

use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use tonearm::{
    authority::Fallback,
    credentials::{CredentialPair, SessionId},
    error::ErrorKind,
    session::SessionStore,
};
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use common::{expired_pair, token_json, valid_pair, FixedClock};

/// `client-id:client-secret`
const BASIC_AUTHORIZATION: &str = "Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=";

#[tokio::test]
async fn unexpired_pair_is_used_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("new", 3600)))
        .expect(0)
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());
    let pair = valid_pair(&clock);

    let resolved = tonearm.resolve_access(Some(&pair)).await.unwrap();
    assert_eq!(resolved.access, "user-access");
    assert_eq!(resolved.updated, None);
}

#[tokio::test]
async fn pair_expiring_now_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("new", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());
    let pair = CredentialPair::new("a".to_owned(), "r".to_owned(), common::now(&clock));

    let resolved = tonearm.resolve_access(Some(&pair)).await.unwrap();
    assert_eq!(resolved.access, "new");
}

#[tokio::test]
async fn absent_pair_falls_back() {
    let server = MockServer::start().await;
    let (tonearm, _) = common::tonearm(&server, FixedClock::new());

    assert_eq!(tonearm.resolve_access(None).await.unwrap_err(), Fallback);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_sets_expiry_from_reported_lifetime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header("authorization", BASIC_AUTHORIZATION))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=user-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("fresh-access", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());
    let refreshed_at = common::now(&clock);

    let resolved = tonearm
        .resolve_access(Some(&expired_pair(&clock)))
        .await
        .unwrap();
    let updated = resolved.updated.unwrap();

    assert_eq!(resolved.access, "fresh-access");
    assert_eq!(updated.access(), "fresh-access");
    assert_eq!(updated.refresh(), "user-refresh");
    assert_eq!(
        updated.expires_at(),
        refreshed_at + Duration::from_millis(3_600_000)
    );
}

#[tokio::test]
async fn rotated_refresh_credential_is_adopted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rotated-refresh"
        })))
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());

    let resolved = tonearm
        .resolve_access(Some(&expired_pair(&clock)))
        .await
        .unwrap();
    assert_eq!(resolved.updated.unwrap().refresh(), "rotated-refresh");
}

#[tokio::test]
async fn concurrent_resolutions_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_json("fresh-access", 3600))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());
    let pair = expired_pair(&clock);

    let results = join_all((0..8).map(|_| tonearm.resolve_access(Some(&pair)))).await;

    for result in results {
        let resolved = result.unwrap();
        assert_eq!(resolved.access, "fresh-access");
        assert_eq!(resolved.updated.unwrap().refresh(), "user-refresh");
    }
}

#[tokio::test]
async fn late_resolver_reuses_completed_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("fresh-access", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());
    let pair = expired_pair(&clock);

    let first = tonearm.resolve_access(Some(&pair)).await.unwrap();
    clock.advance(Duration::from_secs(60));
    let second = tonearm.resolve_access(Some(&pair)).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn rejected_refresh_falls_back_and_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Refresh token revoked"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());
    let pair = expired_pair(&clock);

    assert_eq!(tonearm.resolve_access(Some(&pair)).await.unwrap_err(), Fallback);
    assert_eq!(tonearm.resolve_access(Some(&pair)).await.unwrap_err(), Fallback);
}

#[tokio::test]
async fn malformed_refresh_response_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, _) = common::tonearm(&server, clock.clone());

    assert_eq!(
        tonearm
            .resolve_access(Some(&expired_pair(&clock)))
            .await
            .unwrap_err(),
        Fallback
    );
}

#[tokio::test]
async fn session_access_persists_refreshed_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("fresh-access", 3600)))
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, store) = common::tonearm(&server, clock.clone());
    let session = SessionId::new();

    store.store(session, &expired_pair(&clock)).unwrap();

    assert_eq!(tonearm.session_access(session).await.unwrap(), "fresh-access");
    assert_eq!(
        store.load(session).unwrap().unwrap().access(),
        "fresh-access"
    );
}

#[tokio::test]
async fn login_exchanges_code_and_stores_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=callback-code"))
        .and(body_string_contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8888%2Fcallback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "user-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "user-refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let clock = FixedClock::new();
    let (tonearm, store) = common::tonearm(&server, clock.clone());
    let session = SessionId::new();

    let pair = tonearm.login(session, "callback-code").await.unwrap();
    assert_eq!(pair.refresh(), "user-refresh");

    assert_eq!(store.load(session).unwrap(), Some(pair));
}

#[tokio::test]
async fn authorize_url_carries_fresh_state() {
    let server = MockServer::start().await;
    let (tonearm, _) = common::tonearm(&server, FixedClock::new());

    let (url, state) = tonearm.authorize_url().unwrap();
    let (_, other) = tonearm.authorize_url().unwrap();
    assert_ne!(state, other);
    assert!(url
        .query_pairs()
        .any(|(key, value)| key == "state" && value == state.as_str()));
}

mod service_credential {
    use super::*;

    #[tokio::test]
    async fn concurrent_guests_share_one_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header("authorization", BASIC_AUTHORIZATION))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_json("service-access", 600))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(header("authorization", "Bearer service-access"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "tracks": { "items": [], "total": 0 } })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let clock = FixedClock::new();
        let (tonearm, _) = common::tonearm(&server, clock.clone());

        let (first, second) = tokio::join!(
            tonearm.search("first", None),
            tonearm.search("second", None)
        );
        assert!(first.unwrap().value.is_empty());
        assert!(second.unwrap().value.is_empty());
    }

    #[tokio::test]
    async fn exchange_is_repeated_only_after_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_json("service-access", 600)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "tracks": { "items": [], "total": 0 } })),
            )
            .mount(&server)
            .await;

        let clock = FixedClock::new();
        let (tonearm, _) = common::tonearm(&server, clock.clone());

        tonearm.search("one", None).await.unwrap();
        clock.advance(Duration::from_secs(599));
        tonearm.search("two", None).await.unwrap();
        assert_eq!(common::requests_to(&server, "/api/token").await.len(), 1);

        clock.advance(Duration::from_secs(1));
        tonearm.search("three", None).await.unwrap();
        assert_eq!(common::requests_to(&server, "/api/token").await.len(), 2);
    }

    #[tokio::test]
    async fn missing_identity_is_a_configuration_error() {
        let server = MockServer::start().await;
        let mut config = common::config(&server);
        config.client_secret = None;
        let (tonearm, _) = common::tonearm_with(config, FixedClock::new());

        let err = tonearm.search("anything", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exchange_failures_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (tonearm, _) = common::tonearm(&server, FixedClock::new());

        let err = tonearm.search("anything", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn concurrent_guests_share_one_failed_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let (tonearm, _) = common::tonearm(&server, FixedClock::new());

        let results = join_all((0..5).map(|_| tonearm.search("anything", None))).await;
        for result in results {
            assert_eq!(result.unwrap_err().kind, ErrorKind::UpstreamUnavailable);
        }
        assert_eq!(common::requests_to(&server, "/api/token").await.len(), 1);

        // A failure is not remembered past its own exchange.
        tonearm.search("again", None).await.unwrap_err();
        assert_eq!(common::requests_to(&server, "/api/token").await.len(), 2);
    }

    #[tokio::test]
    async fn rate_limited_exchange_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let (tonearm, _) = common::tonearm(&server, FixedClock::new());

        let err = tonearm.search("anything", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));
    }
}
