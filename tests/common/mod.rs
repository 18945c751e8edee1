#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use serde_json::{json, Value};
use tonearm::{
    client::Tonearm,
    config::Config,
    credentials::{Clock, CredentialPair},
    session::MemoryStore,
};
use url::Url;
use wiremock::MockServer;

/// Instant all tests start at: 2023-11-14T22:13:20Z.
pub const START: Duration = Duration::from_secs(1_700_000_000);

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<SystemTime>);

impl FixedClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(SystemTime::UNIX_EPOCH + START)))
    }

    pub fn advance(&self, duration: Duration) {
        *self.0.lock().unwrap() += duration;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        *self.0.lock().unwrap()
    }
}

pub fn config(server: &MockServer) -> Config {
    let mut config = Config::new()
        .unwrap()
        .with_accounts_url(Url::parse(&server.uri()).unwrap())
        .with_api_url(Url::parse(&format!("{}/v1", server.uri())).unwrap());

    config.client_id = Some("client-id".to_owned());
    config.client_secret = Some("client-secret".to_owned());
    config.redirect_uri = Some(Url::parse("http://127.0.0.1:8888/callback").unwrap());
    config.poll_interval = Duration::from_millis(100);
    config.command_settle = Duration::from_millis(50);
    config
}

pub fn tonearm(server: &MockServer, clock: Arc<FixedClock>) -> (Tonearm, Arc<MemoryStore>) {
    tonearm_with(config(server), clock)
}

pub fn tonearm_with(config: Config, clock: Arc<FixedClock>) -> (Tonearm, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let tonearm = Tonearm::with_clock(config, store.clone(), clock).unwrap();
    (tonearm, store)
}

pub fn now(clock: &FixedClock) -> SystemTime {
    clock.now()
}

/// A pair that is still valid for an hour.
pub fn valid_pair(clock: &FixedClock) -> CredentialPair {
    CredentialPair::new(
        "user-access".to_owned(),
        "user-refresh".to_owned(),
        clock.now() + Duration::from_secs(3600),
    )
}

/// A pair that expired a second ago.
pub fn expired_pair(clock: &FixedClock) -> CredentialPair {
    CredentialPair::new(
        "stale-access".to_owned(),
        "user-refresh".to_owned(),
        clock.now() - Duration::from_secs(1),
    )
}

pub fn token_json(access: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": "user-read-playback-state"
    })
}

pub fn track_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "uri": format!("spotify:track:{id}"),
        "name": name,
        "duration_ms": 213_573,
        "explicit": false,
        "artists": [{ "id": "artist", "name": "Rick Astley" }],
        "album": { "id": "album", "name": "Whenever You Need Somebody", "images": [] }
    })
}

pub fn playback_json(is_playing: bool, track: Option<Value>) -> Value {
    json!({
        "device": {
            "id": "device",
            "is_active": true,
            "is_restricted": false,
            "name": "Kitchen",
            "type": "Speaker",
            "volume_percent": 50
        },
        "shuffle_state": false,
        "repeat_state": "off",
        "progress_ms": 1000,
        "is_playing": is_playing,
        "item": track,
        "currently_playing_type": "track"
    })
}

/// Requests the mock server received at `path`.
pub async fn requests_to(server: &MockServer, path: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == path)
        .collect()
}
