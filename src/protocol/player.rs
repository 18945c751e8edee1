//! Playback state and devices.
//!
//! The service exposes playback state for polling only. A read answers 204
//! with an empty body when nothing is playing, which the gateway turns into
//! `None`.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "device": {
//!         "id": "5fbb3ba6aa454b5534c4ba43a8c7e8e45a63ad0e",
//!         "is_active": true,
//!         "is_restricted": false,
//!         "name": "Kitchen",
//!         "type": "Speaker",
//!         "volume_percent": 59
//!     },
//!     "shuffle_state": false,
//!     "repeat_state": "off",
//!     "progress_ms": 44272,
//!     "is_playing": true,
//!     "item": { ... },
//!     "currently_playing_type": "track"
//! }
//! ```

use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

use super::{catalog::Track, Access, Operation};

/// A Connect device that can be controlled.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Device {
    /// May be absent for restricted devices.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_active: bool,
    /// Restricted devices do not accept commands.
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub volume_percent: Option<u8>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RepeatState {
    #[default]
    Off,
    Track,
    Context,
}

impl fmt::Display for RepeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Track => write!(f, "track"),
            Self::Context => write!(f, "context"),
        }
    }
}

impl std::str::FromStr for RepeatState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "off" => Ok(Self::Off),
            "track" => Ok(Self::Track),
            "context" => Ok(Self::Context),
            _ => Err(crate::error::Error::invalid_argument(format!(
                "repeat state must be off, track or context, not {s}"
            ))),
        }
    }
}

/// Response of `GET /me/player`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub shuffle_state: Option<bool>,
    #[serde(default)]
    pub repeat_state: Option<RepeatState>,
    /// Absent while an ad plays.
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub is_playing: bool,
    /// `null` for ads and private sessions. Episodes decode as tracks
    /// without artists or album.
    #[serde(default)]
    pub item: Option<Track>,
}

/// Response of `GET /me/player/devices`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct DeviceList {
    pub devices: Vec<Device>,
}

/// Reads the current playback state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlaybackState {
    pub market: Option<String>,
}

impl Operation for PlaybackState {
    const NAME: &'static str = "playback state";
    const ACCESS: Access = Access::User;
    const DEVICE_SCOPED: bool = true;
    type Output = CurrentlyPlaying;

    fn path(&self) -> Cow<'_, str> {
        "me/player".into()
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("additional_types", "track,episode".to_owned())];
        if let Some(market) = &self.market {
            query.push(("market", market.clone()));
        }
        query
    }
}

/// Lists the user's available devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Devices;

impl Operation for Devices {
    const NAME: &'static str = "devices";
    const ACCESS: Access = Access::User;
    type Output = DeviceList;

    fn path(&self) -> Cow<'_, str> {
        "me/player/devices".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_state_decodes() {
        let body = r#"{
            "device": {
                "id": "5fbb3ba6aa454b5534c4ba43a8c7e8e45a63ad0e",
                "is_active": true,
                "is_private_session": false,
                "is_restricted": false,
                "name": "Kitchen",
                "type": "Speaker",
                "volume_percent": 59,
                "supports_volume": true
            },
            "shuffle_state": true,
            "repeat_state": "context",
            "timestamp": 1490252122574,
            "progress_ms": 44272,
            "is_playing": true,
            "item": {
                "id": "X", "uri": "spotify:track:X", "name": "Song",
                "duration_ms": 200000, "artists": [{ "id": "A", "name": "Artist" }]
            },
            "currently_playing_type": "track",
            "actions": { "disallows": { "resuming": true } }
        }"#;

        let state: CurrentlyPlaying = serde_json::from_str(body).unwrap();
        assert!(state.is_playing);
        assert_eq!(state.repeat_state, Some(RepeatState::Context));
        assert_eq!(state.progress_ms, Some(44_272));
        assert_eq!(state.device.unwrap().volume_percent, Some(59));
        assert_eq!(state.item.unwrap().id.as_deref(), Some("X"));
    }

    #[test]
    fn ads_have_no_item() {
        let body = r#"{"is_playing":true,"item":null,"currently_playing_type":"ad"}"#;
        let state: CurrentlyPlaying = serde_json::from_str(body).unwrap();
        assert!(state.item.is_none());
        assert!(state.device.is_none());
    }

    #[test]
    fn repeat_states_parse() {
        assert_eq!("track".parse::<RepeatState>().unwrap(), RepeatState::Track);
        assert_eq!(RepeatState::Context.to_string(), "context");
        assert!("all".parse::<RepeatState>().is_err());
    }
}
