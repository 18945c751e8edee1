//! Playback view and transport commands.
//!
//! [`PlaybackView`] is the locally held picture of what the user's active
//! device is doing. It is only ever as fresh as the last poll: the service
//! pushes nothing, so a view may lag the remote state by up to one poll
//! interval.
//!
//! [`Command`] enumerates the transport controls. Every command is
//! device-scoped: without an active device the service answers 404, which
//! surfaces as [`NoActiveDevice`](crate::error::ErrorKind::NoActiveDevice).

use std::{borrow::Cow, fmt, time::Duration, time::SystemTime};

use reqwest::Method;
use serde::Serialize;
use serde_json::json;
use serde_with::{serde_as, DurationMilliSeconds, TimestampMilliSeconds};

use crate::{
    error::{Error, Result},
    protocol::{
        catalog::Track,
        player::{CurrentlyPlaying, Device, RepeatState},
        Access, Operation,
    },
};

/// Snapshot of remote playback.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlaybackView {
    pub is_playing: bool,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "progress_ms")]
    pub progress: Duration,

    pub device: Option<Device>,
    pub item: Option<Track>,
    pub shuffle: Option<bool>,
    pub repeat: Option<RepeatState>,

    /// When the read that produced this view was issued. Of two views, the
    /// one read last is authoritative.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub read_at: SystemTime,
}

impl PlaybackView {
    #[must_use]
    pub fn from_state(state: CurrentlyPlaying, read_at: SystemTime) -> Self {
        Self {
            is_playing: state.is_playing,
            progress: Duration::from_millis(state.progress_ms.unwrap_or_default()),
            device: state.device,
            item: state.item,
            shuffle: state.shuffle_state,
            repeat: state.repeat_state,
            read_at,
        }
    }

    /// Extrapolates the playback position to `now`, bounded by the track
    /// duration.
    #[must_use]
    pub fn progress_at(&self, now: SystemTime) -> Duration {
        if !self.is_playing {
            return self.progress;
        }

        let elapsed = now.duration_since(self.read_at).unwrap_or_default();
        let progress = self.progress.saturating_add(elapsed);
        match &self.item {
            Some(track) => progress.min(track.duration),
            None => progress,
        }
    }
}

impl fmt::Display for PlaybackView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_playing { "playing" } else { "paused" };
        match &self.item {
            Some(track) => write!(f, "{state}: {} - {}", track.artist_names(), track.name)?,
            None => write!(f, "{state}")?,
        }
        if let Some(device) = &self.device {
            write!(f, " on {}", device.name)?;
        }
        Ok(())
    }
}

/// Transport control.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Resumes, or starts a context or list of tracks.
    Play {
        /// Album, artist or playlist URI.
        context_uri: Option<String>,
        /// Track URIs; ignored by the service when a context is given.
        uris: Vec<String>,
        /// Position in the first track.
        position: Option<Duration>,
        /// Target device; the active device when absent.
        device_id: Option<String>,
    },
    Pause,
    Next,
    Previous,
    Seek(Duration),
    /// Percent, 0 to 100.
    Volume(u8),
    Shuffle(bool),
    Repeat(RepeatState),
    /// Moves playback to another device.
    Transfer { device_id: String, play: bool },
}

impl Command {
    /// Resumes playback on the active device.
    #[must_use]
    pub fn resume() -> Self {
        Self::Play {
            context_uri: None,
            uris: Vec::new(),
            position: None,
            device_id: None,
        }
    }

    /// Starts playing a single track.
    #[must_use]
    pub fn play_track(uri: impl Into<String>) -> Self {
        Self::Play {
            context_uri: None,
            uris: vec![uri.into()],
            position: None,
            device_id: None,
        }
    }

    /// Checks arguments before anything is sent.
    ///
    /// # Errors
    ///
    /// Will return an [`InvalidArgument`](crate::error::ErrorKind::InvalidArgument)
    /// error if:
    /// - the volume is above 100
    /// - a transfer names no device
    /// - a play command carries an empty URI
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Volume(percent) if *percent > 100 => Err(Error::invalid_argument(format!(
                "volume must be between 0 and 100, not {percent}"
            ))),
            Self::Transfer { device_id, .. } if device_id.is_empty() => {
                Err(Error::invalid_argument("transfer needs a device id"))
            }
            Self::Play {
                context_uri, uris, ..
            } if context_uri.as_deref() == Some("") || uris.iter().any(String::is_empty) => {
                Err(Error::invalid_argument("play needs non-empty uris"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play { .. } => write!(f, "play"),
            Self::Pause => write!(f, "pause"),
            Self::Next => write!(f, "next"),
            Self::Previous => write!(f, "previous"),
            Self::Seek(position) => write!(f, "seek to {}ms", position.as_millis()),
            Self::Volume(percent) => write!(f, "volume {percent}%"),
            Self::Shuffle(state) => write!(f, "shuffle {}", if *state { "on" } else { "off" }),
            Self::Repeat(state) => write!(f, "repeat {state}"),
            Self::Transfer { device_id, .. } => write!(f, "transfer to {device_id}"),
        }
    }
}

impl Operation for Command {
    const NAME: &'static str = "playback control";
    const ACCESS: Access = Access::User;
    const DEVICE_SCOPED: bool = true;
    type Output = serde::de::IgnoredAny;

    fn method(&self) -> Method {
        match self {
            Self::Next | Self::Previous => Method::POST,
            _ => Method::PUT,
        }
    }

    fn path(&self) -> Cow<'_, str> {
        match self {
            Self::Play { .. } => "me/player/play",
            Self::Pause => "me/player/pause",
            Self::Next => "me/player/next",
            Self::Previous => "me/player/previous",
            Self::Seek(_) => "me/player/seek",
            Self::Volume(_) => "me/player/volume",
            Self::Shuffle(_) => "me/player/shuffle",
            Self::Repeat(_) => "me/player/repeat",
            Self::Transfer { .. } => "me/player",
        }
        .into()
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Play {
                device_id: Some(device_id),
                ..
            } => vec![("device_id", device_id.clone())],
            Self::Seek(position) => vec![("position_ms", position.as_millis().to_string())],
            Self::Volume(percent) => vec![("volume_percent", percent.to_string())],
            Self::Shuffle(state) => vec![("state", state.to_string())],
            Self::Repeat(state) => vec![("state", state.to_string())],
            _ => Vec::new(),
        }
    }

    fn body(&self) -> Option<serde_json::Value> {
        match self {
            Self::Play {
                context_uri,
                uris,
                position,
                ..
            } => {
                let mut body = serde_json::Map::new();
                if let Some(context_uri) = context_uri {
                    body.insert("context_uri".to_owned(), json!(context_uri));
                }
                if !uris.is_empty() {
                    body.insert("uris".to_owned(), json!(uris));
                }
                if let Some(position) = position {
                    let position_ms = u64::try_from(position.as_millis()).unwrap_or(u64::MAX);
                    body.insert("position_ms".to_owned(), json!(position_ms));
                }
                (!body.is_empty()).then_some(serde_json::Value::Object(body))
            }
            Self::Transfer { device_id, play } => Some(json!({
                "device_ids": [device_id],
                "play": play,
            })),
            _ => None,
        }
    }
}
