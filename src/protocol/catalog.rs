//! Catalog objects: tracks, albums, artists.
//!
//! # Wire Format
//!
//! A search response:
//! ```json
//! {
//!     "tracks": {
//!         "items": [{
//!             "id": "4uLU6hMCjMI75M1A2tKUQC",
//!             "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
//!             "name": "Never Gonna Give You Up",
//!             "duration_ms": 213573,
//!             "explicit": false,
//!             "preview_url": null,
//!             "artists": [{ "id": "0gxyHStUsqpMadRV0Di1Qt", "name": "Rick Astley" }],
//!             "album": {
//!                 "id": "6XhjNHCyCDyyGJRM5mg40G",
//!                 "name": "Whenever You Need Somebody",
//!                 "images": [{ "url": "https://i.scdn.co/image/ab67616d0000b273", "width": 640, "height": 640 }]
//!             }
//!         }],
//!         "limit": 20, "offset": 0, "total": 900
//!     }
//! }
//! ```

use std::{borrow::Cow, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;

use super::{Access, Operation, Page};

/// A playable track.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Track {
    /// Absent for local files.
    #[serde(default)]
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Option<Album>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "duration_ms")]
    pub duration: Duration,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub preview_url: Option<Url>,
}

impl Track {
    /// Artist names joined for display.
    #[must_use]
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// URL of the largest album image.
    #[must_use]
    pub fn artwork(&self) -> Option<&Url> {
        self.album.as_ref()?.images.first().map(|image| &image.url)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Artist {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Album {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Widest first, as returned by the service.
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Image {
    pub url: Url,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Response of `GET /search?type=track`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SearchResponse {
    pub tracks: Page<Track>,
}

/// Track search in the public catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Search {
    pub query: String,
    pub limit: u32,
    pub offset: u32,
    /// ISO 3166-1 country code; only tracks playable there are returned.
    pub market: Option<String>,
}

impl Search {
    pub const DEFAULT_LIMIT: u32 = 20;

    /// Upper bound the service accepts for `limit`.
    pub const MAX_LIMIT: u32 = 50;

    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
            market: None,
        }
    }
}

impl Operation for Search {
    const NAME: &'static str = "search";
    const ACCESS: Access = Access::Catalog;
    type Output = SearchResponse;

    fn path(&self) -> Cow<'_, str> {
        "search".into()
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("q", self.query.clone()),
            ("type", "track".to_owned()),
            ("limit", self.limit.clamp(1, Self::MAX_LIMIT).to_string()),
            ("offset", self.offset.to_string()),
        ];
        if let Some(market) = &self.market {
            query.push(("market", market.clone()));
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_results_decode() {
        let body = r#"{
            "tracks": {
                "items": [{
                    "id": "4uLU6hMCjMI75M1A2tKUQC",
                    "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
                    "name": "Never Gonna Give You Up",
                    "duration_ms": 213573,
                    "explicit": false,
                    "preview_url": null,
                    "popularity": 80,
                    "artists": [{ "id": "0gxyHStUsqpMadRV0Di1Qt", "name": "Rick Astley" }],
                    "album": {
                        "id": "6XhjNHCyCDyyGJRM5mg40G",
                        "name": "Whenever You Need Somebody",
                        "images": [{ "url": "https://i.scdn.co/image/ab67616d0000b273", "width": 640, "height": 640 }]
                    }
                }],
                "limit": 20, "offset": 0, "total": 900, "next": null
            }
        }"#;

        let response: SearchResponse = serde_json::from_str(body).unwrap();
        let track = &response.tracks.items[0];
        assert_eq!(track.duration, Duration::from_millis(213_573));
        assert_eq!(track.artist_names(), "Rick Astley");
        assert_eq!(
            track.artwork().map(Url::as_str),
            Some("https://i.scdn.co/image/ab67616d0000b273")
        );
        assert_eq!(response.tracks.total, 900);
    }

    #[test]
    fn search_limit_is_clamped() {
        let mut search = Search::new("never gonna");
        search.limit = 500;
        search.market = Some("NL".to_owned());

        let query = search.query();
        assert!(query.contains(&("limit", "50".to_owned())));
        assert!(query.contains(&("type", "track".to_owned())));
        assert!(query.contains(&("market", "NL".to_owned())));
    }

    #[test]
    fn local_tracks_have_no_id() {
        let body = r#"{"id":null,"uri":"spotify:local:::Song:200","name":"Song","duration_ms":200000,"artists":[{"id":null,"name":"Me"}]}"#;
        let track: Track = serde_json::from_str(body).unwrap();
        assert!(track.id.is_none());
        assert!(track.album.is_none());
    }
}
