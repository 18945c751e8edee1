//! Per-user data: profile, saved tracks and playlists.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{
    catalog::{Image, Track},
    Access, Operation, Page,
};

/// Response of `GET /me`.
///
/// ```json
/// {
///     "id": "wizzler",
///     "display_name": "JM Wizzler",
///     "email": "email@example.com",
///     "country": "SE",
///     "product": "premium"
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Subscription level; absent without the `user-read-private` scope.
    #[serde(default)]
    pub product: Option<String>,
}

impl UserProfile {
    /// Transport control requires a premium subscription.
    #[must_use]
    pub fn is_premium(&self) -> bool {
        self.product.as_deref() == Some("premium")
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct SavedTrack {
    /// RFC 3339 timestamp.
    pub added_at: String,
    pub track: Track,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Playlist {
    pub id: String,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: Owner,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub tracks: TrackCount,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Owner {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct TrackCount {
    pub total: u32,
}

/// Current user's profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Profile;

impl Operation for Profile {
    const NAME: &'static str = "profile";
    const ACCESS: Access = Access::User;
    type Output = UserProfile;

    fn path(&self) -> Cow<'_, str> {
        "me".into()
    }
}

/// One page of the user's saved tracks, most recently added first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SavedTracks {
    pub limit: u32,
    pub offset: u32,
}

impl Operation for SavedTracks {
    const NAME: &'static str = "saved tracks";
    const ACCESS: Access = Access::User;
    type Output = Page<SavedTrack>;

    fn path(&self) -> Cow<'_, str> {
        "me/tracks".into()
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        page_query(self.limit, self.offset)
    }
}

/// One page of playlists the user owns or follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Playlists {
    pub limit: u32,
    pub offset: u32,
}

impl Operation for Playlists {
    const NAME: &'static str = "playlists";
    const ACCESS: Access = Access::User;
    type Output = Page<Playlist>;

    fn path(&self) -> Cow<'_, str> {
        "me/playlists".into()
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        page_query(self.limit, self.offset)
    }
}

/// Library pages are limited to 50 items.
fn page_query(limit: u32, offset: u32) -> Vec<(&'static str, String)> {
    vec![
        ("limit", limit.clamp(1, 50).to_string()),
        ("offset", offset.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_without_subscription_level_is_not_premium() {
        let profile: UserProfile = serde_json::from_str(r#"{"id":"wizzler"}"#).unwrap();
        assert!(!profile.is_premium());

        let profile: UserProfile =
            serde_json::from_str(r#"{"id":"wizzler","product":"premium","followers":{"total":3}}"#)
                .unwrap();
        assert!(profile.is_premium());
    }

    #[test]
    fn playlists_decode() {
        let body = r#"{
            "items": [{
                "id": "37i9dQZF1DXcBWIGoYBM5M",
                "uri": "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M",
                "name": "Today's Top Hits",
                "description": null,
                "owner": { "id": "spotify", "display_name": "Spotify" },
                "public": true,
                "images": [],
                "tracks": { "href": "https://api.spotify.com/v1/playlists/x/tracks", "total": 50 }
            }],
            "limit": 20, "offset": 0, "total": 1
        }"#;

        let page: Page<Playlist> = serde_json::from_str(body).unwrap();
        assert_eq!(page.items[0].tracks.total, 50);
        assert_eq!(page.items[0].owner.display_name.as_deref(), Some("Spotify"));
    }

    #[test]
    fn page_queries_are_bounded() {
        let op = SavedTracks { limit: 0, offset: 40 };
        assert_eq!(
            op.query(),
            vec![("limit", "1".to_owned()), ("offset", "40".to_owned())]
        );
    }
}
