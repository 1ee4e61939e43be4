use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a resolver plugin (the manifest's plugin name).
///
/// Treated as an opaque, case-sensitive key for configuration storage,
/// authenticator lookup and event attribution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct ResolverId(pub String);

impl ResolverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResolverId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResolverId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ResolverId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A search request handed to a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    /// Free-text search, dispatched as the plugin's `search` call.
    FullText { query: String },
    /// Exact track lookup, dispatched as the plugin's `resolve` call.
    Structured {
        artist: String,
        album: String,
        track: String,
    },
}

impl Query {
    pub fn full_text(query: impl Into<String>) -> Self {
        Self::FullText {
            query: query.into(),
        }
    }

    pub fn structured(
        artist: impl Into<String>,
        album: impl Into<String>,
        track: impl Into<String>,
    ) -> Self {
        Self::Structured {
            artist: artist.into(),
            album: album.into(),
            track: track.into(),
        }
    }

    pub fn is_full_text(&self) -> bool {
        matches!(self, Query::FullText { .. })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::FullText { query } => write!(f, "\"{query}\""),
            Query::Structured {
                artist,
                album,
                track,
            } => write!(f, "{artist} - {track} ({album})"),
        }
    }
}

/// Track metadata carried by a search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    /// Position within the album when known.
    pub album_position: Option<u32>,
    pub disc_number: Option<u32>,
    /// Duration in seconds when known.
    pub duration_seconds: Option<u32>,
}

/// A single candidate match reported by a resolver.
///
/// The `url` is resolver-scoped: it must be passed back to the same resolver
/// to obtain a playable stream URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub track: TrackRef,
    pub url: String,
    pub resolver_id: ResolverId,
    /// Tie-break priority of the reporting resolver at the time of the call.
    pub weight: i32,
    /// Match quality in `0.0..=1.0`.
    pub score: f32,
    pub bitrate: Option<u32>,
    pub size: Option<u64>,
    pub mimetype: Option<String>,
    pub link_url: Option<String>,
    pub purchase_url: Option<String>,
}

/// Short-lived credential reported by a resolver.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub resolver_id: ResolverId,
    pub token: String,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("resolver_id", &self.resolver_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}
