//! Typed decoding of the loosely-structured values plugins report.
//!
//! Every payload kind has its own schema. Missing optional fields fall back
//! to defaults; a payload of the wrong shape is a [`DecodeError`], which the
//! bridge logs and treats as "no result".

use resolver_core::models::{ResolverId, SearchResult, TrackRef};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {kind} payload: {source}")]
    Malformed {
        kind: &'static str,
        source: serde_json::Error,
    },
    #[error("{kind} payload is {found}, expected {expected}")]
    UnexpectedShape {
        kind: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

/// A result kind with an independent schema.
pub trait ResultPayload: DeserializeOwned {
    /// Short name used in logs and errors.
    const KIND: &'static str;
}

/// Decode a raw plugin value into one of the typed result kinds.
pub fn decode<T: ResultPayload>(raw: &Value) -> Result<T, DecodeError> {
    T::deserialize(raw).map_err(|source| DecodeError::Malformed {
        kind: T::KIND,
        source,
    })
}

/// Reply to the `settings` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResolverSettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_weight")]
    pub weight: i32,
    /// Liveness timeout in seconds. Negative values read as 0.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub timeout: u64,
}

impl ResultPayload for ResolverSettings {
    const KIND: &'static str = "settings";
}

/// Description of the plugin's user-configurable fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigUi {
    #[serde(default)]
    pub fields: Vec<ConfigUiField>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigUiField {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub widget: Option<String>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Widget-specific keys the bridge does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultPayload for ConfigUi {
    const KIND: &'static str = "config UI";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlKind {
    Track,
    Album,
    Artist,
    Playlist,
    XspfUrl,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Reply to the `lookupUrl` call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlLookupResult {
    #[serde(default, rename = "type")]
    pub kind: UrlKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default)]
    pub tracks: Vec<UrlLookupTrack>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UrlLookupTrack {
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ResultPayload for UrlLookupResult {
    const KIND: &'static str = "URL lookup";
}

/// Reply to the `getStreamUrl` call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamUrlResult {
    pub url: String,
    /// Headers that must accompany the request; when present the final URL
    /// has to be resolved by following redirects with them.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

impl ResultPayload for StreamUrlResult {
    const KIND: &'static str = "stream URL";
}

/// Reply to the `getAccessToken` call.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AccessTokenResult {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

impl std::fmt::Debug for AccessTokenResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenResult").finish_non_exhaustive()
    }
}

impl ResultPayload for AccessTokenResult {
    const KIND: &'static str = "access token";
}

/// Reply to the `collection` call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CollectionMetadata {
    #[serde(default)]
    pub prettyname: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub iconfile: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultPayload for CollectionMetadata {
    const KIND: &'static str = "collection";
}

/// One match record as plugins report it.
#[derive(Debug, Deserialize)]
struct RawSearchResult {
    artist: String,
    track: String,
    url: String,
    #[serde(default)]
    album: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    albumpos: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    discnumber: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    duration: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    bitrate: Option<u32>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mimetype: Option<String>,
    #[serde(default, rename = "linkUrl")]
    link_url: Option<String>,
    #[serde(default, rename = "purchaseUrl")]
    purchase_url: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

impl RawSearchResult {
    fn into_result(self, resolver_id: &ResolverId, weight: i32) -> Option<SearchResult> {
        if self.url.trim().is_empty() {
            return None;
        }
        Some(SearchResult {
            track: TrackRef {
                artist: self.artist,
                title: self.track,
                album: self.album.filter(|album| !album.is_empty()),
                album_position: self.albumpos,
                disc_number: self.discnumber,
                duration_seconds: self.duration,
            },
            url: self.url,
            resolver_id: resolver_id.clone(),
            weight,
            score: self.score.unwrap_or(1.0).clamp(0.0, 1.0),
            bitrate: self.bitrate,
            size: self.size,
            mimetype: self.mimetype,
            link_url: self.link_url,
            purchase_url: self.purchase_url,
        })
    }
}

/// Plugins written in scripting languages send numbers as strings or floats
/// often enough that rejecting them would drop otherwise good matches.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_weight<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value.as_ref().and_then(numeric) {
        Some(n) if n.is_finite() => {
            n.round()
                .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
        }
        _ => 0,
    })
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    if let Some(Value::Number(n)) = &value {
        if let Some(exact) = n.as_u64() {
            return Ok(exact);
        }
    }
    Ok(match value.as_ref().and_then(numeric) {
        // float-to-int casts saturate
        Some(n) if n.is_finite() && n > 0.0 => n.round() as u64,
        _ => 0,
    })
}

const SEARCH_RESULTS: &str = "search results";

/// Decode a `search`/`resolve` reply into results attributed to `resolver_id`.
///
/// Accepts a bare list or an object carrying a `results` list. Entries that
/// fail to decode are skipped; `null` means the plugin found nothing.
pub fn decode_search_results(
    raw: &Value,
    resolver_id: &ResolverId,
    weight: i32,
) -> Result<Vec<SearchResult>, DecodeError> {
    let entries = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        Value::Object(object) => match object.get("results") {
            Some(Value::Array(entries)) => entries,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(other) => {
                return Err(DecodeError::UnexpectedShape {
                    kind: SEARCH_RESULTS,
                    expected: "a list",
                    found: value_kind(other),
                })
            }
        },
        other => {
            return Err(DecodeError::UnexpectedShape {
                kind: SEARCH_RESULTS,
                expected: "a list",
                found: value_kind(other),
            })
        }
    };

    let mut results = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match RawSearchResult::deserialize(entry) {
            Ok(raw) => match raw.into_result(resolver_id, weight) {
                Some(result) => results.push(result),
                None => tracing::debug!(
                    resolver_id = %resolver_id,
                    index,
                    "skipping search result without url"
                ),
            },
            Err(err) => tracing::debug!(
                resolver_id = %resolver_id,
                index,
                error = %err,
                "skipping malformed search result"
            ),
        }
    }
    Ok(results)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
