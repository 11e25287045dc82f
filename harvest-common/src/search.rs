//! Decode `search.list` responses into typed pages.
//!
//! A page is all-or-nothing at the top level: a wrong `kind` or a malformed envelope rejects the
//! whole response. Items are decoded independently, and an item that fails to decode is dropped
//! and reported without affecting the rest of the page.
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

pub const SEARCH_LIST_RESPONSE_KIND: &str = "youtube#searchListResponse";
pub const SEARCH_RESULT_KIND: &str = "youtube#searchResult";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected kind {found}, expected {expected}")]
    UnexpectedKind {
        expected: &'static str,
        found: String,
    },
    #[error("malformed field {field}: {reason}")]
    MalformedField { field: String, reason: String },
    #[error("field {field} has unexpected value {value}")]
    UnexpectedEnumValue { field: String, value: String },
}

impl DecodeError {
    fn missing(field: &str) -> Self {
        DecodeError::MalformedField {
            field: field.to_owned(),
            reason: "missing or not a string".to_owned(),
        }
    }
}

/// Identifier of the resource a search result points to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Video(String),
    Channel(String),
    Playlist(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResourceId::Video(id) => write!(f, "video:{id}"),
            ResourceId::Channel(id) => write!(f, "channel:{id}"),
            ResourceId::Playlist(id) => write!(f, "playlist:{id}"),
        }
    }
}

/// `snippet.liveBroadcastContent`, where `none` is represented by the absence of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveBroadcast {
    Live,
    Upcoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub id: ResourceId,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub published_at: DateTime<Utc>,
    pub live_broadcast: Option<LiveBroadcast>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub kind: String,
    pub items: Vec<SearchItem>,
    pub next_page_token: Option<String>,
    pub prev_page_token: Option<String>,
    pub total_results: u64,
}

/// An item that was left out of its page, with its position in the raw `items` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub index: usize,
    pub error: DecodeError,
}

/// A successfully decoded page, along with whatever items could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub page: SearchPage,
    pub dropped: Vec<DroppedItem>,
}

/// Decode a raw `search.list` response.
///
/// Fails only when the response as a whole is unusable. Bad items are logged, dropped, and listed
/// in `DecodedPage::dropped`.
pub fn decode_search_response(raw: &Value) -> Result<DecodedPage, DecodeError> {
    let kind = raw
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::missing("kind"))?;
    if kind != SEARCH_LIST_RESPONSE_KIND {
        return Err(DecodeError::UnexpectedKind {
            expected: SEARCH_LIST_RESPONSE_KIND,
            found: kind.to_owned(),
        });
    }

    let next_page_token = optional_str(raw, "nextPageToken")?;
    let prev_page_token = optional_str(raw, "prevPageToken")?;
    let total_results = total_results(raw)?;

    info!(
        next_page_token = next_page_token.as_deref(),
        prev_page_token = prev_page_token.as_deref(),
        total_results,
        "decoding search page"
    );

    let raw_items = raw
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::MalformedField {
            field: "items".to_owned(),
            reason: "missing or not an array".to_owned(),
        })?;

    let mut items = Vec::with_capacity(raw_items.len());
    let mut dropped = Vec::new();

    for (index, raw_item) in raw_items.iter().enumerate() {
        match decode_item(raw_item) {
            Ok(item) => items.push(item),
            Err(error) => {
                warn!(index, %error, "dropping search item");
                dropped.push(DroppedItem { index, error });
            }
        }
    }

    Ok(DecodedPage {
        page: SearchPage {
            kind: kind.to_owned(),
            items,
            next_page_token,
            prev_page_token,
            total_results,
        },
        dropped,
    })
}

fn decode_item(raw: &Value) -> Result<SearchItem, DecodeError> {
    let kind = required_str(raw, "/kind")?;
    if kind != SEARCH_RESULT_KIND {
        return Err(DecodeError::UnexpectedKind {
            expected: SEARCH_RESULT_KIND,
            found: kind.to_owned(),
        });
    }

    let published_at = required_str(raw, "/snippet/publishedAt")?;
    let published_at = DateTime::parse_from_rfc3339(published_at)
        .map_err(|error| DecodeError::MalformedField {
            field: "snippet.publishedAt".to_owned(),
            reason: format!("{published_at} is not RFC 3339: {error}"),
        })?
        .with_timezone(&Utc);

    Ok(SearchItem {
        id: resource_id(raw)?,
        channel_id: required_str(raw, "/snippet/channelId")?.to_owned(),
        title: required_str(raw, "/snippet/title")?.to_owned(),
        description: required_str(raw, "/snippet/description")?.to_owned(),
        channel_title: required_str(raw, "/snippet/channelTitle")?.to_owned(),
        published_at,
        live_broadcast: live_broadcast(raw)?,
    })
}

fn resource_id(raw: &Value) -> Result<ResourceId, DecodeError> {
    match required_str(raw, "/id/kind")? {
        "youtube#video" => Ok(ResourceId::Video(
            required_str(raw, "/id/videoId")?.to_owned(),
        )),
        "youtube#channel" => Ok(ResourceId::Channel(
            required_str(raw, "/id/channelId")?.to_owned(),
        )),
        "youtube#playlist" => Ok(ResourceId::Playlist(
            required_str(raw, "/id/playlistId")?.to_owned(),
        )),
        other => Err(DecodeError::UnexpectedEnumValue {
            field: "id.kind".to_owned(),
            value: other.to_owned(),
        }),
    }
}

fn live_broadcast(raw: &Value) -> Result<Option<LiveBroadcast>, DecodeError> {
    match raw.pointer("/snippet/liveBroadcastContent") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => match value.as_str() {
            "none" => Ok(None),
            "live" => Ok(Some(LiveBroadcast::Live)),
            "upcoming" => Ok(Some(LiveBroadcast::Upcoming)),
            other => Err(DecodeError::UnexpectedEnumValue {
                field: "snippet.liveBroadcastContent".to_owned(),
                value: other.to_owned(),
            }),
        },
        Some(other) => Err(DecodeError::UnexpectedEnumValue {
            field: "snippet.liveBroadcastContent".to_owned(),
            value: other.to_string(),
        }),
    }
}

fn total_results(raw: &Value) -> Result<u64, DecodeError> {
    let malformed = |reason: &str| DecodeError::MalformedField {
        field: "pageInfo.totalResults".to_owned(),
        reason: reason.to_owned(),
    };

    match raw.pointer("/pageInfo/totalResults") {
        Some(Value::Number(number)) => number
            .as_u64()
            .ok_or_else(|| malformed("not a non-negative integer")),
        Some(Value::String(number)) => number
            .parse::<u64>()
            .map_err(|_| malformed("not a non-negative integer")),
        Some(_) => Err(malformed("not a number")),
        None => Err(malformed("missing")),
    }
}

/// Look up a JSON pointer that must resolve to a string.
fn required_str<'a>(raw: &'a Value, pointer: &str) -> Result<&'a str, DecodeError> {
    raw.pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::missing(&field_name(pointer)))
}

/// Top-level fields that may be absent or null, but must be strings when present.
fn optional_str(raw: &Value, field: &str) -> Result<Option<String>, DecodeError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(DecodeError::MalformedField {
            field: field.to_owned(),
            reason: "not a string".to_owned(),
        }),
    }
}

/// Turn `/snippet/title` into `snippet.title` for error messages.
fn field_name(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}
