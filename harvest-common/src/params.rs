//! Query parameters for the YouTube Data API `search.list` endpoint.
//! See https://developers.google.com/youtube/v3/docs/search/list#parameters.
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Page sizes accepted by the API.
pub const MAX_RESULTS_RANGE: RangeInclusive<u32> = 1..=50;

/// The only `part` we know how to decode.
pub const SNIPPET_PART: &str = "snippet";

/// Query keys owned by `SearchParameters`, which extra parameters may not override.
const RESERVED_KEYS: &[&str] = &[
    "key",
    "part",
    "q",
    "order",
    "type",
    "videoDuration",
    "maxResults",
    "pageToken",
    "publishedAfter",
    "publishedBefore",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid parameter {name}: {reason}")]
pub struct InvalidParameter {
    pub name: String,
    pub reason: String,
}

impl InvalidParameter {
    pub fn new(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Sort order of search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOrder {
    Date,
    Title,
    Rating,
    Relevance,
    ViewCount,
}

impl FromStr for SearchOrder {
    type Err = InvalidParameter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(SearchOrder::Date),
            "title" => Ok(SearchOrder::Title),
            "rating" => Ok(SearchOrder::Rating),
            "relevance" => Ok(SearchOrder::Relevance),
            "viewCount" => Ok(SearchOrder::ViewCount),
            invalid => Err(InvalidParameter::new(
                "order",
                format!("{invalid} is not one of date, title, rating, relevance, viewCount"),
            )),
        }
    }
}

/// Kind of resource a search is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Channel,
    Playlist,
    Video,
}

impl FromStr for SearchType {
    type Err = InvalidParameter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" => Ok(SearchType::Channel),
            "playlist" => Ok(SearchType::Playlist),
            "video" => Ok(SearchType::Video),
            invalid => Err(InvalidParameter::new(
                "type",
                format!("{invalid} is not one of channel, playlist, video"),
            )),
        }
    }
}

/// Duration bucket filter, only valid for video searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoDuration {
    /// The API default: no filtering.
    Any,
    /// Longer than 20 minutes.
    Long,
    /// Between four and 20 minutes, inclusive.
    Medium,
    /// Less than four minutes.
    Short,
}

impl FromStr for VideoDuration {
    type Err = InvalidParameter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(VideoDuration::Any),
            "long" => Ok(VideoDuration::Long),
            "medium" => Ok(VideoDuration::Medium),
            "short" => Ok(VideoDuration::Short),
            invalid => Err(InvalidParameter::new(
                "videoDuration",
                format!("{invalid} is not one of any, long, medium, short"),
            )),
        }
    }
}

/// Everything optional about a search. Turned into `SearchParameters` by `SearchParameters::new`,
/// which is where validation happens.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: Option<String>,
    pub order: Option<SearchOrder>,
    pub content_type: Option<SearchType>,
    pub video_duration: Option<VideoDuration>,
    pub max_results: Option<u32>,
    pub published_after: Option<DateTime<FixedOffset>>,
    pub published_before: Option<DateTime<FixedOffset>>,
    /// Any other `search.list` parameter, passed through as-is.
    pub extra: BTreeMap<String, String>,
}

/// A validated, immutable set of query parameters for one search request.
///
/// Serializes to the query string expected by the API. The API key is never printed by `Debug`.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameters {
    key: String,
    part: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order: Option<SearchOrder>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    content_type: Option<SearchType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_duration: Option<VideoDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_rfc3339"
    )]
    published_after: Option<DateTime<FixedOffset>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_rfc3339"
    )]
    published_before: Option<DateTime<FixedOffset>>,
    #[serde(flatten)]
    extra: BTreeMap<String, String>,
}

impl SearchParameters {
    /// Validate `options` and build the parameters for a first-page request.
    pub fn new(api_key: &str, options: SearchOptions) -> Result<Self, InvalidParameter> {
        if api_key.trim().is_empty() {
            return Err(InvalidParameter::new("key", "api key cannot be empty"));
        }

        if let Some(max_results) = options.max_results {
            if !MAX_RESULTS_RANGE.contains(&max_results) {
                return Err(InvalidParameter::new(
                    "maxResults",
                    format!(
                        "{max_results} is outside of [{}, {}]",
                        MAX_RESULTS_RANGE.start(),
                        MAX_RESULTS_RANGE.end()
                    ),
                ));
            }
        }

        if let (Some(after), Some(before)) = (options.published_after, options.published_before) {
            if after > before {
                return Err(InvalidParameter::new(
                    "publishedAfter",
                    format!("{after} is later than publishedBefore {before}"),
                ));
            }
        }

        if options.video_duration.is_some() && options.content_type != Some(SearchType::Video) {
            return Err(InvalidParameter::new(
                "videoDuration",
                "can only be set when type is video",
            ));
        }

        if let Some(reserved) = options
            .extra
            .keys()
            .find(|key| RESERVED_KEYS.contains(&key.as_str()))
        {
            return Err(InvalidParameter::new(
                reserved,
                "must be set through its own option, not as an extra parameter",
            ));
        }

        Ok(Self {
            key: api_key.to_owned(),
            part: SNIPPET_PART,
            q: options.query,
            order: options.order,
            content_type: options.content_type,
            video_duration: options.video_duration,
            max_results: options.max_results,
            page_token: None,
            published_after: options.published_after,
            published_before: options.published_before,
            extra: options.extra,
        })
    }

    /// The same request, positioned at the page identified by `page_token`.
    /// The token is opaque and passed through unchanged; `None` means the first page.
    pub fn with_page_token(&self, page_token: Option<&str>) -> Self {
        Self {
            page_token: page_token.map(str::to_owned),
            ..self.clone()
        }
    }

    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.q.as_deref()
    }

    pub fn max_results(&self) -> Option<u32> {
        self.max_results
    }
}

impl fmt::Debug for SearchParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchParameters")
            .field("key", &"<redacted>")
            .field("part", &self.part)
            .field("q", &self.q)
            .field("order", &self.order)
            .field("type", &self.content_type)
            .field("video_duration", &self.video_duration)
            .field("max_results", &self.max_results)
            .field("page_token", &self.page_token)
            .field("published_after", &self.published_after)
            .field("published_before", &self.published_before)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Parse an RFC 3339 timestamp, which must carry an explicit offset.
pub fn parse_rfc3339(name: &str, value: &str) -> Result<DateTime<FixedOffset>, InvalidParameter> {
    DateTime::parse_from_rfc3339(value)
        .map_err(|error| InvalidParameter::new(name, format!("{value} is not RFC 3339: {error}")))
}

fn serialize_rfc3339<S>(
    timestamp: &Option<DateTime<FixedOffset>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match timestamp {
        Some(timestamp) => {
            serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        None => serializer.serialize_none(),
    }
}
