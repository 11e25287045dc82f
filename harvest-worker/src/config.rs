use std::str::FromStr;
use std::{fs, time};

use envconfig::Envconfig;
use harvest_common::params::{
    parse_rfc3339, InvalidParameter, SearchOptions, SearchOrder, SearchParameters, SearchType,
    VideoDuration,
};
use url::Url;

use crate::error::ConfigError;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8000")]
    pub port: u16,

    #[envconfig(default = "redis://localhost:6379/1")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_timeout_ms: EnvMsDuration,

    #[envconfig(default = "900")]
    pub cycle_interval_secs: u64,

    #[envconfig(default = "1")]
    pub max_concurrent_cycles: usize,

    #[envconfig(default = "10000")]
    pub daily_quota_units: u64,

    #[envconfig(nested = true)]
    pub youtube: YoutubeConfig,

    #[envconfig(nested = true)]
    pub search: SearchConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cycle_interval(&self) -> time::Duration {
        time::Duration::from_secs(self.cycle_interval_secs)
    }

    /// Check the settings that can only be wrong in combination or range, before anything
    /// connects anywhere.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval_secs == 0 {
            return Err(ConfigError::ZeroCycleInterval);
        }

        self.search_parameters().map(|_| ())
    }

    /// Quota units the schedule spends per day if every cycle fetches one page.
    pub fn daily_quota_estimate(&self, cost_per_request: u64) -> u64 {
        let cycles_per_day = 86_400 / self.cycle_interval_secs.max(1);
        cycles_per_day.max(1) * cost_per_request
    }

    /// Build the parameters of the first search request, validating every search setting.
    pub fn search_parameters(&self) -> Result<SearchParameters, ConfigError> {
        let api_key = self.youtube.api_key()?;
        let options = self.search.options()?;

        Ok(SearchParameters::new(&api_key, options)?)
    }
}

#[derive(Envconfig, Clone)]
pub struct YoutubeConfig {
    #[envconfig(from = "YOUTUBE_API_KEY")]
    pub api_key: Option<NonEmptyString>,

    #[envconfig(from = "YOUTUBE_API_KEY_FILE")]
    pub api_key_file: Option<NonEmptyString>,

    #[envconfig(
        from = "YOUTUBE_SEARCH_URL",
        default = "https://www.googleapis.com/youtube/v3/search"
    )]
    pub search_url: Url,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "CONNECT_TIMEOUT_MS", default = "3000")]
    pub connect_timeout: EnvMsDuration,
}

impl YoutubeConfig {
    /// The API key, taken from `YOUTUBE_API_KEY`, or else read from the file at `YOUTUBE_API_KEY_FILE`.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(key.as_str().to_owned());
        }

        let Some(path) = &self.api_key_file else {
            return Err(ConfigError::MissingApiKey);
        };

        let contents =
            fs::read_to_string(path.as_str()).map_err(|error| ConfigError::ApiKeyFile {
                path: path.as_str().to_owned(),
                error,
            })?;
        let key = contents.trim();
        if key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(key.to_owned())
    }
}

#[derive(Envconfig, Clone)]
pub struct SearchConfig {
    #[envconfig(from = "SEARCH_QUERY", default = "lofi hip-hop")]
    pub query: String,

    #[envconfig(from = "SEARCH_ORDER", default = "date")]
    pub order: String,

    #[envconfig(from = "SEARCH_TYPE", default = "video")]
    pub content_type: String,

    #[envconfig(from = "SEARCH_VIDEO_DURATION", default = "long")]
    pub video_duration: String,

    #[envconfig(from = "SEARCH_MAX_RESULTS", default = "50")]
    pub max_results: u32,

    #[envconfig(from = "SEARCH_PUBLISHED_AFTER")]
    pub published_after: Option<String>,

    #[envconfig(from = "SEARCH_PUBLISHED_BEFORE")]
    pub published_before: Option<String>,
}

impl SearchConfig {
    pub fn options(&self) -> Result<SearchOptions, InvalidParameter> {
        let query = Some(self.query.clone()).filter(|q| !q.is_empty());
        // Duration filters only apply to videos, an empty value turns it off for other types.
        let video_duration = Some(self.video_duration.as_str())
            .filter(|d| !d.is_empty())
            .map(VideoDuration::from_str)
            .transpose()?;

        Ok(SearchOptions {
            query,
            order: Some(SearchOrder::from_str(&self.order)?),
            content_type: Some(SearchType::from_str(&self.content_type)?),
            video_duration,
            max_results: Some(self.max_results),
            published_after: self
                .published_after
                .as_deref()
                .map(|value| parse_rfc3339("publishedAfter", value))
                .transpose()?,
            published_before: self
                .published_before
                .as_deref()
                .map(|value| parse_rfc3339("publishedBefore", value))
                .transpose()?,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
