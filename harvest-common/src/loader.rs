//! Fetch raw search pages from the YouTube Data API.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::params::SearchParameters;

pub const YOUTUBE_SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

/// Quota units charged by the API for one `search.list` call, whatever its outcome.
pub const SEARCH_QUOTA_COST: u64 = 100;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36";

/// Errors raised before we get hold of a JSON document. Nothing here is retried.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("search request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("search request returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("search response body is not valid json: {0}")]
    Body(#[source] reqwest::Error),
}

#[async_trait]
pub trait SearchLoader {
    /// Run one search request, returning the undecoded response document.
    async fn search(&self, params: &SearchParameters) -> Result<Value, TransportError>;
}

/// Loads search pages over a single pooled HTTP client, which is safe to share between
/// concurrent cycles. Call `close` once nothing uses the loader anymore.
pub struct YoutubeLoader {
    client: reqwest::Client,
    search_url: Url,
}

impl YoutubeLoader {
    pub fn new(
        search_url: Url,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(TransportError::Request)?;

        Ok(Self { client, search_url })
    }

    pub fn search_url(&self) -> &Url {
        &self.search_url
    }

    /// Release the connection pool. Taking `self` guarantees this happens at most once.
    pub fn close(self) {
        info!(search_url = %self.search_url, "closing search http client");
        drop(self.client);
    }

    async fn send(&self, params: &SearchParameters) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(self.search_url.clone())
            .query(params)
            .send()
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        if !status.is_success() {
            // The API explains quota and key problems in the body, keep it for the logs.
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        response.json::<Value>().await.map_err(TransportError::Body)
    }
}

#[async_trait]
impl SearchLoader for YoutubeLoader {
    async fn search(&self, params: &SearchParameters) -> Result<Value, TransportError> {
        info!(?params, "search with params");

        let result = self.send(params).await;
        if let Err(ref e) = result {
            error!(?params, error = %e, "search request error");
        }

        result
    }
}
