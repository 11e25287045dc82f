//! One harvest cycle: fetch a search page, pull emails out of its descriptions, keep the ones we
//! have never seen, and account for them.
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use harvest_common::extract::extract_emails;
use harvest_common::loader::{SearchLoader, SEARCH_QUOTA_COST};
use harvest_common::metrics::Counters;
use harvest_common::params::SearchParameters;
use harvest_common::search::{decode_search_response, DecodedPage, SearchPage};
use harvest_common::seen::SeenEmails;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::CycleError;

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Token the page was requested with, `None` for the first page.
    pub page_token: Option<String>,
    pub next_page_token: Option<String>,
    pub items: usize,
    pub dropped_items: usize,
    pub emails_found: usize,
    pub unique_emails_found: usize,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Aborted(CycleError),
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Completed(_) => "completed",
            CycleOutcome::Aborted(error) => error.kind(),
        }
    }
}

/// Runs harvest cycles against a fixed search.
///
/// Pagination always moves forward: a completed cycle stores the page's next token, and the
/// following cycle requests that page. Once the results are exhausted the cursor is cleared and
/// the search starts over from the first page, which is where new uploads show up. An aborted
/// cycle leaves the cursor alone, so the same page is tried again next time. The cursor only lives
/// in memory.
///
/// `Parser` is shared between concurrently running cycles. Two overlapping cycles may fetch the
/// same page; the seen set makes that harmless apart from the at-least-once counting described in
/// `harvest_common::seen`.
pub struct Parser {
    loader: Arc<dyn SearchLoader + Send + Sync>,
    seen: SeenEmails,
    counters: Arc<Counters>,
    params: SearchParameters,
    cursor: Mutex<Option<String>>,
}

impl Parser {
    pub fn new(
        loader: Arc<dyn SearchLoader + Send + Sync>,
        seen: SeenEmails,
        counters: Arc<Counters>,
        params: SearchParameters,
    ) -> Self {
        Self {
            loader,
            seen,
            counters,
            params,
            cursor: Mutex::new(None),
        }
    }

    /// The token the next cycle will request.
    pub async fn page_token(&self) -> Option<String> {
        self.cursor.lock().await.clone()
    }

    /// Run a single cycle. Never fails and never panics: errors are logged and returned as
    /// `CycleOutcome::Aborted`.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(self.parse()).catch_unwind().await {
            Ok(Ok(report)) => CycleOutcome::Completed(report),
            Ok(Err(error)) => {
                error!(%error, "harvest cycle aborted");
                CycleOutcome::Aborted(error)
            }
            Err(panic) => {
                let error = CycleError::Panicked(panic_message(panic));
                error!(%error, "harvest cycle aborted");
                CycleOutcome::Aborted(error)
            }
        };

        metrics::counter!("youtube_cycles_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("youtube_cycle_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    /// Walk forward through up to `max_pages` pages, one cycle each. Stops early when a cycle
    /// aborts or when the last page of results has been processed.
    pub async fn sweep(&self, max_pages: usize) -> Vec<CycleOutcome> {
        let mut outcomes = Vec::with_capacity(max_pages);

        for _ in 0..max_pages {
            let outcome = self.run_cycle().await;
            let keep_going = match &outcome {
                CycleOutcome::Completed(report) => report.next_page_token.is_some(),
                CycleOutcome::Aborted(_) => false,
            };
            outcomes.push(outcome);

            if !keep_going {
                break;
            }
        }

        outcomes
    }

    async fn parse(&self) -> Result<CycleReport, CycleError> {
        let page_token = self.page_token().await;
        let params = self.params.with_page_token(page_token.as_deref());

        self.counters.record_quota(SEARCH_QUOTA_COST);
        let raw = self.loader.search(&params).await?;

        let DecodedPage { page, dropped } = decode_search_response(&raw)?;

        let emails = collect_emails(&page);
        info!(count = emails.len(), ?emails, "found emails");

        let unique_emails = self.seen.filter_unseen(&emails).await?;
        if !unique_emails.is_empty() {
            info!(count = unique_emails.len(), ?unique_emails, "found unique emails");
            self.seen.mark_seen(&unique_emails).await?;
        }

        self.counters.record_page(
            page.items.len() as u64,
            emails.len() as u64,
            unique_emails.len() as u64,
        );

        *self.cursor.lock().await = page.next_page_token.clone();

        let report = CycleReport {
            page_token,
            next_page_token: page.next_page_token,
            items: page.items.len(),
            dropped_items: dropped.len(),
            emails_found: emails.len(),
            unique_emails_found: unique_emails.len(),
        };
        info!(?report, "harvest cycle completed");

        Ok(report)
    }
}

/// Every distinct email mentioned in the page's descriptions.
pub fn collect_emails(page: &SearchPage) -> HashSet<String> {
    page.items
        .iter()
        .flat_map(|item| extract_emails(&item.description))
        .collect()
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use harvest_common::loader::TransportError;
    use harvest_common::params::SearchOptions;
    use harvest_common::redis::{Client, MockRedisClient, RedisError};
    use serde_json::{json, Value};

    use super::*;

    /// Replays canned pages, one per call, and remembers the tokens it was asked for.
    struct ScriptedLoader {
        pages: std::sync::Mutex<Vec<Value>>,
        tokens: std::sync::Mutex<Vec<Option<String>>>,
    }

    impl ScriptedLoader {
        fn new(pages: Vec<Value>) -> Self {
            Self {
                pages: std::sync::Mutex::new(pages),
                tokens: std::sync::Mutex::new(vec![]),
            }
        }

        fn tokens(&self) -> Vec<Option<String>> {
            self.tokens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchLoader for ScriptedLoader {
        async fn search(&self, params: &SearchParameters) -> Result<Value, TransportError> {
            self.tokens
                .lock()
                .unwrap()
                .push(params.page_token().map(str::to_owned));
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                panic!("no more scripted pages");
            }
            Ok(pages.remove(0))
        }
    }

    /// Yields to the runtime after every read, so concurrent cycles interleave between the
    /// lookup and the write.
    struct InterleavingRedis(MockRedisClient);

    #[async_trait]
    impl Client for InterleavingRedis {
        async fn mget(&self, keys: Vec<String>) -> Result<Vec<Option<Vec<u8>>>, RedisError> {
            let values = self.0.mget(keys).await;
            tokio::task::yield_now().await;
            values
        }

        async fn mset(&self, items: Vec<(String, String)>) -> Result<(), RedisError> {
            self.0.mset(items).await
        }
    }

    fn page(next: Option<&str>, descriptions: &[&str]) -> Value {
        let items: Vec<Value> = descriptions
            .iter()
            .enumerate()
            .map(|(i, description)| {
                json!({
                    "kind": "youtube#searchResult",
                    "id": {"kind": "youtube#video", "videoId": format!("video{i}")},
                    "snippet": {
                        "publishedAt": "2024-03-01T12:30:00Z",
                        "channelId": "UCchannel",
                        "title": "title",
                        "description": description,
                        "channelTitle": "channel",
                        "liveBroadcastContent": "none",
                    }
                })
            })
            .collect();

        let mut page = json!({
            "kind": "youtube#searchListResponse",
            "pageInfo": {"totalResults": 100, "resultsPerPage": 50},
            "items": items,
        });
        if let Some(next) = next {
            page["nextPageToken"] = json!(next);
        }
        page
    }

    fn parser(loader: Arc<ScriptedLoader>, redis: MockRedisClient) -> (Parser, Arc<Counters>) {
        let counters = Arc::new(Counters::new());
        let params = SearchParameters::new("key", SearchOptions::default()).unwrap();
        let parser = Parser::new(
            loader,
            SeenEmails::new(Arc::new(redis)),
            counters.clone(),
            params,
        );
        (parser, counters)
    }

    #[tokio::test]
    async fn test_cursor_advances_and_wraps() {
        let loader = Arc::new(ScriptedLoader::new(vec![
            page(Some("P2"), &["a@b.com"]),
            page(Some("P3"), &[]),
            page(None, &["c@d.com"]),
            page(Some("P2"), &[]),
        ]));
        let (parser, _) = parser(loader.clone(), MockRedisClient::new());

        for _ in 0..4 {
            assert!(parser.run_cycle().await.is_completed());
        }

        assert_eq!(
            loader.tokens(),
            vec![None, Some("P2".to_owned()), Some("P3".to_owned()), None]
        );
        assert_eq!(parser.page_token().await, Some("P2".to_owned()));
    }

    #[tokio::test]
    async fn test_aborted_cycle_keeps_cursor() {
        let mut bad_page = page(Some("P3"), &["x@y.com"]);
        bad_page["kind"] = json!("youtube#somethingElse");
        let loader = Arc::new(ScriptedLoader::new(vec![
            page(Some("P2"), &[]),
            bad_page,
            page(Some("P3"), &[]),
        ]));
        let (parser, counters) = parser(loader.clone(), MockRedisClient::new());

        assert!(parser.run_cycle().await.is_completed());
        assert!(matches!(
            parser.run_cycle().await,
            CycleOutcome::Aborted(CycleError::Decode(_))
        ));
        assert!(parser.run_cycle().await.is_completed());

        assert_eq!(
            loader.tokens(),
            vec![None, Some("P2".to_owned()), Some("P2".to_owned())]
        );
        assert_eq!(counters.snapshot().quota_units_spent, 300);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_without_counting() {
        let loader = Arc::new(ScriptedLoader::new(vec![page(None, &["a@b.com"])]));
        let redis = MockRedisClient::new();
        redis.fail_with(Some(harvest_common::redis::RedisError::InvalidConfiguration(
            "down".to_owned(),
        )));
        let (parser, counters) = parser(loader, redis.clone());

        let outcome = parser.run_cycle().await;

        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(CycleError::Store(_))
        ));
        assert_eq!(counters.snapshot().items_processed, 0);
        assert_eq!(counters.snapshot().emails_found, 0);
        assert!(redis.keys().is_empty());
    }

    #[tokio::test]
    async fn test_panics_are_contained() {
        let loader = Arc::new(ScriptedLoader::new(vec![]));
        let (parser, counters) = parser(loader, MockRedisClient::new());

        let outcome = parser.run_cycle().await;

        match outcome {
            CycleOutcome::Aborted(CycleError::Panicked(message)) => {
                assert_eq!(message, "no more scripted pages")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(counters.snapshot().items_processed, 0);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_count_at_least_once() {
        let loader = Arc::new(ScriptedLoader::new(vec![
            page(None, &["a@b.com"]),
            page(None, &["a@b.com"]),
        ]));
        let redis = MockRedisClient::new();
        let counters = Arc::new(Counters::new());
        let parser = Parser::new(
            loader.clone(),
            SeenEmails::new(Arc::new(InterleavingRedis(redis.clone()))),
            counters.clone(),
            SearchParameters::new("key", SearchOptions::default()).unwrap(),
        );

        let (first, second) = tokio::join!(parser.run_cycle(), parser.run_cycle());

        assert!(first.is_completed());
        assert!(second.is_completed());
        // Both cycles looked the email up before either marked it, so both count it.
        assert_eq!(counters.snapshot().unique_emails_found, 2);
        assert_eq!(counters.snapshot().emails_found, 2);
        assert_eq!(redis.keys(), vec!["a@b.com"]);
        assert_eq!(loader.tokens(), vec![None, None]);
    }

    #[tokio::test]
    async fn test_sweep_stops_at_last_page() {
        let loader = Arc::new(ScriptedLoader::new(vec![
            page(Some("P2"), &["a@b.com"]),
            page(None, &["a@b.com", "e@f.com"]),
            page(Some("P2"), &[]),
        ]));
        let (parser, counters) = parser(loader.clone(), MockRedisClient::new());

        let outcomes = parser.sweep(10).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(CycleOutcome::is_completed));
        assert_eq!(counters.snapshot().unique_emails_found, 2);
        assert_eq!(counters.snapshot().emails_found, 3);
        assert_eq!(parser.page_token().await, None);
    }

    #[tokio::test]
    async fn test_sweep_respects_page_limit() {
        let loader = Arc::new(ScriptedLoader::new(vec![
            page(Some("P2"), &[]),
            page(Some("P3"), &[]),
            page(Some("P4"), &[]),
        ]));
        let (parser, _) = parser(loader.clone(), MockRedisClient::new());

        let outcomes = parser.sweep(2).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(parser.page_token().await, Some("P3".to_owned()));
    }
}
