use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use harvest_common::loader::{YoutubeLoader, SEARCH_QUOTA_COST};
use harvest_common::metrics::Counters;
use harvest_common::redis::{Client, RedisClient};
use harvest_common::seen::SeenEmails;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ConfigError;
use crate::parser::{CycleOutcome, Parser};

/// Everything a running harvester shares: the parser with its cursor, the counters, and the
/// search client, which is closed once by `stop`.
pub struct AppContext {
    pub parser: Arc<Parser>,
    pub counters: Arc<Counters>,
    loader: Arc<YoutubeLoader>,
    cycle_interval: Duration,
    max_concurrent_cycles: usize,
    tracker: TaskTracker,
}

impl AppContext {
    /// Connect to redis and build the search client described by `config`.
    pub async fn new(config: &Config) -> Result<Self> {
        config.validate().wrap_err("invalid configuration")?;

        let redis = RedisClient::new(&config.redis_url, config.redis_timeout_ms.0)
            .await
            .wrap_err("failed to connect to redis")?;

        let loader = YoutubeLoader::new(
            config.youtube.search_url.clone(),
            config.youtube.request_timeout.0,
            config.youtube.connect_timeout.0,
        )
        .wrap_err("failed to build search http client")?;

        Self::build(config, loader, Arc::new(redis)).wrap_err("invalid configuration")
    }

    /// Assemble a context from an already built loader and seen emails store.
    pub fn build(
        config: &Config,
        loader: YoutubeLoader,
        redis: Arc<dyn Client + Send + Sync>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let params = config.search_parameters()?;

        let daily_estimate = config.daily_quota_estimate(SEARCH_QUOTA_COST);
        if daily_estimate > config.daily_quota_units {
            warn!(
                daily_estimate,
                daily_quota_units = config.daily_quota_units,
                cycle_interval_secs = config.cycle_interval_secs,
                "schedule will spend more quota than the daily budget allows"
            );
        }

        let loader = Arc::new(loader);
        let counters = Arc::new(Counters::new());
        let parser = Parser::new(
            loader.clone(),
            SeenEmails::new(redis),
            counters.clone(),
            params,
        );

        Ok(Self {
            parser: Arc::new(parser),
            counters,
            loader,
            cycle_interval: config.cycle_interval(),
            max_concurrent_cycles: config.max_concurrent_cycles.max(1),
            tracker: TaskTracker::new(),
        })
    }

    /// Run a single cycle now, outside of the schedule.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.parser.run_cycle().await
    }

    /// Start a cycle every interval until `shutdown` is cancelled. The first cycle starts
    /// immediately. A tick is skipped when `max_concurrent_cycles` cycles are still running.
    pub async fn run_schedule(&self, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_cycles));
        let mut interval = tokio::time::interval(self.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            cycle_interval_secs = self.cycle_interval.as_secs(),
            max_concurrent_cycles = self.max_concurrent_cycles,
            "starting harvest schedule"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                warn!(
                    max_concurrent_cycles = self.max_concurrent_cycles,
                    "previous harvest cycles still running, skipping this one"
                );
                metrics::counter!("youtube_cycles_skipped_total").increment(1);
                continue;
            };

            let parser = self.parser.clone();
            self.tracker.spawn(async move {
                parser.run_cycle().await;
                drop(permit);
            });
        }

        info!("harvest schedule stopped");
    }

    /// Wait for in flight cycles to finish, then close the search client.
    pub async fn stop(self) {
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "waiting for harvest cycles to finish");
        self.tracker.wait().await;

        drop(self.parser);
        match Arc::try_unwrap(self.loader) {
            Ok(loader) => loader.close(),
            Err(_) => warn!("search client still in use at shutdown, dropping it"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use envconfig::Envconfig;
    use harvest_common::redis::MockRedisClient;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn config(server: &MockServer, extra: &[(&str, &str)]) -> Config {
        let mut env: HashMap<String, String> = HashMap::from([
            ("YOUTUBE_API_KEY".to_owned(), "key".to_owned()),
            ("YOUTUBE_SEARCH_URL".to_owned(), server.url("/youtube/v3/search")),
        ]);
        env.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Config::init_from_hashmap(&env).unwrap()
    }

    fn context(config: &Config, redis: MockRedisClient) -> AppContext {
        let loader = YoutubeLoader::new(
            config.youtube.search_url.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap();
        AppContext::build(config, loader, Arc::new(redis)).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_runs_until_cancelled() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET).path("/youtube/v3/search");
                then.status(200).json_body(json!({
                    "kind": "youtube#searchListResponse",
                    "pageInfo": {"totalResults": 0, "resultsPerPage": 50},
                    "items": [],
                }));
            })
            .await;

        let config = config(&server, &[("CYCLE_INTERVAL_SECS", "3600")]);
        let context = context(&config, MockRedisClient::new());
        let shutdown = CancellationToken::new();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        context.run_schedule(shutdown).await;
        let counters = context.counters.clone();
        context.stop().await;

        // Only the immediate first tick fires within the hour long interval.
        search.assert_hits_async(1).await;
        assert_eq!(counters.snapshot().quota_units_spent, SEARCH_QUOTA_COST);
    }

    #[tokio::test]
    async fn test_run_cycle_aborts_on_http_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/youtube/v3/search");
                then.status(403).body("quotaExceeded");
            })
            .await;

        let config = config(&server, &[]);
        let context = context(&config, MockRedisClient::new());

        let outcome = context.run_cycle().await;

        assert!(!outcome.is_completed());
        assert_eq!(context.counters.snapshot().items_processed, 0);
        context.stop().await;
    }

    #[test]
    fn test_build_rejects_invalid_search() {
        let server = MockServer::start();
        let config = config(&server, &[("SEARCH_MAX_RESULTS", "51")]);
        let loader = YoutubeLoader::new(
            config.youtube.search_url.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap();

        let result = AppContext::build(&config, loader, Arc::new(MockRedisClient::new()));

        assert!(matches!(result, Err(ConfigError::InvalidParameter(_))));
    }

    #[test]
    fn test_build_rejects_zero_cycle_interval() {
        let server = MockServer::start();
        let config = config(&server, &[("CYCLE_INTERVAL_SECS", "0")]);
        let loader = YoutubeLoader::new(
            config.youtube.search_url.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap();

        let result = AppContext::build(&config, loader, Arc::new(MockRedisClient::new()));

        assert!(matches!(result, Err(ConfigError::ZeroCycleInterval)));
    }
}
