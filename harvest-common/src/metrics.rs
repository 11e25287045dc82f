use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

pub const VIDEOS_PROCESSED: &str = "youtube_video_processed_total";
pub const EMAILS_FOUND: &str = "youtube_emails_found_total";
pub const UNIQUE_EMAILS_FOUND: &str = "youtube_unique_emails_found_total";
pub const QUOTA_UNITS_SPENT: &str = "youtube_quota_units_spent_total";

/// Process-wide harvest counters.
///
/// Create one at startup and hand clones of its `Arc` to whoever records or reads. Values only
/// ever grow and are mirrored to the `metrics` recorder, if one is installed, for the
/// `/metrics` endpoint.
#[derive(Debug, Default)]
pub struct Counters {
    items_processed: AtomicU64,
    emails_found: AtomicU64,
    unique_emails_found: AtomicU64,
    quota_units_spent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub items_processed: u64,
    pub emails_found: u64,
    pub unique_emails_found: u64,
    pub quota_units_spent: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one successfully processed page.
    pub fn record_page(&self, items: u64, emails: u64, unique_emails: u64) {
        self.items_processed.fetch_add(items, Ordering::Relaxed);
        self.emails_found.fetch_add(emails, Ordering::Relaxed);
        self.unique_emails_found
            .fetch_add(unique_emails, Ordering::Relaxed);

        metrics::counter!(VIDEOS_PROCESSED).increment(items);
        metrics::counter!(EMAILS_FOUND).increment(emails);
        metrics::counter!(UNIQUE_EMAILS_FOUND).increment(unique_emails);
    }

    /// Account for quota spent on a request, which the API charges even when the request fails.
    pub fn record_quota(&self, units: u64) {
        self.quota_units_spent.fetch_add(units, Ordering::Relaxed);
        metrics::counter!(QUOTA_UNITS_SPENT).increment(units);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            items_processed: self.items_processed.load(Ordering::Relaxed),
            emails_found: self.emails_found.load(Ordering::Relaxed),
            unique_emails_found: self.unique_emails_found.load(Ordering::Relaxed),
            quota_units_spent: self.quota_units_spent.load(Ordering::Relaxed),
        }
    }
}

/// Bind a `TcpListener` on the provided bind address. Done up front so a taken port fails
/// startup before any work is scheduled.
pub async fn bind(addr: &str) -> Result<TcpListener, std::io::Error> {
    TcpListener::bind(addr).await
}

/// Serve a `Router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    router: Router,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router, recorder_handle: PrometheusHandle) -> Router {
    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics
/// Someday tower-http might provide a metrics middleware: https://github.com/tower-rs/tower-http/issues/57
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
