use std::sync::Arc;

use axum::{extract::State, routing, Router};
use harvest_common::metrics::{self, Counters};
use metrics_exporter_prometheus::PrometheusHandle;

pub fn app(counters: Arc<Counters>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(|| async { "ok" }))
        .with_state(counters);

    match metrics {
        Some(recorder_handle) => metrics::setup_metrics_routes(router, recorder_handle),
        None => router
            .route(
                "/metrics",
                routing::get(|| async { "no metrics recorder installed" }),
            )
            .layer(axum::middleware::from_fn(metrics::track_metrics)),
    }
}

pub async fn index(State(counters): State<Arc<Counters>>) -> String {
    let snapshot = counters.snapshot();

    format!(
        "youtube email harvester: {} videos processed, {} emails found, {} unique emails found, {} quota units spent",
        snapshot.items_processed,
        snapshot.emails_found,
        snapshot.unique_emails_found,
        snapshot.quota_units_spent,
    )
}
