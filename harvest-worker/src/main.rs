//! Harvest emails from YouTube search results on a schedule.
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use harvest_common::metrics::{self, setup_metrics_recorder};
use harvest_worker::app_context::AppContext;
use harvest_worker::config::Config;
use harvest_worker::handlers;

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let context = AppContext::new(&config).await?;

    let shutdown = CancellationToken::new();

    let recorder_handle = setup_metrics_recorder()?;
    let app = handlers::app(context.counters.clone(), Some(recorder_handle));
    let bind = config.bind();
    let listener = metrics::bind(&bind)
        .await
        .wrap_err_with(|| format!("failed to bind metrics server on {bind}"))?;
    info!(%bind, "serving metrics");

    let server_shutdown = shutdown.clone();
    let http_server = tokio::spawn(async move {
        let graceful = server_shutdown.clone();
        let result =
            metrics::serve(app, listener, async move { graceful.cancelled().await }).await;
        if let Err(e) = &result {
            error!("http server failed: {}", e);
            server_shutdown.cancel();
        }
        result
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    context.run_schedule(shutdown.clone()).await;
    context.stop().await;

    // The schedule only returns once shutdown is cancelled, which also stops the server.
    http_server
        .await
        .wrap_err("http server task failed")?
        .wrap_err("http server failed")?;

    info!("exiting");
    Ok(())
}
