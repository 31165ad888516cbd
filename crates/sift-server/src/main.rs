use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sift_client::{ReqwestFetcher, SelectorConfig, SelectorExtractor};
use sift_core::{Aggregator, AggregatorConfig, Scheduler};
use sift_server::routes;
use sift_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sift=info".parse()?))
        .with_target(false)
        .init();

    let selectors_path =
        std::env::var("SIFT_SELECTORS").context("SIFT_SELECTORS must point to a selector file")?;
    let port = std::env::var("SIFT_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let allow_private = std::env::var("SIFT_ALLOW_PRIVATE_URLS")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let addr = format!("0.0.0.0:{port}");

    let config = AggregatorConfig::from_env()?;
    let extractor = SelectorExtractor::new(&SelectorConfig::from_file(&selectors_path)?)?;
    let mut fetcher = ReqwestFetcher::with_timeout(config.retry.attempt_timeout)?;
    if allow_private {
        tracing::warn!("SSRF protection disabled");
        fetcher = fetcher.allow_private_urls();
    }

    tracing::info!(
        concurrency = config.concurrency,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        item_timeout_ms = config.item_timeout.as_millis() as u64,
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        "Aggregator configured"
    );

    let state = Arc::new(AppState {
        aggregator: Aggregator::new(fetcher, extractor, config),
    });
    let scheduler = state.aggregator.scheduler().clone();

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

/// Resolves on CTRL+C. Closing the scheduler makes queued detail fetches
/// degrade to partial so in-flight requests drain quickly.
async fn shutdown_signal(scheduler: Scheduler) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C handler: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!(waiting = scheduler.waiting(), "Shutdown signal received");
    scheduler.close();
}
