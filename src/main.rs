mod app_state;
mod config;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{orchestrator::Orchestrator, sacs::SacsScraper};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        max_concurrent = config.max_concurrent_scrapes,
        max_queue = config.max_queue_size,
        hard_timeout_ms = config.hard_timeout_ms,
        cache_ttl_ms = config.cache_ttl_ms,
        "Initializing sacs-verify server"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "verification_jobs_total",
        "Total verification jobs admitted"
    );
    metrics::describe_counter!(
        "verification_jobs_completed",
        "Total verification jobs that produced an authoritative result"
    );
    metrics::describe_counter!(
        "verification_jobs_failed",
        "Total verification jobs that failed scraping"
    );
    metrics::describe_counter!(
        "verification_jobs_timed_out",
        "Total verification jobs cancelled at the hard deadline"
    );
    metrics::describe_counter!(
        "verification_jobs_rejected",
        "Total verification requests rejected by admission control"
    );
    metrics::describe_counter!(
        "verification_cache_hits",
        "Total verification requests served from the result cache"
    );
    metrics::describe_gauge!(
        "verification_queue_depth",
        "Current number of jobs waiting for a scrape slot"
    );
    metrics::describe_histogram!(
        "verification_processing_seconds",
        "Time to run one supervised registry scrape"
    );

    // Initialize the registry scraper capability
    let scraper = Arc::new(SacsScraper::new(
        &config.sacs_base_url,
        config.chrome_executable.clone(),
    ));

    // Create the orchestrator and shared application state
    let orchestrator = Orchestrator::new(scraper, &config);
    let state = AppState::new(orchestrator);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/verify", post(routes::verify::submit_verification))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024)); // 64 KB limit

    tracing::info!("Starting sacs-verify on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
