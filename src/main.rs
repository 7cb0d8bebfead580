// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::reading_repository::{ReadingRepository, UnavailableRepository};
use crate::application::reading_service::ReadingService;
use crate::application::sample_source::SampleSource;
use crate::application::sampler::Sampler;
use crate::infrastructure::command_source::CommandSource;
use crate::infrastructure::config::{load_config, StorageSettings};
use crate::infrastructure::sqlite_repository::SqliteRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    battery_health, chart, clear_readings, health_check, latest_reading, list_readings,
    reading_stream, recent_readings, set_interval, statistics, statistics_report, status,
    take_sample,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_config().context("Failed to load configuration")?;

    // Create repository (infrastructure layer)
    let repository = open_repository(&config.storage);

    // Create services (application layer)
    let sources: Vec<Arc<dyn SampleSource>> = config
        .sampler
        .commands
        .iter()
        .map(|command| {
            let source = CommandSource::new(command.as_str()).with_timeout(config.sampler.command_timeout());
            Arc::new(source) as Arc<dyn SampleSource>
        })
        .collect();
    let sampler = Arc::new(Sampler::new(
        sources,
        repository.clone(),
        config.sampler.interval(),
        config.sampler.clear_on_start,
    ));
    let reading_service = ReadingService::new(repository);
    let sampler_handle = sampler.spawn();

    // Create application state
    let state = Arc::new(AppState {
        reading_service,
        sampler,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/readings", get(list_readings).delete(clear_readings))
        .route("/readings/latest", get(latest_reading))
        .route("/readings/recent", get(recent_readings))
        .route("/samples", post(take_sample))
        .route("/statistics", get(statistics))
        .route("/statistics/report", get(statistics_report))
        .route("/battery-health", get(battery_health))
        .route("/chart", get(chart))
        .route("/events", get(reading_stream))
        .route("/status", get(status))
        .route("/sampler/interval", put(set_interval))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting charge-telemetry service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sampler_handle.stop().await;
    Ok(())
}

/// SQLite store, or a non-persistent stand-in when it cannot be opened.
fn open_repository(storage: &StorageSettings) -> Arc<dyn ReadingRepository> {
    let opened = storage
        .database_path()
        .and_then(|path| SqliteRepository::open(path, storage.retention_policy()));

    match opened {
        Ok(repository) => Arc::new(repository),
        Err(e) => {
            tracing::error!("Reading storage unavailable, running without persistence: {:#}", e);
            Arc::new(UnavailableRepository::new(format!("{:#}", e)))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
