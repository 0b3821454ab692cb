//! PhotoFlow API: the ingest node.
//!
//! Hosts the upload pipeline, photo and event queries, the polling endpoint,
//! and the realtime subscription endpoint. Jobs are handed to the worker role
//! through the durable stream queue.

mod config;
mod ingest;
mod realtime;
mod routes;

use anyhow::{Context, Result};
use config::Config;
use ingest::IngestPipeline;
use photoflow_core::{
    BlobStore, EventLogService, LifecycleCoordinator, PhotoStore, StatusBroker, StreamQueue,
};
use routes::AppState;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting PhotoFlow API");

    init_metrics(config.service.metrics_port)?;

    let store = PhotoStore::connect(&config.database)
        .await
        .context("Failed to connect to metadata store")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let blob_store = Arc::new(
        BlobStore::new(&config.object_store)
            .await
            .context("Failed to initialize blob store")?,
    );
    blob_store
        .ensure_buckets()
        .await
        .context("Failed to prepare storage buckets")?;

    let queue = Arc::new(StreamQueue::new(store.pool().clone()));
    let broker = Arc::new(StatusBroker::new(config.notify.topic_buffer));
    let lifecycle = Arc::new(LifecycleCoordinator::new(store.pool().clone(), broker.clone()));
    let events = EventLogService::new(store.pool().clone());

    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        blob_store.clone(),
        queue,
        lifecycle.clone(),
        broker.clone(),
        config.queue.clone(),
        config.ingest.clone(),
    ));

    let state = AppState {
        store,
        events,
        blob_store,
        broker,
        lifecycle,
        ingest: pipeline,
    };

    let router = routes::create_router(state, &config.http, config.ingest.max_body_bytes);
    let addr = format!("{}:{}", config.http.host, config.http.port);

    info!(address = %addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind listen address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("API server stopped");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port, "Prometheus metrics exporter started");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
