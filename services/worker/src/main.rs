//! PhotoFlow worker: consumes photo jobs from the stream queue and drives
//! each photo through the processing lifecycle.

mod config;
mod processor;
mod stream_consumer;

use anyhow::{Context, Result};
use config::Config;
use photoflow_core::{
    EventLogService, LifecycleCoordinator, PhotoStore, StatusBroker, StreamQueue,
};
use processor::PhotoProcessor;
use std::sync::Arc;
use stream_consumer::StreamConsumer;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        consumer = %config.queue.consumer_name,
        "Starting PhotoFlow worker"
    );

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

    let queue = Arc::new(StreamQueue::new(store.pool().clone()));

    // Create the consumer group up front so the first live-loop tick can
    // read instead of skipping on a missing group.
    queue
        .create_group(&config.queue.stream_name, &config.queue.group_name)
        .await
        .context("Failed to create consumer group")?;

    let broker = Arc::new(StatusBroker::new(config.notify.topic_buffer));
    let lifecycle = Arc::new(LifecycleCoordinator::new(store.pool().clone(), broker));
    let events = EventLogService::new(store.pool().clone());

    let processor = Arc::new(PhotoProcessor::new(store, events, lifecycle));
    let consumer = Arc::new(StreamConsumer::new(
        queue,
        processor,
        config.queue.clone(),
        config.processing.pool_size,
    ));

    let consumer_handle = tokio::spawn({
        let consumer = consumer.clone();
        async move {
            consumer.run().await;
        }
    });

    info!(
        stream = %config.queue.stream_name,
        group = %config.queue.group_name,
        pool_size = config.processing.pool_size,
        "Worker started"
    );

    shutdown_signal().await;

    info!("Shutting down worker; in-flight messages stay pending for reclaim");
    consumer.shutdown();
    let _ = consumer_handle.await;

    info!("Worker stopped");
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
