//! Order Stats API + queue consumer.
//!
//! One process runs both halves of the system: the background consumer that
//! drains the order queue into the aggregate store, and the HTTP read API
//! over that store. They share nothing in memory beyond the store handle;
//! all coordination happens through its atomic operations.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orderstats_backend::{
    api::create_router, models::Config, queue::OrderQueue, storage::StatsStore, worker::Worker,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!("🚀 Order stats backend starting");

    let store = Arc::new(StatsStore::new(&config.database_path)?);
    let queue = Arc::new(OrderQueue::new(
        &config.queue_path,
        std::time::Duration::from_secs(config.visibility_timeout_secs),
    )?);

    // Consumer loop with a clean-shutdown signal: the flag flips on ctrl-c,
    // an in-flight batch finishes, then the task exits.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Worker::new(queue.clone(), store.clone(), &config);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let app = create_router(store)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down, waiting for in-flight batch...");
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderstats_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
