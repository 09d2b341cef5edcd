//! metricloom -- event-to-metric aggregation pipeline.
//!
//! This crate ingests typed domain events, canonicalizes them into
//! deterministic metric identities, aggregates them over tumbling
//! hourly/daily windows, flags statistically anomalous windows, and ships
//! summarized results to a downstream metrics store.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod detect;
pub mod emit;
pub mod event;
pub mod metric;
pub mod pipeline;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::api::state::AppState;
use crate::config::Config;
use crate::emit::{HttpSink, LogSink, Sink};
use crate::pipeline::{Pipeline, SystemClock};

/// Start the metricloom daemon: pipeline tasks plus the API server.
/// Blocks until ctrl-c, then drains the pipeline before returning.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Storage
    tracing::info!(db_path = %config.db_path, "Initializing database");
    let pool = storage::open_pool(&config.db_path)?;

    // 2. Sink adapter
    let sink: Arc<dyn Sink> = match &config.sink.endpoint {
        Some(endpoint) => {
            tracing::info!(%endpoint, "Using HTTP sink");
            Arc::new(HttpSink::new(endpoint))
        }
        None => {
            tracing::warn!("No sink endpoint configured, emitting to log");
            Arc::new(LogSink)
        }
    };

    // 3. Pipeline (ingest worker, seal scheduler, emit worker)
    let bind = config.bind.clone();
    let pipeline = Arc::new(Pipeline::new(
        config,
        sink,
        Arc::new(SystemClock),
        pool.clone(),
    ));
    pipeline.start()?;

    // 4. API server
    let addr: std::net::SocketAddr = bind.parse()?;
    let app = api::router(AppState {
        pipeline: Arc::clone(&pipeline),
        pool,
    });

    tracing::info!(%addr, "metricloom listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
