//! narrative-pipeline server entry point.
//!
//! Starts the Axum HTTP server and the queue consumer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use narrative_pipeline::api;
use narrative_pipeline::app_state::{Backends, Pipeline};
use narrative_pipeline::config::PipelineConfig;
use narrative_pipeline::domain::{Clock, SystemClock};
use narrative_pipeline::enrichment::LunarCrushClient;
use narrative_pipeline::queue::{InMemoryJobQueue, JobQueue, PostgresJobQueue};
use narrative_pipeline::store::{InMemoryNarrativeStore, NarrativeStore, PostgresNarrativeStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config =
        PipelineConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting narrative-pipeline");

    if config.api_bearer_token.is_none() {
        tracing::warn!("API_BEARER_TOKEN not set; every /api/v1 request will be rejected");
    }
    if config.enrichment.api_key.is_empty() {
        tracing::warn!("LUNARCRUSH_API_KEY not set; enrichment requests will fail");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = Arc::new(
        LunarCrushClient::new(&config.enrichment).context("building enrichment client")?,
    );

    // Build storage and broker
    let (store, queue): (Arc<dyn NarrativeStore>, Arc<dyn JobQueue>) =
        if config.persistence_enabled {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .min_connections(config.database_min_connections)
                .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
                .connect(&config.database_url)
                .await
                .context("connecting to PostgreSQL")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("running migrations")?;
            tracing::info!("database migrations applied");

            let queue = PostgresJobQueue::new(pool.clone(), Arc::clone(&clock), &config.queue);
            let recovered = queue.recover_unacked().await?;
            if recovered > 0 {
                tracing::info!(recovered, "unacknowledged jobs returned to the queue");
            }
            let store: Arc<dyn NarrativeStore> = Arc::new(PostgresNarrativeStore::new(pool));
            let queue: Arc<dyn JobQueue> = Arc::new(queue);
            (store, queue)
        } else {
            tracing::warn!("persistence disabled; narratives and jobs live in memory");
            let store: Arc<dyn NarrativeStore> = Arc::new(InMemoryNarrativeStore::new());
            let queue: Arc<dyn JobQueue> =
                Arc::new(InMemoryJobQueue::new(Arc::clone(&clock), &config.queue));
            (store, queue)
        };

    // Build service layer
    let pipeline = Pipeline::assemble(
        Backends {
            store,
            queue,
            client,
            clock,
        },
        &config.queue,
        config.enrichment.job_interval(),
        config.api_bearer_token.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = tokio::spawn(Arc::clone(&pipeline.consumer).run(shutdown_rx));

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pipeline.state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining consumer");
    let _ = shutdown_tx.send(true);
    if let Err(err) = consumer.await {
        tracing::error!(error = %err, "consumer task failed");
    }
    pipeline.direct.wait_idle().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
