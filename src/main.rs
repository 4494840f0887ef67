//! DDoS live feed service
//!
//! Loads configuration, wires source → normalizer → scorer → store and
//! broadcaster, and serves the live stream over HTTP.

use std::sync::Arc;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use ddos_live_feed::api::{self, ApiState};
use ddos_live_feed::core::{
    build_source, build_store, Broadcaster, LogisticScorer, Normalizer, Pipeline, PipelineStats,
    ReputationLookup, Scorer, SourceStatus, Store,
};

/// Seconds in-flight requests get once the server is told to stop
const SHUTDOWN_GRACE_SECS: u64 = 5;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting DDoS live feed...");

    let config = ddos_live_feed::config::load_config().context("Failed to load configuration")?;

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    let source_status = SourceStatus::new();
    let source = build_source(&config, source_status.clone()).context("Failed to create event source")?;
    let reputation = ReputationLookup::from_config(&config.reputation)
        .context("Failed to create reputation client")?;
    let normalizer = Normalizer::from_config(&config.pipeline, Arc::new(reputation));
    let store: Arc<dyn Store> = Arc::from(build_store(&config.store).context("Failed to create store")?);
    let scorer: Arc<dyn Scorer> = Arc::new(LogisticScorer::default());
    let broadcaster = Arc::new(Broadcaster::new(config.pipeline.subscriber_buffer));
    let stats = Arc::new(PipelineStats::new());

    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        source,
        normalizer,
        scorer,
        store.clone(),
        broadcaster.clone(),
        stats.clone(),
    );
    let running = pipeline.start().await.context("Failed to start pipeline")?;

    let state = web::Data::new(ApiState {
        stats,
        broadcaster: broadcaster.clone(),
        store,
        source: source_status,
        pipeline: running.state(),
        prometheus,
    });

    // Start HTTP server; shutdown is driven from ctrl-c below
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::config)
    })
    .disable_signals()
    .shutdown_timeout(SHUTDOWN_GRACE_SECS)
    .bind((config.server.host.as_str(), config.server.port))
    .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?
    .run();
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);
    info!("Listening on {}:{}", config.server.host, config.server.port);

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("Shutdown requested");

    running.shutdown().await;
    // ends open event streams so graceful stop does not wait on them
    let closed = broadcaster.clear();
    info!("Closed {} live streams", closed);
    server_handle.stop(true).await;
    match server_task.await {
        Ok(result) => result.context("HTTP server failed")?,
        Err(e) => warn!("HTTP server task ended abnormally: {}", e),
    }

    info!("DDoS live feed stopped");
    Ok(())
}
