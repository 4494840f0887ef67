//! HTTP endpoints for the live feed.
//!
//! Health, source mode and store statistics are plain JSON; `/api/events`
//! streams broadcast payloads as Server-Sent Events, one subscriber per
//! connection.

use std::convert::Infallible;
use std::sync::Arc;
use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{web, HttpResponse, Responder};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::watch;

use crate::core::pipeline::PipelineState;
use crate::core::source::SourceStatus;
use crate::core::{Broadcaster, PipelineStats, Store};

pub struct ApiState {
    pub stats: Arc<PipelineStats>,
    pub broadcaster: Arc<Broadcaster>,
    pub store: Arc<dyn Store>,
    pub source: SourceStatus,
    pub pipeline: watch::Receiver<PipelineState>,
    /// Present when a Prometheus recorder is installed
    pub prometheus: Option<PrometheusHandle>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/source").route(web::get().to(source_mode)))
            .service(web::resource("/db/stats").route(web::get().to(db_stats)))
            .service(web::resource("/events").route(web::get().to(event_stream))),
    )
    .service(web::resource("/metrics").route(web::get().to(render_metrics)));
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    events: u64,
    bytes: f64,
    uptime_sec: u64,
    clients: usize,
    state: PipelineState,
}

#[derive(Serialize)]
struct SourceResponse {
    mode: &'static str,
}

#[derive(Serialize)]
struct DbStatsResponse {
    backend: &'static str,
    rows: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn health_check(state: web::Data<ApiState>) -> impl Responder {
    let pipeline = *state.pipeline.borrow();
    HttpResponse::Ok().json(HealthResponse {
        status: if pipeline == PipelineState::Running { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        events: state.stats.events(),
        bytes: state.stats.bytes(),
        uptime_sec: state.stats.uptime_secs(),
        clients: state.broadcaster.subscriber_count(),
        state: pipeline,
    })
}

async fn source_mode(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(SourceResponse {
        mode: state.source.get().as_str(),
    })
}

async fn db_stats(state: web::Data<ApiState>) -> impl Responder {
    match state.store.row_count().await {
        Ok(rows) => HttpResponse::Ok().json(DbStatsResponse {
            backend: state.store.backend_type(),
            rows,
        }),
        Err(e) => {
            log::warn!("Row count failed: {}", e);
            HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: e.to_string(),
            })
        }
    }
}

/// Live event stream. The subscriber goes away with the connection: once
/// the response stream is dropped the next fan-out fails and evicts it.
async fn event_stream(state: web::Data<ApiState>) -> HttpResponse {
    let (id, rx) = state.broadcaster.subscribe();
    log::debug!("Subscriber {} connected", id);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        let frame = Bytes::from(format!("data: {}\n\n", message));
        Some((Ok::<_, Infallible>(frame), rx))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.prometheus {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
