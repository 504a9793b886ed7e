//! Health check endpoints

use crate::metrics::GatewayMetrics;
use crate::nats::NatsBroker;
use crate::shard::ShardFleet;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub server_index: u32,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub server_index: u32,
    pub server_count: u32,
    pub shard_count: Option<u32>,
    pub shards_local: usize,
    pub shards_open: usize,
    pub shards_running: usize,
    pub events_received: u64,
    pub events_forwarded: u64,
    pub forward_failures: u64,
    pub broker_connected: bool,
    pub broker_messages_published: Option<u64>,
    pub broker_publish_failures: Option<u64>,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<ShardFleet>,
    pub broker: Option<Arc<NatsBroker>>,
    pub metrics: Arc<GatewayMetrics>,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        server_index: state.fleet.config().server_index,
    })
}

/// Readiness endpoint - returns 200 if at least one shard is open
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shard_state = state.fleet.state();
    let config = state.fleet.config();
    let broker = state.broker.as_ref();
    let broker_connected = broker.map_or(true, |b| b.is_connected());

    let is_ready = shard_state.is_ready() && broker_connected;

    let response = ReadyResponse {
        ready: is_ready,
        server_index: config.server_index,
        server_count: config.server_count,
        shard_count: state.fleet.shard_count(),
        shards_local: shard_state.shard_count(),
        shards_open: shard_state.open_shards(),
        shards_running: shard_state.running_shards(),
        events_received: shard_state.total_events_received(),
        events_forwarded: shard_state.total_events_forwarded(),
        forward_failures: shard_state.total_forward_failures(),
        broker_connected,
        broker_messages_published: broker.map(|b| b.messages_published()),
        broker_publish_failures: broker.map(|b| b.publish_failures()),
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shard_state = state.fleet.state();
    state
        .metrics
        .set_shards_open(shard_state.server_index(), shard_state.open_shards());

    if let Some(ref broker) = state.broker {
        state.metrics.set_broker_connected(broker.is_connected());
    }

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
