// GA Realtime Exporter - HTTP exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP endpoints serving the gauge registry.
//!
//! Handlers only read the registry; they never wait on the poller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ga_realtime::{GaugeRegistry, PollerStats};
use serde::Serialize;
use tracing::error;

/// Application state shared across handlers.
pub struct AppState {
    registry: Arc<GaugeRegistry>,
    stats: PollerStats,
    interval: Duration,
    metric_count: usize,
    start_time: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<GaugeRegistry>,
        stats: PollerStats,
        interval: Duration,
        metric_count: usize,
    ) -> Self {
        Self {
            registry,
            stats,
            interval,
            metric_count,
            start_time: Instant::now(),
        }
    }
}

/// Build the exporter router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Root handler - landing page linking to the metrics.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<html>
<head><title>Google Analytics Exporter</title></head>
<body>
<h1>Google Analytics Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready once the first polling cycle has been launched.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.stats.cycles() > 0 {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Starting")
    }
}

/// Status information response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    version: String,
    uptime_secs: u64,
    interval_secs: u64,
    metrics: usize,
    gauges: usize,
    cycles: u64,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        interval_secs: state.interval.as_secs(),
        metrics: state.metric_count,
        gauges: state.registry.len(),
        cycles: state.stats.cycles(),
    })
}
