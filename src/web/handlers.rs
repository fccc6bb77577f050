//! HTTP request handlers.

use super::AppState;
use crate::collector::{Collector, ExporterMetrics};
use crate::probe::{check_iperf3_exists, normalize_probe_request, RequestError, SCRAPE_TIMEOUT_HEADER};
use crate::validation::BITRATE_GRAMMAR;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::HashMap;
use std::time::Instant;
use tokio::runtime::Handle;

const INDEX_TEMPLATE: &str = include_str!("templates/index.html");

fn render_metrics(families: &[MetricFamily]) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(families, &mut buffer) {
        Ok(()) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], buffer).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Answer a failed probe request with `status`, counting it as an exporter error.
fn reject(metrics: &ExporterMetrics, status: StatusCode, message: String) -> Response {
    metrics.errors.inc();
    (status, message).into_response()
}

/// Run one iperf3 probe and render its metrics.
pub async fn handle_probe(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let hint = headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

    let config = match normalize_probe_request(&params, hint.as_deref(), &state.config.timeout_policy()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid probe request: {}", e);
            let status = match e {
                RequestError::Invalid(_) => StatusCode::BAD_REQUEST,
                RequestError::TimeoutHint(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return reject(&state.metrics, status, e.to_string());
        }
    };

    let start = Instant::now();
    let collector = match Collector::new(
        config,
        state.runner.clone(),
        Handle::current(),
        state.metrics.clone(),
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to create collector: {}", e);
            return reject(&state.metrics, StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    // Collection blocks on the probe, keep it off the async workers.
    let gathered = tokio::task::spawn_blocking(move || {
        let registry = Registry::new();
        registry.register(Box::new(collector))?;
        Ok::<_, prometheus::Error>(registry.gather())
    })
    .await;

    let response = match gathered {
        Ok(Ok(families)) => render_metrics(&families),
        Ok(Err(e)) => {
            tracing::error!("Failed to register collector: {}", e);
            reject(&state.metrics, StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!("Probe task failed: {}", e);
            reject(&state.metrics, StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    };

    state.metrics.duration.observe(start.elapsed().as_secs_f64());
    response
}

// ============================================================================
// Exporter metrics
// ============================================================================

pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    render_metrics(&state.registry.gather())
}

// ============================================================================
// Pages
// ============================================================================

pub async fn handle_index(State(state): State<AppState>) -> impl IntoResponse {
    let page = INDEX_TEMPLATE
        .replace("{{version}}", env!("CARGO_PKG_VERSION"))
        .replace("{{metrics_path}}", &state.config.metrics_path)
        .replace("{{probe_path}}", &state.config.probe_path)
        .replace("{{bitrate_grammar}}", BITRATE_GRAMMAR)
        .replace("{{listen_address}}", &state.config.listen_address.to_string());

    Html(page)
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    match check_iperf3_exists(&state.config.iperf3_path) {
        Ok(_) => (StatusCode::OK, "OK\n"),
        Err(e) => {
            tracing::error!("iperf3 command not found: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "iperf3 command not found\n")
        }
    }
}

pub async fn handle_ready() -> impl IntoResponse {
    (StatusCode::OK, "Ready\n")
}
