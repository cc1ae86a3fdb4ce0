//! HTTP handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

/// Shared state of the metrics endpoint.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
}

/// Render every registered collector in the Prometheus text format.
///
/// Collection never fails on backend trouble; a degraded session simply
/// contributes no samples.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}
