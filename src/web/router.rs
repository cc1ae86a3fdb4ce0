//! Web application router and middleware setup.

use crate::web::handlers::{self, AppState};
use axum::{routing::get, Router};
use prometheus::Registry;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Path the metrics are served on.
pub const METRICS_PATH: &str = "/metrics";

/// Create the axum application serving `registry`.
pub fn create_app(registry: Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(handlers::metrics))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(AppState { registry })
}
