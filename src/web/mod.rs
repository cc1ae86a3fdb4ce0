//! HTTP metrics endpoint.
//!
//! Serves a single `GET /metrics` path in the Prometheus text exposition
//! format. Content is regenerated from the registry on every request.

pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use router::{create_app, METRICS_PATH};

use crate::error::{ExporterError, Result};
use prometheus::Registry;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

/// Start the metrics server and run it until `shutdown` resolves.
pub async fn start_metrics_server<F>(config: WebConfig, registry: Registry, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ExporterError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    info!("Server started on port {}", config.port);
    info!("Metrics endpoint: http://{}{}", addr, METRICS_PATH);

    serve(listener, registry, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve<F>(listener: TcpListener, registry: Registry, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, create_app(registry))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ExporterError::web_server_error(format!("Server error: {}", e)))?;

    info!("Metrics server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
