//! # Jetson Exporter - Board Telemetry for Prometheus
//!
//! A small daemon crate that keeps a session open with the board's hardware
//! monitoring backend and exposes its readings as Prometheus metrics.
//!
//! ## Features
//!
//! - **Telemetry session**: background reader with atomic snapshot publishing
//!   and automatic reconnects
//! - **Stable metric schema**: board identity, CPU, GPU, memory, disk,
//!   uptime, temperatures, fans and power rails
//! - **Consistent scrapes**: every record of a scrape comes from one snapshot
//! - **Library + Binary**: embed the collector or run the standalone exporter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jetson_exporter::{build_registry, start_metrics_server, SessionConfig, TelemetrySession, WebConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Arc::new(TelemetrySession::start(SessionConfig::default()).await?);
//!     let _stop = session.stop_guard();
//!
//!     let registry = build_registry(Arc::clone(&session))?;
//!     start_metrics_server(WebConfig::default(), registry, jetson_exporter::web::shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod web;

// Re-export public API
pub use error::{ExporterError, Result};
pub use metrics::{build_registry, encode_text, MetricRecord, TelemetryCollector};
pub use telemetry::{
    SessionConfig, StopGuard, TelemetrySession, TelemetrySnapshot, TelemetrySource,
};
pub use web::{start_metrics_server, WebConfig};

/// The default metrics port
pub const DEFAULT_PORT: u16 = 9401;

/// The default backend socket
pub const DEFAULT_SOCKET_PATH: &str = "/run/jtop.sock";

/// The default refresh interval requested from the backend, in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// The default connect and handshake timeout, in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
