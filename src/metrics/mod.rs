//! Metric shaping and the registry served to scrapers.
//!
//! This module turns telemetry snapshots into a fixed set of metric records
//! and exposes them, together with the exporter's own process metrics,
//! through a Prometheus registry.

pub mod collector;
pub mod process;
pub mod record;
pub mod shape;

// Re-export commonly used items
pub use collector::{Records, TelemetryCollector};
pub use process::ProcessCollector;
pub use record::{MetricKind, MetricPoint, MetricRecord, MetricSpec, MetricValue};

use crate::error::Result;
use crate::telemetry::TelemetrySource;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

/// Build a registry holding the telemetry collector and process metrics.
pub fn build_registry<S>(source: Arc<S>) -> Result<Registry>
where
    S: TelemetrySource + 'static,
{
    let registry = Registry::new();
    registry.register(Box::new(TelemetryCollector::new(source)?))?;
    registry.register(Box::new(ProcessCollector::for_self()?))?;
    Ok(registry)
}

/// Render everything in the registry in the text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
