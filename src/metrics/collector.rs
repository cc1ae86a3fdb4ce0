//! Per-scrape collector over a telemetry source.

use crate::error::Result;
use crate::metrics::record::MetricRecord;
use crate::metrics::shape::{SCHEMA, SHAPERS};
use crate::telemetry::data::TelemetrySnapshot;
use crate::telemetry::traits::TelemetrySource;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use std::sync::Arc;
use tracing::warn;

/// Turns the current telemetry snapshot into metric records on every scrape.
///
/// Holds no state between scrapes besides the injected source.
pub struct TelemetryCollector<S> {
    source: Arc<S>,
    descs: Vec<Desc>,
}

impl<S: TelemetrySource> TelemetryCollector<S> {
    /// Create a collector reading from `source`.
    pub fn new(source: Arc<S>) -> Result<Self> {
        let descs = SCHEMA
            .iter()
            .map(|spec| spec.desc())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { source, descs })
    }

    /// Lazily shape the current snapshot into records.
    ///
    /// Empty when the source is not ready. Otherwise the snapshot is read
    /// exactly once, here, and every record comes from it.
    pub fn records(&self) -> Records {
        let snapshot = if self.source.is_ready() {
            self.source.snapshot()
        } else {
            None
        };
        Records::new(snapshot)
    }
}

impl<S: TelemetrySource> Collector for TelemetryCollector<S> {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        for record in self.records() {
            match record.to_families() {
                Ok(mut converted) => families.append(&mut converted),
                Err(e) => warn!("Skipping metric {}: {}", record.name(), e),
            }
        }
        families
    }
}

/// Records derived from a single snapshot, in schema order.
pub struct Records {
    snapshot: Option<Arc<TelemetrySnapshot>>,
    next: usize,
}

impl Records {
    fn new(snapshot: Option<Arc<TelemetrySnapshot>>) -> Self {
        Self { snapshot, next: 0 }
    }

    /// Records for a given snapshot, bypassing any source.
    pub fn from_snapshot(snapshot: Arc<TelemetrySnapshot>) -> Self {
        Self::new(Some(snapshot))
    }
}

impl Iterator for Records {
    type Item = MetricRecord;

    fn next(&mut self) -> Option<MetricRecord> {
        let snapshot: &TelemetrySnapshot = self.snapshot.as_deref()?;
        while let Some(shape) = SHAPERS.get(self.next) {
            self.next += 1;
            if let Some(record) = shape(snapshot) {
                return Some(record);
            }
        }
        None
    }
}
