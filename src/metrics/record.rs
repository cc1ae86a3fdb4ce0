//! Metric records and the fixed schema they follow.

use crate::error::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use std::collections::HashMap;

/// How a record is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Numeric gauge
    Gauge,
    /// Identity table, exposed as a gauge of 1 with the table in its labels
    Info,
}

/// Static description of one metric family.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub unit: Option<&'static str>,
    pub kind: MetricKind,
    /// Labels distinguishing points
    pub labels: &'static [&'static str],
    /// Keys of the identity table, for info records
    pub info_keys: &'static [&'static str],
}

/// Value of one point.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    /// Identity table in `info_keys` order
    Info(Vec<(&'static str, String)>),
}

/// One point of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub label_values: Vec<String>,
    pub value: MetricValue,
}

/// One named, labeled group of observations emitted per scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    spec: &'static MetricSpec,
    points: Vec<MetricPoint>,
}

impl MetricSpec {
    /// Name as it appears in the exposition, unit and info suffixes included.
    pub fn exposition_name(&self) -> String {
        let mut name = self.name.to_string();
        if let Some(unit) = self.unit {
            if !name.ends_with(&format!("_{}", unit)) {
                name.push('_');
                name.push_str(unit);
            }
        }
        if self.kind == MetricKind::Info {
            name.push_str("_info");
        }
        name
    }

    /// Exposed label names: point labels followed by info keys.
    pub fn exposition_labels(&self) -> Vec<&'static str> {
        self.labels
            .iter()
            .chain(self.info_keys.iter())
            .copied()
            .collect()
    }

    /// Registry descriptor for this family.
    pub fn desc(&self) -> Result<Desc> {
        Ok(Desc::new(
            self.exposition_name(),
            self.help.to_string(),
            self.exposition_labels()
                .into_iter()
                .map(String::from)
                .collect(),
            HashMap::new(),
        )?)
    }
}

impl MetricRecord {
    pub fn new(spec: &'static MetricSpec) -> Self {
        Self {
            spec,
            points: Vec::new(),
        }
    }

    /// Add a gauge point.
    pub fn push<L: Into<String>>(&mut self, labels: impl IntoIterator<Item = L>, value: f64) {
        self.points.push(MetricPoint {
            label_values: labels.into_iter().map(Into::into).collect(),
            value: MetricValue::Gauge(value),
        });
    }

    /// Add an info point. Keys follow the family's `info_keys`.
    pub fn push_info<L: Into<String>>(
        &mut self,
        labels: impl IntoIterator<Item = L>,
        table: Vec<(&'static str, String)>,
    ) {
        self.points.push(MetricPoint {
            label_values: labels.into_iter().map(Into::into).collect(),
            value: MetricValue::Info(table),
        });
    }

    pub fn spec(&self) -> &'static MetricSpec {
        self.spec
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn help(&self) -> &'static str {
        self.spec.help
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.spec.unit
    }

    pub fn label_names(&self) -> &'static [&'static str] {
        self.spec.labels
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Gauge value of the point with exactly these label values.
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        self.find(labels).and_then(|point| match point.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Info(_) => None,
        })
    }

    /// Info entry of the point with these label values.
    pub fn info(&self, labels: &[&str], key: &str) -> Option<&str> {
        self.find(labels).and_then(|point| match &point.value {
            MetricValue::Info(table) => table
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str()),
            MetricValue::Gauge(_) => None,
        })
    }

    fn find(&self, labels: &[&str]) -> Option<&MetricPoint> {
        self.points.iter().find(|point| {
            point.label_values.len() == labels.len()
                && point
                    .label_values
                    .iter()
                    .zip(labels)
                    .all(|(have, want)| have == want)
        })
    }

    /// Convert into protobuf families for the registry.
    pub fn to_families(&self) -> Result<Vec<MetricFamily>> {
        let labels = self.spec.exposition_labels();
        let gauges = GaugeVec::new(
            Opts::new(self.spec.exposition_name(), self.spec.help),
            &labels,
        )?;

        for point in &self.points {
            let mut values: Vec<&str> = point.label_values.iter().map(String::as_str).collect();
            let value = match &point.value {
                MetricValue::Gauge(v) => *v,
                MetricValue::Info(table) => {
                    values.extend(table.iter().map(|(_, v)| v.as_str()));
                    1.0
                }
            };
            gauges.get_metric_with_label_values(&values[..])?.set(value);
        }

        Ok(gauges.collect())
    }
}
