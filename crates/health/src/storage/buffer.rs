//! Per-run, per-metric point buffers

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use super::Records;
use crate::models::{DataPoint, MetricDescriptor};

type Slot = (DateTime<Utc>, DateTime<Utc>);

/// Points accumulated during one run, keyed by metric
///
/// Points with the same `(start, end)` replace each other, and iteration is
/// ordered by start.
#[derive(Debug, Default)]
pub struct MetricBuffers {
    buffers: HashMap<String, BTreeMap<Slot, DataPoint>>,
}

impl MetricBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, metric_key: &str, points: Vec<DataPoint>) {
        let buffer = self.buffers.entry(metric_key.to_string()).or_default();
        for point in points {
            buffer.insert(point.dedup_key(), point);
        }
    }

    /// Remove the metric's buffer and shape it for output
    pub fn take(&mut self, metric: &MetricDescriptor) -> Records {
        let points = self
            .buffers
            .remove(&metric.key)
            .map(|b| b.into_values().collect())
            .unwrap_or_default();
        Records::shape(metric, points)
    }

    pub fn discard(&mut self, metric_key: &str) {
        self.buffers.remove(metric_key);
    }

    /// Buffered points for a metric
    pub fn len(&self, metric_key: &str) -> usize {
        self.buffers.get(metric_key).map_or(0, BTreeMap::len)
    }
}
