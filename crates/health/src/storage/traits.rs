//! Sink trait definition

use anyhow::Result;
use std::path::PathBuf;

use crate::models::{DataPoint, MetricDescriptor, SyncMode};

/// What a flush wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Rows written
    pub records: usize,
    /// Where they went, if the sink is file-backed
    pub location: Option<PathBuf>,
}

/// Accumulates a run's records per metric and writes them out
///
/// A metric's output for a given mode is replaced as a whole on every
/// flush, never appended to.
pub trait Sink: Send {
    /// Buffer points for a metric, deduplicated by `(start, end)`
    fn append(&mut self, metric: &MetricDescriptor, points: Vec<DataPoint>);

    /// Write the metric's buffer under the metric's aggregation and clear it
    fn flush(&mut self, metric: &MetricDescriptor, mode: SyncMode) -> Result<FlushReport>;

    /// Drop the metric's buffer without writing
    fn discard(&mut self, metric: &MetricDescriptor);

    /// Points currently buffered for the metric
    fn buffered(&self, metric: &MetricDescriptor) -> usize;
}
