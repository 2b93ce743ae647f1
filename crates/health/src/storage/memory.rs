//! In-memory sink
//!
//! Keeps the last flushed records per (metric, mode). Used in tests and by
//! embedders that consume records directly instead of reading files.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{FlushReport, MetricBuffers, Records, Sink};
use crate::models::{DataPoint, MetricDescriptor, SyncMode};

type Outputs = HashMap<(String, SyncMode), Records>;

/// Sink whose output can be inspected through a [`MemoryOutputs`] handle
#[derive(Default)]
pub struct MemorySink {
    buffers: MetricBuffers,
    outputs: Arc<RwLock<Outputs>>,
    flushes: Arc<RwLock<usize>>,
}

/// Read side of a [`MemorySink`], usable after the sink moves into an orchestrator
#[derive(Clone, Default)]
pub struct MemoryOutputs {
    outputs: Arc<RwLock<Outputs>>,
    flushes: Arc<RwLock<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outputs(&self) -> MemoryOutputs {
        MemoryOutputs {
            outputs: self.outputs.clone(),
            flushes: self.flushes.clone(),
        }
    }
}

impl MemoryOutputs {
    /// Last flushed records for a metric and mode
    pub fn get(&self, metric_key: &str, mode: SyncMode) -> Option<Records> {
        self.outputs
            .read()
            .unwrap()
            .get(&(metric_key.to_string(), mode))
            .cloned()
    }

    /// Total flush calls so far
    pub fn flush_count(&self) -> usize {
        *self.flushes.read().unwrap()
    }
}

impl Sink for MemorySink {
    fn append(&mut self, metric: &MetricDescriptor, points: Vec<DataPoint>) {
        self.buffers.append(&metric.key, points);
    }

    fn flush(&mut self, metric: &MetricDescriptor, mode: SyncMode) -> Result<FlushReport> {
        let records = self.buffers.take(metric);
        let count = records.len();
        self.outputs
            .write()
            .unwrap()
            .insert((metric.key.clone(), mode), records);
        *self.flushes.write().unwrap() += 1;

        Ok(FlushReport {
            records: count,
            location: None,
        })
    }

    fn discard(&mut self, metric: &MetricDescriptor) {
        self.buffers.discard(&metric.key);
    }

    fn buffered(&self, metric: &MetricDescriptor) -> usize {
        self.buffers.len(&metric.key)
    }
}
