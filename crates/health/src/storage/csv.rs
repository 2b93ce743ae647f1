//! CSV file sink
//!
//! Layout: `{root}/{output_folder}/Raw/{key}_data_{full|daily}.csv`.
//! Each flush renders the whole file in memory and replaces the previous
//! one atomically.

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use super::{FlushReport, MetricBuffers, Records, Sink};
use crate::models::{DataPoint, MetricDescriptor, SyncMode};

pub struct CsvSink {
    root: PathBuf,
    buffers: MetricBuffers,
}

impl CsvSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            buffers: MetricBuffers::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output file for a metric and mode
    pub fn output_path(&self, metric: &MetricDescriptor, mode: SyncMode) -> PathBuf {
        self.root
            .join(&metric.output_folder)
            .join("Raw")
            .join(format!("{}_data_{}.csv", metric.key, mode.file_suffix()))
    }
}

impl Sink for CsvSink {
    fn append(&mut self, metric: &MetricDescriptor, points: Vec<DataPoint>) {
        self.buffers.append(&metric.key, points);
    }

    fn flush(&mut self, metric: &MetricDescriptor, mode: SyncMode) -> Result<FlushReport> {
        let records = self.buffers.take(metric);
        let path = self.output_path(metric, mode);

        config::write_atomic(&path, render(metric, &records).as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("Wrote {} {} rows to {}", records.len(), metric.key, path.display());
        Ok(FlushReport {
            records: records.len(),
            location: Some(path),
        })
    }

    fn discard(&mut self, metric: &MetricDescriptor) {
        self.buffers.discard(&metric.key);
    }

    fn buffered(&self, metric: &MetricDescriptor) -> usize {
        self.buffers.len(&metric.key)
    }
}

fn render(metric: &MetricDescriptor, records: &Records) -> String {
    let mut out = String::new();
    push_row(&mut out, &records.header(metric));
    for row in records.rows() {
        push_row(&mut out, &row);
    }
    out
}

fn push_row(out: &mut String, cells: &[String]) {
    let escaped: Vec<_> = cells.iter().map(|c| escape(c)).collect();
    out.push_str(&escaped.join(","));
    out.push('\n');
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
