//! Shaping buffered points into output records

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::models::{AggregationMode, DailyTotal, DataPoint, MetricDescriptor};

/// UTC timestamp format used in output files
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What a flush writes for one metric
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    /// One row per point, sorted by start
    Raw(Vec<DataPoint>),
    /// One row per UTC day
    Daily(Vec<DailyTotal>),
}

impl Records {
    /// Shape sorted points according to the metric's aggregation
    pub fn shape(metric: &MetricDescriptor, points: Vec<DataPoint>) -> Self {
        match metric.aggregation {
            AggregationMode::Raw => Self::Raw(points),
            AggregationMode::DailySum => Self::Daily(daily_sum(&points)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Raw(points) => points.len(),
            Self::Daily(totals) => totals.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names for `metric`
    pub fn header(&self, metric: &MetricDescriptor) -> Vec<String> {
        let leading: &[&str] = match self {
            Self::Raw(_) => &["start", "end"],
            Self::Daily(_) => &["date"],
        };
        leading
            .iter()
            .copied()
            .chain(metric.kind.value_columns())
            .map(String::from)
            .collect()
    }

    /// Rendered cells, one row per record
    pub fn rows(&self) -> Vec<Vec<String>> {
        match self {
            Self::Raw(points) => points
                .iter()
                .map(|p| {
                    let mut row = vec![
                        p.start.format(TIMESTAMP_FORMAT).to_string(),
                        p.end.format(TIMESTAMP_FORMAT).to_string(),
                    ];
                    row.extend(p.value.cells());
                    row
                })
                .collect(),
            Self::Daily(totals) => totals
                .iter()
                .map(|t| vec![t.day.format("%Y-%m-%d").to_string(), t.total.to_string()])
                .collect(),
        }
    }
}

/// Sum scalar values per UTC calendar day of their start
///
/// Non-scalar points are ignored.
pub fn daily_sum(points: &[DataPoint]) -> Vec<DailyTotal> {
    let mut days: BTreeMap<NaiveDate, _> = BTreeMap::new();
    for point in points {
        let Some(value) = point.value.as_scalar() else {
            continue;
        };
        days.entry(point.start.date_naive())
            .and_modify(|total| *total = *total + value)
            .or_insert(value);
    }

    days.into_iter()
        .map(|(day, total)| DailyTotal { day, total })
        .collect()
}
