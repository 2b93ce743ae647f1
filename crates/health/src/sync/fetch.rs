//! One remote query per (metric, window), mapped into typed points

use chrono::{DateTime, TimeDelta, Utc};
use log::warn;
use std::sync::Arc;

use crate::error::FetchError;
use crate::google::api::{AggregateRequest, AggregateResponse, Point, Value};
use crate::google::{Credential, FitnessApi};
use crate::models::{DataPoint, MetricDescriptor, MetricKind, Number, PointValue, TimeWindow};

/// Fetches and normalizes metric data
pub struct MetricFetcher {
    api: Arc<dyn FitnessApi>,
    bucket: TimeDelta,
}

impl MetricFetcher {
    pub fn new(api: Arc<dyn FitnessApi>, bucket: TimeDelta) -> Self {
        Self { api, bucket }
    }

    /// Query `metric` over `window`
    ///
    /// An empty response is `Ok(vec![])`, not [`FetchError::NoData`].
    pub fn fetch(
        &self,
        metric: &MetricDescriptor,
        window: &TimeWindow,
        credential: &Credential,
    ) -> Result<Vec<DataPoint>, FetchError> {
        let request = AggregateRequest::for_window(metric, window, self.bucket.num_milliseconds());
        let response = self.api.aggregate(&credential.access_token, &request)?;
        Ok(extract_points(metric, &response))
    }
}

/// Flatten buckets → datasets → points into records for `metric`
///
/// Points whose value does not fit the metric's kind are dropped.
pub fn extract_points(metric: &MetricDescriptor, response: &AggregateResponse) -> Vec<DataPoint> {
    let mut points = Vec::new();

    for point in response
        .bucket
        .iter()
        .flat_map(|b| &b.dataset)
        .flat_map(|d| &d.point)
    {
        let (Some(start), Some(end)) = (
            parse_nanos(&point.start_time_nanos),
            parse_nanos(&point.end_time_nanos),
        ) else {
            warn!(
                "{}: dropping point with bad timestamps ({}, {})",
                metric.key, point.start_time_nanos, point.end_time_nanos
            );
            continue;
        };

        match extract_value(&metric.kind, point) {
            Some(value) => points.push(DataPoint::new(metric.key.clone(), start, end, value)),
            None => warn!(
                "{}: dropping point at {} with unexpected value shape",
                metric.key, start
            ),
        }
    }

    points
}

fn extract_value(kind: &MetricKind, point: &Point) -> Option<PointValue> {
    match kind {
        MetricKind::Scalar { .. } => point.value.first().and_then(number).map(PointValue::Scalar),
        MetricKind::Composite { fields } => fields
            .iter()
            .map(|f| point.value.get(f.index).and_then(number))
            .collect::<Option<Vec<_>>>()
            .map(PointValue::Composite),
        MetricKind::Categorical { .. } => point
            .value
            .first()
            .and_then(|v| v.int_val)
            .map(PointValue::Category),
    }
}

fn number(value: &Value) -> Option<Number> {
    value
        .int_val
        .map(Number::Int)
        .or(value.fp_val.map(Number::Float))
}

fn parse_nanos(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>().ok().map(DateTime::from_timestamp_nanos)
}
