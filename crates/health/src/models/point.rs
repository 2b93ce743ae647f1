//! Normalized data points

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::ops::Add;

/// A remote numeric value, keeping whether it arrived as an integer or a float
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

impl Add for Number {
    type Output = Number;

    fn add(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => Self::Int(a.saturating_add(b)),
            (a, b) => Self::Float(a.as_f64() + b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
        }
    }
}

/// The value carried by one point, shaped by the metric kind
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Scalar(Number),
    Composite(Vec<Number>),
    Category(i64),
}

impl PointValue {
    /// Render as CSV cells, one per value column
    pub fn cells(&self) -> Vec<String> {
        match self {
            Self::Scalar(n) => vec![n.to_string()],
            Self::Composite(values) => values.iter().map(|n| n.to_string()).collect(),
            Self::Category(code) => vec![code.to_string()],
        }
    }

    pub fn as_scalar(&self) -> Option<Number> {
        match self {
            Self::Scalar(n) => Some(*n),
            _ => None,
        }
    }
}

/// One normalized record of a metric over `[start, end)`
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub metric_key: String,
    pub value: PointValue,
}

impl DataPoint {
    pub fn new(
        metric_key: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        value: PointValue,
    ) -> Self {
        Self {
            start,
            end,
            metric_key: metric_key.into(),
            value,
        }
    }

    /// Identity used to deduplicate points across overlapping fetches
    pub fn dedup_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end)
    }
}

/// Scalar total for one UTC calendar day
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub total: Number,
}
