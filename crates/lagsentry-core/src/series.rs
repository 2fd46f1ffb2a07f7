//! Time series as returned by the metrics store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw sample value: the store may hand back numbers or
/// percent-formatted strings such as `"0.01%"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    /// `None` where the store has a gap
    pub value: Option<RawValue>,
}

/// One logical series; ordered by timestamp, never deduplicated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub target: String,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    pub fn new(target: impl Into<String>, points: Vec<SeriesPoint>) -> Self {
        Self {
            target: target.into(),
            points,
        }
    }

    /// Raw values in time order
    pub fn values(&self) -> Vec<Option<RawValue>> {
        self.points.iter().map(|p| p.value.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
