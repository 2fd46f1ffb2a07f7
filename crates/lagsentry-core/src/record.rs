//! Anomaly Records and the Record Store
//!
//! Records are written as one pretty-printed JSON array per run. Each write
//! replaces the previous file; nothing is merged across runs.

use crate::error::RecordStoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

/// Severity of a flagged anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Statistics recomputed around an anomaly
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hydration {
    pub max_value: Option<f64>,
    pub avg_value: Option<f64>,
    /// Share of present points, rounded to 3 decimals
    pub valid_pct: f64,
}

impl Hydration {
    /// Result used when nothing could be fetched
    pub fn empty() -> Self {
        Self {
            max_value: None,
            avg_value: None,
            valid_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub machine: String,
    pub aggregator: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Set by the hydrator
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub hydration: Option<Hydration>,
}

impl AnomalyRecord {
    pub fn new(
        machine: impl Into<String>,
        aggregator: impl Into<String>,
        timestamp: DateTime<Utc>,
        severity: Severity,
    ) -> Self {
        Self {
            machine: machine.into(),
            aggregator: aggregator.into(),
            timestamp,
            severity,
            hydration: None,
        }
    }

    pub fn max_value(&self) -> Option<f64> {
        self.hydration.and_then(|h| h.max_value)
    }
}

/// Write all records, replacing the file
pub fn save_records(path: impl AsRef<Path>, records: &[AnomalyRecord]) -> Result<(), RecordStoreError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(records).map_err(|source| RecordStoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| RecordStoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<AnomalyRecord>, RecordStoreError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| RecordStoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| RecordStoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Order for triage: highest max value first, records without one last
pub fn rank_by_max_value(records: &mut [AnomalyRecord]) {
    records.sort_by(|a, b| match (a.max_value(), b.max_value()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
