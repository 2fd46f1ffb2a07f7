//! Static Threshold Escalation over Batch Snapshots
//!
//! Each row of a snapshot gets a breach level from its lag duration:
//!
//! | lag (minutes)           | level |
//! |-------------------------|-------|
//! | `lag > level_2_minutes` | 2     |
//! | `lag > level_1_minutes` | 1     |
//! | otherwise / unparseable | 0     |
//!
//! When enough distinct shards breach in one snapshot a fleet-wide
//! meta-alert is raised. Independently, every row's numeric feature vector
//! can be scored by the outlier model (per-row mode, not windowed).

use crate::config::PipelineConfig;
use crate::error::{EscalationError, TableError};
use crate::model::{Label, OutlierModel};
use crate::table::{RawTable, coerce_numeric, parse_timestamp};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{info, warn};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BreachLevel {
    #[default]
    None = 0,
    Level1 = 1,
    Level2 = 2,
}

impl BreachLevel {
    /// Strictly-greater comparison: a lag equal to a threshold does not escalate
    pub fn classify(lag_minutes: Option<f64>, level_1: u64, level_2: u64) -> Self {
        match lag_minutes {
            Some(lag) if lag > level_2 as f64 => Self::Level2,
            Some(lag) if lag > level_1 as f64 => Self::Level1,
            _ => Self::None,
        }
    }

    pub fn is_breach(self) -> bool {
        self != Self::None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowClassification {
    /// Index into the snapshot's rows
    pub row: usize,
    pub timestamp: DateTime<Utc>,
    pub shard_id: Option<String>,
    pub lag_minutes: Option<f64>,
    /// `None` when the snapshot lacks the lag or shard column
    pub breach_level: Option<BreachLevel>,
    /// `None` when no model was supplied
    pub ml_label: Option<Label>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreachSummary {
    pub level_1_rows: usize,
    pub level_2_rows: usize,
    /// Distinct shards with any breach
    pub breaching_shards: usize,
    pub meta_alert: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub table: String,
    pub rows: Vec<RowClassification>,
    /// `None` when threshold classification was skipped
    pub breaches: Option<BreachSummary>,
    pub ml_outliers: usize,
    /// Model features missing from the snapshot, scored as zero
    pub zero_filled_features: Vec<String>,
}

impl BatchReport {
    pub fn meta_alert(&self) -> bool {
        self.breaches.as_ref().is_some_and(|b| b.meta_alert)
    }

    /// Share of scored rows flagged by the model
    pub fn ml_outlier_rate(&self) -> Option<f64> {
        let scored = self.rows.iter().filter(|r| r.ml_label.is_some()).count();
        (scored > 0).then(|| self.ml_outliers as f64 / scored as f64)
    }
}

/// Whether the meta-alert fires for a set of breaching shard ids
pub fn meta_alert(breaching_shards: usize, threshold: usize) -> bool {
    breaching_shards >= threshold
}

/// Finite number in a feature cell; NaN and infinities count as empty
fn feature_value(cell: &str) -> Result<Option<f64>, ()> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    let value = cell.parse::<f64>().map_err(|_| ())?;
    Ok(Some(value).filter(|v| v.is_finite()))
}

/// A column is numeric when it has a finite value and every non-empty
/// cell parses as a plain number.
fn is_numeric_column(table: &RawTable, rows: &[usize], col: usize) -> bool {
    let mut seen = false;
    for &row in rows {
        match table.cell(row, col).map(feature_value) {
            None | Some(Ok(None)) => {}
            Some(Ok(Some(_))) => seen = true,
            Some(Err(())) => return false,
        }
    }
    seen
}

/// Where each model feature comes from in one snapshot
struct FeatureLayout {
    /// Column index per model feature; `None` is zero-filled
    sources: Vec<Option<usize>>,
    missing: Vec<String>,
}

impl FeatureLayout {
    fn new(table: &RawTable, rows: &[usize], time_idx: usize, model: &OutlierModel) -> Self {
        let mut sources = Vec::with_capacity(model.n_features());
        let mut missing = Vec::new();
        for name in model.feature_names() {
            let source = table
                .column_index(name)
                .filter(|&col| col != time_idx && is_numeric_column(table, rows, col));
            if source.is_none() {
                missing.push(name.clone());
            }
            sources.push(source);
        }
        Self { sources, missing }
    }

    /// Feature vector for one row; empty and non-finite cells score as zero
    fn row_vector(&self, table: &RawTable, row: usize) -> Vec<f64> {
        self.sources
            .iter()
            .map(|source| {
                source
                    .and_then(|col| table.cell(row, col))
                    .and_then(|cell| feature_value(cell).ok().flatten())
                    .unwrap_or(0.0)
            })
            .collect()
    }
}

pub struct ThresholdEscalator<'a> {
    config: &'a PipelineConfig,
    model: Option<&'a OutlierModel>,
}

impl<'a> ThresholdEscalator<'a> {
    /// Without a model only the static thresholds are evaluated.
    pub fn new(config: &'a PipelineConfig, model: Option<&'a OutlierModel>) -> Self {
        Self { config, model }
    }

    pub fn classify(&self, table: &RawTable) -> Result<BatchReport, EscalationError> {
        let time_idx = table
            .time_column()
            .ok_or_else(|| TableError::NoTimeColumn(table.name.clone()))?;
        let kept: Vec<(usize, DateTime<Utc>)> = (0..table.rows.len())
            .filter_map(|row| {
                let ts = table.cell(row, time_idx).and_then(parse_timestamp)?;
                Some((row, ts))
            })
            .collect();
        let kept_rows: Vec<usize> = kept.iter().map(|(row, _)| *row).collect();

        let lag_idx = table.column_index(&self.config.lag_column);
        let shard_idx = table.column_index(&self.config.shard_column);
        let thresholds_enabled = lag_idx.is_some() && shard_idx.is_some();
        if !thresholds_enabled {
            warn!(
                table = %table.name,
                lag_column = %self.config.lag_column,
                shard_column = %self.config.shard_column,
                "missing lag or shard column, skipping static threshold checks"
            );
        }

        let scoring = self.model.map(|model| {
            let layout = FeatureLayout::new(table, &kept_rows, time_idx, model);
            if layout.missing.len() == model.n_features() {
                warn!(table = %table.name, "snapshot shares no feature column with the model");
            } else if !layout.missing.is_empty() {
                warn!(table = %table.name, missing = ?layout.missing, "zero-filling missing model features");
            }
            (model, layout)
        });

        let mut rows = Vec::with_capacity(kept.len());
        let mut level_1_rows = 0;
        let mut level_2_rows = 0;
        let mut breaching: BTreeSet<String> = BTreeSet::new();
        let mut ml_outliers = 0;

        for (row, timestamp) in kept {
            let lag_minutes = lag_idx
                .and_then(|col| table.cell(row, col))
                .and_then(coerce_numeric);
            let shard_id = shard_idx
                .and_then(|col| table.cell(row, col))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            let breach_level = thresholds_enabled.then(|| {
                BreachLevel::classify(
                    lag_minutes,
                    self.config.level_1_minutes,
                    self.config.level_2_minutes,
                )
            });
            match breach_level {
                Some(BreachLevel::Level1) => level_1_rows += 1,
                Some(BreachLevel::Level2) => level_2_rows += 1,
                _ => {}
            }
            if breach_level.is_some_and(BreachLevel::is_breach) {
                if let Some(shard) = &shard_id {
                    breaching.insert(shard.clone());
                }
            }

            let ml_label = match &scoring {
                Some((model, layout)) => {
                    let label = model.predict(&layout.row_vector(table, row))?;
                    if label.is_outlier() {
                        ml_outliers += 1;
                    }
                    Some(label)
                }
                None => None,
            };

            rows.push(RowClassification {
                row,
                timestamp,
                shard_id,
                lag_minutes,
                breach_level,
                ml_label,
            });
        }

        let breaches = thresholds_enabled.then(|| BreachSummary {
            level_1_rows,
            level_2_rows,
            breaching_shards: breaching.len(),
            meta_alert: meta_alert(breaching.len(), self.config.meta_alert_shard_count),
        });

        if let Some(summary) = &breaches {
            info!(
                table = %table.name,
                level_1 = summary.level_1_rows,
                level_2 = summary.level_2_rows,
                shards = summary.breaching_shards,
                "threshold breaches"
            );
            if summary.meta_alert {
                warn!(
                    table = %table.name,
                    shards = summary.breaching_shards,
                    threshold = self.config.meta_alert_shard_count,
                    "META ALERT: too many shards breached static thresholds"
                );
            }
        }

        let report = BatchReport {
            table: table.name.clone(),
            rows,
            breaches,
            ml_outliers,
            zero_filled_features: scoring.map(|(_, layout)| layout.missing).unwrap_or_default(),
        };
        if let Some(rate) = report.ml_outlier_rate() {
            info!(table = %table.name, outliers = report.ml_outliers, rate, "ml anomaly rate");
        }
        Ok(report)
    }
}
