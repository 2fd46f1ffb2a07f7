//! Training Pipeline
//!
//! Raw tables → normalized columns → pooled sliding windows → fitted model.
//!
//! 1. Locate each table's time column; tables without one are skipped.
//! 2. Drop rows whose time cell does not parse.
//! 3. Coerce every other column to numbers.
//! 4. Concatenate all tables and sort rows by time.
//! 5. Drop columns that are absent everywhere.
//! 6. Per column: drop gaps, sweep windows, pool across columns.

use crate::config::PipelineConfig;
use crate::error::{TableError, TrainingError};
use crate::model::OutlierModel;
use crate::table::{CorpusProvider, RawTable, coerce_numeric, parse_timestamp};
use crate::windower::{Window, compact_windows};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One table after column interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub source: String,
    pub timestamps: Vec<DateTime<Utc>>,
    /// Feature columns in header order, aligned with `timestamps`
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

/// Interpret a raw table; fails only when it has no time column
pub fn normalize_table(table: &RawTable) -> Result<NormalizedTable, TableError> {
    let time_idx = table
        .time_column()
        .ok_or_else(|| TableError::NoTimeColumn(table.name.clone()))?;

    let feature_idx: Vec<usize> = (0..table.headers.len()).filter(|&i| i != time_idx).collect();
    let mut timestamps = Vec::with_capacity(table.rows.len());
    let mut columns: Vec<(String, Vec<Option<f64>>)> = feature_idx
        .iter()
        .map(|&i| (table.headers[i].clone(), Vec::with_capacity(table.rows.len())))
        .collect();

    let mut dropped = 0usize;
    for row in 0..table.rows.len() {
        let Some(ts) = table.cell(row, time_idx).and_then(parse_timestamp) else {
            dropped += 1;
            continue;
        };
        timestamps.push(ts);
        for (slot, &col) in columns.iter_mut().zip(&feature_idx) {
            slot.1.push(table.cell(row, col).and_then(coerce_numeric));
        }
    }
    if dropped > 0 {
        debug!(table = %table.name, dropped, "dropped rows with unparseable time");
    }

    Ok(NormalizedTable {
        source: table.name.clone(),
        timestamps,
        columns,
    })
}

/// Union of normalized tables sorted by time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedFrame {
    pub timestamps: Vec<DateTime<Utc>>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl CombinedFrame {
    /// Concatenate rows (no deduplication); a table lacking a column
    /// contributes absent cells to it. Column order is first-seen.
    pub fn concat(tables: &[NormalizedTable]) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut names: Vec<String> = Vec::new();
        for table in tables {
            for (name, _) in &table.columns {
                if !index.contains_key(name) {
                    index.insert(name.clone(), names.len());
                    names.push(name.clone());
                }
            }
        }

        let total: usize = tables.iter().map(|t| t.timestamps.len()).sum();
        let mut timestamps = Vec::with_capacity(total);
        let mut cells: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(total); names.len()];
        for table in tables {
            let rows = table.timestamps.len();
            timestamps.extend_from_slice(&table.timestamps);
            let mut present = vec![false; names.len()];
            for (name, values) in &table.columns {
                let col = index[name];
                // duplicate header names keep the first occurrence
                if present[col] {
                    continue;
                }
                present[col] = true;
                cells[col].extend_from_slice(values);
            }
            for (col, seen) in present.iter().enumerate() {
                if !seen {
                    cells[col].extend(std::iter::repeat_n(None, rows));
                }
            }
        }

        // stable sort keeps table order for equal timestamps
        let mut order: Vec<usize> = (0..timestamps.len()).collect();
        order.sort_by_key(|&i| timestamps[i]);

        Self {
            timestamps: order.iter().map(|&i| timestamps[i]).collect(),
            columns: names
                .into_iter()
                .zip(cells)
                .map(|(name, values)| (name, order.iter().map(|&i| values[i]).collect()))
                .collect(),
        }
    }

    /// Remove columns with no present value; returns their names
    pub fn drop_empty_columns(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();
        self.columns.retain(|(name, values)| {
            let keep = values.iter().any(Option::is_some);
            if !keep {
                dropped.push(name.clone());
            }
            keep
        });
        dropped
    }

    /// Sweep each column independently and pool the windows
    pub fn pooled_windows(&self, window_size: usize) -> Vec<Window> {
        let mut pooled = Vec::new();
        for (name, values) in &self.columns {
            let windows = compact_windows(values, window_size);
            debug!(column = %name, windows = windows.len(), "swept column");
            pooled.extend(windows);
        }
        pooled
    }
}

/// What went into a fitted model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub tables_loaded: Vec<String>,
    pub tables_skipped: Vec<String>,
    pub feature_columns: Vec<String>,
    pub window_size: usize,
    pub window_count: usize,
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: OutlierModel,
    pub report: TrainingReport,
}

/// Offline trainer; produces a new model, never updates one
#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    config: PipelineConfig,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn train(&self, corpus: &dyn CorpusProvider) -> Result<TrainedModel, TrainingError> {
        let tables = corpus.list_tables()?;
        self.train_tables(&tables)
    }

    /// Build the pooled window corpus without fitting
    pub fn build_corpus(
        &self,
        tables: &[RawTable],
    ) -> Result<(Vec<Window>, TrainingReport), TrainingError> {
        let mut report = TrainingReport {
            window_size: self.config.window_size,
            ..Default::default()
        };

        let mut normalized = Vec::with_capacity(tables.len());
        for table in tables {
            match normalize_table(table) {
                Ok(n) => {
                    report.tables_loaded.push(table.name.clone());
                    normalized.push(n);
                }
                Err(e) => {
                    warn!(table = %table.name, error = %e, "skipping table");
                    report.tables_skipped.push(table.name.clone());
                }
            }
        }
        if normalized.is_empty() {
            return Err(TrainingError::NoLoadableTables);
        }
        info!(loaded = normalized.len(), skipped = report.tables_skipped.len(), "tables normalized");

        let mut frame = CombinedFrame::concat(&normalized);
        let empty = frame.drop_empty_columns();
        if !empty.is_empty() {
            debug!(columns = ?empty, "dropped all-absent columns");
        }
        report.feature_columns = frame.columns.iter().map(|(n, _)| n.clone()).collect();

        let windows = frame.pooled_windows(self.config.window_size);
        if windows.is_empty() {
            return Err(TrainingError::NoWindows {
                window_size: self.config.window_size,
            });
        }
        report.window_count = windows.len();
        Ok((windows, report))
    }

    pub fn train_tables(&self, tables: &[RawTable]) -> Result<TrainedModel, TrainingError> {
        let (windows, report) = self.build_corpus(tables)?;
        info!(
            windows = report.window_count,
            window_size = report.window_size,
            columns = report.feature_columns.len(),
            "fitting outlier model"
        );
        let model = OutlierModel::fit(&windows, &self.config.model)?;
        Ok(TrainedModel { model, report })
    }
}
