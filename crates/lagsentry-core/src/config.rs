//! Pipeline Configuration
//!
//! One explicit configuration object is handed to every pipeline entry
//! point: the machine / aggregator grid, window length, breach thresholds
//! and model parameters. Loaded from JSON; every field has a default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for `lookback_hours` and `hydration_span_hours` (ten years)
pub const MAX_SPAN_HOURS: u64 = 10 * 366 * 24;

/// Isolation forest parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Number of isolation trees
    pub n_estimators: usize,
    /// Rows drawn per tree (capped by corpus size)
    pub max_samples: usize,
    /// Expected share of outliers in the training corpus
    pub contamination: f64,
    /// Master seed for reproducible fits
    pub seed: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.01,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Machines to scan, in scan order
    pub machines: Vec<String>,
    /// Aggregators to scan on every machine, in scan order
    pub aggregators: Vec<String>,
    /// Window length shared by training and live scoring
    pub window_size: usize,
    /// Lag above this many minutes is a level-1 breach
    pub level_1_minutes: u64,
    /// Lag above this many minutes is a level-2 breach
    pub level_2_minutes: u64,
    /// Distinct breaching shards needed for a fleet meta-alert
    pub meta_alert_shard_count: usize,
    /// Live detector lookback
    pub lookback_hours: u64,
    /// Total span re-queried around an anomaly when hydrating
    pub hydration_span_hours: u64,
    /// Leading namespace of every metric target
    pub metric_prefix: String,
    /// Metric path between the machine and the aggregator
    pub metric_path: String,
    /// Lag-duration column of batch snapshots
    pub lag_column: String,
    /// Shard-identifier column of batch snapshots
    pub shard_column: String,
    pub model: ModelParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            machines: Vec::new(),
            aggregators: Vec::new(),
            window_size: 24,
            level_1_minutes: 24 * 60,
            level_2_minutes: 72 * 60,
            meta_alert_shard_count: 20,
            lookback_hours: 24,
            hydration_span_hours: 24,
            metric_prefix: "statsd".to_string(),
            metric_path: "gauges.aggregator.agg_length_behind_ratio".to_string(),
            lag_column: "max_lag_minutes".to_string(),
            shard_column: "shard_id".to_string(),
            model: ModelParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be positive".into()));
        }
        if self.level_2_minutes < self.level_1_minutes {
            return Err(ConfigError::Invalid(format!(
                "level_2_minutes ({}) is below level_1_minutes ({})",
                self.level_2_minutes, self.level_1_minutes
            )));
        }
        if self.meta_alert_shard_count == 0 {
            return Err(ConfigError::Invalid(
                "meta_alert_shard_count must be positive".into(),
            ));
        }
        if self.lookback_hours == 0 || self.hydration_span_hours == 0 {
            return Err(ConfigError::Invalid(
                "lookback_hours and hydration_span_hours must be positive".into(),
            ));
        }
        if self.lookback_hours > MAX_SPAN_HOURS || self.hydration_span_hours > MAX_SPAN_HOURS {
            return Err(ConfigError::Invalid(format!(
                "lookback_hours and hydration_span_hours must not exceed {}",
                MAX_SPAN_HOURS
            )));
        }
        if !(self.model.contamination > 0.0 && self.model.contamination <= 0.5) {
            return Err(ConfigError::Invalid(format!(
                "contamination {} outside (0, 0.5]",
                self.model.contamination
            )));
        }
        if self.model.n_estimators == 0 || self.model.max_samples == 0 {
            return Err(ConfigError::Invalid(
                "n_estimators and max_samples must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Machine × aggregator pairs, machines outer
    pub fn grid(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.machines.iter().flat_map(move |machine| {
            self.aggregators
                .iter()
                .map(move |aggregator| (machine.as_str(), aggregator.as_str()))
        })
    }

    pub fn target_for(&self, machine: &str, aggregator: &str) -> Result<MetricTarget, ConfigError> {
        MetricTarget::compose(&self.metric_prefix, machine, &self.metric_path, aggregator)
    }
}

/// Fully qualified metric target for one (machine, aggregator) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricTarget(String);

impl MetricTarget {
    /// Build `{prefix}.{machine}.{path}.{aggregator}`.
    ///
    /// The aggregator must look like `Group.metric_name`.
    pub fn compose(
        prefix: &str,
        machine: &str,
        path: &str,
        aggregator: &str,
    ) -> Result<Self, ConfigError> {
        let malformed = |reason| ConfigError::MalformedTarget {
            machine: machine.to_string(),
            aggregator: aggregator.to_string(),
            reason,
        };

        if machine.trim().is_empty() || machine.contains('.') {
            return Err(malformed("machine must be a single non-empty path segment"));
        }
        let mut parts = aggregator.split('.');
        let group = parts.next().unwrap_or_default();
        let metric: Vec<&str> = parts.collect();
        if group.is_empty() || metric.is_empty() || metric.iter().any(|p| p.is_empty()) {
            return Err(malformed("aggregator must be of the form Group.metric"));
        }

        let mut target = String::new();
        for segment in [prefix, machine, path, group] {
            if !segment.is_empty() {
                target.push_str(segment);
                target.push('.');
            }
        }
        target.push_str(&metric.join("."));
        Ok(Self(target))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MetricTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
