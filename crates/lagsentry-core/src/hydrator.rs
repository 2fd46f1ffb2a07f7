//! Anomaly Hydrator
//!
//! Re-queries a wider window centred on each flagged anomaly and attaches
//! max / average / validity statistics. Failures are isolated per record:
//! a record that cannot be fetched gets empty statistics and the batch
//! carries on.

use crate::config::PipelineConfig;
use crate::record::{AnomalyRecord, Hydration};
use crate::series::RawValue;
use crate::store::SeriesStore;
use crate::windower::normalize_values;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

/// Statistics over one fetched series.
///
/// `valid_pct` is the share of present values among all returned points,
/// rounded to 3 decimals; it is `0.0` when no point came back.
pub fn compute_stats(values: &[Option<RawValue>]) -> Hydration {
    let valid: Vec<f64> = normalize_values(values).into_iter().flatten().collect();
    if values.is_empty() {
        return Hydration::empty();
    }

    let max_value = valid.iter().copied().reduce(f64::max);
    let avg_value = (!valid.is_empty()).then(|| valid.iter().sum::<f64>() / valid.len() as f64);
    let valid_pct = (valid.len() as f64 / values.len() as f64 * 1000.0).round() / 1000.0;

    Hydration {
        max_value,
        avg_value,
        valid_pct,
    }
}

pub struct AnomalyHydrator<'a, S> {
    config: &'a PipelineConfig,
    store: S,
}

impl<'a, S: SeriesStore> AnomalyHydrator<'a, S> {
    pub fn new(config: &'a PipelineConfig, store: S) -> Self {
        Self { config, store }
    }

    /// Same records in the same order, each with its statistics replaced
    pub fn hydrate(&self, records: Vec<AnomalyRecord>) -> Vec<AnomalyRecord> {
        let total = records.len();
        let hydrated: Vec<AnomalyRecord> = records
            .into_iter()
            .map(|mut record| {
                record.hydration = Some(self.hydrate_one(&record));
                record
            })
            .collect();
        let empty = hydrated
            .iter()
            .filter(|r| r.hydration == Some(Hydration::empty()))
            .count();
        info!(records = total, empty, "hydration finished");
        hydrated
    }

    fn hydrate_one(&self, record: &AnomalyRecord) -> Hydration {
        let machine = record.machine.as_str();
        let aggregator = record.aggregator.as_str();
        let target = match self.config.target_for(machine, aggregator) {
            Ok(t) => t,
            Err(e) => {
                warn!(machine, aggregator, error = %e, "cannot hydrate record");
                return Hydration::empty();
            }
        };

        let Some((from, until)) = centred_window(record.timestamp, self.config.hydration_span_hours)
        else {
            warn!(machine, aggregator, timestamp = %record.timestamp, "hydration window out of range");
            return Hydration::empty();
        };

        match self.store.fetch(target.as_str(), from, until) {
            Ok(series) => match series.first() {
                Some(first) => {
                    if series.len() > 1 {
                        debug!(machine, aggregator, returned = series.len(), "using first series only");
                    }
                    compute_stats(&first.values())
                }
                None => Hydration::empty(),
            },
            Err(e) => {
                warn!(machine, aggregator, error = %e, "hydration fetch failed");
                Hydration::empty()
            }
        }
    }
}

/// `[ts - span/2, ts + span/2]`; odd spans round the half-width down to
/// whole minutes. `None` when either end is not representable.
fn centred_window(ts: DateTime<Utc>, span_hours: u64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let half = i64::try_from(span_hours)
        .ok()
        .and_then(|h| h.checked_mul(30))
        .and_then(TimeDelta::try_minutes)?;
    Some((ts.checked_sub_signed(half)?, ts.checked_add_signed(half)?))
}
