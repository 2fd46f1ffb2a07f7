//! Live Detector
//!
//! Sweeps the machine × aggregator grid once, scoring the most recent
//! window of every returned series against the trained model. At most one
//! anomaly is emitted per pair: the first outlier series wins.
//!
//! Fetch failures and malformed targets only cost the affected pair. A
//! window/model length mismatch is a wiring bug and aborts the run.

use crate::config::PipelineConfig;
use crate::error::ModelError;
use crate::model::OutlierModel;
use crate::record::{AnomalyRecord, Severity};
use crate::store::SeriesStore;
use crate::windower::tail_window;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionStats {
    pub pairs_scanned: usize,
    /// Pairs skipped because their metric target is malformed
    pub pairs_skipped: usize,
    pub fetch_failures: usize,
    pub series_scored: usize,
    /// Series with fewer valid points than one window
    pub series_too_short: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionRun {
    /// In grid order
    pub anomalies: Vec<AnomalyRecord>,
    pub stats: DetectionStats,
}

pub struct LiveDetector<'a, S> {
    config: &'a PipelineConfig,
    model: &'a OutlierModel,
    store: S,
}

impl<'a, S: SeriesStore> LiveDetector<'a, S> {
    /// Refuses a model whose input length differs from `window_size`.
    pub fn new(
        config: &'a PipelineConfig,
        model: &'a OutlierModel,
        store: S,
    ) -> Result<Self, ModelError> {
        if model.n_features() != config.window_size {
            return Err(ModelError::ShapeMismatch {
                expected: model.n_features(),
                actual: config.window_size,
            });
        }
        Ok(Self {
            config,
            model,
            store,
        })
    }

    pub fn detect(&self) -> Result<DetectionRun, ModelError> {
        self.detect_at(Utc::now())
    }

    /// Sweep with `now` as the end of the lookback and the anomaly timestamp
    pub fn detect_at(&self, now: DateTime<Utc>) -> Result<DetectionRun, ModelError> {
        let from = lookback_start(now, self.config.lookback_hours);
        let mut run = DetectionRun::default();

        for (machine, aggregator) in self.config.grid() {
            run.stats.pairs_scanned += 1;
            if self.scan_pair(machine, aggregator, from, now, &mut run.stats)? {
                let record = AnomalyRecord::new(machine, aggregator, now, Severity::High);
                info!(machine, aggregator, "anomaly detected");
                run.anomalies.push(record);
                run.stats.anomalies += 1;
            }
        }

        info!(
            pairs = run.stats.pairs_scanned,
            anomalies = run.stats.anomalies,
            fetch_failures = run.stats.fetch_failures,
            "live sweep finished"
        );
        Ok(run)
    }

    /// True when some series of the pair scores as an outlier
    fn scan_pair(
        &self,
        machine: &str,
        aggregator: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        stats: &mut DetectionStats,
    ) -> Result<bool, ModelError> {
        let target = match self.config.target_for(machine, aggregator) {
            Ok(t) => t,
            Err(e) => {
                warn!(machine, aggregator, error = %e, "skipping pair");
                stats.pairs_skipped += 1;
                return Ok(false);
            }
        };

        debug!(machine, aggregator, %target, "querying");
        let series = match self.store.fetch(target.as_str(), from, until) {
            Ok(series) => series,
            Err(e) => {
                warn!(machine, aggregator, error = %e, "fetch failed, treating as no data");
                stats.fetch_failures += 1;
                return Ok(false);
            }
        };

        for s in &series {
            let Some(window) = tail_window(&s.values(), self.config.window_size) else {
                stats.series_too_short += 1;
                continue;
            };
            stats.series_scored += 1;
            if self.model.predict_window(&window)?.is_outlier() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Start of the lookback; clamped to the earliest representable instant
fn lookback_start(now: DateTime<Utc>, lookback_hours: u64) -> DateTime<Utc> {
    let start = i64::try_from(lookback_hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .and_then(|span| now.checked_sub_signed(span));
    start.unwrap_or_else(|| {
        warn!(lookback_hours, "lookback out of range, clamping");
        DateTime::<Utc>::MIN_UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::series::{RawValue, SeriesPoint, TimeSeries};
    use crate::windower::sliding_windows;
    use chrono::{Duration, TimeZone};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Canned responses keyed by target; unknown targets fail
    #[derive(Default)]
    struct FakeStore {
        responses: HashMap<String, Vec<Vec<Option<f64>>>>,
        calls: RefCell<Vec<String>>,
    }

    impl SeriesStore for FakeStore {
        fn fetch(
            &self,
            target: &str,
            from: DateTime<Utc>,
            _until: DateTime<Utc>,
        ) -> Result<Vec<TimeSeries>, FetchError> {
            self.calls.borrow_mut().push(target.to_string());
            let series = self
                .responses
                .get(target)
                .ok_or_else(|| FetchError::Status(503))?;
            Ok(series
                .iter()
                .map(|values| {
                    let points = values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| SeriesPoint {
                            timestamp: from + Duration::hours(i as i64),
                            value: v.map(RawValue::Number),
                        })
                        .collect();
                    TimeSeries::new(target, points)
                })
                .collect())
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            machines: vec!["m1".into(), "m2".into()],
            aggregators: vec!["Agg.hour".into(), "Agg.day".into()],
            ..Default::default()
        }
    }

    /// Fitted on windows of an i.i.d. lag-ratio series around 1%
    fn model() -> OutlierModel {
        let mut rng = StdRng::seed_from_u64(17);
        let noise = Normal::new(0.01, 0.002).unwrap();
        let series: Vec<Option<f64>> = (0..600).map(|_| Some(noise.sample(&mut rng))).collect();
        OutlierModel::fit(&sliding_windows(&series, 24), &Default::default()).unwrap()
    }

    fn target(config: &PipelineConfig, machine: &str, aggregator: &str) -> String {
        config.target_for(machine, aggregator).unwrap().to_string()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_rejects_mismatched_window_size() {
        let config = PipelineConfig {
            window_size: 12,
            ..config()
        };
        let model = model();
        assert!(matches!(
            LiveDetector::new(&config, &model, FakeStore::default()),
            Err(ModelError::ShapeMismatch {
                expected: 24,
                actual: 12
            })
        ));
    }

    #[test]
    fn test_first_outlier_series_wins() {
        let config = config();
        let model = model();
        let mut store = FakeStore::default();
        let spike = vec![Some(50.0); 24];
        store.responses.insert(
            target(&config, "m1", "Agg.hour"),
            vec![vec![Some(0.01); 5], spike.clone(), spike],
        );

        let detector = LiveDetector::new(&config, &model, &store).unwrap();
        let run = detector.detect_at(now()).unwrap();

        assert_eq!(run.anomalies.len(), 1);
        let record = &run.anomalies[0];
        assert_eq!(record.machine, "m1");
        assert_eq!(record.aggregator, "Agg.hour");
        assert_eq!(record.severity, Severity::High);
        assert_eq!(record.timestamp, now());
        // the third series is never scored
        assert_eq!(run.stats.series_too_short, 1);
        assert_eq!(run.stats.series_scored, 1);
    }

    #[test]
    fn test_fetch_failure_is_not_fatal() {
        let config = config();
        let model = model();
        let mut store = FakeStore::default();
        for (m, a) in config.grid() {
            if (m, a) != ("m1", "Agg.day") {
                store
                    .responses
                    .insert(target(&config, m, a), vec![vec![Some(50.0); 24]]);
            }
        }

        let run = LiveDetector::new(&config, &model, &store)
            .unwrap()
            .detect_at(now())
            .unwrap();

        assert_eq!(run.stats.fetch_failures, 1);
        assert_eq!(run.stats.pairs_scanned, 4);
        assert_eq!(run.anomalies.len(), 3);
        assert!(
            !run.anomalies
                .iter()
                .any(|r| r.machine == "m1" && r.aggregator == "Agg.day")
        );
        let order: Vec<_> = run
            .anomalies
            .iter()
            .map(|r| (r.machine.as_str(), r.aggregator.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("m1", "Agg.hour"), ("m2", "Agg.hour"), ("m2", "Agg.day")]
        );
    }

    #[test]
    fn test_short_and_gappy_series_are_skipped() {
        let config = PipelineConfig {
            machines: vec!["m1".into()],
            aggregators: vec!["Agg.hour".into()],
            ..Default::default()
        };
        let model = model();
        let mut store = FakeStore::default();
        let mut gappy = vec![Some(50.0); 30];
        for v in gappy.iter_mut().step_by(2) {
            *v = None;
        }
        store
            .responses
            .insert(target(&config, "m1", "Agg.hour"), vec![vec![Some(50.0); 10], gappy]);

        let run = LiveDetector::new(&config, &model, &store)
            .unwrap()
            .detect_at(now())
            .unwrap();
        assert!(run.anomalies.is_empty());
        assert_eq!(run.stats.series_too_short, 2);
    }

    #[test]
    fn test_malformed_aggregator_skips_pair() {
        let config = PipelineConfig {
            machines: vec!["m1".into()],
            aggregators: vec!["NoGroup".into(), "Agg.hour".into()],
            ..Default::default()
        };
        let model = model();
        let store = FakeStore::default();

        let run = LiveDetector::new(&config, &model, &store)
            .unwrap()
            .detect_at(now())
            .unwrap();
        assert_eq!(run.stats.pairs_skipped, 1);
        assert_eq!(store.calls.borrow().len(), 1);
    }

    #[test]
    fn test_oversized_lookback_is_clamped() {
        let config = PipelineConfig {
            machines: vec!["m1".into()],
            aggregators: vec!["Agg.hour".into()],
            lookback_hours: 10_000_000_000_000,
            ..Default::default()
        };
        let model = model();
        let store = FakeStore::default();

        let run = LiveDetector::new(&config, &model, &store)
            .unwrap()
            .detect_at(now())
            .unwrap();
        assert_eq!(run.stats.fetch_failures, 1);
        assert_eq!(lookback_start(now(), 24), now() - Duration::hours(24));
        assert_eq!(lookback_start(now(), u64::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
