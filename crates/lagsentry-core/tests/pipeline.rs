//! End-to-end runs over in-memory corpora and a fake metrics store

use chrono::{DateTime, Duration, TimeZone, Utc};
use lagsentry_core::windower::sliding_windows;
use lagsentry_core::{
    AnomalyHydrator, AnomalyRecord, DirectoryCorpus, FetchError, InMemoryCorpus, LiveDetector,
    OutlierModel, PipelineConfig, RawTable, RawValue, SeriesPoint, SeriesStore, Severity,
    ThresholdEscalator, TimeSeries, TrainingPipeline, load_records, save_records,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;

const POINTS: usize = 30;

struct FakeStore {
    series: HashMap<String, Vec<f64>>,
}

impl SeriesStore for FakeStore {
    fn fetch(
        &self,
        target: &str,
        from: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<Vec<TimeSeries>, FetchError> {
        let values = self.series.get(target).ok_or(FetchError::Status(404))?;
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesPoint {
                timestamp: from + Duration::hours(i as i64),
                value: Some(RawValue::Number(*v)),
            })
            .collect();
        Ok(vec![TimeSeries::new(target, points)])
    }
}

fn columns() -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.02, 0.004).unwrap();
    let a = (0..POINTS).map(|_| noise.sample(&mut rng)).collect();
    let b = (0..POINTS).map(|_| noise.sample(&mut rng)).collect();
    (a, b)
}

fn history_table(a: &[f64], b: &[f64]) -> RawTable {
    let base = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let rows = a
        .iter()
        .zip(b)
        .enumerate()
        .map(|(i, (a, b))| {
            vec![
                (base + Duration::hours(i as i64))
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                a.to_string(),
                b.to_string(),
            ]
        })
        .collect();
    RawTable::new(
        "history.csv",
        vec!["Time".into(), "m1 Agg.hour".into(), "m1 Agg.day".into()],
        rows,
    )
}

fn config() -> PipelineConfig {
    PipelineConfig {
        machines: vec!["m1".into()],
        aggregators: vec!["Agg.hour".into(), "Agg.day".into()],
        ..Default::default()
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap()
}

#[test]
fn test_train_then_detect_agree_on_features() {
    let (a, b) = columns();
    let config = config();
    let corpus = InMemoryCorpus::new(vec![history_table(&a, &b)]);
    let trained = TrainingPipeline::new(config.clone()).train(&corpus).unwrap();

    assert_eq!(trained.report.window_count, 2 * (POINTS - 24 + 1));
    assert_eq!(trained.model.n_features(), 24);

    // the live tail of column a is exactly the last pooled training window of a
    let a_opt: Vec<Option<f64>> = a.iter().copied().map(Some).collect();
    let last = sliding_windows(&a_opt, 24).pop().unwrap();
    let expected = trained.model.predict_window(&last).unwrap().is_outlier();

    let mut series = HashMap::new();
    series.insert(config.target_for("m1", "Agg.hour").unwrap().to_string(), a.clone());
    let store = FakeStore { series };

    let run = LiveDetector::new(&config, &trained.model, &store)
        .unwrap()
        .detect_at(now())
        .unwrap();

    // Agg.day is unknown to the store and must not abort the sweep
    assert_eq!(run.stats.pairs_scanned, 2);
    assert_eq!(run.stats.fetch_failures, 1);
    assert_eq!(run.stats.series_scored, 1);
    assert_eq!(run.anomalies.len(), usize::from(expected));
}

#[test]
fn test_disk_artifact_scores_like_fresh_model() {
    let (a, b) = columns();
    let dir = tempfile::tempdir().unwrap();

    let table = history_table(&a, &b);
    let mut csv = String::from("exported by dashboard\n");
    csv.push_str(&table.headers.join(","));
    csv.push('\n');
    for row in &table.rows {
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    std::fs::write(dir.path().join("history.csv"), csv).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a table").unwrap();

    let config = config();
    let from_disk = TrainingPipeline::new(config.clone())
        .train(&DirectoryCorpus::new(dir.path()))
        .unwrap();
    let in_memory = TrainingPipeline::new(config)
        .train_tables(&[table])
        .unwrap();
    assert_eq!(from_disk.report.feature_columns, in_memory.report.feature_columns);
    assert_eq!(from_disk.report.window_count, in_memory.report.window_count);

    let path = dir.path().join("model.bin");
    from_disk.model.save(&path).unwrap();
    let loaded = OutlierModel::load(&path).unwrap();

    let a_opt: Vec<Option<f64>> = a.iter().copied().map(Some).collect();
    for window in sliding_windows(&a_opt, 24) {
        assert_eq!(
            loaded.decision_function(window.as_slice()).unwrap(),
            from_disk.model.decision_function(window.as_slice()).unwrap()
        );
    }
}

#[test]
fn test_hydrate_and_persist_records() {
    let (a, _) = columns();
    let config = config();
    let mut series = HashMap::new();
    series.insert(config.target_for("m1", "Agg.hour").unwrap().to_string(), a.clone());
    let store = FakeStore { series };

    let records = vec![
        AnomalyRecord::new("m1", "Agg.hour", now(), Severity::High),
        AnomalyRecord::new("m1", "Agg.day", now(), Severity::High),
    ];
    let hydrated = AnomalyHydrator::new(&config, &store).hydrate(records);

    let h = hydrated[0].hydration.unwrap();
    let max = a.iter().copied().fold(f64::MIN, f64::max);
    assert_eq!(h.max_value, Some(max));
    assert_eq!(h.valid_pct, 1.0);
    assert!(h.avg_value.unwrap() < max);

    let failed = hydrated[1].hydration.unwrap();
    assert_eq!(failed.max_value, None);
    assert_eq!(failed.valid_pct, 0.0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hydrated_anomalies.json");
    save_records(&path, &hydrated).unwrap();
    assert_eq!(load_records(&path).unwrap(), hydrated);
}

#[test]
fn test_escalation_with_trained_model() {
    let (a, b) = columns();
    let trained = TrainingPipeline::new(config())
        .train_tables(&[history_table(&a, &b)])
        .unwrap();

    let rows = (0..25)
        .map(|i| {
            vec![
                format!("2024-05-01T{:02}:00:00Z", i % 24),
                format!("shard-{}", i % 21),
                if i < 21 { "2000".to_string() } else { "10".to_string() },
            ]
        })
        .collect();
    let snapshot = RawTable::new(
        "lag_snapshot.csv",
        vec!["timestamp".into(), "shard_id".into(), "max_lag_minutes".into()],
        rows,
    );

    let config = config();
    let report = ThresholdEscalator::new(&config, Some(&trained.model))
        .classify(&snapshot)
        .unwrap();

    let breaches = report.breaches.clone().unwrap();
    assert_eq!(breaches.level_1_rows, 21);
    assert_eq!(breaches.breaching_shards, 21);
    assert!(report.meta_alert());
    // the snapshot carries none of the model's positional features
    assert_eq!(report.zero_filled_features.len(), 24);
    assert!(report.rows.iter().all(|r| r.ml_label.is_some()));
}
