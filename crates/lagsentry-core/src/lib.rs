//! # lagsentry-core - Aggregator Lag Anomaly Detection
//!
//! Detects aggregators falling behind across a fleet of machines, from the
//! `agg_length_behind_ratio` series in a Graphite-compatible metrics store
//! and from batch lag snapshots.
//!
//! ## Architecture
//!
//! ```text
//! historical CSV tables ──► TrainingPipeline ──► OutlierModel artifact
//!                                                     │
//!        SeriesStore ──► LiveDetector (grid sweep) ◄──┤
//!             │                │                      │
//!             │         AnomalyRecord list            │
//!             │                │                      │
//!             └──────► AnomalyHydrator                │
//!                                                     │
//! batch lag snapshots ──► ThresholdEscalator ◄────────┘
//!                      (breach levels, meta-alert, per-row scores)
//! ```
//!
//! ## Key Design Principles
//!
//! 1. **One feature representation** - training and live scoring both build
//!    windows through [`windower`]; a detector refuses a model whose input
//!    length differs from the configured window.
//!
//! 2. **No imputation** - absent or unparseable values drop the window that
//!    contains them instead of being filled.
//!
//! 3. **Per-unit failure isolation** - a failed fetch or malformed target
//!    costs one grid cell or record, never the run. Shape mismatches are
//!    wiring bugs and abort.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lagsentry_core::{
//!     DirectoryCorpus, GraphiteConfig, GraphiteStore, LiveDetector, PipelineConfig,
//!     TrainingPipeline,
//! };
//!
//! let config = PipelineConfig::from_json_file("lagsentry.json")?;
//! let trained = TrainingPipeline::new(config.clone()).train(&DirectoryCorpus::new("data"))?;
//!
//! let store = GraphiteStore::new(GraphiteConfig::default())?;
//! let run = LiveDetector::new(&config, &trained.model, store)?.detect()?;
//! println!("{} anomalies", run.anomalies.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod escalator;
pub mod forest;
pub mod hydrator;
pub mod model;
pub mod record;
pub mod series;
pub mod store;
pub mod table;
pub mod training;
pub mod windower;

pub use config::{MetricTarget, ModelParams, PipelineConfig};
pub use detector::{DetectionRun, DetectionStats, LiveDetector};
pub use error::{
    ConfigError, EscalationError, FetchError, ModelError, RecordStoreError, TableError,
    TrainingError,
};
pub use escalator::{BatchReport, BreachLevel, BreachSummary, RowClassification, ThresholdEscalator};
pub use hydrator::{AnomalyHydrator, compute_stats};
pub use model::{Label, OutlierModel};
pub use record::{
    AnomalyRecord, Hydration, Severity, load_records, rank_by_max_value, save_records,
};
pub use series::{RawValue, SeriesPoint, TimeSeries};
pub use store::{GraphiteConfig, GraphiteStore, SeriesStore};
pub use table::{CorpusProvider, DirectoryCorpus, InMemoryCorpus, RawTable};
pub use training::{TrainedModel, TrainingPipeline, TrainingReport};
pub use windower::Window;
