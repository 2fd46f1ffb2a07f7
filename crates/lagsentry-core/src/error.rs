//! Error Types per Pipeline Boundary
//!
//! Each component returns its own error enum. Callers decide whether a
//! failure skips one unit (a table, a grid cell, a record) or aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unusable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("malformed metric target for {machine} / {aggregator}: {reason}")]
    MalformedTarget {
        machine: String,
        aggregator: String,
        reason: &'static str,
    },
}

/// Failure to load or interpret a tabular snapshot
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read csv {name}: {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },

    #[error("table {0} has no header row")]
    MissingHeader(String),

    #[error("table {0} has no time column")]
    NoTimeColumn(String),
}

/// Failure to pull a series from the metrics store.
///
/// Always treated as "no data" by the pipeline; never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("metrics store returned HTTP {0}")]
    Status(u16),

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Outlier model failures
#[derive(Debug, Error)]
pub enum ModelError {
    /// Input length does not match the trained feature count. This is a
    /// wiring bug and is never coerced.
    #[error("model expects {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("cannot fit a model on an empty corpus")]
    EmptyCorpus,

    #[error("invalid model parameters: {0}")]
    InvalidParams(String),

    #[error("model artifact i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model artifact codec: {0}")]
    Codec(String),

    #[error("unsupported model artifact version {found} (max supported: {max_supported})")]
    UnsupportedVersion { found: u32, max_supported: u32 },

    #[error("model artifact checksum mismatch")]
    ChecksumMismatch,
}

/// Fatal training failures. No artifact is produced when one occurs.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("failed to list training tables: {0}")]
    Corpus(#[from] TableError),

    #[error("no table in the corpus has a parseable time column")]
    NoLoadableTables,

    #[error("no sliding window of length {window_size} could be built from the corpus")]
    NoWindows { window_size: usize },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Failure to classify one batch snapshot; the batch is skipped
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Failure to read or write the anomaly record file
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("record store i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record store json on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
