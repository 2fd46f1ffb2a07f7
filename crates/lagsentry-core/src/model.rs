//! Outlier Model and its on-disk artifact
//!
//! `OutlierModel` is the only thing the live detector and the threshold
//! escalator know about scoring. It is created once by training, written
//! as a versioned, checksummed artifact and loaded read-only afterwards.

use crate::config::ModelParams;
use crate::error::ModelError;
use crate::forest::IsolationForest;
use crate::windower::Window;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version for artifact format migrations
pub const ARTIFACT_VERSION: u32 = 1;

/// Binary decision for one input row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Normal,
    Outlier,
}

impl Label {
    pub fn is_outlier(self) -> bool {
        matches!(self, Self::Outlier)
    }

    /// `1` for normal, `-1` for outlier
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Normal => 1,
            Self::Outlier => -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierModel {
    forest: IsolationForest,
    /// Positional names `t-0 .. t-{n-1}`, also used to align tabular rows
    feature_names: Vec<String>,
}

impl OutlierModel {
    /// Fit on a pooled window corpus; all windows must share one length.
    pub fn fit(windows: &[Window], params: &ModelParams) -> Result<Self, ModelError> {
        let rows: Vec<&[f64]> = windows.iter().map(Window::as_slice).collect();
        let forest = IsolationForest::fit(&rows, params)?;
        let feature_names = (0..forest.n_features()).map(|i| format!("t-{}", i)).collect();
        Ok(Self {
            forest,
            feature_names,
        })
    }

    pub fn n_features(&self) -> usize {
        self.forest.n_features()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn check_shape(&self, row: &[f64]) -> Result<(), ModelError> {
        if row.len() != self.n_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features(),
                actual: row.len(),
            });
        }
        Ok(())
    }

    /// Signed distance to the fitted threshold; negative means outlier
    pub fn decision_function(&self, row: &[f64]) -> Result<f64, ModelError> {
        self.check_shape(row)?;
        Ok(self.forest.decision_function(row))
    }

    pub fn predict(&self, row: &[f64]) -> Result<Label, ModelError> {
        if self.decision_function(row)? < 0.0 {
            Ok(Label::Outlier)
        } else {
            Ok(Label::Normal)
        }
    }

    pub fn predict_window(&self, window: &Window) -> Result<Label, ModelError> {
        self.predict(window.as_slice())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        let payload = bincode::serialize(self).map_err(|e| ModelError::Codec(e.to_string()))?;
        let artifact = ModelArtifact {
            version: ARTIFACT_VERSION,
            checksum: xxhash_rust::xxh3::xxh3_64(&payload),
            payload,
        };
        bincode::serialize(&artifact).map_err(|e| ModelError::Codec(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let artifact: ModelArtifact =
            bincode::deserialize(bytes).map_err(|e| ModelError::Codec(e.to_string()))?;

        if artifact.version > ARTIFACT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: artifact.version,
                max_supported: ARTIFACT_VERSION,
            });
        }
        if xxhash_rust::xxh3::xxh3_64(&artifact.payload) != artifact.checksum {
            return Err(ModelError::ChecksumMismatch);
        }

        bincode::deserialize(&artifact.payload).map_err(|e| ModelError::Codec(e.to_string()))
    }

    /// Write the artifact, replacing any previous file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }
}

/// Envelope written to disk
#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    version: u32,
    /// xxh3-64 of `payload`
    checksum: u64,
    /// bincode-encoded [`OutlierModel`]
    payload: Vec<u8>,
}
