//! Error types for the scoring core.

use std::path::PathBuf;

use crate::models::Feature;

/// Failure to bring a classifier artifact up at startup.
///
/// Any of these aborts process initialisation; no scoring request is served
/// without a loaded model.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported objective `{0}` (expected binary:logistic or multi:softprob)")]
    UnsupportedObjective(String),

    #[error("unsupported booster `{0}` (expected gbtree)")]
    UnsupportedBooster(String),

    #[error("unsupported class count {0} (expected 0/1 for binary or 3 for multi-class)")]
    UnsupportedClassCount(usize),

    #[error("model expects {found} features, scoring core supplies {expected}")]
    FeatureCountMismatch { expected: usize, found: usize },

    #[error("model feature `{0}` does not name one of the canonical features")]
    UnknownFeature(String),

    #[error("invalid model parameter {name}: `{value}`")]
    InvalidParameter { name: &'static str, value: String },

    #[error("malformed tree {tree}: {reason}")]
    MalformedTree { tree: usize, reason: String },

    #[error("model contains no trees")]
    EmptyEnsemble,
}

/// Per-request failure. Never affects other students in the same batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("invalid feature vector: {feature} {reason}")]
    InvalidFeatureVector { feature: Feature, reason: String },

    #[error("degenerate classifier output: {0}")]
    DegenerateOutput(String),
}

impl ScoringError {
    pub(crate) fn invalid(feature: Feature, reason: impl Into<String>) -> Self {
        Self::InvalidFeatureVector {
            feature,
            reason: reason.into(),
        }
    }
}

/// Rejected engine configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid risk thresholds: low {low} / high {high} (must satisfy 0 <= low < high <= 1)")]
    InvalidThresholds { low: f64, high: f64 },

    #[error("invalid root cause limit: {0} (must be > 0)")]
    InvalidTopK(usize),
}
