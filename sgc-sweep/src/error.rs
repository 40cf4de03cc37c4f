//! Error types for sgc-sweep
//!
//! Run-level errors are caught at the evaluation-run boundary and recorded with
//! the run's provenance; they never abort the sweep. Fold-level fit failures
//! ([`FoldFitError`]) only mark their fold as failed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error category used for sweep reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Invalid contrast, key, fold count, or data mismatch
    Configuration,
    /// Backing feature matrix absent
    MissingFeatureSet,
    /// Empty class after balancing
    DegenerateDraw,
    /// Every fold of the run failed to fit
    FoldFit,
}

impl RunErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunErrorKind::Configuration => "configuration",
            RunErrorKind::MissingFeatureSet => "missing_feature_set",
            RunErrorKind::DegenerateDraw => "degenerate_draw",
            RunErrorKind::FoldFit => "fold_fit",
        }
    }
}

/// Sweep error type
#[derive(Debug, Error)]
pub enum SweepError {
    /// Invalid configuration, contrast or parameter key
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Feature matrix file for a parameter key does not exist
    #[error("Missing feature set {key}: {}", path.display())]
    MissingFeatureSet { key: String, path: PathBuf },

    /// One side of a contrast is empty after relabelling and exclusion
    #[error("Degenerate draw for {contrast} (repetition {repetition}): {reason}")]
    DegenerateDraw {
        contrast: String,
        repetition: u32,
        reason: String,
    },

    /// All folds of a run failed to fit
    #[error("All {folds} folds failed to fit; last error: {last}")]
    FoldFit { folds: usize, last: FoldFitError },

    /// Draw-level failure shared by every run that depends on the draw
    #[error(transparent)]
    Draw(Arc<SweepError>),

    /// Run journal could not be read or written
    #[error("Journal error: {0}")]
    Journal(String),

    /// Worker pool could not be built or a worker task died
    #[error("Worker error: {0}")]
    Worker(String),

    /// sgc-common error (metadata, tables, config files)
    #[error("Common error: {0}")]
    Common(#[from] sgc_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Result table write error
    #[error("Table error: {0}")]
    Csv(#[from] csv::Error),
}

impl SweepError {
    /// Reporting category of this error
    pub fn kind(&self) -> RunErrorKind {
        match self {
            SweepError::MissingFeatureSet { .. } => RunErrorKind::MissingFeatureSet,
            SweepError::DegenerateDraw { .. } => RunErrorKind::DegenerateDraw,
            SweepError::FoldFit { .. } => RunErrorKind::FoldFit,
            SweepError::Draw(inner) => inner.kind(),
            _ => RunErrorKind::Configuration,
        }
    }
}

/// Result type for sweep operations
pub type SweepResult<T> = Result<T, SweepError>;

/// Failure to fit a classifier on one fold's training data
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum FoldFitError {
    #[error("training data is empty")]
    EmptyTrainingSet,

    #[error("training data has a single class '{0}'")]
    SingleClass(String),

    #[error("training data has more than two classes: {0:?}")]
    TooManyClasses(Vec<String>),

    #[error("{rows} feature rows but {labels} labels")]
    ShapeMismatch { rows: usize, labels: usize },

    #[error("non-finite feature value at row {row}, column {col}")]
    NonFinite { row: usize, col: usize },

    #[error("invalid hyperparameter: {0}")]
    InvalidParameter(String),

    #[error("positive label '{0}' not among fitted classes")]
    UnknownPositiveLabel(String),

    #[error("classifier has not been fitted")]
    NotFitted,

    #[error("model expects {expected} features, got {found}")]
    FeatureCountMismatch { expected: usize, found: usize },
}
