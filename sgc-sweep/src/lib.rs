//! # sgc-sweep
//!
//! Comparative subgenre-classification experiment harness.
//!
//! **Pipeline:** metadata → balanced resampling draws → grid of
//! (contrast × feature key × classifier × repetition) cells → stratified
//! k-fold evaluation → aggregated score / label / importance tables →
//! comparative summaries.
//!
//! Feature matrices are produced by external tooling and read from disk;
//! classifier hyperparameters arrive fixed in the sweep configuration.

pub mod aggregator;
pub mod classifiers;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod grid;
pub mod journal;
pub mod metrics;
pub mod selection;
pub mod summary;
pub mod sweep;
pub mod types;

pub use config::SweepConfiguration;
pub use error::{FoldFitError, RunErrorKind, SweepError, SweepResult};
pub use sweep::{RunOptions, Sweep, SweepReport};
pub use types::{ClassSpec, ClassifierSpec, EvaluationRun, ParameterKey, SubgenreContrast};
