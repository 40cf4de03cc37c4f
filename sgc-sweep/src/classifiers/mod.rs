//! Binary classifiers behind [`ClassifierSpec`]
//!
//! All classifiers share one realized class order: the lexicographically
//! sorted label set of the training data. Anything oriented towards "the
//! positive class" (SVM coefficient sign, forest leaf probabilities) refers to
//! `classes()[1]`, independent of which label the contrast calls class1.

mod forest;
mod knn;
mod svm;

pub use forest::RandomForest;
pub use knn::KNearestNeighbors;
pub use svm::LinearSvm;

use crate::error::FoldFitError;
use crate::types::ClassifierSpec;
use ndarray::ArrayView2;

/// Per-feature importances reported by a fitted model
#[derive(Debug, Clone, PartialEq)]
pub enum Importances {
    /// Linear coefficients; positive values favor `classes()[1]`
    Signed(Vec<f64>),
    /// Non-negative impurity decrease, summing to 1
    Impurity(Vec<f64>),
    /// The model exposes no importances
    Absent,
}

/// Fit / predict seam shared by every classifier kind
pub trait Classifier: Send {
    /// Fit on `x` (one row per example) and aligned labels `y`
    fn fit(&mut self, x: ArrayView2<f64>, y: &[String]) -> Result<(), FoldFitError>;

    /// Predict one label per row of `x`
    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<String>, FoldFitError>;

    /// Realized class order (sorted); empty before fitting
    fn classes(&self) -> &[String];

    fn importances(&self) -> Importances;
}

/// Build an unfitted classifier for `spec`
pub fn build(spec: &ClassifierSpec) -> Box<dyn Classifier> {
    match spec {
        ClassifierSpec::Svm(params) => Box::new(LinearSvm::new(params.clone())),
        ClassifierSpec::Knn(params) => Box::new(KNearestNeighbors::new(params.clone())),
        ClassifierSpec::Rf(params) => Box::new(RandomForest::new(params.clone())),
    }
}

/// Validated training data
pub(crate) struct TrainingSet {
    /// Sorted pair of class labels
    pub classes: Vec<String>,
    /// Per row: true when the label is `classes[1]`
    pub positive: Vec<bool>,
}

/// Check shape, finiteness and class structure of training data
pub(crate) fn check_training_data(
    x: &ArrayView2<f64>,
    y: &[String],
) -> Result<TrainingSet, FoldFitError> {
    if x.nrows() != y.len() {
        return Err(FoldFitError::ShapeMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    if y.is_empty() || x.ncols() == 0 {
        return Err(FoldFitError::EmptyTrainingSet);
    }
    if let Some(((row, col), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(FoldFitError::NonFinite { row, col });
    }

    let mut classes: Vec<String> = y.to_vec();
    classes.sort();
    classes.dedup();
    match classes.len() {
        1 => return Err(FoldFitError::SingleClass(classes.remove(0))),
        2 => {}
        _ => return Err(FoldFitError::TooManyClasses(classes)),
    }

    let positive = y.iter().map(|label| *label == classes[1]).collect();
    Ok(TrainingSet { classes, positive })
}

/// Check a prediction input against the fitted feature count
pub(crate) fn check_predict_input(
    x: &ArrayView2<f64>,
    n_features: Option<usize>,
) -> Result<(), FoldFitError> {
    let expected = n_features.ok_or(FoldFitError::NotFitted)?;
    if x.ncols() != expected {
        return Err(FoldFitError::FeatureCountMismatch {
            expected,
            found: x.ncols(),
        });
    }
    Ok(())
}
