//! Stratified cross-validation of one evaluation run
//!
//! **Per fold:**
//! 1. Fit a fresh classifier on the training rows
//! 2. Score the held-out rows with the contrast's class1 as positive label
//! 3. Predict every example of the draw (training rows included, so these
//!    predictions are leaky and only feed diagnostics)
//! 4. Capture importances oriented so positive values favor class1
//!
//! A fold that cannot be fitted is recorded as failed; the run only fails
//! when no fold could be fitted.

use crate::classifiers::{self, Importances};
use crate::error::{FoldFitError, SweepError, SweepResult};
use crate::features::FeatureLoader;
use crate::metrics::BinaryMetrics;
use crate::selection::ResamplingDraw;
use crate::types::{EvaluationRun, Provenance};
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ============================================================================
// Stratified k-fold
// ============================================================================

/// Stratified fold assignment
///
/// Members of each class (classes in sorted order, members in draw order,
/// optionally shuffled) are dealt round-robin over the folds, continuing the
/// rotation from one class to the next so fold sizes differ by at most one.
#[derive(Debug, Clone)]
pub struct StratifiedKFold {
    k: usize,
    shuffle: bool,
    seed: u64,
}

/// Row indices of one fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl StratifiedKFold {
    pub fn new(k: usize, shuffle: bool, seed: u64) -> Self {
        Self { k, shuffle, seed }
    }

    /// Fold index of every example
    ///
    /// # Errors
    /// `Configuration` if `k < 2` or `k` exceeds the smallest class size
    pub fn assign(&self, labels: &[String]) -> SweepResult<Vec<usize>> {
        if self.k < 2 {
            return Err(SweepError::Configuration(format!(
                "Cross-validation needs at least 2 folds (got {})",
                self.k
            )));
        }

        let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            members.entry(label.as_str()).or_default().push(i);
        }
        if let Some((label, smallest)) = members.iter().min_by_key(|(_, m)| m.len()) {
            if smallest.len() < self.k {
                return Err(SweepError::Configuration(format!(
                    "{} folds requested but class '{}' has only {} examples",
                    self.k,
                    label,
                    smallest.len()
                )));
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut assignment = vec![0; labels.len()];
        let mut offset = 0;
        for indices in members.values_mut() {
            if self.shuffle {
                indices.shuffle(&mut rng);
            }
            for (j, &i) in indices.iter().enumerate() {
                assignment[i] = (offset + j) % self.k;
            }
            offset = (offset + indices.len()) % self.k;
        }
        Ok(assignment)
    }

    /// Train/test indices per fold, fold 0 first; indices ascend within each
    pub fn splits(&self, labels: &[String]) -> SweepResult<Vec<FoldSplit>> {
        let assignment = self.assign(labels)?;
        Ok((0..self.k)
            .map(|fold| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..labels.len()).partition(|&i| assignment[i] == fold);
                FoldSplit { train, test }
            })
            .collect())
    }
}

// ============================================================================
// Run results
// ============================================================================

/// Outcome of one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FoldOutcome {
    Fitted {
        metrics: BinaryMetrics,
        /// One prediction per draw example, in draw order
        predictions: Vec<String>,
        /// Per feature, positive = evidence for class1 (SVM); absent for KNN
        #[serde(default, skip_serializing_if = "Option::is_none")]
        importances: Option<Vec<f64>>,
    },
    Failed {
        error: FoldFitError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub outcome: FoldOutcome,
}

impl FoldResult {
    pub fn is_fitted(&self) -> bool {
        matches!(self.outcome, FoldOutcome::Fitted { .. })
    }
}

/// Everything one run contributes to the result tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvaluation {
    pub provenance: Provenance,
    /// Draw ids, sorted
    pub ids: Vec<String>,
    /// Draw labels aligned with `ids`
    pub true_labels: Vec<String>,
    /// Feature names (column order of the importances)
    pub feature_names: Vec<String>,
    /// Ordered by fold index
    pub folds: Vec<FoldResult>,
}

impl RunEvaluation {
    pub fn failed_folds(&self) -> usize {
        self.folds.iter().filter(|f| !f.is_fitted()).count()
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Runs stratified cross-validation for grid cells
pub struct Evaluator<'a> {
    loader: &'a FeatureLoader,
    folds: usize,
    shuffle: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(loader: &'a FeatureLoader, folds: usize, shuffle: bool) -> Self {
        Self {
            loader,
            folds,
            shuffle,
        }
    }

    /// Evaluate `run` on its draw
    ///
    /// # Errors
    /// - `MissingFeatureSet` if the key's matrix does not exist
    /// - `Configuration` for draw ids absent from the matrix or an invalid fold count
    /// - `FoldFit` if every fold failed to fit
    pub fn evaluate(&self, run: &EvaluationRun, draw: &ResamplingDraw) -> SweepResult<RunEvaluation> {
        if draw.contrast != run.contrast || draw.repetition != run.repetition {
            return Err(SweepError::Configuration(format!(
                "Draw {} rep {} does not belong to run {}",
                draw.contrast,
                draw.repetition,
                run.key()
            )));
        }

        let matrix = self.loader.get(&run.key)?;
        let x = matrix.reindex(&draw.ids).map_err(|e| {
            SweepError::Configuration(format!("Feature set {}: {}", run.key, e))
        })?;
        let splits =
            StratifiedKFold::new(self.folds, self.shuffle, draw.seed).splits(&draw.labels)?;

        let mut folds = Vec::with_capacity(splits.len());
        for (fold, split) in splits.iter().enumerate() {
            let outcome = match self.evaluate_fold(run, draw, &x, split) {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(run = %run.key(), fold, error = %error, "Fold fit failed");
                    FoldOutcome::Failed { error }
                }
            };
            folds.push(FoldResult { fold, outcome });
        }

        let fitted = folds.iter().filter(|f| f.is_fitted()).count();
        if fitted == 0 {
            let last = folds
                .iter()
                .rev()
                .find_map(|f| match &f.outcome {
                    FoldOutcome::Failed { error } => Some(error.clone()),
                    FoldOutcome::Fitted { .. } => None,
                })
                .unwrap_or(FoldFitError::EmptyTrainingSet);
            return Err(SweepError::FoldFit {
                folds: folds.len(),
                last,
            });
        }
        debug!(run = %run.key(), fitted, total = folds.len(), "Run evaluated");

        Ok(RunEvaluation {
            provenance: run.provenance(),
            ids: draw.ids.clone(),
            true_labels: draw.labels.clone(),
            feature_names: matrix.feature_names().to_vec(),
            folds,
        })
    }

    fn evaluate_fold(
        &self,
        run: &EvaluationRun,
        draw: &ResamplingDraw,
        x: &Array2<f64>,
        split: &FoldSplit,
    ) -> Result<FoldOutcome, FoldFitError> {
        let train_x = x.select(Axis(0), &split.train);
        let train_y: Vec<String> = split.train.iter().map(|&i| draw.labels[i].clone()).collect();

        let mut model = classifiers::build(&run.classifier);
        model.fit(train_x.view(), &train_y)?;

        let predictions = model.predict(x.view())?;
        let test_truth: Vec<&str> = split.test.iter().map(|&i| draw.labels[i].as_str()).collect();
        let test_predicted: Vec<&str> =
            split.test.iter().map(|&i| predictions[i].as_str()).collect();
        let metrics = BinaryMetrics::compute(&test_truth, &test_predicted, &run.contrast.class1);

        let importances = match model.importances() {
            Importances::Signed(coef) => {
                let classes = model.classes();
                let class1 = &run.contrast.class1;
                if classes.get(1) == Some(class1) {
                    Some(coef)
                } else if classes.first() == Some(class1) {
                    Some(coef.into_iter().map(|c| -c).collect())
                } else {
                    return Err(FoldFitError::UnknownPositiveLabel(class1.clone()));
                }
            }
            Importances::Impurity(values) => Some(values),
            Importances::Absent => None,
        };

        Ok(FoldOutcome::Fitted {
            metrics,
            predictions,
            importances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSource;
    use crate::types::{
        ClassSpec, ClassifierSpec, Normalization, ParameterKey, SubgenreContrast, SvmParams,
    };
    use sgc_common::FeatureMatrix;
    use std::sync::Arc;

    struct NoFeatures;

    impl FeatureSource for NoFeatures {
        fn load(&self, key: &ParameterKey) -> SweepResult<FeatureMatrix> {
            Err(SweepError::Configuration(format!("no matrix for {}", key)))
        }
    }

    /// First fold of a ten-example draw: five `high` rows at large values of
    /// feature 0, five `low` rows near zero
    fn svm_fold(high: &str, low: &str, class1: &str) -> Result<FoldOutcome, FoldFitError> {
        let class2 = if class1 == low { high } else { low };
        let contrast =
            SubgenreContrast::new("subgenre", class1, ClassSpec::Label(class2.to_string()));
        let run = EvaluationRun {
            index: 0,
            contrast_index: 0,
            contrast: contrast.clone(),
            key: ParameterKey::Mfw {
                size: 100,
                token_unit: "word".to_string(),
                normalization: Normalization::Raw,
            },
            classifier: ClassifierSpec::Svm(SvmParams::default()),
            repetition: 0,
        };

        let mut x = Array2::<f64>::zeros((10, 2));
        for i in 0..5 {
            x[[i, 0]] = 5.0 + 0.1 * i as f64;
            x[[i, 1]] = 1.0;
            x[[i + 5, 0]] = 0.1 * i as f64;
            x[[i + 5, 1]] = 1.0 + 0.05 * i as f64;
        }
        let draw = ResamplingDraw {
            contrast,
            repetition: 0,
            seed: 0,
            ids: (0..10).map(|i| format!("n{}", i)).collect(),
            labels: labels(&[(high, 5), (low, 5)]),
        };
        let split = StratifiedKFold::new(5, false, 0)
            .splits(&draw.labels)
            .unwrap()
            .remove(0);

        let loader = FeatureLoader::new(Arc::new(NoFeatures));
        Evaluator::new(&loader, 5, false).evaluate_fold(&run, &draw, &x, &split)
    }

    fn first_importance(outcome: FoldOutcome) -> f64 {
        match outcome {
            FoldOutcome::Fitted {
                importances: Some(values),
                ..
            } => values[0],
            other => panic!("expected signed importances, got {:?}", other),
        }
    }

    #[test]
    fn test_svm_importances_point_to_class1_in_either_class_order() {
        // class1 sorts first: "a" < "b"
        assert!(first_importance(svm_fold("a", "b", "a").unwrap()) > 0.0);
        // class1 sorts second: "b" < "c"
        assert!(first_importance(svm_fold("c", "b", "c").unwrap()) > 0.0);
        // class1 on the low side flips the sign
        assert!(first_importance(svm_fold("a", "b", "b").unwrap()) < 0.0);
        assert!(first_importance(svm_fold("c", "b", "b").unwrap()) < 0.0);
    }

    #[test]
    fn test_svm_fold_predicts_every_draw_example() {
        match svm_fold("a", "b", "a").unwrap() {
            FoldOutcome::Fitted {
                metrics,
                predictions,
                ..
            } => {
                assert_eq!(predictions.len(), 10);
                assert_eq!(predictions[0], "a");
                assert_eq!(predictions[9], "b");
                assert_eq!((metrics.support_pos, metrics.support_neg), (1, 1));
            }
            other => panic!("expected a fitted fold, got {:?}", other),
        }
    }

    #[test]
    fn test_class1_missing_from_fitted_classes_fails_the_fold() {
        assert_eq!(
            svm_fold("a", "b", "z").unwrap_err(),
            FoldFitError::UnknownPositiveLabel("z".to_string())
        );
    }

    fn labels(counts: &[(&str, usize)]) -> Vec<String> {
        counts
            .iter()
            .flat_map(|(label, n)| std::iter::repeat(label.to_string()).take(*n))
            .collect()
    }

    #[test]
    fn test_folds_are_stratified_and_cover_everything() {
        let y = labels(&[("a", 10), ("b", 10)]);
        let splits = StratifiedKFold::new(5, false, 0).splits(&y).unwrap();
        assert_eq!(splits.len(), 5);

        let mut seen = vec![0; y.len()];
        for split in &splits {
            assert_eq!(split.test.len(), 4);
            assert_eq!(split.train.len(), 16);
            let a_in_test = split.test.iter().filter(|&&i| y[i] == "a").count();
            assert_eq!(a_in_test, 2);
            for &i in &split.test {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_uneven_classes_keep_fold_sizes_close() {
        let y = labels(&[("a", 3), ("b", 4)]);
        let assignment = StratifiedKFold::new(3, false, 0).assign(&y).unwrap();
        let mut sizes = [0; 3];
        for fold in assignment {
            sizes[fold] += 1;
        }
        let max = sizes.iter().max().unwrap();
        let min = sizes.iter().min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_too_many_folds_is_configuration_error() {
        let y = labels(&[("a", 3), ("b", 10)]);
        let err = StratifiedKFold::new(4, false, 0).assign(&y).unwrap_err();
        assert_eq!(err.kind(), crate::error::RunErrorKind::Configuration);

        let err = StratifiedKFold::new(1, false, 0).assign(&y).unwrap_err();
        assert!(err.to_string().contains("at least 2 folds"));
    }

    #[test]
    fn test_shuffled_assignment_is_seeded() {
        let y = labels(&[("a", 20), ("b", 20)]);
        let first = StratifiedKFold::new(4, true, 9).assign(&y).unwrap();
        let second = StratifiedKFold::new(4, true, 9).assign(&y).unwrap();
        let unshuffled = StratifiedKFold::new(4, false, 9).assign(&y).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, unshuffled);
    }
}
