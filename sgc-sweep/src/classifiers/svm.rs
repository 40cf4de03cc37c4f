//! Linear support vector machine
//!
//! L2-regularized hinge loss solved by dual coordinate descent. The bias is
//! learned as the weight of an augmented constant feature (so it is lightly
//! regularized too). Coordinates are visited in a seeded random order each
//! pass; the solver stops when the projected gradient spread drops below the
//! tolerance or after `max_iter` passes.

use super::{check_predict_input, check_training_data, Classifier, Importances};
use crate::error::FoldFitError;
use crate::types::SvmParams;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::trace;

/// Value of the augmented bias feature
const BIAS: f64 = 1.0;

pub struct LinearSvm {
    params: SvmParams,
    classes: Vec<String>,
    /// Coefficients oriented towards `classes[1]`
    coef: Option<Array1<f64>>,
    intercept: f64,
}

impl LinearSvm {
    pub fn new(params: SvmParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            coef: None,
            intercept: 0.0,
        }
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coef.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Signed distance-like score; positive favors `classes[1]`
    pub fn decision(&self, row: ArrayView1<f64>) -> Option<f64> {
        self.coef.as_ref().map(|w| w.dot(&row) + self.intercept)
    }
}

impl Classifier for LinearSvm {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[String]) -> Result<(), FoldFitError> {
        if !(self.params.c > 0.0) || !(self.params.tolerance > 0.0) || self.params.max_iter == 0 {
            return Err(FoldFitError::InvalidParameter(format!(
                "c={} tolerance={} max_iter={}",
                self.params.c, self.params.tolerance, self.params.max_iter
            )));
        }
        let data = check_training_data(&x, y)?;
        let (n, d) = x.dim();
        let c = self.params.c;

        let sign: Vec<f64> = data
            .positive
            .iter()
            .map(|&p| if p { 1.0 } else { -1.0 })
            .collect();
        let q_diag: Vec<f64> = x
            .rows()
            .into_iter()
            .map(|row| row.dot(&row) + BIAS * BIAS)
            .collect();

        let mut alpha = vec![0.0; n];
        let mut w = Array1::<f64>::zeros(d);
        let mut b = 0.0;
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);

        let mut passes = 0;
        while passes < self.params.max_iter {
            passes += 1;
            order.shuffle(&mut rng);

            let mut pg_max = f64::NEG_INFINITY;
            let mut pg_min = f64::INFINITY;
            for &i in &order {
                let row = x.row(i);
                let g = sign[i] * (w.dot(&row) + b * BIAS) - 1.0;

                let pg = if alpha[i] == 0.0 {
                    g.min(0.0)
                } else if alpha[i] == c {
                    g.max(0.0)
                } else {
                    g
                };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);

                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (old - g / q_diag[i]).clamp(0.0, c);
                    let step = (alpha[i] - old) * sign[i];
                    w.scaled_add(step, &row);
                    b += step * BIAS;
                }
            }

            if pg_max - pg_min <= self.params.tolerance {
                break;
            }
        }
        trace!(passes, "SVM dual coordinate descent finished");

        self.classes = data.classes;
        self.coef = Some(w);
        self.intercept = b * BIAS;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<String>, FoldFitError> {
        check_predict_input(&x, self.coef.as_ref().map(|w| w.len()))?;
        x.rows()
            .into_iter()
            .map(|row| match self.decision(row) {
                Some(score) if score > 0.0 => Ok(self.classes[1].clone()),
                Some(_) => Ok(self.classes[0].clone()),
                None => Err(FoldFitError::NotFitted),
            })
            .collect()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn importances(&self) -> Importances {
        match &self.coef {
            Some(w) => Importances::Signed(w.to_vec()),
            None => Importances::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::tests::separable;

    #[test]
    fn test_coefficient_sign_follows_sorted_classes() {
        let (x, y) = separable();
        let mut svm = LinearSvm::new(SvmParams::default());
        svm.fit(x.view(), &y).unwrap();

        // Class "b" (classes[1]) sits at low values of feature 0
        let coef = svm.coefficients().unwrap();
        assert!(coef[0] < 0.0);
        match svm.importances() {
            Importances::Signed(values) => assert_eq!(values.len(), 2),
            other => panic!("expected signed importances, got {:?}", other),
        }
    }

    #[test]
    fn test_predict_follows_decision_sign() {
        let (x, y) = separable();
        let mut svm = LinearSvm::new(SvmParams::default());
        assert!(svm.decision(x.row(0)).is_none());
        svm.fit(x.view(), &y).unwrap();

        let predicted = svm.predict(x.view()).unwrap();
        for (row, label) in x.rows().into_iter().zip(&predicted) {
            let score = svm.decision(row).unwrap();
            let expected = if score > 0.0 { "b" } else { "a" };
            assert_eq!(label, expected);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (x, y) = separable();
        let mut first = LinearSvm::new(SvmParams::default());
        let mut second = LinearSvm::new(SvmParams::default());
        first.fit(x.view(), &y).unwrap();
        second.fit(x.view(), &y).unwrap();
        assert_eq!(first.coefficients(), second.coefficients());
        assert_eq!(first.intercept(), second.intercept());
    }

    #[test]
    fn test_rejects_invalid_c() {
        let (x, y) = separable();
        let mut svm = LinearSvm::new(SvmParams {
            c: 0.0,
            ..SvmParams::default()
        });
        assert!(matches!(
            svm.fit(x.view(), &y),
            Err(FoldFitError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_feature_count_checked_at_predict() {
        let (x, y) = separable();
        let mut svm = LinearSvm::new(SvmParams::default());
        svm.fit(x.view(), &y).unwrap();
        let err = svm.predict(ndarray::array![[1.0]].view()).unwrap_err();
        assert_eq!(
            err,
            FoldFitError::FeatureCountMismatch {
                expected: 2,
                found: 1
            }
        );
    }
}
