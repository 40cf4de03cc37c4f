//! Brute-force k-nearest-neighbors

use super::{check_predict_input, check_training_data, Classifier, Importances};
use crate::error::FoldFitError;
use crate::types::{DistanceMetric, KnnParams};
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::cmp::Ordering;

pub struct KNearestNeighbors {
    params: KnnParams,
    classes: Vec<String>,
    train: Option<Array2<f64>>,
    positive: Vec<bool>,
}

impl KNearestNeighbors {
    pub fn new(params: KnnParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            train: None,
            positive: Vec::new(),
        }
    }

    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.params.metric {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Cosine => {
                let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
                if norm == 0.0 {
                    1.0
                } else {
                    1.0 - a.dot(&b) / norm
                }
            }
        }
    }

    /// Majority vote among the k nearest; a tie goes to the nearest neighbor's class
    fn vote(&self, row: ArrayView1<f64>, train: &Array2<f64>) -> bool {
        let mut neighbors: Vec<(f64, usize)> = train
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, t)| (self.distance(row, t), i))
            .collect();
        neighbors.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let k = self.params.n_neighbors.min(neighbors.len());
        let positive_votes = neighbors[..k]
            .iter()
            .filter(|(_, i)| self.positive[*i])
            .count();
        match (2 * positive_votes).cmp(&k) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.positive[neighbors[0].1],
        }
    }
}

impl Classifier for KNearestNeighbors {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[String]) -> Result<(), FoldFitError> {
        if self.params.n_neighbors == 0 {
            return Err(FoldFitError::InvalidParameter(
                "n_neighbors must be > 0".to_string(),
            ));
        }
        let data = check_training_data(&x, y)?;
        self.classes = data.classes;
        self.positive = data.positive;
        self.train = Some(x.to_owned());
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<String>, FoldFitError> {
        check_predict_input(&x, self.train.as_ref().map(|t| t.ncols()))?;
        let train = self.train.as_ref().ok_or(FoldFitError::NotFitted)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let idx = usize::from(self.vote(row, train));
                self.classes[idx].clone()
            })
            .collect())
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn importances(&self) -> Importances {
        Importances::Absent
    }
}
