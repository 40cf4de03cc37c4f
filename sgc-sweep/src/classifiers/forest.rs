//! Random forest of Gini CART trees
//!
//! **Per tree:** bootstrap sample (with replacement) → recursive binary splits
//! on a random feature subset per node → leaves store the share of
//! `classes[1]` among their samples. The forest predicts `classes[1]` when the
//! mean leaf share exceeds 0.5.
//!
//! Importances are the weighted impurity decrease per feature, normalized to
//! sum to 1 per tree and averaged over the trees that split at least once.

use super::{check_predict_input, check_training_data, Classifier, Importances};
use crate::error::FoldFitError;
use crate::types::ForestParams;
use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        positive_share: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn positive_share(&self, row: ArrayView1<f64>) -> f64 {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf { positive_share } => return *positive_share,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Gini impurity of a node with `pos` positives among `n`
fn gini(pos: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = pos as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

struct TreeBuilder<'a, 'x> {
    x: &'a ArrayView2<'x, f64>,
    positive: &'a [bool],
    params: &'a ForestParams,
    mtry: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl TreeBuilder<'_, '_> {
    /// Grow the subtree for `samples`; returns its node index
    fn grow(&mut self, samples: &mut [usize], depth: usize, rng: &mut ChaCha8Rng) -> usize {
        let n = samples.len();
        let pos = samples.iter().filter(|&&i| self.positive[i]).count();
        let node_index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            positive_share: pos as f64 / n.max(1) as f64,
        });

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if pos == 0 || pos == n || n < self.params.min_samples_split || depth_reached {
            return node_index;
        }

        let Some((feature, threshold, decrease)) = self.best_split(samples, pos, rng) else {
            return node_index;
        };

        samples.sort_unstable_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
        let split_at = samples.partition_point(|&i| self.x[[i, feature]] <= threshold);
        if split_at == 0 || split_at == n {
            return node_index;
        }
        self.importances[feature] += decrease;

        let (left_samples, right_samples) = samples.split_at_mut(split_at);
        let left = self.grow(left_samples, depth + 1, rng);
        let right = self.grow(right_samples, depth + 1, rng);
        self.nodes[node_index] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node_index
    }

    /// Best (feature, threshold, weighted impurity decrease) over a random
    /// feature subset
    fn best_split(
        &self,
        samples: &[usize],
        pos: usize,
        rng: &mut ChaCha8Rng,
    ) -> Option<(usize, f64, f64)> {
        let n = samples.len();
        let parent = n as f64 * gini(pos, n);
        let candidates = rand::seq::index::sample(rng, self.x.ncols(), self.mtry);

        let mut best: Option<(usize, f64, f64)> = None;
        let mut ordered: Vec<(f64, bool)> = Vec::with_capacity(n);
        for feature in candidates.iter() {
            ordered.clear();
            ordered.extend(
                samples
                    .iter()
                    .map(|&i| (self.x[[i, feature]], self.positive[i])),
            );
            ordered.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for split in 1..n {
                if ordered[split - 1].1 {
                    left_pos += 1;
                }
                let (lo, hi) = (ordered[split - 1].0, ordered[split].0);
                if lo == hi {
                    continue;
                }
                let right_pos = pos - left_pos;
                let children = split as f64 * gini(left_pos, split)
                    + (n - split) as f64 * gini(right_pos, n - split);
                let decrease = parent - children;
                if decrease > 1e-12 && best.map_or(true, |(_, _, d)| decrease > d) {
                    best = Some((feature, lo + (hi - lo) / 2.0, decrease));
                }
            }
        }
        best
    }
}

pub struct RandomForest {
    params: ForestParams,
    classes: Vec<String>,
    trees: Vec<Tree>,
    n_features: Option<usize>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            trees: Vec::new(),
            n_features: None,
            importances: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[String]) -> Result<(), FoldFitError> {
        if self.params.n_estimators == 0 || self.params.min_samples_split < 2 {
            return Err(FoldFitError::InvalidParameter(format!(
                "n_estimators={} min_samples_split={}",
                self.params.n_estimators, self.params.min_samples_split
            )));
        }
        let data = check_training_data(&x, y)?;
        let (n, d) = x.dim();
        let mtry = self.params.max_features.resolve(d);
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut importances = vec![0.0; d];
        let mut split_trees = 0usize;
        for _ in 0..self.params.n_estimators {
            let mut samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder {
                x: &x,
                positive: &data.positive,
                params: &self.params,
                mtry,
                nodes: Vec::new(),
                importances: vec![0.0; d],
            };
            builder.grow(&mut samples, 0, &mut rng);

            let total: f64 = builder.importances.iter().sum();
            if total > 0.0 {
                split_trees += 1;
                for (acc, value) in importances.iter_mut().zip(&builder.importances) {
                    *acc += value / total;
                }
            }
            trees.push(Tree {
                nodes: builder.nodes,
            });
        }

        // Single-leaf trees carry no importance information
        if split_trees > 0 {
            for value in &mut importances {
                *value /= split_trees as f64;
            }
        }

        self.classes = data.classes;
        self.trees = trees;
        self.n_features = Some(d);
        self.importances = importances;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<String>, FoldFitError> {
        check_predict_input(&x, self.n_features)?;
        let n_trees = self.trees.len() as f64;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let share: f64 =
                    self.trees.iter().map(|t| t.positive_share(row)).sum::<f64>() / n_trees;
                if share > 0.5 {
                    self.classes[1].clone()
                } else {
                    self.classes[0].clone()
                }
            })
            .collect())
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn importances(&self) -> Importances {
        if self.n_features.is_some() {
            Importances::Impurity(self.importances.clone())
        } else {
            Importances::Absent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::tests::separable;
    use crate::types::MaxFeatures;
    use approx::assert_relative_eq;

    fn params() -> ForestParams {
        ForestParams {
            n_estimators: 20,
            max_features: MaxFeatures::All,
            seed: 11,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_importances_favor_informative_feature() {
        let (x, y) = separable();
        let mut forest = RandomForest::new(params());
        forest.fit(x.view(), &y).unwrap();
        assert_eq!(forest.n_trees(), 20);

        match forest.importances() {
            Importances::Impurity(values) => {
                assert!(values.iter().all(|v| *v >= 0.0));
                assert_relative_eq!(values.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
                assert!(values[0] > values[1]);
            }
            other => panic!("expected impurity importances, got {:?}", other),
        }
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = separable();
        let mut first = RandomForest::new(params());
        let mut second = RandomForest::new(params());
        first.fit(x.view(), &y).unwrap();
        second.fit(x.view(), &y).unwrap();
        assert_eq!(first.importances(), second.importances());
    }

    #[test]
    fn test_depth_limit_stops_growth() {
        let (x, y) = separable();
        let mut stump = RandomForest::new(ForestParams {
            max_depth: Some(0),
            ..params()
        });
        stump.fit(x.view(), &y).unwrap();
        assert!(stump.trees.iter().all(|t| t.nodes.len() == 1));
        assert_eq!(stump.importances(), Importances::Impurity(vec![0.0, 0.0]));
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(0, 4), 0.0);
        assert_relative_eq!(gini(2, 4), 0.5);
    }
}
