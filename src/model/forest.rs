//! Bagged ensemble of CART trees.

use super::ModelError;
use super::tree::{DecisionTree, bootstrap_rows};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    n_classes: usize,
    seed: u64,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit `params.n_trees` trees, each on a bootstrap sample of the rows.
    ///
    /// Labels must be class indices in `0..n_classes`. Per-tree seeds are drawn
    /// up front from a generator seeded with `params.seed`, so the result does
    /// not depend on how rayon schedules the trees.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        params: ForestParams,
    ) -> Result<Self, ModelError> {
        if x.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if x.len() != y.len() {
            return Err(ModelError::LengthMismatch {
                rows: x.len(),
                labels: y.len(),
            });
        }
        let n_features = x[0].len();
        if let Some(row) = x.iter().find(|row| row.len() != n_features) {
            return Err(ModelError::Dimension {
                expected: n_features,
                got: row.len(),
            });
        }
        if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
            return Err(ModelError::LabelOutOfRange { label, n_classes });
        }
        if params.n_trees == 0 {
            return Err(ModelError::Corrupt("a forest needs at least one tree".into()));
        }

        let max_features = ((n_features as f64).sqrt() as usize).max(1);
        let mut master = StdRng::seed_from_u64(params.seed);
        let tree_seeds: Vec<u64> = (0..params.n_trees).map(|_| master.next_u64()).collect();

        let trees: Vec<DecisionTree> = tree_seeds
            .par_iter()
            .map(|&tree_seed| {
                let mut rng = StdRng::seed_from_u64(tree_seed);
                let rows = bootstrap_rows(x.len(), &mut rng);
                DecisionTree::fit(x, y, rows, n_classes, max_features, &mut rng)
            })
            .collect();

        log::debug!(
            "Fitted {} trees on {} rows ({} features, {} classes, max depth {})",
            trees.len(),
            x.len(),
            n_features,
            n_classes,
            trees.iter().map(DecisionTree::depth).max().unwrap_or(0)
        );

        Ok(Self {
            n_features,
            n_classes,
            seed: params.seed,
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean of the per-tree leaf distributions.
    pub fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0_f64; self.n_classes];
        for tree in &self.trees {
            for (p, v) in proba.iter_mut().zip(tree.predict_proba(features)) {
                *p += v;
            }
        }
        let n = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    /// Most probable class index; the lowest index wins ties.
    pub fn predict(&self, features: &[f64]) -> usize {
        argmax(&self.predict_proba(features))
    }

    /// Fraction of rows whose predicted class equals the label.
    pub fn accuracy(&self, x: &[Vec<f64>], y: &[usize]) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let correct = x
            .iter()
            .zip(y)
            .filter(|(row, label)| self.predict(row) == **label)
            .count();
        correct as f64 / x.len() as f64
    }

    /// Check the structure of a forest read back from storage.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::Corrupt("forest has no trees".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.n_classes)
                .map_err(|e| ModelError::Corrupt(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well separated blobs in 3 dimensions.
    fn blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.1;
            x.push(vec![1.0 + jitter, 10.0 - jitter, 0.5]);
            y.push(0);
            x.push(vec![5.0 + jitter, 2.0 + jitter, 0.5]);
            y.push(1);
        }
        (x, y)
    }

    fn small() -> ForestParams {
        ForestParams {
            n_trees: 20,
            seed: 42,
        }
    }

    #[test]
    fn test_separable_data_is_learned() {
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 2, small()).unwrap();
        assert_eq!(forest.n_trees(), 20);
        assert_eq!(forest.accuracy(&x, &y), 1.0);
        assert_eq!(forest.predict(&[1.2, 9.5, 0.5]), 0);
        assert_eq!(forest.predict(&[5.5, 2.5, 0.5]), 1);
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 2, small()).unwrap();
        let p = forest.predict_proba(&[3.0, 6.0, 0.5]);
        assert_eq!(p.len(), 2);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = blobs();
        let a = RandomForest::fit(&x, &y, 2, small()).unwrap();
        let b = RandomForest::fit(&x, &y, 2, small()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_independent_of_thread_count() {
        let (x, y) = blobs();
        let fit_with = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| RandomForest::fit(&x, &y, 2, small()).unwrap())
        };
        assert_eq!(fit_with(1), fit_with(4));
    }

    #[test]
    fn test_unseen_class_index_keeps_width() {
        // Class 2 never appears in the labels but the encoder knows it
        let (x, y) = blobs();
        let forest = RandomForest::fit(&x, &y, 3, small()).unwrap();
        let p = forest.predict_proba(&x[0]);
        assert_eq!(p.len(), 3);
        assert_eq!(p[2], 0.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        let (x, y) = blobs();
        assert!(matches!(
            RandomForest::fit(&[], &[], 2, small()),
            Err(ModelError::EmptyTrainingSet)
        ));
        assert!(matches!(
            RandomForest::fit(&x, &y[1..], 2, small()),
            Err(ModelError::LengthMismatch { .. })
        ));
        assert!(matches!(
            RandomForest::fit(&x, &y, 1, small()),
            Err(ModelError::LabelOutOfRange { label: 1, .. })
        ));
        let ragged = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            RandomForest::fit(&ragged, &[0, 1], 2, small()),
            Err(ModelError::Dimension { .. })
        ));
    }

    #[test]
    fn test_argmax_prefers_lowest_index() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1]), 0);
    }
}
