//! CART classification tree stored as a flat node arena.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// Rows with `x[feature] <= threshold` go to `left`, the rest to `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Class frequencies of the training rows that reached this leaf.
    Leaf { distribution: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

/// Best split found so far at one node.
struct Candidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl DecisionTree {
    /// Grow a tree on `rows` (indices into `x`, repeats allowed) until every
    /// leaf is pure or cannot be split further.
    ///
    /// At each node the features are visited in random order and the first
    /// `max_features` that are not constant on the node are evaluated.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        rows: Vec<usize>,
        n_classes: usize,
        max_features: usize,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut nodes = vec![Node::Leaf {
            distribution: Vec::new(),
        }];
        let mut pending = vec![(0usize, rows)];
        let mut features: Vec<usize> = (0..n_features).collect();

        while let Some((slot, rows)) = pending.pop() {
            let counts = class_counts(&rows, y, n_classes);
            let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;

            let split = if pure {
                None
            } else {
                features.shuffle(rng);
                best_split(x, y, &rows, n_classes, &features, max_features)
            };

            match split {
                Some(best) => {
                    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                        .iter()
                        .partition(|&&r| x[r][best.feature] <= best.threshold);
                    let left = nodes.len();
                    let right = left + 1;
                    nodes.push(Node::Leaf {
                        distribution: Vec::new(),
                    });
                    nodes.push(Node::Leaf {
                        distribution: Vec::new(),
                    });
                    nodes[slot] = Node::Split {
                        feature: best.feature,
                        threshold: best.threshold,
                        left,
                        right,
                    };
                    pending.push((right, right_rows));
                    pending.push((left, left_rows));
                }
                None => {
                    let total = rows.len().max(1) as f64;
                    nodes[slot] = Node::Leaf {
                        distribution: counts.iter().map(|&c| c as f64 / total).collect(),
                    };
                }
            }
        }

        Self { nodes }
    }

    /// Class distribution of the leaf `features` falls into.
    pub fn predict_proba(&self, features: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf { distribution } => return distribution,
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Some(Node::Split { left, right, .. }) = self.nodes.get(index) {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        deepest
    }

    /// Structural check for trees read back from storage. Children always
    /// sit after their parent, so a valid arena has no cycles.
    pub fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {index} splits on feature {feature}"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {index} has a non-finite threshold"));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(format!("node {index} points to node {child}"));
                        }
                    }
                }
                Node::Leaf { distribution } => {
                    if distribution.len() != n_classes {
                        return Err(format!(
                            "leaf {index} has {} classes, expected {n_classes}",
                            distribution.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn class_counts(rows: &[usize], y: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_classes];
    for &r in rows {
        counts[y[r]] += 1;
    }
    counts
}

/// Search the shuffled `features` for the split with the lowest weighted Gini
/// impurity. Constant features do not count towards `max_features`.
fn best_split(
    x: &[Vec<f64>],
    y: &[usize],
    rows: &[usize],
    n_classes: usize,
    features: &[usize],
    max_features: usize,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    let mut visited = 0;
    let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(rows.len());

    for &feature in features {
        if visited >= max_features {
            break;
        }
        sorted.clear();
        sorted.extend(rows.iter().map(|&r| (x[r][feature], y[r])));
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (lo, hi) = (sorted[0].0, sorted[sorted.len() - 1].0);
        if lo >= hi {
            continue;
        }
        visited += 1;

        if let Some(candidate) = scan_feature(&sorted, feature, n_classes) {
            if best.as_ref().is_none_or(|b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Sweep the sorted values of one feature. The score is
/// `sum(left²)/n_left + sum(right²)/n_right`, which is maximal exactly where
/// the weighted Gini impurity of the children is minimal.
fn scan_feature(sorted: &[(f64, usize)], feature: usize, n_classes: usize) -> Option<Candidate> {
    let n = sorted.len();
    let mut right = vec![0usize; n_classes];
    for &(_, class) in sorted {
        right[class] += 1;
    }
    let mut left = vec![0usize; n_classes];
    let mut left_sq = 0.0_f64;
    let mut right_sq: f64 = right.iter().map(|&c| (c * c) as f64).sum();

    let mut best: Option<Candidate> = None;
    for i in 0..n - 1 {
        let class = sorted[i].1;
        left_sq += (2 * left[class] + 1) as f64;
        right_sq -= (2 * right[class] - 1) as f64;
        left[class] += 1;
        right[class] -= 1;

        let (v, next) = (sorted[i].0, sorted[i + 1].0);
        if v >= next {
            continue;
        }
        let n_left = (i + 1) as f64;
        let score = left_sq / n_left + right_sq / (n as f64 - n_left);
        if best.as_ref().is_none_or(|b| score > b.score) {
            let mut threshold = v + (next - v) / 2.0;
            if threshold >= next {
                threshold = v;
            }
            best = Some(Candidate {
                feature,
                threshold,
                score,
            });
        }
    }
    best
}

/// Draw `n` row indices with replacement.
pub fn bootstrap_rows(n: usize, rng: &mut StdRng) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn fit_all(x: &[Vec<f64>], y: &[usize], n_classes: usize, max_features: usize) -> DecisionTree {
        let mut rng = StdRng::seed_from_u64(1);
        DecisionTree::fit(x, y, (0..x.len()).collect(), n_classes, max_features, &mut rng)
    }

    #[test]
    fn test_pure_node_is_single_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let tree = fit_all(&x, &[1, 1, 1], 2, 1);
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict_proba(&[10.0]), [0.0, 1.0]);
    }

    #[test]
    fn test_threshold_is_midpoint() {
        let x = vec![vec![1.0], vec![2.0], vec![4.0], vec![6.0]];
        let tree = fit_all(&x, &[0, 0, 1, 1], 2, 1);
        match &tree.nodes()[0] {
            Node::Split { threshold, .. } => assert_eq!(*threshold, 3.0),
            other => panic!("expected split, got {other:?}"),
        }
        assert_eq!(tree.predict_proba(&[2.9]), [1.0, 0.0]);
        assert_eq!(tree.predict_proba(&[3.1]), [0.0, 1.0]);
    }

    #[test]
    fn test_grows_to_purity() {
        // XOR needs two levels
        let x = vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ];
        let y = [0, 1, 1, 0];
        let tree = fit_all(&x, &y, 2, 2);
        for (row, &label) in x.iter().zip(&y) {
            assert_eq!(tree.predict_proba(row)[label], 1.0);
        }
        assert_eq!(tree.depth(), 2);
        assert!(tree.validate(2, 2).is_ok());
    }

    #[test]
    fn test_constant_features_are_skipped() {
        // Feature 0 is constant; with max_features = 1 the informative
        // feature must still be found.
        let x = vec![vec![5.0, 0.0], vec![5.0, 1.0], vec![5.0, 2.0], vec![5.0, 3.0]];
        let tree = fit_all(&x, &[0, 0, 1, 1], 2, 1);
        match &tree.nodes()[0] {
            Node::Split { feature, .. } => assert_eq!(*feature, 1),
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn test_unsplittable_impure_node_keeps_distribution() {
        let x = vec![vec![1.0], vec![1.0], vec![1.0], vec![1.0]];
        let tree = fit_all(&x, &[0, 1, 1, 1], 2, 1);
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict_proba(&[1.0]), [0.25, 0.75]);
    }

    #[test]
    fn test_bootstrap_repeats_weight_leaves() {
        let x = vec![vec![1.0], vec![1.0]];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = DecisionTree::fit(&x, &[0, 1], vec![0, 0, 0, 1], 2, 1, &mut rng);
        assert_eq!(tree.predict_proba(&[1.0]), [0.75, 0.25]);
    }

    #[test]
    fn test_validate_rejects_bad_arena() {
        let cyclic = DecisionTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.5,
                left: 0,
                right: 0,
            }],
        };
        assert!(cyclic.validate(1, 2).is_err());

        let short_leaf = DecisionTree {
            nodes: vec![Node::Leaf {
                distribution: vec![1.0],
            }],
        };
        assert!(short_leaf.validate(1, 2).is_err());
        assert!(DecisionTree { nodes: Vec::new() }.validate(1, 2).is_err());
    }

    #[test]
    fn test_bootstrap_rows_in_range() {
        let mut rng = StdRng::seed_from_u64(9);
        let rows = bootstrap_rows(50, &mut rng);
        assert_eq!(rows.len(), 50);
        assert!(rows.iter().all(|&r| r < 50));
    }
}
