use crate::error::{AppError, Result};
use crate::ml::models::TrainingDataset;
use crate::models::Priority;
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use strum::Display;

const N_CLASSES: usize = 3;

/// Trait for classifiers
pub trait Classifier: Send + Sync {
    /// Predict the class of one fused feature row
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> Priority;

    /// Number of input columns the model was trained on
    fn n_features(&self) -> usize;

    /// Predict class labels, rejecting rows of the wrong width
    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Vec<Priority>> {
        if features.ncols() != self.n_features() {
            return Err(AppError::dimension_mismatch(
                "classifier input",
                self.n_features(),
                features.ncols(),
            ));
        }
        Ok(features.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }
}

/// Number of candidate features examined at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Per-class sample weighting inside each tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClassWeight {
    None,
    /// n_samples / (n_present_classes * class_count)
    Balanced,
}

impl ClassWeight {
    pub fn weights(self, labels: &[Priority]) -> [f64; N_CLASSES] {
        match self {
            ClassWeight::None => [1.0; N_CLASSES],
            ClassWeight::Balanced => {
                let counts = crate::ml::models::class_counts(labels);
                let present = counts.iter().filter(|&&c| c > 0).count().max(1);
                let n = labels.len() as f64;
                let mut weights = [0.0; N_CLASSES];
                for (weight, &count) in weights.iter_mut().zip(counts.iter()) {
                    if count > 0 {
                        *weight = n / (present as f64 * count as f64);
                    }
                }
                weights
            }
        }
    }
}

/// Forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,

    /// `None` grows each tree until its leaves are pure
    pub max_depth: Option<usize>,

    pub max_features: MaxFeatures,

    pub min_samples_split: usize,

    pub class_weight: ClassWeight,

    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            min_samples_split: 2,
            class_weight: ClassWeight::Balanced,
            seed: 42,
        }
    }
}

impl std::fmt::Display for ForestParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let depth = self
            .max_depth
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "n_estimators={} max_depth={} max_features={}",
            self.n_estimators, depth, self.max_features
        )
    }
}

/// Tree node. Children always have a larger index than their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        class: Priority,
        distribution: [f64; N_CLASSES],
    },
}

/// CART decision tree with Gini impurity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    n_features: usize,
    nodes: Vec<Node>,
}

/// Options for growing a single tree
struct TreeOptions {
    max_depth: Option<usize>,
    min_samples_split: usize,
    n_candidates: usize,
}

/// Best split found for one node
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grow a tree on the rows with positive weight
    fn grow(
        x: ArrayView2<'_, f64>,
        y: &[usize],
        weights: &[f64],
        options: &TreeOptions,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> Self {
        let n_features = x.ncols();
        let root_rows: Vec<usize> = (0..y.len()).filter(|&i| weights[i] > 0.0).collect();

        let mut nodes = vec![placeholder()];
        // (node slot, rows, depth)
        let mut stack = vec![(0usize, root_rows, 0usize)];

        while let Some((slot, rows, depth)) = stack.pop() {
            let distribution = class_distribution(&rows, y, weights);
            let total: f64 = distribution.iter().sum();
            let parent_gini = gini(&distribution, total);

            let depth_reached = options.max_depth.map_or(false, |max| depth >= max);
            let can_split = rows.len() >= options.min_samples_split && !depth_reached && parent_gini > 0.0;

            let best = if can_split {
                best_split(x, y, weights, &rows, options.n_candidates, rng)
            } else {
                None
            };

            match best {
                Some(split) => {
                    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                        .iter()
                        .copied()
                        .partition(|&i| x[[i, split.feature]] <= split.threshold);

                    importances[split.feature] += total * (parent_gini - split.impurity);

                    let left = nodes.len();
                    nodes.push(placeholder());
                    let right = nodes.len();
                    nodes.push(placeholder());

                    nodes[slot] = Node::Split {
                        feature: split.feature,
                        threshold: split.threshold,
                        left,
                        right,
                    };
                    stack.push((right, right_rows, depth + 1));
                    stack.push((left, left_rows, depth + 1));
                }
                None => nodes[slot] = leaf(distribution, total),
            }
        }

        Self { n_features, nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    fn leaf_class(&self, row: ArrayView1<'_, f64>) -> Priority {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => idx = if row[*feature] <= *threshold { *left } else { *right },
                Node::Leaf { class, .. } => return *class,
            }
        }
    }

    /// Structural checks for a deserialized tree
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(AppError::Artifact("decision tree has no nodes".to_string()));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= self.n_features {
                        return Err(AppError::dimension_mismatch(
                            "decision tree split feature",
                            self.n_features,
                            *feature + 1,
                        ));
                    }
                    let in_range = |child: usize| child > idx && child < self.nodes.len();
                    if !in_range(*left) || !in_range(*right) || !threshold.is_finite() {
                        return Err(AppError::Artifact(format!(
                            "decision tree node {} is malformed",
                            idx
                        )));
                    }
                }
                Node::Leaf { distribution, .. } => {
                    if distribution.iter().any(|p| !p.is_finite()) {
                        return Err(AppError::Artifact(format!(
                            "decision tree leaf {} has a non-finite distribution",
                            idx
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Classifier for DecisionTree {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> Priority {
        self.leaf_class(row)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

fn placeholder() -> Node {
    Node::Leaf {
        class: Priority::Low,
        distribution: [0.0; N_CLASSES],
    }
}

fn leaf(distribution: [f64; N_CLASSES], total: f64) -> Node {
    let probabilities = if total > 0.0 {
        distribution.map(|w| w / total)
    } else {
        [0.0; N_CLASSES]
    };
    Node::Leaf {
        class: argmax_class(&probabilities),
        distribution: probabilities,
    }
}

/// Index of the largest value; the first (highest-priority) class wins ties
fn argmax_class<T: PartialOrd + Copy>(values: &[T; N_CLASSES]) -> Priority {
    let mut best = 0;
    for idx in 1..N_CLASSES {
        if values[idx] > values[best] {
            best = idx;
        }
    }
    Priority::ALL[best]
}

fn class_distribution(rows: &[usize], y: &[usize], weights: &[f64]) -> [f64; N_CLASSES] {
    let mut distribution = [0.0; N_CLASSES];
    for &i in rows {
        distribution[y[i]] += weights[i];
    }
    distribution
}

fn gini(distribution: &[f64; N_CLASSES], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - distribution
        .iter()
        .map(|w| {
            let p = w / total;
            p * p
        })
        .sum::<f64>()
}

/// Search random features for the lowest weighted child impurity.
///
/// Features are drawn without replacement. Drawing continues past
/// `n_candidates` until at least one feature that varies within the node has
/// been evaluated, or every column has been tried.
fn best_split(
    x: ArrayView2<'_, f64>,
    y: &[usize],
    weights: &[f64],
    rows: &[usize],
    n_candidates: usize,
    rng: &mut StdRng,
) -> Option<SplitCandidate> {
    let total_distribution = class_distribution(rows, y, weights);
    let total: f64 = total_distribution.iter().sum();
    let n_features = x.ncols();

    let mut order: Vec<usize> = (0..n_features).collect();
    let mut varying = 0usize;
    let mut best: Option<SplitCandidate> = None;
    let mut values: Vec<(f64, usize)> = Vec::with_capacity(rows.len());

    for drawn in 0..n_features {
        if drawn >= n_candidates && varying > 0 {
            break;
        }
        let pick = rng.gen_range(drawn..n_features);
        order.swap(drawn, pick);
        let feature = order[drawn];

        let first = x[[rows[0], feature]];
        if rows.iter().all(|&i| x[[i, feature]] == first) {
            continue;
        }
        varying += 1;

        values.clear();
        values.extend(rows.iter().map(|&i| (x[[i, feature]], i)));
        values.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left = [0.0; N_CLASSES];
        let mut left_total = 0.0;

        for pos in 0..values.len() - 1 {
            let (value, row) = values[pos];
            left[y[row]] += weights[row];
            left_total += weights[row];

            let next = values[pos + 1].0;
            if value == next {
                continue;
            }

            let mut right = total_distribution;
            for c in 0..N_CLASSES {
                right[c] -= left[c];
            }
            let right_total = total - left_total;

            let impurity =
                (left_total * gini(&left, left_total) + right_total * gini(&right, right_total))
                    / total;

            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mut threshold = value + (next - value) / 2.0;
                if threshold >= next {
                    threshold = value;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
    }

    best
}

/// Bagged ensemble of decision trees with majority voting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<DecisionTree>,
    /// Mean impurity decrease per feature, normalized to sum to 1
    feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Fit on every row of `dataset`.
    ///
    /// Tree `t` draws its bootstrap sample and split candidates from a
    /// generator seeded with `params.seed + t`, so the result depends only on
    /// the data and the parameters.
    pub fn fit(params: &ForestParams, dataset: &TrainingDataset) -> Result<Self> {
        if params.n_estimators == 0 {
            return Err(AppError::Configuration(
                "forest needs at least one tree".to_string(),
            ));
        }
        if dataset.n_samples() == 0 || dataset.n_features() == 0 {
            return Err(AppError::InvalidInput(format!(
                "cannot fit forest on a {}x{} matrix",
                dataset.n_samples(),
                dataset.n_features()
            )));
        }

        let n_samples = dataset.n_samples();
        let n_features = dataset.n_features();
        let x = dataset.view();
        let y: Vec<usize> = dataset.labels.iter().map(|l| l.index()).collect();
        let class_weights = params.class_weight.weights(&dataset.labels);

        let options = TreeOptions {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split.max(2),
            n_candidates: params.max_features.resolve(n_features),
        };

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut multiplicity = vec![0u32; n_samples];
        let mut weights = vec![0.0; n_samples];

        for t in 0..params.n_estimators {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));

            multiplicity.iter_mut().for_each(|m| *m = 0);
            for _ in 0..n_samples {
                multiplicity[rng.gen_range(0..n_samples)] += 1;
            }
            for i in 0..n_samples {
                weights[i] = multiplicity[i] as f64 * class_weights[y[i]];
            }

            let mut tree_importances = vec![0.0; n_features];
            let tree = DecisionTree::grow(x, &y, &weights, &options, &mut rng, &mut tree_importances);

            let tree_total: f64 = tree_importances.iter().sum();
            if tree_total > 0.0 {
                for (acc, value) in importances.iter_mut().zip(tree_importances) {
                    *acc += value / tree_total;
                }
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            params: params.clone(),
            n_features,
            trees,
            feature_importances: importances,
        })
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    /// Tree votes per class in canonical order
    pub fn votes(&self, row: ArrayView1<'_, f64>) -> [usize; N_CLASSES] {
        let mut votes = [0usize; N_CLASSES];
        for tree in &self.trees {
            votes[tree.predict_row(row).index()] += 1;
        }
        votes
    }

    /// Fraction of trees voting for each class
    pub fn vote_shares(&self, row: ArrayView1<'_, f64>) -> [f64; N_CLASSES] {
        let n = self.trees.len().max(1) as f64;
        self.votes(row).map(|v| v as f64 / n)
    }

    /// Structural checks for a deserialized forest
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(AppError::Artifact("forest has no trees".to_string()));
        }
        if self.feature_importances.len() != self.n_features {
            return Err(AppError::dimension_mismatch(
                "forest feature importances",
                self.n_features,
                self.feature_importances.len(),
            ));
        }
        for tree in &self.trees {
            if tree.n_features != self.n_features {
                return Err(AppError::dimension_mismatch(
                    "forest tree input",
                    self.n_features,
                    tree.n_features,
                ));
            }
            tree.validate()?;
        }
        Ok(())
    }
}

impl Classifier for RandomForest {
    /// Majority vote; equal vote counts resolve to the higher priority class
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> Priority {
        argmax_class(&self.votes(row))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    /// Three well separated clusters on the first column, noise on the second
    fn separable_dataset() -> TrainingDataset {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let (base, label) = match i % 3 {
                0 => (0.0, Priority::High),
                1 => (5.0, Priority::Medium),
                _ => (10.0, Priority::Low),
            };
            rows.push(base + (i as f64) * 0.01);
            rows.push(((i * 7) % 11) as f64);
            labels.push(label);
        }
        let features = Array2::from_shape_vec((30, 2), rows).unwrap();
        TrainingDataset::new(features, labels).unwrap()
    }

    fn params(n_estimators: usize) -> ForestParams {
        ForestParams {
            n_estimators,
            max_depth: None,
            max_features: MaxFeatures::All,
            min_samples_split: 2,
            class_weight: ClassWeight::Balanced,
            seed: 7,
        }
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(100), 10);
        assert_eq!(MaxFeatures::Log2.resolve(1024), 10);
        assert_eq!(MaxFeatures::All.resolve(17), 17);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Sqrt.resolve(2), 1);
    }

    #[test]
    fn test_balanced_class_weights() {
        let labels = vec![Priority::Low, Priority::Low, Priority::Low, Priority::High];
        let weights = ClassWeight::Balanced.weights(&labels);
        // 4 / (2 * 1) and 4 / (2 * 3)
        assert!((weights[Priority::High.index()] - 2.0).abs() < 1e-12);
        assert!((weights[Priority::Low.index()] - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(weights[Priority::Medium.index()], 0.0);
        assert_eq!(ClassWeight::None.weights(&labels), [1.0; 3]);
    }

    #[test]
    fn test_forest_learns_separable_data() {
        let dataset = separable_dataset();
        let forest = RandomForest::fit(&params(15), &dataset).unwrap();

        let predictions = forest.predict(dataset.view()).unwrap();
        let correct = predictions
            .iter()
            .zip(&dataset.labels)
            .filter(|(p, t)| p == t)
            .count();
        assert!(correct >= 28, "only {} of 30 correct", correct);

        assert_eq!(forest.predict_row(array![0.05, 3.0].view()), Priority::High);
        assert_eq!(forest.predict_row(array![10.1, 3.0].view()), Priority::Low);
    }

    #[test]
    fn test_forest_is_deterministic_for_fixed_seed() {
        let dataset = separable_dataset();
        let a = RandomForest::fit(&params(5), &dataset).unwrap();
        let b = RandomForest::fit(&params(5), &dataset).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_max_depth_is_respected() {
        let dataset = separable_dataset();
        let mut p = params(3);
        p.max_depth = Some(1);
        let forest = RandomForest::fit(&p, &dataset).unwrap();
        assert!(forest.trees().iter().all(|t| t.depth() <= 1));
    }

    #[test]
    fn test_feature_importances_favor_informative_column() {
        let dataset = separable_dataset();
        let forest = RandomForest::fit(&params(10), &dataset).unwrap();
        let importances = forest.feature_importances();

        assert_eq!(importances.len(), 2);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn test_vote_tie_prefers_higher_priority() {
        assert_eq!(argmax_class(&[2usize, 2, 1]), Priority::High);
        assert_eq!(argmax_class(&[0usize, 3, 3]), Priority::Medium);
        assert_eq!(argmax_class(&[0usize, 0, 0]), Priority::High);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let dataset = separable_dataset();
        let forest = RandomForest::fit(&params(2), &dataset).unwrap();
        let wrong = Array2::<f64>::zeros((1, 3));
        assert!(matches!(
            forest.predict(wrong.view()),
            Err(AppError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_pure_node_becomes_leaf() {
        let features = array![[1.0], [2.0], [3.0]];
        let labels = vec![Priority::Medium; 3];
        let dataset = TrainingDataset::new(features, labels).unwrap();
        let forest = RandomForest::fit(&params(1), &dataset).unwrap();

        let tree = &forest.trees()[0];
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict_row(array![100.0].view()), Priority::Medium);
    }

    /// Column 0 separates the classes; the other 99 columns are all zero
    fn sparse_dataset() -> TrainingDataset {
        let n_rows = 60;
        let mut features = Array2::<f64>::zeros((n_rows, 100));
        let mut labels = Vec::with_capacity(n_rows);
        for i in 0..n_rows {
            let label = Priority::ALL[i % 3];
            features[[i, 0]] = label.index() as f64 + 1.0;
            labels.push(label);
        }
        TrainingDataset::new(features, labels).unwrap()
    }

    #[test]
    fn test_trees_grow_past_constant_columns() {
        let dataset = sparse_dataset();
        let mut p = params(20);
        p.max_features = MaxFeatures::Sqrt;
        let forest = RandomForest::fit(&p, &dataset).unwrap();

        let stumps = forest.trees().iter().filter(|t| t.nodes().len() == 1).count();
        assert_eq!(stumps, 0);

        let predictions = forest.predict(dataset.view()).unwrap();
        assert_eq!(predictions, dataset.labels);
        assert!(forest.feature_importances()[0] > 0.99);
    }

    #[test]
    fn test_validate_rejects_corrupt_tree() {
        let tree = DecisionTree {
            n_features: 1,
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.5,
                left: 0,
                right: 5,
            }],
        };
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_trees() {
        let dataset = separable_dataset();
        assert!(matches!(
            RandomForest::fit(&params(0), &dataset),
            Err(AppError::Configuration(_))
        ));
    }
}
