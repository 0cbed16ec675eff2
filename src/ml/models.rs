use crate::error::{AppError, Result};
use crate::ml::classifier::{ClassWeight, ForestParams};
use crate::ml::search::ParamGrid;
use crate::models::Priority;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use validator::{Validate, ValidationError};

/// End-to-end training configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Feature extraction configuration
    #[validate(nested)]
    #[serde(default)]
    pub features: FeatureConfig,

    /// Train/test split configuration
    #[validate(nested)]
    #[serde(default)]
    pub split: SplitConfig,

    /// Minority oversampling configuration
    #[validate(nested)]
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Hyperparameter search configuration
    #[validate(nested)]
    #[serde(default)]
    pub search: SearchConfig,
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_ngram_range"))]
pub struct FeatureConfig {
    /// Maximum vocabulary size for text features
    #[validate(range(min = 1))]
    pub max_vocab_size: usize,

    /// Minimum document frequency for terms
    #[validate(range(min = 1))]
    pub min_doc_freq: usize,

    /// Smallest n-gram order
    #[validate(range(min = 1))]
    pub min_ngram: usize,

    /// Largest n-gram order
    #[validate(range(min = 1, max = 8))]
    pub max_ngram: usize,

    /// L2-normalize each text row before weighting
    pub normalize_text: bool,

    /// Multiplier applied to the whole text block
    #[validate(range(min = 0.0))]
    pub text_weight: f64,

    /// Multiplier applied to the scaled attachment count
    #[validate(range(min = 0.0, max = 1.0))]
    pub numeric_damping: f64,
}

fn validate_ngram_range(config: &FeatureConfig) -> std::result::Result<(), ValidationError> {
    if config.min_ngram > config.max_ngram {
        return Err(ValidationError::new("min_ngram_exceeds_max_ngram"));
    }
    Ok(())
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_vocab_size: 15000,
            min_doc_freq: 2,
            min_ngram: 1,
            max_ngram: 4,
            normalize_text: true,
            text_weight: 3.0,
            numeric_damping: 0.2,
        }
    }
}

/// Stratified train/test split configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SplitConfig {
    /// Fraction of each class held out for evaluation
    #[validate(range(min = 0.0, max = 0.9))]
    pub test_size: f64,

    /// Shuffle seed
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
        }
    }
}

/// Synthetic minority oversampling configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BalancerConfig {
    /// Disable to train on the raw class distribution
    pub enabled: bool,

    /// Same-class neighbors considered for interpolation
    #[validate(range(min = 1))]
    pub k_neighbors: usize,

    /// Target minority count as a fraction of the majority count
    #[validate(range(min = 0.0, max = 1.0))]
    pub sampling_ratio: f64,

    /// Interpolation seed
    pub seed: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k_neighbors: 5,
            sampling_ratio: 1.0,
            seed: 42,
        }
    }
}

/// Cross-validated grid search configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SearchConfig {
    /// Candidate hyperparameters
    pub grid: ParamGrid,

    /// Number of stratified folds
    #[validate(range(min = 2))]
    pub cv_folds: usize,

    /// Per-class weighting inside each tree
    pub class_weight: ClassWeight,

    /// Minimum rows a node needs before it may split
    #[validate(range(min = 2))]
    pub min_samples_split: usize,

    /// Seed shared by fold assignment and every forest fit
    pub seed: u64,

    /// Worker threads for fold evaluation (0 = rayon default)
    pub max_threads: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            grid: ParamGrid::default(),
            cv_folds: 3,
            class_weight: ClassWeight::Balanced,
            min_samples_split: 2,
            seed: 42,
            max_threads: 0,
        }
    }
}

/// Prediction result with confidence score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction<T> {
    /// Predicted value
    pub value: T,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// All class probabilities
    pub probabilities: HashMap<String, f64>,
}

impl<T> Prediction<T> {
    pub fn new(value: T, confidence: f64) -> Self {
        Self {
            value,
            confidence,
            probabilities: HashMap::new(),
        }
    }

    pub fn with_probabilities(mut self, probabilities: HashMap<String, f64>) -> Self {
        self.probabilities = probabilities;
        self
    }
}

/// Fused feature matrix with row-aligned labels
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// Priority labels, one per row
    pub labels: Vec<Priority>,
}

impl TrainingDataset {
    pub fn new(features: Array2<f64>, labels: Vec<Priority>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(AppError::dimension_mismatch(
                "training labels",
                features.nrows(),
                labels.len(),
            ));
        }
        Ok(Self { features, labels })
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    /// Row count per class in canonical order
    pub fn class_counts(&self) -> [usize; 3] {
        class_counts(&self.labels)
    }

    /// Copy the given rows, in the given order, into a new dataset
    pub fn select(&self, indices: &[usize]) -> TrainingDataset {
        TrainingDataset {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Row count per class in canonical order
pub fn class_counts(labels: &[Priority]) -> [usize; 3] {
    let mut counts = [0usize; 3];
    for label in labels {
        counts[label.index()] += 1;
    }
    counts
}

/// Model evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Accuracy
    pub accuracy: f64,

    /// Macro-averaged precision
    pub precision: f64,

    /// Macro-averaged recall
    pub recall: f64,

    /// Macro-averaged F1 score
    pub f1_score: f64,

    /// Confusion matrix (rows = actual, columns = predicted, canonical class order)
    pub confusion_matrix: Array2<usize>,

    /// Per-class metrics
    pub per_class_metrics: BTreeMap<String, ClassMetrics>,

    /// Number of evaluated rows
    pub support: usize,
}

/// Per-class evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

impl ModelMetrics {
    /// Score predictions against ground truth.
    ///
    /// Macro averages cover every class that occurs in either the truth or the
    /// predictions, so a class missing from a small fold does not drag the
    /// average towards zero.
    pub fn compute(y_true: &[Priority], y_pred: &[Priority]) -> Self {
        let n_samples = y_true.len().min(y_pred.len());
        let mut confusion = Array2::<usize>::zeros((3, 3));
        for (t, p) in y_true.iter().zip(y_pred.iter()) {
            confusion[[t.index(), p.index()]] += 1;
        }

        if n_samples == 0 {
            return Self {
                accuracy: 0.0,
                precision: 0.0,
                recall: 0.0,
                f1_score: 0.0,
                confusion_matrix: confusion,
                per_class_metrics: BTreeMap::new(),
                support: 0,
            };
        }

        let correct: usize = (0..3).map(|c| confusion[[c, c]]).sum();
        let accuracy = correct as f64 / n_samples as f64;

        let mut per_class = BTreeMap::new();
        let mut active = 0usize;
        let (mut sum_p, mut sum_r, mut sum_f1) = (0.0, 0.0, 0.0);

        for class in Priority::ALL {
            let c = class.index();
            let tp = confusion[[c, c]];
            let actual: usize = confusion.row(c).sum();
            let predicted: usize = confusion.column(c).sum();

            if actual == 0 && predicted == 0 {
                continue;
            }

            let precision = if predicted > 0 {
                tp as f64 / predicted as f64
            } else {
                0.0
            };

            let recall = if actual > 0 {
                tp as f64 / actual as f64
            } else {
                0.0
            };

            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            active += 1;
            sum_p += precision;
            sum_r += recall;
            sum_f1 += f1;

            per_class.insert(
                class.to_string(),
                ClassMetrics {
                    precision,
                    recall,
                    f1_score: f1,
                    support: actual,
                },
            );
        }

        let active = active.max(1) as f64;

        Self {
            accuracy,
            precision: sum_p / active,
            recall: sum_r / active,
            f1_score: sum_f1 / active,
            confusion_matrix: confusion,
            per_class_metrics: per_class,
            support: n_samples,
        }
    }
}

/// Macro-averaged F1 score
pub fn macro_f1(y_true: &[Priority], y_pred: &[Priority]) -> f64 {
    ModelMetrics::compute(y_true, y_pred).f1_score
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name
    pub name: String,

    /// Model version
    pub version: String,

    /// Training timestamp
    pub trained_at: chrono::DateTime<chrono::Utc>,

    /// Number of (balanced) training rows the final model saw
    pub n_training_samples: usize,

    /// Number of features
    pub n_features: usize,

    /// Selected hyperparameters
    pub hyperparameters: ForestParams,

    /// Mean cross-validated macro-F1 of the selected configuration
    pub cv_score: f64,

    /// Held-out evaluation, absent when no test partition was requested
    pub validation_metrics: Option<ModelMetrics>,
}
