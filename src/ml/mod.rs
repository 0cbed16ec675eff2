/// Machine learning pipeline for complaint priority prediction
///
/// This module provides:
/// - Categorical, text and numeric feature transforms fused into one row
/// - Synthetic minority oversampling of the training partition
/// - Cross-validated grid search over random forest hyperparameters
/// - Versioned artifact bundles and an immutable inference pipeline

pub mod artifact;
pub mod balancer;
pub mod classifier;
pub mod encoders;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod service;
pub mod split;
pub mod text;

pub use artifact::{ArtifactBundle, BundleManifest, ModelArtifact, FORMAT_VERSION};
pub use balancer::{BalanceSummary, ClassBalancer};
pub use classifier::{Classifier, ClassWeight, DecisionTree, ForestParams, MaxFeatures, RandomForest};
pub use encoders::{CategoricalEncoder, NumericScaler};
pub use features::{BlockSpan, FeatureBlock, FeatureExtractor, FeatureLayout};
pub use models::{
    BalancerConfig, FeatureConfig, ModelMetadata, ModelMetrics, PipelineConfig, Prediction,
    SearchConfig, SplitConfig, TrainingDataset,
};
pub use pipeline::{InferencePipeline, InspectionReport, PipelineHandle, Trainer, TrainingReport};
pub use search::{GridSearch, ParamGrid, SearchResult};
pub use service::{PriorityService, PriorityServiceStats};
pub use text::TextVectorizer;
