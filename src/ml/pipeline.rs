use crate::error::{AppError, Result};
use crate::ml::artifact::{ArtifactBundle, ModelArtifact};
use crate::ml::balancer::{BalanceSummary, ClassBalancer};
use crate::ml::classifier::{Classifier, ForestParams, RandomForest};
use crate::ml::features::{FeatureBlock, FeatureExtractor, FeatureLayout};
use crate::ml::models::{ModelMetadata, ModelMetrics, PipelineConfig, Prediction, TrainingDataset};
use crate::ml::search::{GridSearch, SearchResult};
use crate::ml::split::stratified_split;
use crate::models::{ComplaintRecord, InferenceRequest, Priority};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

pub const MODEL_NAME: &str = "complaint-priority-forest";

/// Summary of a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub bundle_id: Uuid,
    pub n_records: usize,
    pub n_train: usize,
    pub n_test: usize,

    /// Class counts of the untouched test partition
    pub test_class_counts: [usize; 3],

    /// Absent when oversampling is disabled
    pub balance: Option<BalanceSummary>,

    pub layout: FeatureLayout,
    pub search: SearchResult,
    pub selected: ForestParams,

    /// Held-out metrics; absent when `test_size` is zero
    pub test_metrics: Option<ModelMetrics>,
}

/// Runs the full training flow: split, fit transforms on the training rows,
/// fuse, oversample, search, refit and evaluate.
pub struct Trainer {
    config: PipelineConfig,
}

impl Trainer {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn train(&self, records: &[ComplaintRecord]) -> Result<(ArtifactBundle, TrainingReport)> {
        if records.is_empty() {
            return Err(AppError::InvalidInput(
                "no training records supplied".to_string(),
            ));
        }
        let labels = records
            .iter()
            .map(ComplaintRecord::require_label)
            .collect::<Result<Vec<Priority>>>()?;

        let (train_idx, test_idx) =
            stratified_split(&labels, self.config.split.test_size, self.config.split.seed)?;
        let train_records: Vec<ComplaintRecord> =
            train_idx.iter().map(|&i| records[i].clone()).collect();
        let test_records: Vec<ComplaintRecord> =
            test_idx.iter().map(|&i| records[i].clone()).collect();
        let train_labels: Vec<Priority> = train_idx.iter().map(|&i| labels[i]).collect();
        let test_labels: Vec<Priority> = test_idx.iter().map(|&i| labels[i]).collect();

        info!(
            records = records.len(),
            train = train_records.len(),
            test = test_records.len(),
            "Split dataset"
        );

        let extractor = FeatureExtractor::fit(&self.config.features, &train_records)?;
        info!(
            n_features = extractor.n_features(),
            vocabulary = extractor.layout().width_of(FeatureBlock::Text),
            categories = extractor.layout().width_of(FeatureBlock::Categorical),
            "Fitted feature transforms on training rows"
        );

        let train_set = TrainingDataset::new(extractor.transform_batch(&train_records), train_labels)?;
        let test_set = TrainingDataset::new(extractor.transform_batch(&test_records), test_labels)?;
        let test_class_counts = test_set.class_counts();

        let (balanced, balance) = if self.config.balancer.enabled {
            let (balanced, summary) = ClassBalancer::new(&self.config.balancer).balance(&train_set)?;
            (balanced, Some(summary))
        } else {
            (train_set, None)
        };

        let search = GridSearch::new(self.config.search.clone()).run(&balanced)?;
        let selected = search.best_params().clone();

        let forest = RandomForest::fit(&selected, &balanced)?;
        info!(params = %selected, trees = forest.trees().len(), "Fitted final model");

        let test_metrics = if test_set.n_samples() > 0 {
            let predictions = forest.predict(test_set.view())?;
            let metrics = ModelMetrics::compute(&test_set.labels, &predictions);
            info!(
                accuracy = metrics.accuracy,
                macro_f1 = metrics.f1_score,
                support = metrics.support,
                "Held-out evaluation"
            );
            Some(metrics)
        } else {
            warn!("test_size is zero, skipping held-out evaluation");
            None
        };

        let model = ModelArtifact {
            layout: extractor.layout().clone(),
            metadata: ModelMetadata {
                name: MODEL_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                trained_at: Utc::now(),
                n_training_samples: balanced.n_samples(),
                n_features: balanced.n_features(),
                hyperparameters: selected.clone(),
                cv_score: search.best_score(),
                validation_metrics: test_metrics.clone(),
            },
            forest,
        };
        let bundle = ArtifactBundle::new(&extractor, model)?;

        let report = TrainingReport {
            bundle_id: bundle.bundle_id(),
            n_records: records.len(),
            n_train: train_idx.len(),
            n_test: test_idx.len(),
            test_class_counts,
            balance,
            layout: extractor.layout().clone(),
            search,
            selected,
            test_metrics,
        };
        Ok((bundle, report))
    }
}

/// Share of total impurity decrease attributed to one block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockImportance {
    pub block: FeatureBlock,
    pub width: usize,
    pub importance: f64,
}

/// Static description of a loaded pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionReport {
    pub bundle_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub layout: FeatureLayout,
    pub metadata: ModelMetadata,
    pub block_importance: Vec<BlockImportance>,
    pub top_terms: Vec<(String, f64)>,
}

/// Loaded, validated and immutable prediction pipeline
#[derive(Debug)]
pub struct InferencePipeline {
    bundle_id: Uuid,
    created_at: DateTime<Utc>,
    extractor: FeatureExtractor,
    model: ModelArtifact,
}

impl InferencePipeline {
    pub fn from_bundle(bundle: ArtifactBundle) -> Result<Self> {
        bundle.validate()?;
        let extractor = bundle.extractor()?;
        Ok(Self {
            bundle_id: bundle.manifest.bundle_id,
            created_at: bundle.manifest.created_at,
            extractor,
            model: bundle.model,
        })
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Self::from_bundle(ArtifactBundle::load(dir)?)
    }

    pub fn bundle_id(&self) -> Uuid {
        self.bundle_id
    }

    pub fn layout(&self) -> &FeatureLayout {
        self.extractor.layout()
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.model.metadata
    }

    pub fn predict(&self, record: &ComplaintRecord) -> Priority {
        let row = self.extractor.transform(record);
        self.model.forest.predict_row(row.view())
    }

    /// Label plus the vote share of every class
    pub fn predict_detailed(&self, record: &ComplaintRecord) -> Prediction<Priority> {
        let row = self.extractor.transform(record);
        let shares = self.model.forest.vote_shares(row.view());
        let label = self.model.forest.predict_row(row.view());

        let probabilities = Priority::ALL
            .iter()
            .map(|p| (p.to_string(), shares[p.index()]))
            .collect();
        Prediction::new(label, shares[label.index()]).with_probabilities(probabilities)
    }

    /// Validate raw request fields, then predict
    pub fn predict_request(&self, request: &InferenceRequest) -> Result<Priority> {
        let record = ComplaintRecord::try_from(request)?;
        Ok(self.predict(&record))
    }

    pub fn predict_batch(&self, records: &[ComplaintRecord]) -> Result<Vec<Priority>> {
        let matrix = self.extractor.transform_batch(records);
        self.model.forest.predict(matrix.view())
    }

    /// Forest importances summed per fused block
    pub fn block_importance(&self) -> Vec<BlockImportance> {
        let importances = self.model.forest.feature_importances();
        self.layout()
            .blocks
            .iter()
            .map(|span| BlockImportance {
                block: span.block,
                width: span.width,
                importance: importances[span.offset..span.end()].iter().sum(),
            })
            .collect()
    }

    /// Most important text-block terms, highest first
    pub fn top_terms(&self, n: usize) -> Vec<(String, f64)> {
        let Some(text) = self.layout().span(FeatureBlock::Text) else {
            return Vec::new();
        };
        let importances = &self.model.forest.feature_importances()[text.offset..text.end()];
        let vectorizer = self.extractor.vectorizer();

        let mut ranked: Vec<(usize, f64)> = importances
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| *v > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        ranked
            .into_iter()
            .take(n)
            .filter_map(|(idx, v)| vectorizer.term(idx).map(|t| (t.to_string(), v)))
            .collect()
    }

    pub fn inspect(&self, top_n: usize) -> InspectionReport {
        InspectionReport {
            bundle_id: self.bundle_id,
            created_at: self.created_at,
            layout: self.layout().clone(),
            metadata: self.model.metadata.clone(),
            block_importance: self.block_importance(),
            top_terms: self.top_terms(top_n),
        }
    }
}

/// Shared slot holding the currently published pipeline.
///
/// Readers clone the inner `Arc` and never block on a reload; a replacement
/// is only published after it has been fully loaded and validated.
#[derive(Clone, Default)]
pub struct PipelineHandle {
    current: Arc<RwLock<Option<Arc<InferencePipeline>>>>,
}

impl PipelineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Result<Arc<InferencePipeline>> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| AppError::NotTrained("no pipeline has been loaded".to_string()))
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Replace the published pipeline, returning the previous one
    pub fn publish(&self, pipeline: InferencePipeline) -> Option<Arc<InferencePipeline>> {
        let pipeline = Arc::new(pipeline);
        info!(bundle_id = %pipeline.bundle_id(), "Publishing pipeline");
        self.current.write().replace(pipeline)
    }

    /// Load a bundle and publish it; on failure the current pipeline stays in place
    pub fn reload_from(&self, dir: &Path) -> Result<Uuid> {
        let pipeline = InferencePipeline::load(dir)?;
        let id = pipeline.bundle_id();
        self.publish(pipeline);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::MaxFeatures;
    use crate::ml::models::FeatureConfig;
    use crate::ml::search::ParamGrid;

    fn corpus() -> Vec<ComplaintRecord> {
        let rows = [
            ("Water Leakage", "pipe burst on road flooding", 3, Priority::High),
            ("Water Leakage", "major pipe burst water everywhere", 2, Priority::High),
            ("Electricity", "live wire fallen on road", 4, Priority::High),
            ("Road Damage", "pothole on main road", 1, Priority::Medium),
            ("Road Damage", "road surface damaged near school", 1, Priority::Medium),
            ("Streetlight", "streetlight not working at night", 1, Priority::Medium),
            ("Garbage", "garbage not collected this week", 0, Priority::Low),
            ("Garbage", "bins overflowing garbage smell", 0, Priority::Low),
            ("Noise", "loud music from neighbour", 0, Priority::Low),
        ];
        let mut records = Vec::new();
        for copy in 0..4 {
            for (issue, text, attachments, label) in rows {
                let text = format!("{} report {}", text, copy);
                records.push(ComplaintRecord::labeled(issue, text, attachments, label).unwrap());
            }
        }
        records
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.features = FeatureConfig {
            max_vocab_size: 200,
            max_ngram: 2,
            ..FeatureConfig::default()
        };
        config.balancer.k_neighbors = 2;
        config.search.grid = ParamGrid {
            n_estimators: vec![5],
            max_depth: vec![0],
            max_features: vec![MaxFeatures::Sqrt, MaxFeatures::All],
        };
        config.search.max_threads = 2;
        config
    }

    fn trained() -> (InferencePipeline, TrainingReport) {
        let (bundle, report) = Trainer::new(config()).unwrap().train(&corpus()).unwrap();
        (InferencePipeline::from_bundle(bundle).unwrap(), report)
    }

    #[test]
    fn test_trainer_rejects_invalid_config() {
        let mut config = config();
        config.split.test_size = 2.0;
        assert!(matches!(Trainer::new(config), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_trainer_rejects_unlabeled_records() {
        let records = vec![ComplaintRecord::new("Garbage", "bins", 0).unwrap()];
        let result = Trainer::new(config()).unwrap().train(&records);
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_report_partitions() {
        let (_, report) = trained();
        assert_eq!(report.n_records, 36);
        assert_eq!(report.n_train + report.n_test, 36);
        // 12 rows per class, 20% held out
        assert_eq!(report.test_class_counts, [2, 2, 2]);
        assert!(report.test_metrics.is_some());
        assert_eq!(report.search.candidates.len(), 2);
    }

    #[test]
    fn test_prediction_detail() {
        let (pipeline, _) = trained();
        let record = ComplaintRecord::new("Water Leakage", "pipe burst on road", 2).unwrap();

        let detail = pipeline.predict_detailed(&record);
        assert_eq!(detail.value, pipeline.predict(&record));
        let total: f64 = detail.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(detail.confidence, detail.probabilities[&detail.value.to_string()]);
    }

    #[test]
    fn test_predict_request_rejects_negative_attachments() {
        let (pipeline, _) = trained();
        let request = InferenceRequest::new("Garbage", "bins overflowing", -1);
        assert!(matches!(
            pipeline.predict_request(&request),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_block_importance_sums_to_one() {
        let (pipeline, _) = trained();
        let blocks = pipeline.block_importance();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].block, FeatureBlock::Categorical);
        let total: f64 = blocks.iter().map(|b| b.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let terms = pipeline.top_terms(5);
        assert!(terms.len() <= 5);
        assert!(terms.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_handle_swap() {
        let handle = PipelineHandle::new();
        assert!(matches!(handle.current(), Err(AppError::NotTrained(_))));

        let (first, _) = trained();
        let first_id = first.bundle_id();
        assert!(handle.publish(first).is_none());

        let reader = handle.current().unwrap();
        let (second, _) = trained();
        let second_id = second.bundle_id();
        let previous = handle.publish(second).unwrap();

        assert_eq!(previous.bundle_id(), first_id);
        // an outstanding reader keeps the pipeline it started with
        assert_eq!(reader.bundle_id(), first_id);
        assert_eq!(handle.current().unwrap().bundle_id(), second_id);
    }

    #[test]
    fn test_failed_reload_keeps_current() {
        let handle = PipelineHandle::new();
        let (pipeline, _) = trained();
        let id = pipeline.bundle_id();
        handle.publish(pipeline);

        let empty = tempfile::TempDir::new().unwrap();
        assert!(handle.reload_from(empty.path()).is_err());
        assert_eq!(handle.current().unwrap().bundle_id(), id);
    }
}
