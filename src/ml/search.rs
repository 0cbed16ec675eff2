use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, ForestParams, MaxFeatures, RandomForest};
use crate::ml::models::{macro_f1, SearchConfig, TrainingDataset};
use crate::ml::split::{fold_complement, stratified_folds};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Hyperparameter grid. A `max_depth` of 0 means unlimited depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub max_features: Vec<MaxFeatures>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![300, 500],
            max_depth: vec![25, 35, 0],
            max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2, MaxFeatures::All],
        }
    }
}

impl ParamGrid {
    pub fn len(&self) -> usize {
        self.n_estimators.len() * self.max_depth.len() * self.max_features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination; `n_estimators` varies slowest, `max_features` fastest
    pub fn candidates(&self, config: &SearchConfig) -> Vec<ForestParams> {
        let mut candidates = Vec::with_capacity(self.len());
        for &n_estimators in &self.n_estimators {
            for &depth in &self.max_depth {
                for &max_features in &self.max_features {
                    candidates.push(ForestParams {
                        n_estimators,
                        max_depth: if depth == 0 { None } else { Some(depth) },
                        max_features,
                        min_samples_split: config.min_samples_split,
                        class_weight: config.class_weight,
                        seed: config.seed,
                    });
                }
            }
        }
        candidates
    }
}

/// Cross-validated score of one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: ForestParams,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

/// Outcome of a grid search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Scores in enumeration order
    pub candidates: Vec<CandidateScore>,
    pub best_index: usize,
}

impl SearchResult {
    pub fn best(&self) -> &CandidateScore {
        &self.candidates[self.best_index]
    }

    pub fn best_params(&self) -> &ForestParams {
        &self.best().params
    }

    pub fn best_score(&self) -> f64 {
        self.best().mean_score
    }
}

/// Exhaustive grid search with stratified k-fold cross-validation scored by macro-F1
pub struct GridSearch {
    config: SearchConfig,
}

impl GridSearch {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Evaluate every (candidate, fold) pair on the worker pool
    pub fn run(&self, dataset: &TrainingDataset) -> Result<SearchResult> {
        if self.config.grid.is_empty() {
            return Err(AppError::Configuration(
                "hyperparameter grid has no candidates".to_string(),
            ));
        }
        if self.config.grid.n_estimators.contains(&0) {
            return Err(AppError::Configuration(
                "n_estimators values must be positive".to_string(),
            ));
        }

        let candidates = self.config.grid.candidates(&self.config);
        let folds = stratified_folds(&dataset.labels, self.config.cv_folds, self.config.seed)?;

        let jobs: Vec<(usize, usize)> = (0..candidates.len())
            .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
            .collect();

        info!(
            candidates = candidates.len(),
            folds = folds.len(),
            jobs = jobs.len(),
            "Starting grid search"
        );

        let evaluate = || -> Result<Vec<f64>> {
            jobs.par_iter()
                .map(|&(c, f)| score_fold(&candidates[c], dataset, &folds[f]))
                .collect()
        };

        let scores = if self.config.max_threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.max_threads)
                .build()
                .map_err(|e| AppError::Internal(format!("failed to build search pool: {}", e)))?
                .install(evaluate)?
        } else {
            evaluate()?
        };

        let mut results = Vec::with_capacity(candidates.len());
        for (c, params) in candidates.into_iter().enumerate() {
            let fold_scores = scores[c * folds.len()..(c + 1) * folds.len()].to_vec();
            let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
            debug!(params = %params, mean_score, "Scored candidate");
            results.push(CandidateScore {
                params,
                fold_scores,
                mean_score,
            });
        }

        // Strictly greater, so the earliest candidate keeps a tie
        let mut best_index = 0;
        for (idx, candidate) in results.iter().enumerate().skip(1) {
            if candidate.mean_score > results[best_index].mean_score {
                best_index = idx;
            }
        }

        let result = SearchResult {
            candidates: results,
            best_index,
        };
        info!(
            best = %result.best_params(),
            score = result.best_score(),
            "Grid search finished"
        );
        Ok(result)
    }
}

/// Fit on everything outside `validation`, score macro-F1 on `validation`
fn score_fold(params: &ForestParams, dataset: &TrainingDataset, validation: &[usize]) -> Result<f64> {
    let train = dataset.select(&fold_complement(dataset.n_samples(), validation));
    let held_out = dataset.select(validation);

    let forest = RandomForest::fit(params, &train)?;
    let predictions = forest.predict(held_out.view())?;
    Ok(macro_f1(&held_out.labels, &predictions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::ClassWeight;
    use crate::models::Priority;
    use ndarray::Array2;

    fn dataset() -> TrainingDataset {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for i in 0..36 {
            let (base, label) = match i % 3 {
                0 => (0.0, Priority::High),
                1 => (3.0, Priority::Medium),
                _ => (6.0, Priority::Low),
            };
            values.extend([base + (i % 5) as f64 * 0.2, (i % 4) as f64]);
            labels.push(label);
        }
        TrainingDataset::new(Array2::from_shape_vec((36, 2), values).unwrap(), labels).unwrap()
    }

    fn config(grid: ParamGrid) -> SearchConfig {
        SearchConfig {
            grid,
            cv_folds: 3,
            class_weight: ClassWeight::Balanced,
            min_samples_split: 2,
            seed: 42,
            max_threads: 2,
        }
    }

    fn small_grid() -> ParamGrid {
        ParamGrid {
            n_estimators: vec![3, 5],
            max_depth: vec![1, 0],
            max_features: vec![MaxFeatures::All],
        }
    }

    #[test]
    fn test_default_grid() {
        let grid = ParamGrid::default();
        assert_eq!(grid.len(), 18);
        let candidates = grid.candidates(&SearchConfig::default());
        assert_eq!(candidates[0].n_estimators, 300);
        assert_eq!(candidates[0].max_depth, Some(25));
        assert_eq!(candidates[0].max_features, MaxFeatures::Sqrt);
        assert_eq!(candidates[2].max_features, MaxFeatures::All);
        assert_eq!(candidates[8].max_depth, None);
        assert_eq!(candidates[9].n_estimators, 500);
    }

    #[test]
    fn test_empty_grid_is_configuration_error() {
        let mut grid = small_grid();
        grid.max_features.clear();
        let result = GridSearch::new(config(grid)).run(&dataset());
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_search_scores_every_candidate() {
        let result = GridSearch::new(config(small_grid())).run(&dataset()).unwrap();
        assert_eq!(result.candidates.len(), 4);
        for candidate in &result.candidates {
            assert_eq!(candidate.fold_scores.len(), 3);
            assert!((0.0..=1.0).contains(&candidate.mean_score));
        }
        let max = result
            .candidates
            .iter()
            .map(|c| c.mean_score)
            .fold(f64::MIN, f64::max);
        assert_eq!(result.best_score(), max);
    }

    #[test]
    fn test_search_is_deterministic() {
        let data = dataset();
        let a = GridSearch::new(config(small_grid())).run(&data).unwrap();
        let b = GridSearch::new(config(small_grid())).run(&data).unwrap();
        assert_eq!(a.best_index, b.best_index);
        assert_eq!(a.best_params(), b.best_params());
        let scores_a: Vec<f64> = a.candidates.iter().map(|c| c.mean_score).collect();
        let scores_b: Vec<f64> = b.candidates.iter().map(|c| c.mean_score).collect();
        assert_eq!(scores_a, scores_b);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        // Identical candidates score identically
        let grid = ParamGrid {
            n_estimators: vec![3, 3],
            max_depth: vec![0],
            max_features: vec![MaxFeatures::All],
        };
        let result = GridSearch::new(config(grid)).run(&dataset()).unwrap();
        assert_eq!(result.candidates[0].mean_score, result.candidates[1].mean_score);
        assert_eq!(result.best_index, 0);
    }
}
