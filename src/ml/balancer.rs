use crate::error::{AppError, Result};
use crate::ml::models::{BalancerConfig, TrainingDataset};
use crate::models::Priority;
use linfa_nn::{distance::L2Dist, LinearSearch, NearestNeighbour};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Synthetic minority oversampling (SMOTE).
///
/// Operates on the fused training matrix only. Original rows are kept in
/// place and synthetic rows are appended after them.
pub struct ClassBalancer {
    k_neighbors: usize,
    sampling_ratio: f64,
    seed: u64,
}

/// Per-class outcome of a balancing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub before: [usize; 3],
    pub after: [usize; 3],
}

impl BalanceSummary {
    pub fn synthesized(&self) -> usize {
        self.after.iter().sum::<usize>() - self.before.iter().sum::<usize>()
    }
}

impl ClassBalancer {
    pub fn new(config: &BalancerConfig) -> Self {
        Self {
            k_neighbors: config.k_neighbors,
            sampling_ratio: config.sampling_ratio,
            seed: config.seed,
        }
    }

    /// Rows each class must reach
    fn targets(&self, counts: &[usize; 3]) -> [usize; 3] {
        let majority = counts.iter().copied().max().unwrap_or(0);
        let goal = (majority as f64 * self.sampling_ratio).ceil() as usize;
        counts.map(|count| if count == 0 { 0 } else { count.max(goal) })
    }

    /// Check every class that needs synthetic rows has enough members to interpolate
    fn check_sizes(&self, counts: &[usize; 3], targets: &[usize; 3]) -> Result<()> {
        let required = self.k_neighbors + 1;
        for class in Priority::ALL {
            let c = class.index();
            if targets[c] > counts[c] && counts[c] < required {
                return Err(AppError::InsufficientSamples {
                    class: class.to_string(),
                    available: counts[c],
                    required,
                });
            }
        }
        Ok(())
    }

    pub fn balance(&self, dataset: &TrainingDataset) -> Result<(TrainingDataset, BalanceSummary)> {
        let before = dataset.class_counts();
        let targets = self.targets(&before);
        self.check_sizes(&before, &targets)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let n_features = dataset.n_features();
        let mut synthetic_rows: Vec<f64> = Vec::new();
        let mut synthetic_labels: Vec<Priority> = Vec::new();

        for class in Priority::ALL {
            let c = class.index();
            let needed = targets[c] - before[c];
            if needed == 0 {
                continue;
            }

            let members: Vec<usize> = dataset
                .labels
                .iter()
                .enumerate()
                .filter(|(_, label)| **label == class)
                .map(|(row, _)| row)
                .collect();
            let points = dataset.features.select(Axis(0), &members);
            let neighbors = self.neighbor_table(&points)?;

            for _ in 0..needed {
                let base = rng.gen_range(0..members.len());
                let neighbor = neighbors[base][rng.gen_range(0..neighbors[base].len())];
                let gap: f64 = rng.gen();

                let x = points.row(base);
                let nn = points.row(neighbor);
                synthetic_rows.extend(x.iter().zip(nn.iter()).map(|(a, b)| a + gap * (b - a)));
                synthetic_labels.push(class);
            }

            debug!(class = %class, original = before[c], synthesized = needed, "Oversampled class");
        }

        let synthetic = Array2::from_shape_vec((synthetic_labels.len(), n_features), synthetic_rows)
            .map_err(|e| AppError::Internal(format!("synthetic matrix shape: {}", e)))?;

        let mut features = dataset.features.clone();
        features
            .append(Axis(0), synthetic.view())
            .map_err(|e| AppError::Internal(format!("appending synthetic rows: {}", e)))?;

        let mut labels = dataset.labels.clone();
        labels.extend(synthetic_labels);

        let balanced = TrainingDataset::new(features, labels)?;
        let summary = BalanceSummary {
            before,
            after: balanced.class_counts(),
        };

        info!(
            before = ?summary.before,
            after = ?summary.after,
            synthesized = summary.synthesized(),
            "Balanced training partition"
        );

        Ok((balanced, summary))
    }

    /// The k nearest same-class neighbours of every member, excluding itself
    fn neighbor_table(&self, points: &Array2<f64>) -> Result<Vec<Vec<usize>>> {
        let index = LinearSearch::new()
            .from_batch(points, L2Dist)
            .map_err(|e| AppError::Internal(format!("failed to build neighbour index: {}", e)))?;

        points
            .rows()
            .into_iter()
            .enumerate()
            .map(|(row, point)| {
                let found = index
                    .k_nearest(point, self.k_neighbors + 1)
                    .map_err(|e| AppError::Internal(format!("neighbour search failed: {}", e)))?;
                Ok(found
                    .into_iter()
                    .map(|(_, idx)| idx)
                    .filter(|&idx| idx != row)
                    .take(self.k_neighbors)
                    .collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(k: usize) -> BalancerConfig {
        BalancerConfig {
            enabled: true,
            k_neighbors: k,
            sampling_ratio: 1.0,
            seed: 42,
        }
    }

    /// `high` rows near 0, `low` rows near 10, two columns each
    fn imbalanced(high: usize, low: usize) -> TrainingDataset {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for i in 0..high {
            values.extend([i as f64 * 0.1, 1.0]);
            labels.push(Priority::High);
        }
        for i in 0..low {
            values.extend([10.0 + i as f64 * 0.1, 2.0]);
            labels.push(Priority::Low);
        }
        let features = Array2::from_shape_vec((high + low, 2), values).unwrap();
        TrainingDataset::new(features, labels).unwrap()
    }

    #[test]
    fn test_minority_reaches_majority() {
        let dataset = imbalanced(6, 20);
        let (balanced, summary) = ClassBalancer::new(&config(5)).balance(&dataset).unwrap();

        assert_eq!(summary.before, [6, 0, 20]);
        assert_eq!(summary.after, [20, 0, 20]);
        assert_eq!(summary.synthesized(), 14);
        assert_eq!(balanced.n_samples(), 40);
    }

    #[test]
    fn test_original_rows_come_first_unchanged() {
        let dataset = imbalanced(6, 20);
        let (balanced, _) = ClassBalancer::new(&config(3)).balance(&dataset).unwrap();

        for row in 0..dataset.n_samples() {
            assert_eq!(balanced.features.row(row), dataset.features.row(row));
            assert_eq!(balanced.labels[row], dataset.labels[row]);
        }
    }

    #[test]
    fn test_synthetic_rows_lie_within_class_hull() {
        let dataset = imbalanced(6, 20);
        let (balanced, _) = ClassBalancer::new(&config(5)).balance(&dataset).unwrap();

        for row in dataset.n_samples()..balanced.n_samples() {
            assert_eq!(balanced.labels[row], Priority::High);
            let x = balanced.features[[row, 0]];
            assert!((0.0..=0.5 + 1e-12).contains(&x), "synthetic value {} escaped", x);
            assert_eq!(balanced.features[[row, 1]], 1.0);
        }
    }

    #[test]
    fn test_partial_ratio() {
        let dataset = imbalanced(6, 20);
        let mut cfg = config(5);
        cfg.sampling_ratio = 0.5;
        let (_, summary) = ClassBalancer::new(&cfg).balance(&dataset).unwrap();
        assert_eq!(summary.after, [10, 0, 20]);
    }

    #[test]
    fn test_too_small_minority_fails() {
        let dataset = imbalanced(3, 20);
        let err = ClassBalancer::new(&config(5)).balance(&dataset).unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientSamples {
                available: 3,
                required: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_already_balanced_is_untouched() {
        let dataset = imbalanced(4, 4);
        let (balanced, summary) = ClassBalancer::new(&config(5)).balance(&dataset).unwrap();
        assert_eq!(summary.synthesized(), 0);
        assert_eq!(balanced.features, dataset.features);
    }

    #[test]
    fn test_balancing_is_deterministic() {
        let dataset = imbalanced(6, 20);
        let balancer = ClassBalancer::new(&config(5));
        let (a, _) = balancer.balance(&dataset).unwrap();
        let (b, _) = balancer.balance(&dataset).unwrap();
        assert_eq!(a.features, b.features);
    }
}
