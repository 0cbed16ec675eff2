//! Stratified row partitioning
//!
//! Both helpers work on label slices and return row indices, so callers can
//! split raw records before any transformer is fitted and reuse the same
//! indices for every feature block.

use crate::error::{AppError, Result};
use crate::models::Priority;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Per-class shuffled row indices, in canonical class order
fn shuffled_by_class(labels: &[Priority], rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); Priority::ALL.len()];
    for (row, label) in labels.iter().enumerate() {
        by_class[label.index()].push(row);
    }
    for rows in by_class.iter_mut() {
        rows.shuffle(rng);
    }
    by_class
}

/// Split rows into (train, test) preserving each class's proportion.
///
/// Every class keeps at least one training row. Both index lists come back
/// sorted, so partitions keep the input row order.
pub fn stratified_split(
    labels: &[Priority],
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(0.0..1.0).contains(&test_size) {
        return Err(AppError::Configuration(format!(
            "test_size must be in [0, 1), got {}",
            test_size
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for rows in shuffled_by_class(labels, &mut rng) {
        if rows.is_empty() {
            continue;
        }
        let n_test = ((rows.len() as f64) * test_size).round() as usize;
        let n_test = n_test.min(rows.len() - 1);
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// Assign rows to `k` stratified folds; returns the validation rows of each fold.
///
/// Rows are dealt round-robin class by class with a running counter, so fold
/// sizes differ by at most one and each class is spread evenly.
pub fn stratified_folds(labels: &[Priority], k: usize, seed: u64) -> Result<Vec<Vec<usize>>> {
    if k < 2 {
        return Err(AppError::Configuration(format!(
            "cross-validation needs at least 2 folds, got {}",
            k
        )));
    }
    if labels.len() < k {
        return Err(AppError::Configuration(format!(
            "cannot build {} folds from {} rows",
            k,
            labels.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); k];
    let mut position = 0usize;

    for rows in shuffled_by_class(labels, &mut rng) {
        for row in rows {
            folds[position % k].push(row);
            position += 1;
        }
    }

    for fold in folds.iter_mut() {
        fold.sort_unstable();
    }
    Ok(folds)
}

/// Complement of a fold: every row not in `validation`
pub fn fold_complement(n_rows: usize, validation: &[usize]) -> Vec<usize> {
    let mut held_out = vec![false; n_rows];
    for &row in validation {
        held_out[row] = true;
    }
    (0..n_rows).filter(|&row| !held_out[row]).collect()
}
