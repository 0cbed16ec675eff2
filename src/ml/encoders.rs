use crate::error::{AppError, Result};
use ndarray::{Array1, Array2, ArrayViewMut1};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};

/// One-hot encoder for the issue type column.
///
/// Categories are kept sorted so the index of a value is its position in the
/// vocabulary; unknown values encode to the all-zero row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    categories: Vec<String>,
}

impl CategoricalEncoder {
    /// Build the vocabulary from training values
    pub fn fit<S: AsRef<str>>(values: &[S]) -> Result<Self> {
        if values.is_empty() {
            return Err(AppError::InvalidInput(
                "cannot fit categorical encoder on an empty column".to_string(),
            ));
        }

        let mut categories: Vec<String> = values.iter().map(|v| v.as_ref().to_string()).collect();
        categories.sort_unstable();
        categories.dedup();

        Ok(Self { categories })
    }

    /// Check the invariants a deserialized encoder must hold
    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(AppError::Artifact(
                "categorical encoder has an empty vocabulary".to_string(),
            ));
        }
        if !self.categories.windows(2).all(|w| w[0] < w[1]) {
            return Err(AppError::Artifact(
                "categorical encoder vocabulary is not strictly sorted".to_string(),
            ));
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.categories
            .binary_search_by(|category| category.as_str().cmp(value))
            .ok()
    }

    /// Write the indicator for `value` into a zeroed slice of width `self.width()`
    pub fn transform_into(&self, value: &str, mut out: ArrayViewMut1<'_, f64>) {
        if let Some(idx) = self.index_of(value) {
            out[idx] = 1.0;
        }
    }

    pub fn transform(&self, value: &str) -> Array1<f64> {
        let mut row = Array1::zeros(self.width());
        self.transform_into(value, row.view_mut());
        row
    }

    pub fn transform_batch<S: AsRef<str>>(&self, values: &[S]) -> Array2<f64> {
        let mut matrix = Array2::zeros((values.len(), self.width()));
        for (row, value) in matrix.rows_mut().into_iter().zip(values) {
            self.transform_into(value.as_ref(), row);
        }
        matrix
    }
}

/// Max-abs scaler for the attachment count, followed by a fixed damping factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericScaler {
    /// Largest absolute value seen during fit
    max_abs: f64,

    /// Multiplier applied after scaling
    damping: f64,
}

impl NumericScaler {
    pub fn fit(values: &[f64], damping: f64) -> Result<Self> {
        let column = Array1::from(values.to_vec()).mapv(f64::abs);
        let max_abs = *column.max().map_err(|e| {
            AppError::InvalidInput(format!("cannot fit numeric scaler: {}", e))
        })?;

        let scaler = Self { max_abs, damping };
        scaler.validate()?;
        Ok(scaler)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_abs.is_finite() || self.max_abs < 0.0 {
            return Err(AppError::Artifact(format!(
                "numeric scaler bound must be finite and non-negative, got {}",
                self.max_abs
            )));
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(AppError::Artifact(format!(
                "numeric scaler damping must be finite and non-negative, got {}",
                self.damping
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        1
    }

    pub fn max_abs(&self) -> f64 {
        self.max_abs
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    /// Scale and damp one value. A zero bound (constant zero column) leaves values unscaled.
    pub fn transform(&self, value: f64) -> f64 {
        let scale = if self.max_abs == 0.0 { 1.0 } else { self.max_abs };
        value / scale * self.damping
    }
}
