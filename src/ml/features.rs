use crate::error::{AppError, Result};
use crate::ml::encoders::{CategoricalEncoder, NumericScaler};
use crate::ml::models::FeatureConfig;
use crate::ml::text::TextVectorizer;
use crate::models::ComplaintRecord;
use ndarray::{s, Array1, Array2, ArrayViewMut1};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

/// A contiguous group of columns in the fused feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeatureBlock {
    Categorical,
    Text,
    Numeric,
}

/// Offset and width of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpan {
    pub block: FeatureBlock,
    pub offset: usize,
    pub width: usize,
}

impl BlockSpan {
    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Column layout of the fused vector.
///
/// Persisted with every artifact; training and inference must agree on it
/// exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub blocks: Vec<BlockSpan>,
}

impl FeatureLayout {
    /// Block order of every fused row
    pub const CANONICAL_ORDER: [FeatureBlock; 3] = [
        FeatureBlock::Categorical,
        FeatureBlock::Text,
        FeatureBlock::Numeric,
    ];

    pub fn new(categorical: usize, text: usize, numeric: usize) -> Self {
        let widths = [categorical, text, numeric];
        let mut offset = 0;
        let blocks = Self::CANONICAL_ORDER
            .iter()
            .zip(widths)
            .map(|(&block, width)| {
                let span = BlockSpan {
                    block,
                    offset,
                    width,
                };
                offset += width;
                span
            })
            .collect();
        Self { blocks }
    }

    pub fn total_width(&self) -> usize {
        self.blocks.last().map(BlockSpan::end).unwrap_or(0)
    }

    pub fn span(&self, block: FeatureBlock) -> Option<BlockSpan> {
        self.blocks.iter().copied().find(|span| span.block == block)
    }

    pub fn width_of(&self, block: FeatureBlock) -> usize {
        self.span(block).map(|span| span.width).unwrap_or(0)
    }

    /// Block owning a fused column index
    pub fn block_of(&self, column: usize) -> Option<BlockSpan> {
        self.blocks
            .iter()
            .copied()
            .find(|span| column >= span.offset && column < span.end())
    }

    /// Canonical order, contiguous offsets starting at zero
    pub fn validate(&self) -> Result<()> {
        let order: Vec<FeatureBlock> = self.blocks.iter().map(|span| span.block).collect();
        if order != Self::CANONICAL_ORDER {
            return Err(AppError::Artifact(format!(
                "feature blocks must be ordered {:?}, found {:?}",
                Self::CANONICAL_ORDER,
                order
            )));
        }

        let mut expected_offset = 0;
        for span in &self.blocks {
            if span.offset != expected_offset {
                return Err(AppError::dimension_mismatch(
                    format!("{} block offset", span.block),
                    expected_offset,
                    span.offset,
                ));
            }
            expected_offset = span.end();
        }
        Ok(())
    }

    /// Fail with `DimensionMismatch` on the first block whose width differs
    pub fn ensure_matches(&self, other: &FeatureLayout, context: &str) -> Result<()> {
        for block in Self::CANONICAL_ORDER {
            let expected = self.width_of(block);
            let actual = other.width_of(block);
            if expected != actual {
                return Err(AppError::dimension_mismatch(
                    format!("{} ({} block)", context, block),
                    expected,
                    actual,
                ));
            }
        }
        if self != other {
            return Err(AppError::dimension_mismatch(
                context,
                self.total_width(),
                other.total_width(),
            ));
        }
        Ok(())
    }
}

/// Fitted transformers that turn a complaint into one fused feature row
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureExtractor {
    encoder: CategoricalEncoder,
    vectorizer: TextVectorizer,
    scaler: NumericScaler,
    layout: FeatureLayout,
}

impl FeatureExtractor {
    /// Fit all three transformers on training records only
    pub fn fit(config: &FeatureConfig, records: &[ComplaintRecord]) -> Result<Self> {
        let issue_types: Vec<&str> = records.iter().map(|r| r.issue_type()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.complaint_text()).collect();
        let attachments: Vec<f64> = records.iter().map(|r| r.attachments() as f64).collect();

        let encoder = CategoricalEncoder::fit(&issue_types)?;
        let vectorizer = TextVectorizer::fit(config, &texts)?;
        let scaler = NumericScaler::fit(&attachments, config.numeric_damping)?;

        let extractor = Self::from_parts(encoder, vectorizer, scaler)?;
        debug!(
            categorical = extractor.layout.width_of(FeatureBlock::Categorical),
            text = extractor.layout.width_of(FeatureBlock::Text),
            numeric = extractor.layout.width_of(FeatureBlock::Numeric),
            "Fitted feature extractor"
        );
        Ok(extractor)
    }

    /// Assemble an extractor from independently loaded pieces
    pub fn from_parts(
        encoder: CategoricalEncoder,
        vectorizer: TextVectorizer,
        scaler: NumericScaler,
    ) -> Result<Self> {
        encoder.validate()?;
        vectorizer.validate()?;
        scaler.validate()?;

        let layout = FeatureLayout::new(encoder.width(), vectorizer.width(), scaler.width());
        Ok(Self {
            encoder,
            vectorizer,
            scaler,
            layout,
        })
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn n_features(&self) -> usize {
        self.layout.total_width()
    }

    pub fn encoder(&self) -> &CategoricalEncoder {
        &self.encoder
    }

    pub fn vectorizer(&self) -> &TextVectorizer {
        &self.vectorizer
    }

    pub fn scaler(&self) -> &NumericScaler {
        &self.scaler
    }

    /// Fill one zeroed row in canonical block order
    fn fill_row(&self, record: &ComplaintRecord, mut row: ArrayViewMut1<'_, f64>) {
        let cat = self.layout.blocks[0];
        let text = self.layout.blocks[1];
        let num = self.layout.blocks[2];

        self.encoder
            .transform_into(record.issue_type(), row.slice_mut(s![cat.offset..cat.end()]));
        self.vectorizer
            .transform_into(record.complaint_text(), row.slice_mut(s![text.offset..text.end()]));
        row[num.offset] = self.scaler.transform(record.attachments() as f64);
    }

    /// Transform a single record into a fused feature vector
    pub fn transform(&self, record: &ComplaintRecord) -> Array1<f64> {
        let mut row = Array1::zeros(self.n_features());
        self.fill_row(record, row.view_mut());
        row
    }

    /// Transform a batch; row i of the result is built from `records[i]` only
    pub fn transform_batch(&self, records: &[ComplaintRecord]) -> Array2<f64> {
        let mut matrix = Array2::zeros((records.len(), self.n_features()));
        for (row, record) in matrix.rows_mut().into_iter().zip(records) {
            self.fill_row(record, row);
        }
        matrix
    }
}
