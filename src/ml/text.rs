use crate::error::{AppError, Result};
use crate::ml::models::FeatureConfig;
use ndarray::{Array1, ArrayViewMut1};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Tokens of two or more word characters
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?u)\b\w\w+\b").expect("token pattern is a valid regex"));

/// TF-IDF vectorizer over word n-grams.
///
/// The vocabulary is stored sorted so that a term's column is its position in
/// `vocabulary` and lookups are a binary search; `idf[i]` belongs to
/// `vocabulary[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextVectorizer {
    min_ngram: usize,
    max_ngram: usize,
    normalize: bool,
    weight: f64,
    vocabulary: Vec<String>,
    idf: Vec<f64>,
}

impl TextVectorizer {
    /// Fit vocabulary and IDF weights on the training descriptions.
    ///
    /// Terms below `min_doc_freq` are dropped; of the rest the
    /// `max_vocab_size` most frequent (total count, ties by term) are kept.
    pub fn fit<S: AsRef<str>>(config: &FeatureConfig, documents: &[S]) -> Result<Self> {
        if documents.is_empty() {
            return Err(AppError::InvalidInput(
                "cannot fit text vectorizer on an empty corpus".to_string(),
            ));
        }

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let terms = analyze(doc.as_ref(), config.min_ngram, config.max_ngram);
            let unique: HashSet<&String> = terms.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            for term in terms {
                *term_freq.entry(term).or_insert(0) += 1;
            }
        }

        let mut candidates: Vec<(String, usize)> = term_freq
            .into_iter()
            .filter(|(term, _)| doc_freq.get(term).copied().unwrap_or(0) >= config.min_doc_freq)
            .collect();

        if candidates.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "no term appears in at least {} documents",
                config.min_doc_freq
            )));
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(config.max_vocab_size);

        let mut vocabulary: Vec<String> = candidates.into_iter().map(|(term, _)| term).collect();
        vocabulary.sort_unstable();

        let n_docs = documents.len() as f64;
        let idf = vocabulary
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        Ok(Self {
            min_ngram: config.min_ngram,
            max_ngram: config.max_ngram,
            normalize: config.normalize_text,
            weight: config.text_weight,
            vocabulary,
            idf,
        })
    }

    /// Check the invariants a deserialized vectorizer must hold
    pub fn validate(&self) -> Result<()> {
        if self.vocabulary.len() != self.idf.len() {
            return Err(AppError::dimension_mismatch(
                "vectorizer idf weights",
                self.vocabulary.len(),
                self.idf.len(),
            ));
        }
        if self.vocabulary.is_empty() {
            return Err(AppError::Artifact(
                "text vectorizer has an empty vocabulary".to_string(),
            ));
        }
        if !self.vocabulary.windows(2).all(|w| w[0] < w[1]) {
            return Err(AppError::Artifact(
                "text vectorizer vocabulary is not strictly sorted".to_string(),
            ));
        }
        if self.min_ngram == 0 || self.min_ngram > self.max_ngram {
            return Err(AppError::Artifact(format!(
                "invalid n-gram range ({}, {})",
                self.min_ngram, self.max_ngram
            )));
        }
        if self.idf.iter().any(|w| !w.is_finite()) || !self.weight.is_finite() {
            return Err(AppError::Artifact(
                "text vectorizer weights must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn term(&self, index: usize) -> Option<&str> {
        self.vocabulary.get(index).map(String::as_str)
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.vocabulary
            .binary_search_by(|candidate| candidate.as_str().cmp(term))
            .ok()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.index_of(term).map(|idx| self.idf[idx])
    }

    /// Write the weighted row for `text` into a zeroed slice of width `self.width()`
    pub fn transform_into(&self, text: &str, mut out: ArrayViewMut1<'_, f64>) {
        // BTreeMap keeps accumulation order fixed, so repeated calls are bit-identical
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for term in analyze(text, self.min_ngram, self.max_ngram) {
            if let Some(idx) = self.index_of(&term) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        if counts.is_empty() {
            return;
        }

        for (idx, tf) in counts.iter_mut() {
            *tf *= self.idf[*idx];
        }

        let norm = if self.normalize {
            counts.values().map(|v| v * v).sum::<f64>().sqrt()
        } else {
            1.0
        };

        for (idx, value) in counts {
            out[idx] = value / norm * self.weight;
        }
    }

    pub fn transform(&self, text: &str) -> Array1<f64> {
        let mut row = Array1::zeros(self.width());
        self.transform_into(text, row.view_mut());
        row
    }
}

/// Lowercase, tokenize and expand into contiguous n-grams joined by a space
pub fn analyze(text: &str, min_n: usize, max_n: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .collect();

    let mut terms = Vec::new();
    for n in min_n.max(1)..=max_n {
        if n > tokens.len() {
            break;
        }
        for window in tokens.windows(n) {
            terms.push(window.join(" "));
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_ngram: usize, min_doc_freq: usize) -> FeatureConfig {
        FeatureConfig {
            max_vocab_size: 1000,
            min_doc_freq,
            min_ngram: 1,
            max_ngram,
            normalize_text: true,
            text_weight: 1.0,
            numeric_damping: 0.2,
        }
    }

    #[test]
    fn test_analyze_tokens_and_ngrams() {
        let terms = analyze("Pipe burst on ROAD!", 1, 2);
        assert_eq!(
            terms,
            vec!["pipe", "burst", "on", "road", "pipe burst", "burst on", "on road"]
        );
    }

    #[test]
    fn test_analyze_drops_single_char_tokens() {
        let terms = analyze("a b cd", 1, 1);
        assert_eq!(terms, vec!["cd"]);
    }

    #[test]
    fn test_analyze_short_text_skips_long_ngrams() {
        assert_eq!(analyze("leak", 1, 4), vec!["leak"]);
        assert!(analyze("", 1, 4).is_empty());
    }

    #[test]
    fn test_fit_min_doc_freq() {
        let docs = ["water leak", "water supply", "garbage pile"];
        let vectorizer = TextVectorizer::fit(&config(1, 2), &docs).unwrap();
        assert_eq!(vectorizer.vocabulary(), &["water".to_string()]);
    }

    #[test]
    fn test_fit_max_vocab_keeps_most_frequent() {
        let docs = ["road road road", "road light", "light drain", "drain"];
        let mut cfg = config(1, 1);
        cfg.max_vocab_size = 2;
        let vectorizer = TextVectorizer::fit(&cfg, &docs).unwrap();
        // road: 4, light: 2, drain: 2 -> tie broken alphabetically
        assert_eq!(vectorizer.vocabulary(), &["drain".to_string(), "road".to_string()]);
    }

    #[test]
    fn test_idf_smoothing() {
        let docs = ["water leak", "water supply"];
        let vectorizer = TextVectorizer::fit(&config(1, 1), &docs).unwrap();
        let idf_water = vectorizer.idf("water").unwrap();
        let idf_leak = vectorizer.idf("leak").unwrap();
        assert!((idf_water - 1.0).abs() < 1e-12);
        assert!((idf_leak - ((3.0f64 / 2.0).ln() + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_transform_is_l2_normalized_and_weighted() {
        let docs = ["water leak", "water supply", "leak supply"];
        let mut cfg = config(1, 1);
        cfg.text_weight = 3.0;
        let vectorizer = TextVectorizer::fit(&cfg, &docs).unwrap();

        let row = vectorizer.transform("water leak");
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_vocabulary_terms_ignored() {
        let docs = ["water leak", "water supply"];
        let vectorizer = TextVectorizer::fit(&config(2, 1), &docs).unwrap();
        let row = vectorizer.transform("volcano eruption");
        assert_eq!(row.len(), vectorizer.width());
        assert!(row.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_transform_deterministic() {
        let docs = ["pipe burst on road", "road damaged by pipe", "burst pipe"];
        let vectorizer = TextVectorizer::fit(&config(3, 1), &docs).unwrap();
        let a = vectorizer.transform("pipe burst on road near pipe");
        let b = vectorizer.transform("pipe burst on road near pipe");
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_detects_tampering() {
        let docs = ["water leak", "water supply"];
        let mut vectorizer = TextVectorizer::fit(&config(1, 1), &docs).unwrap();
        assert!(vectorizer.validate().is_ok());
        vectorizer.idf.pop();
        assert!(matches!(
            vectorizer.validate(),
            Err(AppError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_fit_rejects_empty_vocabulary() {
        let docs = ["alpha", "beta"];
        assert!(TextVectorizer::fit(&config(1, 2), &docs).is_err());
    }
}
