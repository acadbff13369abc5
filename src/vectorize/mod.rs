//! Text vectorization.
//!
//! This module defines the interface the clustering stages use to project
//! cleaned abstracts into a fixed-dimensional vector space, and the TF-IDF
//! implementation of it.
//!
//! Fitting and transforming are split across two types. [`tfidf::TfidfFitter`]
//! is only used once, by the training stage, and produces a
//! [`tfidf::TfidfModel`]. Everything downstream (coarse clustering,
//! consolidation, labeling) receives the model through the transform-only
//! [`TextVectorizer`] trait, so per-cluster code has no way to refit on a
//! subset.

pub mod tfidf;

use thiserror::Error;

pub use tfidf::{TfidfFitter, TfidfModel, VocabularyRanking};

/// Errors that can occur while fitting or loading a vectorizer model.
#[derive(Debug, Error)]
pub enum VectorizeError {
    /// The fitting corpus has no documents
    #[error("Cannot fit a vectorizer on an empty corpus")]
    EmptyCorpus,

    /// No document contains a usable token
    #[error("Empty vocabulary: the corpus contains no tokens of two or more characters")]
    EmptyVocabulary,

    /// Invalid fitting parameter
    #[error("Invalid vectorizer parameter: {0}")]
    InvalidParameter(String),

    /// A persisted model is internally inconsistent
    #[error("Corrupt vectorizer model: {0}")]
    CorruptModel(String),
}

/// Result type for vectorizer operations.
pub type VectorizeResult<T> = Result<T, VectorizeError>;

/// Transform-only handle on a fitted term-weighting model.
///
/// Implementors project arbitrary text, including text outside the fitting
/// corpus, into the model's fixed vocabulary space. Out-of-vocabulary terms get
/// zero weight.
pub trait TextVectorizer: Send + Sync {
    /// Project one cleaned text into the vocabulary space.
    fn transform(&self, text: &str) -> Vec<f32>;

    /// Project several texts, preserving input order.
    fn transform_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.transform(t)).collect()
    }

    /// Number of vocabulary terms, i.e. the vector dimensionality.
    fn dimension(&self) -> usize;

    /// Vocabulary terms indexed by vector position.
    fn terms(&self) -> &[String];
}

/// Split a cleaned text into vocabulary candidate tokens.
///
/// Tokens shorter than two characters are ignored, mirroring the usual
/// word-token pattern of TF-IDF vectorizers.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace().filter(|t| t.chars().count() >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_skips_single_chars() {
        let tokens: Vec<&str> = tokenize("a bone  x loss").collect();
        assert_eq!(tokens, vec!["bone", "loss"]);
    }
}
