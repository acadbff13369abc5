//! TF-IDF term weighting.
//!
//! The fitted model keeps at most `max_features` terms. Terms are ranked by
//! total corpus count by default (ties broken alphabetically) and the kept
//! vocabulary is then ordered alphabetically, which is the ordering label
//! tie-breaks rely on.
//!
//! Weights use smoothed inverse document frequency,
//! `idf(t) = ln((1 + n) / (1 + df(t))) + 1`, and every transformed vector is
//! L2-normalized.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{tokenize, TextVectorizer, VectorizeError, VectorizeResult};

/// Criterion used to pick the kept vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyRanking {
    /// Total occurrences across the corpus
    #[default]
    TermFrequency,

    /// Sum of normalized TF-IDF weights across the corpus
    TfIdf,
}

/// One-time fitter for a [`TfidfModel`].
///
/// Only the training stage should hold one of these.
#[derive(Debug, Clone)]
pub struct TfidfFitter {
    max_features: usize,
    ranking: VocabularyRanking,
}

impl TfidfFitter {
    /// Create a fitter keeping at most `max_features` terms.
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            ranking: VocabularyRanking::default(),
        }
    }

    /// Choose how vocabulary candidates are ranked.
    pub fn with_ranking(mut self, ranking: VocabularyRanking) -> Self {
        self.ranking = ranking;
        self
    }

    /// Fit a model over the whole corpus of cleaned abstracts.
    ///
    /// # Errors
    /// Returns `VectorizeError::EmptyCorpus` for an empty corpus,
    /// `VectorizeError::EmptyVocabulary` when no document has a usable token,
    /// and `VectorizeError::InvalidParameter` when `max_features` is zero.
    pub fn fit(&self, corpus: &[&str]) -> VectorizeResult<TfidfModel> {
        if self.max_features == 0 {
            return Err(VectorizeError::InvalidParameter(
                "max_features must be at least 1".to_string(),
            ));
        }
        if corpus.is_empty() {
            return Err(VectorizeError::EmptyCorpus);
        }

        // BTreeMap keeps candidate order alphabetical, which makes every later
        // sort stable with respect to the term itself. Per-document maps are
        // ordered too: float sums over them must add in the same order on
        // every fit.
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut doc_freq: BTreeMap<&str, usize> = BTreeMap::new();
        let mut doc_counts: Vec<BTreeMap<&str, usize>> = Vec::with_capacity(corpus.len());

        for doc in corpus {
            let mut local: BTreeMap<&str, usize> = BTreeMap::new();
            for token in tokenize(doc) {
                *local.entry(token).or_insert(0) += 1;
            }
            for (term, count) in &local {
                *counts.entry(*term).or_insert(0) += count;
                *doc_freq.entry(*term).or_insert(0) += 1;
            }
            doc_counts.push(local);
        }

        if counts.is_empty() {
            return Err(VectorizeError::EmptyVocabulary);
        }

        let n_docs = corpus.len();
        let scores: Vec<(&str, f64)> = match self.ranking {
            VocabularyRanking::TermFrequency => {
                counts.iter().map(|(t, c)| (*t, *c as f64)).collect()
            }
            VocabularyRanking::TfIdf => {
                let idf: BTreeMap<&str, f64> = doc_freq
                    .iter()
                    .map(|(t, df)| (*t, smoothed_idf(n_docs, *df)))
                    .collect();
                let mut summed: BTreeMap<&str, f64> = BTreeMap::new();
                for local in &doc_counts {
                    let norm = local
                        .iter()
                        .map(|(t, c)| (*c as f64 * idf[t]).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    if norm == 0.0 {
                        continue;
                    }
                    for (t, c) in local {
                        *summed.entry(*t).or_insert(0.0) += *c as f64 * idf[t] / norm;
                    }
                }
                summed.into_iter().collect()
            }
        };

        let mut ranked = scores;
        // Stable sort over alphabetical input: equal scores stay alphabetical.
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.max_features);

        let mut terms: Vec<String> = ranked.into_iter().map(|(t, _)| t.to_string()).collect();
        terms.sort();

        let idf: Vec<f32> = terms
            .iter()
            .map(|t| smoothed_idf(n_docs, doc_freq[t.as_str()]) as f32)
            .collect();

        info!(
            documents = n_docs,
            candidates = counts.len(),
            vocabulary = terms.len(),
            ranking = ?self.ranking,
            "Fitted TF-IDF vocabulary"
        );

        Ok(TfidfModel::from_parts(terms, idf))
    }
}

fn smoothed_idf(n_docs: usize, df: usize) -> f64 {
    ((1.0 + n_docs as f64) / (1.0 + df as f64)).ln() + 1.0
}

/// Fitted TF-IDF model.
///
/// Can only be produced by [`TfidfFitter::fit`] or by loading a persisted
/// model, and exposes no way to refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PersistedModel", into = "PersistedModel")]
pub struct TfidfModel {
    terms: Vec<String>,
    idf: Vec<f32>,
    index: HashMap<String, usize>,
}

impl TfidfModel {
    fn from_parts(terms: Vec<String>, idf: Vec<f32>) -> Self {
        let index = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self { terms, idf, index }
    }

    /// Inverse document frequency per vocabulary position.
    pub fn idf(&self) -> &[f32] {
        &self.idf
    }

    /// Vector position of a term, if it is in the vocabulary.
    pub fn position(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }
}

impl TextVectorizer for TfidfModel {
    fn transform(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.terms.len()];
        for token in tokenize(text) {
            if let Some(&i) = self.index.get(token) {
                vector[i] += 1.0;
            }
        }
        for (w, idf) in vector.iter_mut().zip(self.idf.iter()) {
            *w *= idf;
        }
        let norm = vector.iter().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for w in vector.iter_mut() {
                *w /= norm;
            }
        } else {
            debug!("Text has no in-vocabulary terms; returning zero vector");
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.terms.len()
    }

    fn terms(&self) -> &[String] {
        &self.terms
    }
}

/// On-disk form of a [`TfidfModel`].
#[derive(Serialize, Deserialize)]
struct PersistedModel {
    terms: Vec<String>,
    idf: Vec<f32>,
}

impl From<TfidfModel> for PersistedModel {
    fn from(model: TfidfModel) -> Self {
        Self {
            terms: model.terms,
            idf: model.idf,
        }
    }
}

impl TryFrom<PersistedModel> for TfidfModel {
    type Error = VectorizeError;

    fn try_from(data: PersistedModel) -> Result<Self, Self::Error> {
        if data.terms.len() != data.idf.len() {
            return Err(VectorizeError::CorruptModel(format!(
                "{} terms but {} idf weights",
                data.terms.len(),
                data.idf.len()
            )));
        }
        let model = TfidfModel::from_parts(data.terms, data.idf);
        if model.index.len() != model.terms.len() {
            return Err(VectorizeError::CorruptModel("duplicate vocabulary terms".to_string()));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<&'static str> {
        vec![
            "bone loss microgravity bone",
            "muscle atrophy microgravity",
            "plant growth root",
        ]
    }

    #[test]
    fn test_vocabulary_is_alphabetical() {
        let model = TfidfFitter::new(100).fit(&corpus()).unwrap();
        let terms = model.terms().to_vec();
        let mut sorted = terms.clone();
        sorted.sort();
        assert_eq!(terms, sorted);
        assert_eq!(model.dimension(), 8);
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        // bone (2) and microgravity (2) outrank every single-count term;
        // the third slot goes to the alphabetically first single-count term.
        let model = TfidfFitter::new(3).fit(&corpus()).unwrap();
        assert_eq!(model.terms(), &["atrophy", "bone", "microgravity"]);
    }

    #[test]
    fn test_idf_smoothing() {
        let model = TfidfFitter::new(100).fit(&corpus()).unwrap();
        let micro = model.position("microgravity").unwrap();
        let root = model.position("root").unwrap();
        let expected_micro = ((4.0f64 / 3.0).ln() + 1.0) as f32;
        let expected_root = ((4.0f64 / 2.0).ln() + 1.0) as f32;
        assert!((model.idf()[micro] - expected_micro).abs() < 1e-6);
        assert!((model.idf()[root] - expected_root).abs() < 1e-6);
    }

    #[test]
    fn test_transform_is_unit_length() {
        let model = TfidfFitter::new(100).fit(&corpus()).unwrap();
        let v = model.transform("bone loss");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_transform_out_of_vocabulary_is_zero() {
        let model = TfidfFitter::new(100).fit(&corpus()).unwrap();
        let v = model.transform("spaceship telescope");
        assert_eq!(v.len(), model.dimension());
        assert!(v.iter().all(|w| *w == 0.0));
    }

    #[test]
    fn test_transform_batch_preserves_order() {
        let model = TfidfFitter::new(100).fit(&corpus()).unwrap();
        let batch = model.transform_batch(&["plant", "bone"]);
        assert_eq!(batch[0], model.transform("plant"));
        assert_eq!(batch[1], model.transform("bone"));
    }

    #[test]
    fn test_tfidf_ranking_differs_from_counts() {
        let docs = vec!["common common common rare", "common", "common", "other"];
        let by_count = TfidfFitter::new(1).fit(&docs).unwrap();
        assert_eq!(by_count.terms(), &["common"]);
        let by_weight = TfidfFitter::new(2)
            .with_ranking(VocabularyRanking::TfIdf)
            .fit(&docs)
            .unwrap();
        assert_eq!(by_weight.dimension(), 2);
        assert!(by_weight.position("common").is_some());
    }

    #[test]
    fn test_tfidf_ranking_is_reproducible() {
        // Equal-shaped documents tie on every marker's score, so the kept
        // vocabulary depends only on the alphabetical tie-break.
        let docs: Vec<String> = (0..40)
            .map(|d| {
                let filler: Vec<String> = (0..30).map(|f| format!("filler{f:02}")).collect();
                format!("marker{d:02} {}", filler.join(" "))
            })
            .collect();
        let docs: Vec<&str> = docs.iter().map(String::as_str).collect();
        // 30 shared fillers outrank every marker; five marker slots remain.
        let fitter = TfidfFitter::new(35).with_ranking(VocabularyRanking::TfIdf);

        let first = fitter.fit(&docs).unwrap();
        for _ in 0..50 {
            assert_eq!(fitter.fit(&docs).unwrap().terms(), first.terms());
        }
        let markers: Vec<&str> = first
            .terms()
            .iter()
            .map(String::as_str)
            .filter(|t| t.starts_with("marker"))
            .collect();
        assert_eq!(markers, vec!["marker00", "marker01", "marker02", "marker03", "marker04"]);
    }

    #[test]
    fn test_fit_errors() {
        assert!(matches!(TfidfFitter::new(10).fit(&[]), Err(VectorizeError::EmptyCorpus)));
        assert!(matches!(
            TfidfFitter::new(10).fit(&["", "a b"]),
            Err(VectorizeError::EmptyVocabulary)
        ));
        assert!(matches!(
            TfidfFitter::new(0).fit(&["bone"]),
            Err(VectorizeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_model_json_roundtrip_rebuilds_index() {
        let model = TfidfFitter::new(100).fit(&corpus()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let loaded: TfidfModel = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, model);
        assert_eq!(loaded.position("root"), model.position("root"));
    }

    #[test]
    fn test_corrupt_model_rejected() {
        let json = r#"{"terms": ["a", "b"], "idf": [1.0]}"#;
        assert!(serde_json::from_str::<TfidfModel>(json).is_err());
        let json = r#"{"terms": ["a", "a"], "idf": [1.0, 1.0]}"#;
        assert!(serde_json::from_str::<TfidfModel>(json).is_err());
    }
}
