use crate::error::{AppError, Result};
use crate::ml::models::VectorizerConfig;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Case-folded alphabetic runs of at least two letters
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z]{2,}\b").expect("token pattern is a valid regex"));

/// Sparse feature vector over a fixed vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Dimensionality (vocabulary size)
    dim: usize,

    /// Feature indices, strictly increasing
    indices: Vec<usize>,

    /// Values matching `indices`
    values: Vec<f64>,
}

impl SparseVector {
    /// All-zero vector of the given dimension
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from (index, value) pairs; entries are sorted and zeros dropped
    pub fn from_pairs(dim: usize, mut pairs: Vec<(usize, f64)>) -> Result<Self> {
        pairs.sort_by_key(|(idx, _)| *idx);
        let mut indices = Vec::with_capacity(pairs.len());
        let mut values = Vec::with_capacity(pairs.len());
        for (idx, value) in pairs {
            if idx >= dim {
                return Err(AppError::Internal(format!(
                    "feature index {} out of bounds for dimension {}",
                    idx, dim
                )));
            }
            if indices.last() == Some(&idx) {
                return Err(AppError::Internal(format!("duplicate feature index {}", idx)));
            }
            if value != 0.0 {
                indices.push(idx);
                values.push(value);
            }
        }
        Ok(Self { dim, indices, values })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored (non-zero) entries
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_zero(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate over (index, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Value at an index (zero when absent)
    pub fn get(&self, index: usize) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Dense copy
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.dim];
        for (idx, value) in self.iter() {
            dense[idx] = value;
        }
        dense
    }

    fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            for value in &mut self.values {
                *value /= norm;
            }
        }
    }
}

/// TF-IDF vectorizer
///
/// Fitted once on a training corpus; afterwards the vocabulary and IDF
/// weights are frozen and `transform` only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    /// Configuration
    config: VectorizerConfig,

    /// Vocabulary mapping (term -> index)
    vocabulary: HashMap<String, usize>,

    /// Inverse document frequency per index
    idf: Vec<f64>,

    /// Number of documents seen during fitting
    n_documents: usize,

    /// Is fitted (vocabulary built)
    is_fitted: bool,
}

impl TfidfVectorizer {
    /// Create a new, unfitted vectorizer
    pub fn new(config: VectorizerConfig) -> Self {
        Self {
            config,
            vocabulary: HashMap::new(),
            idf: Vec::new(),
            n_documents: 0,
            is_fitted: false,
        }
    }

    /// Fit the vocabulary and IDF weights on a corpus
    pub fn fit<S>(&mut self, documents: &[S]) -> Result<()>
    where
        S: AsRef<str> + Sync,
    {
        self.config.validate()?;

        if documents.is_empty() {
            return Err(AppError::Training(
                "cannot fit vectorizer on an empty corpus".to_string(),
            ));
        }

        let per_document: Vec<HashMap<String, usize>> = documents
            .par_iter()
            .map(|doc| self.count_terms(doc.as_ref()))
            .collect();

        // Document frequency and corpus-wide term frequency
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_freq: HashMap<String, usize> = HashMap::new();
        for counts in per_document {
            for (term, count) in counts {
                *term_freq.entry(term.clone()).or_insert(0) += count;
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let n_docs = documents.len();
        let max_doc_count = self.config.max_df * n_docs as f64;
        let mut candidates: Vec<(String, usize)> = doc_freq
            .iter()
            .filter(|(_, &df)| df >= self.config.min_df && df as f64 <= max_doc_count)
            .map(|(term, _)| (term.clone(), term_freq[term]))
            .collect();

        if candidates.is_empty() {
            return Err(AppError::Training(format!(
                "no terms left after document-frequency filtering (min_df={}, max_df={}, {} documents)",
                self.config.min_df, self.config.max_df, n_docs
            )));
        }

        // Keep the most frequent terms, ties broken alphabetically
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(self.config.max_features);

        // Index order is alphabetical
        let mut terms: Vec<String> = candidates.into_iter().map(|(term, _)| term).collect();
        terms.sort();

        let idf: Vec<f64> = terms
            .iter()
            .map(|term| {
                let df = doc_freq[term] as f64;
                ((1.0 + n_docs as f64) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        self.vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(idx, term)| (term, idx))
            .collect();
        self.idf = idf;
        self.n_documents = n_docs;
        self.is_fitted = true;

        info!(
            n_documents = n_docs,
            candidate_terms = doc_freq.len(),
            vocab_size = self.vocabulary.len(),
            "TF-IDF vectorizer fitted"
        );

        Ok(())
    }

    /// Transform a batch of texts; output order matches input order
    pub fn transform<S>(&self, texts: &[S]) -> Result<Vec<SparseVector>>
    where
        S: AsRef<str> + Sync,
    {
        self.ensure_fitted()?;
        texts
            .par_iter()
            .map(|text| self.transform_one(text.as_ref()))
            .collect()
    }

    /// Transform a single text
    pub fn transform_one(&self, text: &str) -> Result<SparseVector> {
        self.ensure_fitted()?;

        let counts = self.count_terms(text);
        let pairs: Vec<(usize, f64)> = counts
            .iter()
            .filter_map(|(term, &count)| {
                self.vocabulary
                    .get(term)
                    .map(|&idx| (idx, count as f64 * self.idf[idx]))
            })
            .collect();

        let mut vector = SparseVector::from_pairs(self.vocabulary.len(), pairs)?;
        vector.normalize();

        if vector.is_zero() {
            debug!(n_terms = counts.len(), "Text has no in-vocabulary terms");
        }

        Ok(vector)
    }

    /// Fit and transform in one step
    pub fn fit_transform<S>(&mut self, documents: &[S]) -> Result<Vec<SparseVector>>
    where
        S: AsRef<str> + Sync,
    {
        self.fit(documents)?;
        self.transform(documents)
    }

    /// Tokenize text: fold accents, lowercase, then alphabetic runs of two
    /// or more letters
    pub fn tokenize(text: &str) -> Vec<String> {
        let lowered = strip_accents(text).to_lowercase();
        TOKEN_PATTERN
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Tokens plus n-grams in the configured range
    fn extract_terms(&self, text: &str) -> Vec<String> {
        let tokens = Self::tokenize(text);
        let (min_n, max_n) = self.config.ngram_range;

        let mut terms = Vec::new();
        for n in min_n..=max_n {
            if n == 1 {
                terms.extend(tokens.iter().cloned());
            } else {
                for window in tokens.windows(n) {
                    terms.push(window.join(" "));
                }
            }
        }
        terms
    }

    fn count_terms(&self, text: &str) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for term in self.extract_terms(text) {
            *counts.entry(term).or_insert(0) += 1;
        }
        counts
    }

    fn ensure_fitted(&self) -> Result<()> {
        if !self.is_fitted {
            return Err(AppError::Internal(
                "TfidfVectorizer must be fitted before transform".to_string(),
            ));
        }
        Ok(())
    }

    /// Get vocabulary size
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Check if fitted
    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Number of documents used for fitting
    pub fn n_documents(&self) -> usize {
        self.n_documents
    }

    pub fn config(&self) -> &VectorizerConfig {
        &self.config
    }

    /// IDF weight of a term, if it is in the vocabulary
    pub fn idf(&self, term: &str) -> Option<f64> {
        self.vocabulary.get(term).map(|&idx| self.idf[idx])
    }

    /// Vocabulary terms in index order
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = vec![String::new(); self.vocabulary.len()];
        for (term, &idx) in &self.vocabulary {
            names[idx] = term.clone();
        }
        names
    }
}

/// NFKD-decompose and drop combining marks, so "vidéo" reads as "video"
fn strip_accents(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_df: usize, max_df: f64, ngram_range: (usize, usize)) -> VectorizerConfig {
        VectorizerConfig {
            max_features: 100,
            ngram_range,
            min_df,
            max_df,
        }
    }

    fn corpus() -> Vec<&'static str> {
        vec![
            "I love this video, great work",
            "great video, love it",
            "terrible video, I hate it",
            "this is a video about cooking",
        ]
    }

    #[test]
    fn test_tokenize() {
        let tokens = TfidfVectorizer::tokenize("Great VIDEO!! a b 42 it's ok");
        assert_eq!(tokens, vec!["great", "video", "it", "ok"]);
        assert!(TfidfVectorizer::tokenize("!!!###").is_empty());
    }

    #[test]
    fn test_tokenize_folds_accents() {
        assert_eq!(
            TfidfVectorizer::tokenize("vidéo géniale"),
            vec!["video", "geniale"]
        );
        assert_eq!(
            TfidfVectorizer::tokenize("Très bien, CAFÉ naïve résumé"),
            vec!["tres", "bien", "cafe", "naive", "resume"]
        );
        // Precomposed and decomposed forms give the same token
        assert_eq!(
            TfidfVectorizer::tokenize("vid\u{00e9}o"),
            TfidfVectorizer::tokenize("vide\u{0301}o")
        );
    }

    #[test]
    fn test_accented_text_matches_plain_vocabulary() {
        let mut vectorizer = TfidfVectorizer::new(config(1, 1.0, (1, 1)));
        vectorizer.fit(&["super video", "mauvaise video"]).unwrap();

        let plain = vectorizer.transform_one("super video").unwrap();
        let accented = vectorizer.transform_one("Super vidéo").unwrap();
        assert!(!accented.is_zero());
        assert_eq!(plain, accented);
    }

    #[test]
    fn test_fit_applies_document_frequency_bounds() {
        let mut vectorizer = TfidfVectorizer::new(config(2, 0.95, (1, 1)));
        vectorizer.fit(&corpus()).unwrap();

        // "video" appears in every document and is above max_df
        assert!(vectorizer.idf("video").is_none());
        // "cooking" appears once, below min_df
        assert!(vectorizer.idf("cooking").is_none());
        assert!(vectorizer.idf("love").is_some());
        assert!(vectorizer.idf("great").is_some());
        assert_eq!(vectorizer.n_documents(), 4);
    }

    #[test]
    fn test_idf_is_smoothed() {
        let mut vectorizer = TfidfVectorizer::new(config(1, 1.0, (1, 1)));
        vectorizer.fit(&corpus()).unwrap();

        let expected_video = (5.0f64 / 5.0).ln() + 1.0;
        let expected_cooking = (5.0f64 / 2.0).ln() + 1.0;
        assert!((vectorizer.idf("video").unwrap() - expected_video).abs() < 1e-12);
        assert!((vectorizer.idf("cooking").unwrap() - expected_cooking).abs() < 1e-12);
    }

    #[test]
    fn test_bigrams_and_alphabetical_indices() {
        let mut vectorizer = TfidfVectorizer::new(config(2, 1.0, (1, 2)));
        vectorizer.fit(&corpus()).unwrap();

        assert!(vectorizer.idf("great video").is_none());
        assert!(vectorizer.idf("love").is_some());

        let names = vectorizer.feature_names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let docs = vec!["alpha alpha beta", "alpha beta gamma", "alpha gamma delta"];
        let mut vectorizer = TfidfVectorizer::new(VectorizerConfig {
            max_features: 2,
            ngram_range: (1, 1),
            min_df: 1,
            max_df: 1.0,
        });
        vectorizer.fit(&docs).unwrap();

        // alpha (4), then beta (2) and gamma (2) tie; beta wins alphabetically
        assert_eq!(vectorizer.feature_names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_transform_is_l2_normalized() {
        let mut vectorizer = TfidfVectorizer::new(config(1, 1.0, (1, 1)));
        vectorizer.fit(&corpus()).unwrap();

        let vector = vectorizer.transform_one("love love great").unwrap();
        assert_eq!(vector.nnz(), 2);
        assert!((vector.norm() - 1.0).abs() < 1e-12);
        assert_eq!(vector.dim(), vectorizer.vocabulary_size());
    }

    #[test]
    fn test_unknown_tokens_are_ignored() {
        let mut vectorizer = TfidfVectorizer::new(config(1, 1.0, (1, 1)));
        vectorizer.fit(&corpus()).unwrap();

        let known = vectorizer.transform_one("love").unwrap();
        let mixed = vectorizer.transform_one("love zyzzyva quux").unwrap();
        assert_eq!(known, mixed);
    }

    #[test]
    fn test_empty_and_symbol_only_text_yield_zero_vector() {
        let mut vectorizer = TfidfVectorizer::new(config(1, 1.0, (1, 2)));
        vectorizer.fit(&corpus()).unwrap();

        for text in ["", "!!!###", "12345 ?!"] {
            let vector = vectorizer.transform_one(text).unwrap();
            assert!(vector.is_zero());
            assert_eq!(vector.dim(), vectorizer.vocabulary_size());
        }
    }

    #[test]
    fn test_batch_transform_preserves_order() {
        let mut vectorizer = TfidfVectorizer::new(config(1, 1.0, (1, 2)));
        vectorizer.fit(&corpus()).unwrap();

        let texts = vec!["love it", "hate it", "cooking", "!!!"];
        let batch = vectorizer.transform(&texts).unwrap();
        assert_eq!(batch.len(), texts.len());
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&vectorizer.transform_one(text).unwrap(), vector);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let mut a = TfidfVectorizer::new(config(1, 1.0, (1, 2)));
        let mut b = TfidfVectorizer::new(config(1, 1.0, (1, 2)));
        a.fit(&corpus()).unwrap();
        b.fit(&corpus()).unwrap();

        assert_eq!(a.feature_names(), b.feature_names());
        assert_eq!(
            a.transform_one("great video love").unwrap(),
            b.transform_one("great video love").unwrap()
        );
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let vectorizer = TfidfVectorizer::new(VectorizerConfig::default());
        assert!(vectorizer.transform_one("hello").is_err());
    }

    #[test]
    fn test_empty_corpus_and_empty_vocabulary_fail() {
        let mut vectorizer = TfidfVectorizer::new(VectorizerConfig::default());
        let empty: Vec<String> = Vec::new();
        assert!(matches!(vectorizer.fit(&empty), Err(AppError::Training(_))));

        let mut vectorizer = TfidfVectorizer::new(config(2, 1.0, (1, 1)));
        assert!(matches!(
            vectorizer.fit(&["one", "two"]),
            Err(AppError::Training(_))
        ));
        assert!(!vectorizer.is_fitted());
    }

    #[test]
    fn test_sparse_vector_from_pairs() {
        let vector = SparseVector::from_pairs(5, vec![(3, 2.0), (1, 1.0), (4, 0.0)]).unwrap();
        assert_eq!(vector.nnz(), 2);
        assert_eq!(vector.get(3), 2.0);
        assert_eq!(vector.get(4), 0.0);
        assert_eq!(vector.to_dense(), vec![0.0, 1.0, 0.0, 2.0, 0.0]);
        assert!(SparseVector::from_pairs(2, vec![(2, 1.0)]).is_err());
        assert!(SparseVector::from_pairs(3, vec![(1, 1.0), (1, 2.0)]).is_err());
    }
}
