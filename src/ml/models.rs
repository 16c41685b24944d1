use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use strum::{EnumIter, IntoEnumIterator};

/// Maximum length of a document, in characters, after trimming
pub const MAX_DOCUMENT_CHARS: usize = 5000;

/// Default upper bound on the number of texts in one batch call
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Number of sentiment classes
pub const N_CLASSES: usize = 3;

/// Sentiment label
///
/// Serialized as its integer code (-1, 0, 1).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter,
)]
#[serde(into = "i8", try_from = "i8")]
pub enum Label {
    Negative,
    Neutral,
    Positive,
}

impl Label {
    /// Integer code of the label
    pub fn code(self) -> i8 {
        match self {
            Label::Negative => -1,
            Label::Neutral => 0,
            Label::Positive => 1,
        }
    }

    /// Class index (0..3), ordered by code
    pub fn index(self) -> usize {
        match self {
            Label::Negative => 0,
            Label::Neutral => 1,
            Label::Positive => 2,
        }
    }

    /// Label for a class index
    pub fn from_index(index: usize) -> Option<Label> {
        match index {
            0 => Some(Label::Negative),
            1 => Some(Label::Neutral),
            2 => Some(Label::Positive),
            _ => None,
        }
    }

    /// Human readable sentiment name
    pub fn sentiment(self) -> &'static str {
        match self {
            Label::Negative => "Negative",
            Label::Neutral => "Neutral",
            Label::Positive => "Positive",
        }
    }

    /// All labels in code order
    pub fn all() -> impl Iterator<Item = Label> {
        Label::iter()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sentiment())
    }
}

impl From<Label> for i8 {
    fn from(label: Label) -> Self {
        label.code()
    }
}

impl TryFrom<i8> for Label {
    type Error = AppError;

    fn try_from(code: i8) -> Result<Self> {
        Label::try_from(i64::from(code))
    }
}

impl TryFrom<i64> for Label {
    type Error = AppError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            -1 => Ok(Label::Negative),
            0 => Ok(Label::Neutral),
            1 => Ok(Label::Positive),
            other => Err(AppError::Validation(format!(
                "invalid label code {} (expected -1, 0 or 1)",
                other
            ))),
        }
    }
}

/// A validated unit of input text
///
/// The prediction core accepts any string; this type is what callers use to
/// enforce the 1..=5000 character bound before invoking it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document(String);

impl Document {
    /// Trim and validate a raw text
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("document must not be empty".to_string()));
        }
        let n_chars = trimmed.chars().count();
        if n_chars > MAX_DOCUMENT_CHARS {
            return Err(AppError::Validation(format!(
                "document has {} characters, maximum is {}",
                n_chars, MAX_DOCUMENT_CHARS
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for Document {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Probability distribution over the three labels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
}

impl ClassProbabilities {
    /// Build from values in class index order
    pub fn from_array(values: [f64; N_CLASSES]) -> Self {
        Self {
            negative: values[0],
            neutral: values[1],
            positive: values[2],
        }
    }

    /// Distribution with all mass on one label
    pub fn one_hot(label: Label) -> Self {
        let mut values = [0.0; N_CLASSES];
        values[label.index()] = 1.0;
        Self::from_array(values)
    }

    pub fn as_array(&self) -> [f64; N_CLASSES] {
        [self.negative, self.neutral, self.positive]
    }

    pub fn get(&self, label: Label) -> f64 {
        self.as_array()[label.index()]
    }

    /// Most probable label; ties go to the lowest label code
    pub fn argmax(&self) -> Label {
        let values = self.as_array();
        let mut best = 0;
        for (idx, &value) in values.iter().enumerate().skip(1) {
            if value > values[best] {
                best = idx;
            }
        }
        Label::from_index(best).unwrap_or(Label::Negative)
    }

    pub fn sum(&self) -> f64 {
        self.negative + self.neutral + self.positive
    }
}

/// Result of classifying one text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Source text
    pub text: String,

    /// Predicted label
    pub label: Label,

    /// Sentiment name of the predicted label
    pub sentiment: String,

    /// Probability of the predicted label (0.0 - 1.0)
    pub confidence: f64,

    /// Full distribution over the three labels
    pub probabilities: ClassProbabilities,
}

impl PredictionResult {
    /// Build a result from a text and its class distribution
    pub fn new(text: impl Into<String>, probabilities: ClassProbabilities) -> Self {
        let label = probabilities.argmax();
        Self {
            text: text.into(),
            label,
            sentiment: label.sentiment().to_string(),
            confidence: probabilities.get(label).clamp(0.0, 1.0),
            probabilities,
        }
    }
}

/// Aggregate statistics over a batch of predictions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    pub positive_percent: f64,
    pub neutral_percent: f64,
    pub negative_percent: f64,
    pub avg_confidence: f64,
}

impl BatchStatistics {
    /// Number of predictions with the given label
    pub fn count(&self, label: Label) -> usize {
        match label {
            Label::Negative => self.negative,
            Label::Neutral => self.neutral,
            Label::Positive => self.positive,
        }
    }

    /// Percentage of predictions with the given label
    pub fn percent(&self, label: Label) -> f64 {
        match label {
            Label::Negative => self.negative_percent,
            Label::Neutral => self.neutral_percent,
            Label::Positive => self.positive_percent,
        }
    }
}

/// Incremental builder for [`BatchStatistics`]
///
/// Lets the batch path fold statistics while it builds the per-item results.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAccumulator {
    counts: [usize; N_CLASSES],
    confidence_sum: f64,
    total: usize,
}

impl StatisticsAccumulator {
    /// Decimal places kept for per-label percentages
    pub const PERCENT_DECIMALS: i32 = 2;

    /// Decimal places kept for the mean confidence
    pub const CONFIDENCE_DECIMALS: i32 = 4;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: &PredictionResult) {
        self.counts[result.label.index()] += 1;
        self.confidence_sum += result.confidence;
        self.total += 1;
    }

    pub fn finish(self) -> BatchStatistics {
        if self.total == 0 {
            return BatchStatistics::default();
        }

        let total = self.total as f64;
        // Each percentage is rounded on its own; they may not add up to 100.
        let percent = |count: usize| round_to(count as f64 / total * 100.0, Self::PERCENT_DECIMALS);

        BatchStatistics {
            total: self.total,
            positive: self.counts[Label::Positive.index()],
            neutral: self.counts[Label::Neutral.index()],
            negative: self.counts[Label::Negative.index()],
            positive_percent: percent(self.counts[Label::Positive.index()]),
            neutral_percent: percent(self.counts[Label::Neutral.index()]),
            negative_percent: percent(self.counts[Label::Negative.index()]),
            avg_confidence: round_to(self.confidence_sum / total, Self::CONFIDENCE_DECIMALS),
        }
    }
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Classifier family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Multinomial logistic regression with calibrated probabilities
    LogisticRegression,
    /// Cosine nearest-centroid model without calibrated probabilities
    NearestCentroid,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::LogisticRegression => write!(f, "logistic_regression"),
            ModelType::NearestCentroid => write!(f, "nearest_centroid"),
        }
    }
}

impl FromStr for ModelType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "logistic_regression" | "logistic" | "lr" => Ok(ModelType::LogisticRegression),
            "nearest_centroid" | "centroid" => Ok(ModelType::NearestCentroid),
            other => Err(AppError::Validation(format!("unknown model type '{}'", other))),
        }
    }
}

/// TF-IDF vectorizer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerConfig {
    /// Maximum vocabulary size, keeping the most frequent terms
    pub max_features: usize,

    /// N-gram range (min, max)
    pub ngram_range: (usize, usize),

    /// Minimum number of documents a term must appear in
    pub min_df: usize,

    /// Maximum fraction of documents a term may appear in
    pub max_df: f64,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            max_features: 5000,
            ngram_range: (1, 2), // Unigrams and bigrams
            min_df: 2,
            max_df: 0.95,
        }
    }
}

impl VectorizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 {
            return Err(AppError::Validation(
                "vectorizer.max_features must be greater than 0".to_string(),
            ));
        }
        let (min_n, max_n) = self.ngram_range;
        if min_n == 0 || min_n > max_n {
            return Err(AppError::Validation(format!(
                "vectorizer.ngram_range ({}, {}) is invalid",
                min_n, max_n
            )));
        }
        if self.min_df == 0 {
            return Err(AppError::Validation(
                "vectorizer.min_df must be at least 1".to_string(),
            ));
        }
        if !(self.max_df > 0.0 && self.max_df <= 1.0) {
            return Err(AppError::Validation(format!(
                "vectorizer.max_df must be in (0, 1], got {}",
                self.max_df
            )));
        }
        Ok(())
    }
}

/// Classifier hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Model family to train
    pub model_type: ModelType,

    /// Inverse regularization strength
    pub c: f64,

    /// Maximum gradient descent iterations
    pub max_iter: usize,

    /// Gradient descent step size
    pub learning_rate: f64,

    /// Stop once the largest gradient component falls below this value
    pub tolerance: f64,

    /// Reweight classes inversely proportional to their frequency
    pub class_weight_balanced: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::LogisticRegression,
            c: 1.0,
            max_iter: 1000,
            learning_rate: 1.0,
            tolerance: 1e-4,
            class_weight_balanced: true,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.c > 0.0 && self.c.is_finite()) {
            return Err(AppError::Validation(format!(
                "classifier.c must be a positive number, got {}",
                self.c
            )));
        }
        if self.max_iter == 0 {
            return Err(AppError::Validation(
                "classifier.max_iter must be greater than 0".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(AppError::Validation(format!(
                "classifier.learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.tolerance < 0.0 {
            return Err(AppError::Validation(
                "classifier.tolerance must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Hyperparameters as recorded in model metadata
    pub fn hyperparameters(&self) -> BTreeMap<String, String> {
        [
            ("c", self.c.to_string()),
            ("max_iter", self.max_iter.to_string()),
            ("learning_rate", self.learning_rate.to_string()),
            ("tolerance", self.tolerance.to_string()),
            ("class_weight", if self.class_weight_balanced { "balanced" } else { "none" }.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Prediction service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding the artifact files
    pub model_dir: PathBuf,

    /// Largest batch accepted by `predict_batch`
    pub max_batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(AppError::Validation(
                "service.max_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-class evaluation metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: Label,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Classification metrics over a labelled set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,

    /// Macro-averaged precision
    pub precision: f64,

    /// Macro-averaged recall
    pub recall: f64,

    /// Macro-averaged F1
    pub f1_score: f64,

    /// Rows are true labels, columns predicted labels, both in code order
    pub confusion_matrix: [[usize; N_CLASSES]; N_CLASSES],

    /// Metrics per label, in code order
    pub per_class: Vec<ClassMetrics>,
}

impl ModelMetrics {
    pub fn new() -> Self {
        Self {
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
            confusion_matrix: [[0; N_CLASSES]; N_CLASSES],
            per_class: Vec::new(),
        }
    }

    /// Metrics for one label
    pub fn class(&self, label: Label) -> Option<&ClassMetrics> {
        self.per_class.iter().find(|m| m.label == label)
    }

    /// Smallest per-class recall
    pub fn min_recall(&self) -> f64 {
        self.per_class
            .iter()
            .map(|m| m.recall)
            .fold(f64::INFINITY, f64::min)
    }
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub version: String,
    pub model_type: ModelType,
    pub trained_at: DateTime<Utc>,
    pub n_training_samples: usize,
    pub n_features: usize,
    pub training_metrics: ModelMetrics,
    pub hyperparameters: BTreeMap<String, String>,
}

impl ModelMetadata {
    pub fn new(name: &str, model_type: ModelType, hyperparameters: BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0".to_string(),
            model_type,
            trained_at: Utc::now(),
            n_training_samples: 0,
            n_features: 0,
            training_metrics: ModelMetrics::new(),
            hyperparameters,
        }
    }
}
