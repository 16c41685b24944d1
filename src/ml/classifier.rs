use crate::error::{AppError, Result};
use crate::ml::evaluation::compute_metrics;
use crate::ml::features::SparseVector;
use crate::ml::models::{
    ClassProbabilities, ClassifierConfig, Label, ModelMetadata, ModelMetrics, ModelType,
    N_CLASSES,
};
use chrono::Utc;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Trait for classifiers
///
/// Every implementation exposes `predict_proba`. Models without calibrated
/// probabilities report a one-hot distribution on the predicted label.
pub trait Classifier: Send + Sync {
    /// Train the classifier, returning metrics on the training set
    fn fit(&mut self, features: &[SparseVector], labels: &[Label]) -> Result<ModelMetrics>;

    /// Predict labels; ties go to the lowest label code
    fn predict(&self, features: &[SparseVector]) -> Result<Vec<Label>> {
        Ok(self
            .predict_proba(features)?
            .iter()
            .map(ClassProbabilities::argmax)
            .collect())
    }

    /// Predict class probabilities
    fn predict_proba(&self, features: &[SparseVector]) -> Result<Vec<ClassProbabilities>>;

    /// Get model metadata
    fn metadata(&self) -> &ModelMetadata;

    /// Get model type
    fn model_type(&self) -> ModelType;

    /// Check if model is trained
    fn is_trained(&self) -> bool;
}

/// Check training input shapes, returning the feature dimension
fn validate_training_input(features: &[SparseVector], labels: &[Label]) -> Result<usize> {
    if features.is_empty() {
        return Err(AppError::Training("no training samples provided".to_string()));
    }
    if features.len() != labels.len() {
        return Err(AppError::Training(format!(
            "{} feature vectors but {} labels",
            features.len(),
            labels.len()
        )));
    }
    let dim = features[0].dim();
    if let Some(bad) = features.iter().find(|x| x.dim() != dim) {
        return Err(AppError::Training(format!(
            "mixed feature dimensions: {} and {}",
            dim,
            bad.dim()
        )));
    }
    Ok(dim)
}

fn check_dimension(features: &[SparseVector], expected: usize) -> Result<()> {
    match features.iter().find(|x| x.dim() != expected) {
        Some(bad) => Err(AppError::Internal(format!(
            "feature dimension {} does not match model dimension {}",
            bad.dim(),
            expected
        ))),
        None => Ok(()),
    }
}

fn class_counts(labels: &[Label]) -> [usize; N_CLASSES] {
    let mut counts = [0; N_CLASSES];
    for label in labels {
        counts[label.index()] += 1;
    }
    counts
}

/// Per-class loss weights
///
/// Balanced weights are `n_samples / (n_classes * count)`; classes absent
/// from the training set get weight 0.
pub fn class_weights(labels: &[Label], balanced: bool) -> [f64; N_CLASSES] {
    if !balanced {
        return [1.0; N_CLASSES];
    }
    let counts = class_counts(labels);
    let n_samples = labels.len() as f64;
    let mut weights = [0.0; N_CLASSES];
    for (weight, &count) in weights.iter_mut().zip(counts.iter()) {
        if count > 0 {
            *weight = n_samples / (N_CLASSES as f64 * count as f64);
        }
    }
    weights
}

fn softmax(logits: [f64; N_CLASSES]) -> [f64; N_CLASSES] {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut exps = [0.0; N_CLASSES];
    let mut sum = 0.0;
    for (e, &z) in exps.iter_mut().zip(logits.iter()) {
        *e = (z - max).exp();
        sum += *e;
    }
    for e in &mut exps {
        *e /= sum;
    }
    exps
}

/// Multinomial logistic regression over sparse features
///
/// Trained with full-batch gradient descent on the class-weighted
/// cross-entropy plus an L2 penalty of `||W||^2 / (2 * C * n)`. Weights start
/// at zero, so fitting the same data twice gives identical models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegressionClassifier {
    /// Model metadata
    metadata: ModelMetadata,

    /// Hyperparameters
    config: ClassifierConfig,

    /// Model weights (n_features x n_classes)
    weights: Option<Array2<f64>>,

    /// Model bias (n_classes)
    bias: Option<Array1<f64>>,

    /// Iterations used by the last fit
    n_iter: usize,

    /// Is trained
    trained: bool,
}

impl LogisticRegressionClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            metadata: ModelMetadata::new(
                "Logistic Regression",
                ModelType::LogisticRegression,
                config.hyperparameters(),
            ),
            config,
            weights: None,
            bias: None,
            n_iter: 0,
            trained: false,
        }
    }

    /// Iterations used by the last fit
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn logits(weights: &Array2<f64>, bias: &Array1<f64>, x: &SparseVector) -> [f64; N_CLASSES] {
        let mut z = [bias[0], bias[1], bias[2]];
        for (idx, value) in x.iter() {
            for (k, zk) in z.iter_mut().enumerate() {
                *zk += value * weights[[idx, k]];
            }
        }
        z
    }

    fn parameters(&self) -> Result<(&Array2<f64>, &Array1<f64>)> {
        match (self.trained, self.weights.as_ref(), self.bias.as_ref()) {
            (true, Some(w), Some(b)) => Ok((w, b)),
            _ => Err(AppError::Internal("Model not trained".to_string())),
        }
    }
}

impl Classifier for LogisticRegressionClassifier {
    fn fit(&mut self, features: &[SparseVector], labels: &[Label]) -> Result<ModelMetrics> {
        self.config.validate()?;
        let n_features = validate_training_input(features, labels)?;
        let n_samples = features.len() as f64;

        let class_w = class_weights(labels, self.config.class_weight_balanced);
        let penalty = 1.0 / (self.config.c * n_samples);
        let lr = self.config.learning_rate;

        let mut weights = Array2::<f64>::zeros((n_features, N_CLASSES));
        let mut bias = Array1::<f64>::zeros(N_CLASSES);
        let mut grad_w = Array2::<f64>::zeros((n_features, N_CLASSES));
        let mut grad_b = Array1::<f64>::zeros(N_CLASSES);

        let started = std::time::Instant::now();
        let mut n_iter = 0;
        let mut max_grad = f64::INFINITY;

        for iter in 0..self.config.max_iter {
            n_iter = iter + 1;
            grad_w.fill(0.0);
            grad_b.fill(0.0);

            for (x, label) in features.iter().zip(labels) {
                let sample_weight = class_w[label.index()];
                if sample_weight == 0.0 {
                    continue;
                }
                let p = softmax(Self::logits(&weights, &bias, x));
                let mut delta = [0.0; N_CLASSES];
                for (k, d) in delta.iter_mut().enumerate() {
                    let target = if k == label.index() { 1.0 } else { 0.0 };
                    *d = sample_weight * (p[k] - target) / n_samples;
                }
                for (k, d) in delta.iter().enumerate() {
                    grad_b[k] += d;
                }
                for (idx, value) in x.iter() {
                    for (k, d) in delta.iter().enumerate() {
                        grad_w[[idx, k]] += value * d;
                    }
                }
            }

            grad_w.scaled_add(penalty, &weights);

            max_grad = grad_w
                .iter()
                .chain(grad_b.iter())
                .fold(0.0f64, |acc, g| acc.max(g.abs()));
            if max_grad < self.config.tolerance {
                break;
            }

            weights.scaled_add(-lr, &grad_w);
            bias.scaled_add(-lr, &grad_b);
        }

        debug!(n_iter, max_grad, "Gradient descent finished");

        self.weights = Some(weights);
        self.bias = Some(bias);
        self.n_iter = n_iter;
        self.trained = true;

        let predictions = self.predict(features)?;
        let metrics = compute_metrics(labels, &predictions);

        self.metadata.n_training_samples = features.len();
        self.metadata.n_features = n_features;
        self.metadata.trained_at = Utc::now();
        self.metadata.training_metrics = metrics.clone();
        self.metadata
            .hyperparameters
            .insert("n_iter".to_string(), n_iter.to_string());

        info!(
            n_samples = features.len(),
            n_features,
            n_iter,
            elapsed_ms = started.elapsed().as_millis() as u64,
            train_accuracy = metrics.accuracy,
            "Logistic regression trained"
        );

        Ok(metrics)
    }

    fn predict_proba(&self, features: &[SparseVector]) -> Result<Vec<ClassProbabilities>> {
        let (weights, bias) = self.parameters()?;
        check_dimension(features, weights.nrows())?;

        Ok(features
            .iter()
            .map(|x| ClassProbabilities::from_array(softmax(Self::logits(weights, bias, x))))
            .collect())
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn model_type(&self) -> ModelType {
        ModelType::LogisticRegression
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// Cosine nearest-centroid classifier
///
/// Each class is represented by the mean of its normalized training vectors.
/// The model has no calibrated probabilities, so `predict_proba` is one-hot.
/// Centroids are per-class means and do not depend on class frequencies; the
/// training distribution only decides the fallback label for texts with no
/// in-vocabulary terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestCentroidClassifier {
    /// Model metadata
    metadata: ModelMetadata,

    /// Class centroids (n_classes x n_features)
    centroids: Option<Array2<f64>>,

    /// Euclidean norm of each centroid; 0 for classes absent from training
    centroid_norms: [f64; N_CLASSES],

    /// Most frequent training label
    majority: Label,

    /// Is trained
    trained: bool,
}

impl NearestCentroidClassifier {
    pub fn new() -> Self {
        Self {
            metadata: ModelMetadata::new(
                "Nearest Centroid",
                ModelType::NearestCentroid,
                [("metric".to_string(), "cosine".to_string())].into_iter().collect(),
            ),
            centroids: None,
            centroid_norms: [0.0; N_CLASSES],
            majority: Label::Neutral,
            trained: false,
        }
    }

    /// Label predicted for inputs with no usable features
    pub fn fallback_label(&self) -> Label {
        self.majority
    }

    fn predict_one(&self, centroids: &Array2<f64>, x: &SparseVector) -> Label {
        let norm = x.norm();
        if norm == 0.0 {
            return self.majority;
        }

        let mut best: Option<(Label, f64)> = None;
        for label in Label::all() {
            let k = label.index();
            if self.centroid_norms[k] == 0.0 {
                continue;
            }
            let dot: f64 = x.iter().map(|(idx, v)| v * centroids[[k, idx]]).sum();
            let similarity = dot / (norm * self.centroid_norms[k]);
            match best {
                Some((_, score)) if similarity <= score => {}
                _ => best = Some((label, similarity)),
            }
        }
        best.map(|(label, _)| label).unwrap_or(self.majority)
    }
}

impl Classifier for NearestCentroidClassifier {
    fn fit(&mut self, features: &[SparseVector], labels: &[Label]) -> Result<ModelMetrics> {
        let n_features = validate_training_input(features, labels)?;
        let counts = class_counts(labels);

        let mut centroids = Array2::<f64>::zeros((N_CLASSES, n_features));
        for (x, label) in features.iter().zip(labels) {
            let norm = x.norm();
            if norm == 0.0 {
                continue;
            }
            let k = label.index();
            for (idx, value) in x.iter() {
                centroids[[k, idx]] += value / norm;
            }
        }

        let mut centroid_norms = [0.0; N_CLASSES];
        for (k, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let mut row = centroids.row_mut(k);
            row.mapv_inplace(|v| v / count as f64);
            centroid_norms[k] = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        }

        // Ties go to the lowest label code
        let mut majority = 0;
        for k in 1..N_CLASSES {
            if counts[k] > counts[majority] {
                majority = k;
            }
        }

        self.centroids = Some(centroids);
        self.centroid_norms = centroid_norms;
        self.majority = Label::from_index(majority).unwrap_or(Label::Neutral);
        self.trained = true;

        let predictions = self.predict(features)?;
        let metrics = compute_metrics(labels, &predictions);

        self.metadata.n_training_samples = features.len();
        self.metadata.n_features = n_features;
        self.metadata.trained_at = Utc::now();
        self.metadata.training_metrics = metrics.clone();

        info!(
            n_samples = features.len(),
            n_features,
            majority = %self.majority,
            train_accuracy = metrics.accuracy,
            "Nearest centroid classifier trained"
        );

        Ok(metrics)
    }

    fn predict(&self, features: &[SparseVector]) -> Result<Vec<Label>> {
        let centroids = match (self.trained, self.centroids.as_ref()) {
            (true, Some(c)) => c,
            _ => return Err(AppError::Internal("Model not trained".to_string())),
        };
        check_dimension(features, centroids.ncols())?;

        Ok(features
            .iter()
            .map(|x| self.predict_one(centroids, x))
            .collect())
    }

    fn predict_proba(&self, features: &[SparseVector]) -> Result<Vec<ClassProbabilities>> {
        // No calibrated probabilities: report the predicted label with certainty
        Ok(self
            .predict(features)?
            .into_iter()
            .map(ClassProbabilities::one_hot)
            .collect())
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn model_type(&self) -> ModelType {
        ModelType::NearestCentroid
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

impl Default for NearestCentroidClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Sentiment classifier: the persisted classifier state
///
/// Wraps the concrete model chosen by [`ClassifierConfig::model_type`] so it
/// can be serialized as one blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SentimentClassifier {
    LogisticRegression(LogisticRegressionClassifier),
    NearestCentroid(NearestCentroidClassifier),
}

impl SentimentClassifier {
    /// Create an untrained classifier of the configured type
    pub fn new(config: &ClassifierConfig) -> Self {
        match config.model_type {
            ModelType::LogisticRegression => SentimentClassifier::LogisticRegression(
                LogisticRegressionClassifier::new(config.clone()),
            ),
            ModelType::NearestCentroid => {
                SentimentClassifier::NearestCentroid(NearestCentroidClassifier::new())
            }
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            SentimentClassifier::LogisticRegression(model) => model,
            SentimentClassifier::NearestCentroid(model) => model,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            SentimentClassifier::LogisticRegression(model) => model,
            SentimentClassifier::NearestCentroid(model) => model,
        }
    }
}

impl Classifier for SentimentClassifier {
    fn fit(&mut self, features: &[SparseVector], labels: &[Label]) -> Result<ModelMetrics> {
        self.inner_mut().fit(features, labels)
    }

    fn predict(&self, features: &[SparseVector]) -> Result<Vec<Label>> {
        self.inner().predict(features)
    }

    fn predict_proba(&self, features: &[SparseVector]) -> Result<Vec<ClassProbabilities>> {
        self.inner().predict_proba(features)
    }

    fn metadata(&self) -> &ModelMetadata {
        self.inner().metadata()
    }

    fn model_type(&self) -> ModelType {
        self.inner().model_type()
    }

    fn is_trained(&self) -> bool {
        self.inner().is_trained()
    }
}
