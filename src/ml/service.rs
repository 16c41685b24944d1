use crate::error::{AppError, Result};
use crate::ml::artifacts::{ArtifactStore, TrainingArtifact};
use crate::ml::classifier::{Classifier, SentimentClassifier};
use crate::ml::dataset::LabeledDataset;
use crate::ml::evaluation::{evaluate, EvaluationMetrics};
use crate::ml::features::TfidfVectorizer;
use crate::ml::metrics::PREDICTION_METRICS;
use crate::ml::models::{
    BatchStatistics, Label, ModelType, PredictionResult, ServiceConfig, StatisticsAccumulator,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle status of the prediction service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// No load attempted yet
    Unloaded,
    /// A load is in progress
    Loading,
    /// Artifacts loaded; inference allowed
    Ready,
    /// Last load failed; `reload` may retry
    Failed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Unloaded => write!(f, "unloaded"),
            ServiceStatus::Loading => write!(f, "loading"),
            ServiceStatus::Ready => write!(f, "ready"),
            ServiceStatus::Failed => write!(f, "failed"),
        }
    }
}

enum ServiceState {
    Unloaded,
    Loading,
    Ready(Arc<TrainingArtifact>),
    Failed(String),
}

impl ServiceState {
    fn status(&self) -> ServiceStatus {
        match self {
            ServiceState::Unloaded => ServiceStatus::Unloaded,
            ServiceState::Loading => ServiceStatus::Loading,
            ServiceState::Ready(_) => ServiceStatus::Ready,
            ServiceState::Failed(_) => ServiceStatus::Failed,
        }
    }
}

/// Description of the loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub artifact_id: Uuid,
    pub model_type: ModelType,
    pub model_name: String,
    pub trained_at: DateTime<Utc>,
    pub vocabulary_size: usize,
    pub n_training_samples: usize,
    pub max_batch_size: usize,
}

/// Batch sentiment prediction over one loaded vectorizer/classifier pair
///
/// Constructed explicitly and shared behind an `Arc`. The lifecycle is
/// `Unloaded -> Loading -> Ready | Failed`; `reload` retries from `Failed`.
/// Inference clones the loaded artifact out of the state lock and runs
/// without holding it.
pub struct PredictionService {
    config: ServiceConfig,
    store: ArtifactStore,
    state: RwLock<ServiceState>,
}

impl PredictionService {
    /// Create an unloaded service reading from `config.model_dir`
    pub fn new(config: ServiceConfig) -> Self {
        let store = ArtifactStore::new(config.model_dir.clone());
        Self {
            config,
            store,
            state: RwLock::new(ServiceState::Unloaded),
        }
    }

    /// Create a ready service from an in-memory pair
    pub fn from_artifacts(
        vectorizer: TfidfVectorizer,
        classifier: SentimentClassifier,
        config: ServiceConfig,
    ) -> Result<Self> {
        let artifact = TrainingArtifact::new(vectorizer, classifier)?;
        Ok(Self::from_artifact(artifact, config))
    }

    /// Create a ready service from a fitted artifact
    pub fn from_artifact(artifact: TrainingArtifact, config: ServiceConfig) -> Self {
        let service = Self::new(config);
        *service.state.write() = ServiceState::Ready(Arc::new(artifact));
        PREDICTION_METRICS.model_loaded.set(1.0);
        service
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Load the artifacts; only valid while `Unloaded`
    pub fn load(&self) -> Result<()> {
        self.begin_load(ServiceStatus::Unloaded)?;
        self.finish_load()
    }

    /// Retry a failed load; only valid while `Failed`
    pub fn reload(&self) -> Result<()> {
        self.begin_load(ServiceStatus::Failed)?;
        self.finish_load()
    }

    fn begin_load(&self, expected: ServiceStatus) -> Result<()> {
        let mut state = self.state.write();
        let current = state.status();
        if current != expected {
            return Err(AppError::InvalidStateTransition(format!(
                "cannot load from state '{}' (expected '{}')",
                current, expected
            )));
        }
        *state = ServiceState::Loading;
        Ok(())
    }

    fn finish_load(&self) -> Result<()> {
        info!(dir = %self.store.dir().display(), "Loading sentiment model");
        let started = Instant::now();

        match self.store.load() {
            Ok(artifact) => {
                info!(
                    artifact_id = %artifact.artifact_id,
                    model_type = %artifact.classifier.model_type(),
                    vocabulary_size = artifact.vectorizer.vocabulary_size(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sentiment model ready"
                );
                *self.state.write() = ServiceState::Ready(Arc::new(artifact));
                PREDICTION_METRICS.model_loaded.set(1.0);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, code = e.error_code(), "Failed to load sentiment model");
                *self.state.write() = ServiceState::Failed(e.to_string());
                PREDICTION_METRICS.model_loaded.set(0.0);
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == ServiceStatus::Ready
    }

    pub fn status(&self) -> ServiceStatus {
        self.state.read().status()
    }

    /// Error message of the last failed load
    pub fn failure_reason(&self) -> Option<String> {
        match &*self.state.read() {
            ServiceState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    fn artifact(&self) -> Result<Arc<TrainingArtifact>> {
        match &*self.state.read() {
            ServiceState::Ready(artifact) => Ok(Arc::clone(artifact)),
            other => Err(AppError::ServiceNotReady(other.status().to_string())),
        }
    }

    /// Predict the sentiment of one text
    pub fn predict_single(&self, text: &str) -> Result<PredictionResult> {
        PREDICTION_METRICS
            .requests_total
            .with_label_values(&["single"])
            .inc();

        let result = self.artifact().and_then(|artifact| {
            let started = Instant::now();
            let features = artifact.vectorizer.transform_one(text)?;
            let probabilities = artifact
                .classifier
                .predict_proba(std::slice::from_ref(&features))?;
            let probabilities = probabilities
                .into_iter()
                .next()
                .ok_or_else(|| AppError::Internal("classifier returned no output".to_string()))?;

            PREDICTION_METRICS
                .inference_duration
                .with_label_values(&["single"])
                .observe(started.elapsed().as_secs_f64());
            Ok(PredictionResult::new(text, probabilities))
        });

        match result {
            Ok(prediction) => {
                PREDICTION_METRICS
                    .predictions_total
                    .with_label_values(&[prediction.label.sentiment()])
                    .inc();
                Ok(prediction)
            }
            Err(e) => Err(record_error(e)),
        }
    }

    /// Predict a batch of texts; results keep input order
    ///
    /// Readiness, emptiness and the batch ceiling are checked, in that order,
    /// before any text is vectorized.
    pub fn predict_batch<S>(&self, texts: &[S]) -> Result<(Vec<PredictionResult>, BatchStatistics)>
    where
        S: AsRef<str> + Sync,
    {
        PREDICTION_METRICS
            .requests_total
            .with_label_values(&["batch"])
            .inc();

        self.predict_batch_inner(texts).map_err(record_error)
    }

    fn predict_batch_inner<S>(
        &self,
        texts: &[S],
    ) -> Result<(Vec<PredictionResult>, BatchStatistics)>
    where
        S: AsRef<str> + Sync,
    {
        let artifact = self.artifact()?;
        if texts.is_empty() {
            return Err(AppError::EmptyInput);
        }
        if texts.len() > self.config.max_batch_size {
            return Err(AppError::InputTooLarge {
                size: texts.len(),
                max: self.config.max_batch_size,
            });
        }

        PREDICTION_METRICS.batch_size.observe(texts.len() as f64);
        let started = Instant::now();

        let features = artifact.vectorizer.transform(texts)?;
        let probabilities = artifact.classifier.predict_proba(&features)?;
        if probabilities.len() != texts.len() {
            return Err(AppError::Internal(format!(
                "classifier returned {} outputs for {} texts",
                probabilities.len(),
                texts.len()
            )));
        }

        let mut accumulator = StatisticsAccumulator::new();
        let results: Vec<PredictionResult> = texts
            .iter()
            .zip(probabilities)
            .map(|(text, probs)| {
                let result = PredictionResult::new(text.as_ref(), probs);
                accumulator.push(&result);
                result
            })
            .collect();
        let statistics = accumulator.finish();

        let elapsed = started.elapsed();
        PREDICTION_METRICS
            .inference_duration
            .with_label_values(&["batch"])
            .observe(elapsed.as_secs_f64());
        for label in Label::all() {
            let count = statistics.count(label);
            if count > 0 {
                PREDICTION_METRICS
                    .predictions_total
                    .with_label_values(&[label.sentiment()])
                    .inc_by(count as f64);
            }
        }

        debug!(
            batch_size = texts.len(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            positive = statistics.positive,
            neutral = statistics.neutral,
            negative = statistics.negative,
            "Batch prediction complete"
        );

        Ok((results, statistics))
    }

    /// Summarize a set of predictions
    pub fn calculate_statistics(results: &[PredictionResult]) -> BatchStatistics {
        let mut accumulator = StatisticsAccumulator::new();
        for result in results {
            accumulator.push(result);
        }
        accumulator.finish()
    }

    /// Describe the loaded model
    pub fn info(&self) -> Result<ModelInfo> {
        let artifact = self.artifact()?;
        let metadata = artifact.classifier.metadata();
        Ok(ModelInfo {
            artifact_id: artifact.artifact_id,
            model_type: artifact.classifier.model_type(),
            model_name: metadata.name.clone(),
            trained_at: artifact.created_at,
            vocabulary_size: artifact.vectorizer.vocabulary_size(),
            n_training_samples: metadata.n_training_samples,
            max_batch_size: self.config.max_batch_size,
        })
    }

    /// Score the loaded model on a labelled dataset
    pub fn evaluate(&self, dataset: &LabeledDataset) -> Result<EvaluationMetrics> {
        let artifact = self.artifact()?;
        evaluate(&artifact.vectorizer, &artifact.classifier, dataset)
    }
}

fn record_error(err: AppError) -> AppError {
    PREDICTION_METRICS
        .errors_total
        .with_label_values(&[err.error_code()])
        .inc();
    if !matches!(
        err,
        AppError::EmptyInput | AppError::InputTooLarge { .. } | AppError::ServiceNotReady(_)
    ) {
        warn!(error = %err, code = err.error_code(), "Prediction failed");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::models::{ClassifierConfig, VectorizerConfig};
    use tempfile::TempDir;

    fn trained_pair() -> (TfidfVectorizer, SentimentClassifier) {
        let texts = [
            "love this great video",
            "great work love it",
            "amazing great content",
            "hate this awful video",
            "awful work hate it",
            "terrible awful content",
            "the video is about cooking",
            "the work is about travel",
            "video about cooking travel",
        ];
        let labels = [
            Label::Positive,
            Label::Positive,
            Label::Positive,
            Label::Negative,
            Label::Negative,
            Label::Negative,
            Label::Neutral,
            Label::Neutral,
            Label::Neutral,
        ];
        let mut vectorizer = TfidfVectorizer::new(VectorizerConfig {
            min_df: 1,
            max_df: 1.0,
            ..Default::default()
        });
        let features = vectorizer.fit_transform(&texts).unwrap();
        let mut classifier = SentimentClassifier::new(&ClassifierConfig {
            max_iter: 200,
            ..Default::default()
        });
        classifier.fit(&features, &labels).unwrap();
        (vectorizer, classifier)
    }

    fn ready_service() -> PredictionService {
        let (vectorizer, classifier) = trained_pair();
        PredictionService::from_artifacts(vectorizer, classifier, ServiceConfig::default()).unwrap()
    }

    #[test]
    fn test_unloaded_service_rejects_inference() {
        let service = PredictionService::new(ServiceConfig::default());
        assert_eq!(service.status(), ServiceStatus::Unloaded);
        assert!(!service.is_ready());

        assert!(matches!(
            service.predict_single("great video"),
            Err(AppError::ServiceNotReady(_))
        ));
        // Readiness is checked before emptiness
        let empty: Vec<&str> = Vec::new();
        assert!(matches!(
            service.predict_batch(&empty),
            Err(AppError::ServiceNotReady(_))
        ));
        assert!(service.info().is_err());
    }

    #[test]
    fn test_predict_single() {
        let service = ready_service();
        let result = service.predict_single("I love this great video").unwrap();

        assert_eq!(result.label, Label::Positive);
        assert_eq!(result.sentiment, "Positive");
        assert!((result.probabilities.sum() - 1.0).abs() < 1e-6);
        assert_eq!(result.confidence, result.probabilities.get(result.label));
    }

    #[test]
    fn test_batch_validation_order() {
        let service = ready_service();
        let empty: Vec<String> = Vec::new();
        assert!(matches!(service.predict_batch(&empty), Err(AppError::EmptyInput)));

        let too_many = vec!["text"; 101];
        match service.predict_batch(&too_many) {
            Err(AppError::InputTooLarge { size, max }) => {
                assert_eq!(size, 101);
                assert_eq!(max, 100);
            }
            other => panic!("unexpected result: {:?}", other.map(|(r, _)| r.len())),
        }

        let exactly_max = vec!["text"; 100];
        assert_eq!(service.predict_batch(&exactly_max).unwrap().0.len(), 100);
    }

    #[test]
    fn test_batch_matches_single() {
        let service = ready_service();
        let texts = ["love it", "awful content", "about travel", "!!!###"];
        let (results, stats) = service.predict_batch(&texts).unwrap();

        assert_eq!(results.len(), texts.len());
        for (text, result) in texts.iter().zip(&results) {
            assert_eq!(&result.text, text);
            let single = service.predict_single(text).unwrap();
            assert_eq!(single.label, result.label);
            assert!((single.confidence - result.confidence).abs() < 1e-12);
        }
        assert_eq!(stats.total, 4);
        assert_eq!(stats.positive + stats.neutral + stats.negative, 4);
        assert_eq!(stats, PredictionService::calculate_statistics(&results));
    }

    #[test]
    fn test_load_lifecycle() {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig {
            model_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let service = PredictionService::new(config);

        assert!(matches!(service.load(), Err(AppError::ArtifactMissing(_))));
        assert_eq!(service.status(), ServiceStatus::Failed);
        assert!(service.failure_reason().is_some());

        // load is single-shot; recovery goes through reload
        assert!(matches!(
            service.load(),
            Err(AppError::InvalidStateTransition(_))
        ));

        let (vectorizer, classifier) = trained_pair();
        let artifact = TrainingArtifact::new(vectorizer, classifier).unwrap();
        ArtifactStore::new(dir.path()).save(&artifact).unwrap();

        service.reload().unwrap();
        assert!(service.is_ready());
        assert_eq!(service.info().unwrap().artifact_id, artifact.artifact_id);

        assert!(matches!(
            service.reload(),
            Err(AppError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_info() {
        let service = ready_service();
        let info = service.info().unwrap();
        assert_eq!(info.model_type, ModelType::LogisticRegression);
        assert_eq!(info.n_training_samples, 9);
        assert!(info.vocabulary_size > 0);
        assert_eq!(info.max_batch_size, 100);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ServiceStatus::Unloaded.to_string(), "unloaded");
        assert_eq!(ServiceStatus::Ready.to_string(), "ready");
    }
}
