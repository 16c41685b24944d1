use crate::error::{AppError, Result};
use crate::ml::artifacts::{ArtifactStore, TrainingArtifact};
use crate::ml::classifier::{Classifier, SentimentClassifier};
use crate::ml::dataset::LabeledDataset;
use crate::ml::evaluation::{evaluate, EvaluationMetrics};
use crate::ml::features::TfidfVectorizer;
use crate::ml::models::{ClassifierConfig, Label, ModelType, VectorizerConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Minimum accuracy on the held-out set
pub const MIN_TEST_ACCURACY: f64 = 0.80;

/// Minimum macro F1 on the held-out set
pub const MIN_MACRO_F1: f64 = 0.75;

/// Latency budget for one batch of [`LATENCY_BATCH_SIZE`] comments
pub const MAX_BATCH_LATENCY_MS: f64 = 100.0;

pub const LATENCY_BATCH_SIZE: usize = 50;

/// Outcome of the quality checks on a training run
///
/// Reported only; a run that misses a gate still produces artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityGates {
    pub accuracy_passed: bool,
    pub f1_passed: bool,
    pub latency_passed: bool,

    /// Per-comment inference time scaled to one batch
    pub projected_batch_ms: f64,
}

impl QualityGates {
    pub fn all_passed(&self) -> bool {
        self.accuracy_passed && self.f1_passed && self.latency_passed
    }
}

/// Training run summary, written as `metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub artifact_id: Uuid,
    pub model_type: ModelType,
    pub trained_at: DateTime<Utc>,
    pub vectorizer: VectorizerConfig,
    pub classifier: ClassifierConfig,

    /// Hyperparameters as recorded by the fitted model
    pub model_hyperparameters: BTreeMap<String, String>,

    pub vocabulary_size: usize,
    pub n_train_samples: usize,
    pub n_test_samples: usize,
    pub train_distribution: BTreeMap<String, usize>,
    pub test_distribution: BTreeMap<String, usize>,

    /// Wall-clock time for vectorizer and classifier fitting
    pub training_time_secs: f64,

    pub train: EvaluationMetrics,
    pub test: EvaluationMetrics,
}

impl TrainingReport {
    pub fn quality_gates(&self) -> QualityGates {
        let projected_batch_ms = self.test.inference_time_ms * LATENCY_BATCH_SIZE as f64;
        QualityGates {
            accuracy_passed: self.test.metrics.accuracy >= MIN_TEST_ACCURACY,
            f1_passed: self.test.metrics.f1_score >= MIN_MACRO_F1,
            latency_passed: projected_batch_ms < MAX_BATCH_LATENCY_MS,
            projected_batch_ms,
        }
    }
}

/// Test-set outcome of one classifier configuration in a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub classifier: ClassifierConfig,
    pub model_type: ModelType,
    pub test_accuracy: f64,
    pub macro_f1: f64,
    pub min_recall: f64,

    /// Classifier fitting only; the vectorizer is shared
    pub training_time_secs: f64,

    pub inference_time_ms: f64,
    pub n_iter: Option<usize>,
}

/// Every combination of `c_values` and `max_iters` over `base`
pub fn classifier_grid(
    base: &ClassifierConfig,
    c_values: &[f64],
    max_iters: &[usize],
) -> Vec<ClassifierConfig> {
    c_values
        .iter()
        .flat_map(|&c| {
            max_iters.iter().map(move |&max_iter| ClassifierConfig {
                c,
                max_iter,
                ..base.clone()
            })
        })
        .collect()
}

fn check_sets(train: &LabeledDataset, test: &LabeledDataset) -> Result<()> {
    if train.is_empty() {
        return Err(AppError::Training("training set is empty".to_string()));
    }
    if test.is_empty() {
        return Err(AppError::Training("test set is empty".to_string()));
    }
    Ok(())
}

fn distribution(dataset: &LabeledDataset) -> BTreeMap<String, usize> {
    dataset
        .label_distribution()
        .into_iter()
        .map(|(label, count)| (label.sentiment().to_string(), count))
        .collect()
}

/// Fits the vectorizer and classifier, evaluates them and persists the pair
#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    vectorizer_config: VectorizerConfig,
    classifier_config: ClassifierConfig,
}

impl TrainingPipeline {
    pub fn new(
        vectorizer_config: VectorizerConfig,
        classifier_config: ClassifierConfig,
    ) -> Result<Self> {
        vectorizer_config.validate()?;
        classifier_config.validate()?;
        Ok(Self {
            vectorizer_config,
            classifier_config,
        })
    }

    /// Fit and evaluate without touching disk
    pub fn run(&self, train: &LabeledDataset, test: &LabeledDataset) -> Result<TrainingReport> {
        self.train(train, test).map(|(_, report)| report)
    }

    /// Fit and evaluate, returning the fitted pair with its report
    pub fn train(
        &self,
        train: &LabeledDataset,
        test: &LabeledDataset,
    ) -> Result<(TrainingArtifact, TrainingReport)> {
        check_sets(train, test)?;

        info!(
            n_train = train.len(),
            n_test = test.len(),
            model_type = %self.classifier_config.model_type,
            "Starting training run"
        );
        for (label, count) in train.label_distribution() {
            info!(label = %label, count, "Training label distribution");
        }

        let overlap = train.overlap_with(test);
        if overlap > 0 {
            warn!(overlap, "Test set shares texts with the training set");
        }
        let missing: Vec<Label> = train
            .label_distribution()
            .into_iter()
            .filter(|(_, count)| *count == 0)
            .map(|(label, _)| label)
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "Training set lacks some labels; they will never be predicted");
        }

        let started = Instant::now();

        let mut vectorizer = TfidfVectorizer::new(self.vectorizer_config.clone());
        let features = vectorizer.fit_transform(train.texts())?;

        let mut classifier = SentimentClassifier::new(&self.classifier_config);
        classifier.fit(&features, train.labels())?;

        let training_time_secs = started.elapsed().as_secs_f64();
        info!(
            vocabulary_size = vectorizer.vocabulary_size(),
            training_time_secs,
            "Model fitted"
        );

        let train_eval = evaluate(&vectorizer, &classifier, train)?;
        let test_eval = evaluate(&vectorizer, &classifier, test)?;

        let artifact = TrainingArtifact::new(vectorizer, classifier)?;
        let report = TrainingReport {
            artifact_id: artifact.artifact_id,
            model_type: artifact.classifier.model_type(),
            trained_at: artifact.created_at,
            vectorizer: self.vectorizer_config.clone(),
            classifier: self.classifier_config.clone(),
            model_hyperparameters: artifact.classifier.metadata().hyperparameters.clone(),
            vocabulary_size: artifact.vectorizer.vocabulary_size(),
            n_train_samples: train.len(),
            n_test_samples: test.len(),
            train_distribution: distribution(train),
            test_distribution: distribution(test),
            training_time_secs,
            train: train_eval,
            test: test_eval,
        };

        let gates = report.quality_gates();
        info!(
            train_accuracy = report.train.metrics.accuracy,
            test_accuracy = report.test.metrics.accuracy,
            macro_f1 = report.test.metrics.f1_score,
            projected_batch_ms = gates.projected_batch_ms,
            "Training run evaluated"
        );
        if !gates.all_passed() {
            warn!(
                accuracy_passed = gates.accuracy_passed,
                f1_passed = gates.f1_passed,
                latency_passed = gates.latency_passed,
                "Model misses quality gates"
            );
        }

        Ok((artifact, report))
    }

    /// Fit, evaluate and persist
    ///
    /// Nothing is written unless fitting and evaluation both succeed.
    pub fn run_and_persist(
        &self,
        train: &LabeledDataset,
        test: &LabeledDataset,
        store: &ArtifactStore,
    ) -> Result<TrainingReport> {
        let (artifact, report) = self.train(train, test)?;
        store.save_with_report(&artifact, &report)?;
        info!(
            dir = %store.dir().display(),
            artifact_id = %report.artifact_id,
            "Training run persisted"
        );
        Ok(report)
    }

    /// Train every candidate on one shared vectorizer and score it on `test`
    ///
    /// Results are ordered by macro F1, best first; ties keep candidate order.
    /// Nothing is persisted.
    pub fn compare(
        &self,
        train: &LabeledDataset,
        test: &LabeledDataset,
        candidates: &[ClassifierConfig],
    ) -> Result<Vec<CandidateResult>> {
        check_sets(train, test)?;
        if candidates.is_empty() {
            return Err(AppError::Validation(
                "no classifier configurations to compare".to_string(),
            ));
        }
        for candidate in candidates {
            candidate.validate()?;
        }

        info!(
            candidates = candidates.len(),
            n_train = train.len(),
            n_test = test.len(),
            "Comparing classifier configurations"
        );

        let mut vectorizer = TfidfVectorizer::new(self.vectorizer_config.clone());
        let features = vectorizer.fit_transform(train.texts())?;

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let started = Instant::now();
            let mut classifier = SentimentClassifier::new(candidate);
            classifier.fit(&features, train.labels())?;
            let training_time_secs = started.elapsed().as_secs_f64();

            let evaluation = evaluate(&vectorizer, &classifier, test)?;
            let result = CandidateResult {
                classifier: candidate.clone(),
                model_type: classifier.model_type(),
                test_accuracy: evaluation.metrics.accuracy,
                macro_f1: evaluation.metrics.f1_score,
                min_recall: evaluation.metrics.min_recall(),
                training_time_secs,
                inference_time_ms: evaluation.inference_time_ms,
                n_iter: classifier
                    .metadata()
                    .hyperparameters
                    .get("n_iter")
                    .and_then(|n| n.parse().ok()),
            };
            info!(
                model_type = %result.model_type,
                c = candidate.c,
                max_iter = candidate.max_iter,
                test_accuracy = result.test_accuracy,
                macro_f1 = result.macro_f1,
                "Candidate evaluated"
            );
            results.push(result);
        }

        results.sort_by(|a, b| b.macro_f1.total_cmp(&a.macro_f1));
        Ok(results)
    }
}
