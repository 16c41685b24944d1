/// Comment sentiment classification
///
/// This module provides:
/// - TF-IDF vectorization of short comments
/// - Probabilistic and nearest-centroid classifiers over sparse features
/// - A training pipeline with held-out evaluation and atomic persistence
/// - A batch prediction service with a load/ready lifecycle

pub mod artifacts;
pub mod classifier;
pub mod dataset;
pub mod evaluation;
pub mod features;
pub mod metrics;
pub mod models;
pub mod service;
pub mod training;

pub use artifacts::{ArtifactStore, TrainingArtifact};
pub use classifier::{
    Classifier, LogisticRegressionClassifier, NearestCentroidClassifier, SentimentClassifier,
};
pub use dataset::LabeledDataset;
pub use evaluation::{compute_metrics, evaluate, EvaluationMetrics};
pub use features::{SparseVector, TfidfVectorizer};
pub use models::{
    BatchStatistics, ClassProbabilities, ClassifierConfig, Document, Label, ModelMetadata,
    ModelMetrics, ModelType, PredictionResult, ServiceConfig, VectorizerConfig,
};
pub use service::{ModelInfo, PredictionService, ServiceStatus};
pub use training::{CandidateResult, QualityGates, TrainingPipeline, TrainingReport};
