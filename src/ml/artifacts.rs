use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, SentimentClassifier};
use crate::ml::features::TfidfVectorizer;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Serialized vectorizer blob
pub const VECTORIZER_FILE: &str = "vectorizer.bin";

/// Serialized classifier blob
pub const CLASSIFIER_FILE: &str = "classifier.bin";

/// Training report, JSON
pub const METRICS_FILE: &str = "metrics.json";

/// Bumped whenever the blob layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Wrapper written around each blob
///
/// Both blobs of one training run carry the same `artifact_id`; a pair with
/// different ids was not produced together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope<T> {
    pub format_version: u32,
    pub artifact_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub payload: T,
}

/// A fitted vectorizer and the classifier trained on its output
#[derive(Debug, Clone)]
pub struct TrainingArtifact {
    pub artifact_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub vectorizer: TfidfVectorizer,
    pub classifier: SentimentClassifier,
}

impl TrainingArtifact {
    /// Pair a fitted vectorizer with a trained classifier under a fresh id
    pub fn new(vectorizer: TfidfVectorizer, classifier: SentimentClassifier) -> Result<Self> {
        check_pair(&vectorizer, &classifier).map_err(AppError::Validation)?;
        Ok(Self {
            artifact_id: Uuid::new_v4(),
            created_at: Utc::now(),
            vectorizer,
            classifier,
        })
    }
}

fn check_pair(
    vectorizer: &TfidfVectorizer,
    classifier: &SentimentClassifier,
) -> std::result::Result<(), String> {
    if !vectorizer.is_fitted() {
        return Err("vectorizer is not fitted".to_string());
    }
    if !classifier.is_trained() {
        return Err("classifier is not trained".to_string());
    }
    let n_features = classifier.metadata().n_features;
    if n_features != vectorizer.vocabulary_size() {
        return Err(format!(
            "classifier expects {} features but the vectorizer produces {}",
            n_features,
            vectorizer.vocabulary_size()
        ));
    }
    Ok(())
}

/// Directory holding one vectorizer/classifier pair and its training report
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectorizer_path(&self) -> PathBuf {
        self.dir.join(VECTORIZER_FILE)
    }

    pub fn classifier_path(&self) -> PathBuf {
        self.dir.join(CLASSIFIER_FILE)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join(METRICS_FILE)
    }

    /// Whether both blobs are present
    pub fn exists(&self) -> bool {
        self.vectorizer_path().is_file() && self.classifier_path().is_file()
    }

    /// Persist both blobs
    pub fn save(&self, artifact: &TrainingArtifact) -> Result<()> {
        self.persist(artifact, None)
    }

    /// Persist both blobs together with the training report
    pub fn save_with_report<T: Serialize>(
        &self,
        artifact: &TrainingArtifact,
        report: &T,
    ) -> Result<()> {
        let report_bytes = serde_json::to_vec_pretty(report)?;
        self.persist(artifact, Some(report_bytes))
    }

    /// Every file is first written to a temporary sibling and synced. Targets
    /// are only replaced once all temporaries exist, so a failed write leaves
    /// the previous set in place.
    fn persist(&self, artifact: &TrainingArtifact, report: Option<Vec<u8>>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let vectorizer = ArtifactEnvelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            artifact_id: artifact.artifact_id,
            created_at: artifact.created_at,
            payload: &artifact.vectorizer,
        };
        let classifier = ArtifactEnvelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            artifact_id: artifact.artifact_id,
            created_at: artifact.created_at,
            payload: &artifact.classifier,
        };

        let vectorizer_bytes = bincode::serialize(&vectorizer)?;
        let classifier_bytes = bincode::serialize(&classifier)?;

        let mut staged = vec![
            StagedFile::write(self.vectorizer_path(), &vectorizer_bytes)?,
            StagedFile::write(self.classifier_path(), &classifier_bytes)?,
        ];
        if let Some(bytes) = &report {
            staged.push(StagedFile::write(self.metrics_path(), bytes)?);
        }
        debug!(files = staged.len(), "Artifacts staged");

        for file in staged {
            file.commit()?;
        }

        info!(
            dir = %self.dir.display(),
            artifact_id = %artifact.artifact_id,
            vectorizer_bytes = vectorizer_bytes.len(),
            classifier_bytes = classifier_bytes.len(),
            report = report.is_some(),
            "Artifacts saved"
        );
        Ok(())
    }

    /// Load and cross-check both blobs
    ///
    /// Absent files give `ArtifactMissing`; unreadable, incompatible or
    /// mismatched blobs give `ArtifactLoadFailure`.
    pub fn load(&self) -> Result<TrainingArtifact> {
        let vectorizer_path = self.vectorizer_path();
        let classifier_path = self.classifier_path();

        let missing: Vec<String> = [&vectorizer_path, &classifier_path]
            .iter()
            .filter(|p| !p.is_file())
            .map(|p| p.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::ArtifactMissing(missing.join(", ")));
        }

        let vectorizer: ArtifactEnvelope<TfidfVectorizer> = read_blob(&vectorizer_path)?;
        let classifier: ArtifactEnvelope<SentimentClassifier> = read_blob(&classifier_path)?;

        if vectorizer.artifact_id != classifier.artifact_id {
            return Err(AppError::ArtifactLoadFailure(format!(
                "vectorizer {} and classifier {} come from different training runs",
                vectorizer.artifact_id, classifier.artifact_id
            )));
        }

        check_pair(&vectorizer.payload, &classifier.payload)
            .map_err(AppError::ArtifactLoadFailure)?;

        debug!(
            artifact_id = %vectorizer.artifact_id,
            vocabulary_size = vectorizer.payload.vocabulary_size(),
            model_type = %classifier.payload.model_type(),
            "Artifacts loaded"
        );

        Ok(TrainingArtifact {
            artifact_id: vectorizer.artifact_id,
            created_at: vectorizer.created_at,
            vectorizer: vectorizer.payload,
            classifier: classifier.payload,
        })
    }

    /// Read the training report, if one was written
    pub fn load_metrics<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let path = self.metrics_path();
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<ArtifactEnvelope<T>> {
    let bytes = fs::read(path).map_err(|e| {
        AppError::ArtifactLoadFailure(format!("cannot read {}: {}", path.display(), e))
    })?;
    let envelope: ArtifactEnvelope<T> = bincode::deserialize(&bytes).map_err(|e| {
        AppError::ArtifactLoadFailure(format!("cannot decode {}: {}", path.display(), e))
    })?;
    if envelope.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(AppError::ArtifactLoadFailure(format!(
            "{} has format version {}, expected {}",
            path.display(),
            envelope.format_version,
            ARTIFACT_FORMAT_VERSION
        )));
    }
    Ok(envelope)
}

/// Synced temporary file waiting to replace its target
///
/// Dropping it without `commit` removes the temporary.
struct StagedFile {
    tmp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    fn write(target: PathBuf, bytes: &[u8]) -> Result<Self> {
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                AppError::Internal(format!("invalid artifact path {}", target.display()))
            })?;
        let staged = Self {
            tmp_path: target.with_file_name(format!(".{}.tmp", file_name)),
            target,
            committed: false,
        };

        let mut writer = BufWriter::new(File::create(&staged.tmp_path)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(staged)
    }

    fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp_path, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::TfidfVectorizer;
    use crate::ml::models::{ClassifierConfig, Label, VectorizerConfig};
    use tempfile::TempDir;

    fn trained_artifact() -> TrainingArtifact {
        let texts = [
            "love this great video",
            "great work love it",
            "hate this awful video",
            "awful work hate it",
            "the video is about cooking",
            "the work is about cooking",
        ];
        let labels = [
            Label::Positive,
            Label::Positive,
            Label::Negative,
            Label::Negative,
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
            max_iter: 100,
            ..Default::default()
        });
        classifier.fit(&features, &labels).unwrap();
        TrainingArtifact::new(vectorizer, classifier).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("models"));
        let artifact = trained_artifact();

        assert!(!store.exists());
        store.save(&artifact).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.artifact_id, artifact.artifact_id);

        let x = artifact.vectorizer.transform(&["love it"]).unwrap();
        let y = loaded.vectorizer.transform(&["love it"]).unwrap();
        assert_eq!(x, y);
        assert_eq!(
            artifact.classifier.predict_proba(&x).unwrap(),
            loaded.classifier.predict_proba(&y).unwrap()
        );

        // No temporary files left behind
        let leftovers = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(store.load(), Err(AppError::ArtifactMissing(_))));

        store.save(&trained_artifact()).unwrap();
        fs::remove_file(store.classifier_path()).unwrap();
        match store.load() {
            Err(AppError::ArtifactMissing(msg)) => assert!(msg.contains(CLASSIFIER_FILE)),
            other => panic!("unexpected result: {:?}", other.map(|a| a.artifact_id)),
        }
    }

    #[test]
    fn test_corrupt_blob() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save(&trained_artifact()).unwrap();
        fs::write(store.vectorizer_path(), b"not a vectorizer").unwrap();

        assert!(matches!(store.load(), Err(AppError::ArtifactLoadFailure(_))));
    }

    #[test]
    fn test_mismatched_pair() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let store_a = ArtifactStore::new(dir_a.path());
        let store_b = ArtifactStore::new(dir_b.path());
        store_a.save(&trained_artifact()).unwrap();
        store_b.save(&trained_artifact()).unwrap();

        fs::copy(store_b.classifier_path(), store_a.classifier_path()).unwrap();
        assert!(matches!(store_a.load(), Err(AppError::ArtifactLoadFailure(_))));
    }

    #[test]
    fn test_unfitted_pair_rejected() {
        let vectorizer = TfidfVectorizer::new(VectorizerConfig::default());
        let classifier = SentimentClassifier::new(&ClassifierConfig::default());
        assert!(TrainingArtifact::new(vectorizer, classifier).is_err());
    }

    #[test]
    fn test_metrics_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load_metrics::<serde_json::Value>().unwrap().is_none());

        store
            .save_with_report(&trained_artifact(), &serde_json::json!({ "accuracy": 0.9 }))
            .unwrap();
        let report: serde_json::Value = store.load_metrics().unwrap().unwrap();
        assert_eq!(report["accuracy"], 0.9);
    }

    #[test]
    fn test_failed_write_keeps_previous_set() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first = trained_artifact();
        store
            .save_with_report(&first, &serde_json::json!({ "run": 1 }))
            .unwrap();

        // A directory in the way of the classifier temporary fails the second write
        let blocker = dir.path().join(format!(".{}.tmp", CLASSIFIER_FILE));
        fs::create_dir(&blocker).unwrap();

        let second = trained_artifact();
        assert!(store
            .save_with_report(&second, &serde_json::json!({ "run": 2 }))
            .is_err());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.artifact_id, first.artifact_id);
        let report: serde_json::Value = store.load_metrics().unwrap().unwrap();
        assert_eq!(report["run"], 1);
        assert!(!dir
            .path()
            .join(format!(".{}.tmp", VECTORIZER_FILE))
            .exists());

        fs::remove_dir(&blocker).unwrap();
        store
            .save_with_report(&second, &serde_json::json!({ "run": 2 }))
            .unwrap();
        assert_eq!(store.load().unwrap().artifact_id, second.artifact_id);
    }
}
