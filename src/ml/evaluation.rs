use crate::error::{AppError, Result};
use crate::ml::classifier::Classifier;
use crate::ml::dataset::LabeledDataset;
use crate::ml::features::TfidfVectorizer;
use crate::ml::models::{ClassMetrics, Label, ModelMetrics, N_CLASSES};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Metrics for a labelled dataset plus the measured inference cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub metrics: ModelMetrics,

    /// Mean vectorize + predict time per comment, in milliseconds
    pub inference_time_ms: f64,

    pub n_samples: usize,
}

/// Confusion matrix; rows are true labels and columns predictions
pub fn confusion_matrix(y_true: &[Label], y_pred: &[Label]) -> [[usize; N_CLASSES]; N_CLASSES] {
    let mut matrix = [[0; N_CLASSES]; N_CLASSES];
    for (t, p) in y_true.iter().zip(y_pred) {
        matrix[t.index()][p.index()] += 1;
    }
    matrix
}

/// Compute accuracy, per-class and macro-averaged precision/recall/F1
///
/// Macro averages cover the labels that occur in either `y_true` or
/// `y_pred`. A ratio with a zero denominator counts as 0.
pub fn compute_metrics(y_true: &[Label], y_pred: &[Label]) -> ModelMetrics {
    let n_samples = y_true.len().min(y_pred.len());
    if n_samples == 0 {
        return ModelMetrics::new();
    }

    let matrix = confusion_matrix(y_true, y_pred);
    let correct: usize = (0..N_CLASSES).map(|k| matrix[k][k]).sum();
    let accuracy = correct as f64 / n_samples as f64;

    let mut per_class = Vec::with_capacity(N_CLASSES);
    let (mut sum_precision, mut sum_recall, mut sum_f1) = (0.0, 0.0, 0.0);
    let mut n_present = 0;

    for label in Label::all() {
        let k = label.index();
        let tp = matrix[k][k];
        let support: usize = matrix[k].iter().sum();
        let predicted: usize = matrix.iter().map(|row| row[k]).sum();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        if support > 0 || predicted > 0 {
            n_present += 1;
            sum_precision += precision;
            sum_recall += recall;
            sum_f1 += f1_score;
        }

        per_class.push(ClassMetrics {
            label,
            precision,
            recall,
            f1_score,
            support,
        });
    }

    let n_present = n_present.max(1) as f64;
    ModelMetrics {
        accuracy,
        precision: sum_precision / n_present,
        recall: sum_recall / n_present,
        f1_score: sum_f1 / n_present,
        confusion_matrix: matrix,
        per_class,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Score a fitted vectorizer/classifier pair on a labelled dataset
pub fn evaluate<C: Classifier + ?Sized>(
    vectorizer: &TfidfVectorizer,
    classifier: &C,
    dataset: &LabeledDataset,
) -> Result<EvaluationMetrics> {
    if dataset.is_empty() {
        return Err(AppError::Validation(
            "cannot evaluate on an empty dataset".to_string(),
        ));
    }

    let start = Instant::now();
    let features = vectorizer.transform(dataset.texts())?;
    let predictions = classifier.predict(&features)?;
    let elapsed = start.elapsed();

    let metrics = compute_metrics(dataset.labels(), &predictions);
    let inference_time_ms = elapsed.as_secs_f64() * 1000.0 / dataset.len() as f64;

    info!(
        n_samples = dataset.len(),
        accuracy = metrics.accuracy,
        macro_f1 = metrics.f1_score,
        inference_time_ms,
        "Evaluation complete"
    );

    Ok(EvaluationMetrics {
        metrics,
        inference_time_ms,
        n_samples: dataset.len(),
    })
}
