//! Shared fixtures for integration tests
//!
//! Builds deterministic synthetic comment corpora where each label has its
//! own cue words mixed with subject and filler words shared by all labels.

#![allow(dead_code)]

use comment_sentiment::ml::{
    ClassifierConfig, Label, LabeledDataset, PredictionService, ServiceConfig, TrainingPipeline,
    VectorizerConfig,
};
use std::collections::HashMap;

const POSITIVE: [&str; 10] = [
    "love", "great", "amazing", "awesome", "excellent", "wonderful", "fantastic", "helpful",
    "brilliant", "perfect",
];
const NEGATIVE: [&str; 10] = [
    "hate", "terrible", "awful", "horrible", "boring", "worst", "useless", "annoying",
    "disappointing", "bad",
];
const NEUTRAL: [&str; 10] = [
    "question", "wondering", "when", "where", "which", "released", "posted", "watched",
    "timestamp", "update",
];
const SUBJECTS: [&str; 6] = ["video", "tutorial", "channel", "episode", "content", "series"];
const FILLERS: [&str; 5] = ["today", "again", "really", "honestly", "overall"];

fn cues(label: Label) -> &'static [&'static str; 10] {
    match label {
        Label::Positive => &POSITIVE,
        Label::Negative => &NEGATIVE,
        Label::Neutral => &NEUTRAL,
    }
}

/// The `i`-th synthetic comment for a label; `offset` shifts the sequence
pub fn comment(label: Label, i: usize, offset: usize) -> String {
    let words = cues(label);
    let n = i + offset;
    format!(
        "The {} {} {} {}!",
        SUBJECTS[n % SUBJECTS.len()],
        words[n % words.len()],
        words[(n * 3 + 1) % words.len()],
        FILLERS[(n / 2) % FILLERS.len()],
    )
}

/// Dataset with `counts[label.index()]` comments per label
pub fn make_dataset(counts: [usize; 3], offset: usize) -> LabeledDataset {
    let mut pairs = Vec::new();
    for label in Label::all() {
        for i in 0..counts[label.index()] {
            pairs.push((comment(label, i, offset), label));
        }
    }
    LabeledDataset::from_pairs(pairs)
}

/// Corpus where the minority labels share all of their words with part of
/// the neutral comments: positive comments read like `great` neutral ones and
/// negative comments like `awful` neutral ones
pub fn overlapping_dataset(
    neutral_plain: usize,
    neutral_cued: usize,
    positive: usize,
    negative: usize,
) -> LabeledDataset {
    let text = |cue: &str, i: usize| {
        format!(
            "The new video is {} {}",
            cue,
            FILLERS[i % FILLERS.len()]
        )
    };

    let mut pairs = Vec::new();
    for i in 0..neutral_plain {
        pairs.push((text("out", i), Label::Neutral));
    }
    for i in 0..neutral_cued {
        pairs.push((text("great", i), Label::Neutral));
        pairs.push((text("awful", i), Label::Neutral));
    }
    for i in 0..positive {
        pairs.push((text("great", i), Label::Positive));
    }
    for i in 0..negative {
        pairs.push((text("awful", i), Label::Negative));
    }
    LabeledDataset::from_pairs(pairs)
}

pub fn balanced_train() -> LabeledDataset {
    make_dataset([60, 60, 60], 0)
}

pub fn balanced_test() -> LabeledDataset {
    make_dataset([20, 20, 20], 7)
}

pub fn default_pipeline() -> TrainingPipeline {
    TrainingPipeline::new(VectorizerConfig::default(), ClassifierConfig::default()).unwrap()
}

/// A ready service trained on the balanced corpus
pub fn trained_service() -> PredictionService {
    let (artifact, _) = default_pipeline()
        .train(&balanced_train(), &balanced_test())
        .unwrap();
    PredictionService::from_artifact(artifact, ServiceConfig::default())
}

/// Parse Prometheus exposition format into metric name -> lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}
