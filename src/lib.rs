//! Sentiment classification for short user comments.
//!
//! Comments are turned into TF-IDF vectors and labelled Negative (-1),
//! Neutral (0) or Positive (1). The crate has two halves:
//!
//! - [`ml::TrainingPipeline`] fits the vectorizer and classifier on a
//!   labelled CSV, evaluates on a held-out set and persists the pair.
//! - [`ml::PredictionService`] loads the persisted pair and serves single and
//!   batch predictions with summary statistics.

pub mod config;
pub mod error;
pub mod logging;
pub mod ml;

pub use config::Config;
pub use error::{AppError, Result};
