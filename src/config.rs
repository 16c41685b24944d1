use crate::error::{AppError, Result};
use crate::ml::models::{ClassifierConfig, ServiceConfig, VectorizerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an override config file
pub const CONFIG_PATH_ENV: &str = "SENTIMENT_CONFIG";

/// Prefix for environment overrides, e.g. `SENTIMENT_SERVICE__MAX_BATCH_SIZE`
pub const ENV_PREFIX: &str = "SENTIMENT";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TF-IDF settings
    #[serde(default)]
    pub vectorizer: VectorizerConfig,

    /// Classifier hyperparameters
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Prediction service settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Training data locations
    #[serde(default)]
    pub training: TrainingConfig,

    /// Logging and metrics
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration
    ///
    /// Sources, later ones winning: the embedded defaults, the file at `path`
    /// (or `SENTIMENT_CONFIG`), then `SENTIMENT_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        let override_path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        if let Some(path) = override_path {
            if !path.is_file() {
                return Err(AppError::Configuration(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.vectorizer.validate()?;
        self.classifier.validate()?;
        self.service.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Labelled training CSV (`text,label`)
    pub train_path: PathBuf,

    /// Held-out test CSV (`text,label`)
    pub test_path: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("data/train.csv"),
            test_path: PathBuf::from("data/test.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit logs as JSON lines
    pub json_logs: bool,

    /// Register Prometheus metrics
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> Result<()> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
            other => Err(AppError::Validation(format!(
                "observability.log_level '{}' is not a valid level",
                other
            ))),
        }
    }
}
