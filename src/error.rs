use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// One or both artifact files are absent at load time
    #[error("Artifact missing: {0}")]
    ArtifactMissing(String),

    /// Artifact file exists but cannot be deserialized into a usable model
    #[error("Artifact load failure: {0}")]
    ArtifactLoadFailure(String),

    /// Inference attempted before a successful load
    #[error("Prediction service not ready (status: {0})")]
    ServiceNotReady(String),

    /// Batch call with zero texts
    #[error("Empty input: at least one text is required")]
    EmptyInput,

    /// Batch exceeds the configured ceiling
    #[error("Input too large: {size} texts exceeds the maximum batch size of {max}")]
    InputTooLarge { size: usize, max: usize },

    /// Invalid lifecycle transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model fitting errors
    #[error("Training error: {0}")]
    Training(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::ArtifactMissing(_) => "ARTIFACT_MISSING",
            AppError::ArtifactLoadFailure(_) => "ARTIFACT_LOAD_FAILURE",
            AppError::ServiceNotReady(_) => "SERVICE_NOT_READY",
            AppError::EmptyInput => "EMPTY_INPUT",
            AppError::InputTooLarge { .. } => "INPUT_TOO_LARGE",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Training(_) => "TRAINING_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error must be surfaced to the process owner instead of the caller.
    ///
    /// Artifact errors happen during startup and are never retried inside the core.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::ArtifactMissing(_) | AppError::ArtifactLoadFailure(_)
        )
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from bincode::Error
impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from csv::Error
impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::EmptyInput.error_code(), "EMPTY_INPUT");
        assert_eq!(
            AppError::InputTooLarge { size: 101, max: 100 }.error_code(),
            "INPUT_TOO_LARGE"
        );
        assert_eq!(
            AppError::ServiceNotReady("unloaded".to_string()).error_code(),
            "SERVICE_NOT_READY"
        );
        assert_eq!(
            AppError::ArtifactMissing("models/classifier.bin".to_string()).error_code(),
            "ARTIFACT_MISSING"
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(AppError::ArtifactMissing("x".to_string()).is_fatal());
        assert!(AppError::ArtifactLoadFailure("x".to_string()).is_fatal());
        assert!(!AppError::EmptyInput.is_fatal());
        assert!(!AppError::ServiceNotReady("loading".to_string()).is_fatal());
    }

    #[test]
    fn test_input_too_large_message() {
        let err = AppError::InputTooLarge { size: 101, max: 100 };
        assert_eq!(
            err.to_string(),
            "Input too large: 101 texts exceeds the maximum batch size of 100"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AppError = io.into();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
