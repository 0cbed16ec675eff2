use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed caller input (negative or non-numeric attachment count, missing label, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Feature width disagreement between pipeline pieces
    #[error("Dimension mismatch in {context}: expected {expected} columns, found {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Minority class too small to interpolate synthetic samples
    #[error("Insufficient samples for class {class}: {available} available, at least {required} required")]
    InsufficientSamples {
        class: String,
        available: usize,
        required: usize,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing, corrupt or incompatible artifact bundle
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Model or transformer used before fitting
    #[error("Not trained: {0}")]
    NotTrained(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            AppError::InsufficientSamples { .. } => "INSUFFICIENT_SAMPLES",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Artifact(_) => "ARTIFACT_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::NotTrained(_) => "NOT_TRAINED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix the problem by re-submitting different input
    pub fn is_recoverable_input(&self) -> bool {
        matches!(self, AppError::InvalidInput(_))
    }

    pub(crate) fn dimension_mismatch(
        context: impl Into<String>,
        expected: usize,
        actual: usize,
    ) -> Self {
        AppError::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
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
