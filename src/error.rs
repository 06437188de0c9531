//! Error types for the Kolosal recipe grid

use thiserror::Error;

/// Result type alias for Kolosal grid operations
pub type Result<T> = std::result::Result<T, KolosalError>;

/// Main error type for the grid engine
#[derive(Error, Debug)]
pub enum KolosalError {
    /// Technique name is not registered for the stage
    #[error("Unknown technique '{technique}' for stage '{stage}'")]
    UnknownTechnique { stage: String, technique: String },

    /// Technique is registered but its module could not be loaded
    #[error("Technique '{technique}' is unavailable: {reason}")]
    TechniqueUnavailable { technique: String, reason: String },

    /// Resolved algorithm lacks the capability the stage needs
    #[error("Stage '{stage}' cannot use technique '{technique}': {capability}")]
    UnsupportedOperation {
        stage: String,
        technique: String,
        capability: String,
    },

    /// Malformed stage options; raised before any configuration runs
    #[error("Configuration generation error: {0}")]
    ConfigurationGeneration(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl KolosalError {
    /// Stable tag recorded in failed results rows
    pub fn kind(&self) -> &'static str {
        match self {
            KolosalError::UnknownTechnique { .. } => "unknown_technique",
            KolosalError::TechniqueUnavailable { .. } => "technique_unavailable",
            KolosalError::UnsupportedOperation { .. } => "unsupported_operation",
            KolosalError::ConfigurationGeneration(_) => "configuration_generation",
            KolosalError::DataError(_) => "data",
            KolosalError::ConfigError(_) => "config",
            KolosalError::IoError(_) => "io",
            KolosalError::SerializationError(_) => "serialization",
            KolosalError::ShapeError { .. } => "shape",
            KolosalError::FeatureNotFound(_) => "feature_not_found",
            KolosalError::ModelNotFitted => "model_not_fitted",
            KolosalError::InvalidParameter { .. } => "invalid_parameter",
            KolosalError::ValidationError(_) => "validation",
        }
    }

    /// Shorthand for an invalid parameter error
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        KolosalError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for KolosalError {
    fn from(err: polars::error::PolarsError) -> Self {
        KolosalError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for KolosalError {
    fn from(err: serde_json::Error) -> Self {
        KolosalError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for KolosalError {
    fn from(err: ndarray::ShapeError) -> Self {
        KolosalError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
