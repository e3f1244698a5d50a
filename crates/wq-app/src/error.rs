//! Error types for the wq-app service layer.

use std::path::PathBuf;

/// Application error wrapping the backend crates' errors for the CLI.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Study error: {0}")]
    Study(String),

    #[error("Failed to read study file: {}", path.display())]
    StudyFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Design error: {0}")]
    Design(String),

    #[error("Batch error: {0}")]
    Batch(String),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for wq-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<wq_study::StudyError> for AppError {
    fn from(err: wq_study::StudyError) -> Self {
        AppError::Study(err.to_string())
    }
}

impl From<wq_study::ValidationError> for AppError {
    fn from(err: wq_study::ValidationError) -> Self {
        AppError::Study(err.to_string())
    }
}

impl From<wq_model::ModelError> for AppError {
    fn from(err: wq_model::ModelError) -> Self {
        AppError::Model(err.to_string())
    }
}

impl From<wq_batch::EvalError> for AppError {
    fn from(err: wq_batch::EvalError) -> Self {
        AppError::Model(err.to_string())
    }
}

impl From<wq_design::DesignError> for AppError {
    fn from(err: wq_design::DesignError) -> Self {
        AppError::Design(err.to_string())
    }
}

impl From<wq_batch::BatchError> for AppError {
    fn from(err: wq_batch::BatchError) -> Self {
        AppError::Batch(err.to_string())
    }
}

impl From<wq_results::ResultsError> for AppError {
    fn from(err: wq_results::ResultsError) -> Self {
        AppError::Results(err.to_string())
    }
}
