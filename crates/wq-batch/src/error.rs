//! Error types for row evaluation and batch execution.

use thiserror::Error;
use wq_core::CoreError;
use wq_design::DesignError;
use wq_model::ModelError;

use crate::outcome::RowFailure;

/// Failure of a single row evaluation.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Row has {found} values, expected {expected}")]
    RowShape { expected: usize, found: usize },

    #[error("Proxy transform failed: {0}")]
    Proxy(#[from] DesignError),

    #[error("Invalid row: {0}")]
    Invalid(String),
}

impl From<CoreError> for EvalError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::LengthMismatch {
                expected, found, ..
            } => EvalError::RowShape { expected, found },
            other => EvalError::Invalid(other.to_string()),
        }
    }
}

impl EvalError {
    /// Per-row failure marker for this error.
    pub fn to_failure(&self) -> RowFailure {
        match self {
            EvalError::Model(_) => RowFailure::Solver {
                message: self.to_string(),
            },
            EvalError::RowShape { .. } | EvalError::Proxy(_) | EvalError::Invalid(_) => {
                RowFailure::InvalidRow {
                    message: self.to_string(),
                }
            }
        }
    }
}

/// Batch-level errors. Any of these ends the batch; live workers are
/// terminated as the pool unwinds.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Row {index} failed: {failure}")]
    RowFailed { index: usize, failure: RowFailure },

    #[error("Worker {slot} setup failed: {message}")]
    WorkerSetup { slot: usize, message: String },

    #[error("Failed to start worker {slot}: {message}")]
    Spawn { slot: usize, message: String },

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Invalid batch configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BatchResult<T> = Result<T, BatchError>;
