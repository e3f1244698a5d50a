//! Error types for model binding operations.

use std::path::PathBuf;
use thiserror::Error;
use wq_core::CoreError;

/// Errors reported by a model binding.
///
/// `InvalidState` and `NonConvergent` are the solver-level failures a batch
/// records per row; the rest indicate misuse or bad input files.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("No network is open")]
    NotOpen,

    #[error("No reaction scheme is open")]
    SchemeNotOpen,

    #[error("Hydraulics have not been solved")]
    HydraulicsNotSolved,

    #[error("Unknown constant: {0}")]
    UnknownConstant(String),

    #[error("Unknown species: {0}")]
    UnknownSpecies(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Length mismatch: {names} names but {values} values")]
    LengthMismatch { names: usize, values: usize },

    #[error("Invalid state: {what}")]
    InvalidState { what: String },

    #[error("Quality simulation did not converge at t={time_s} s: {what}")]
    NonConvergent { time_s: f64, what: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    /// True for failures of a single simulation run rather than of the setup.
    pub fn is_solver_failure(&self) -> bool {
        matches!(
            self,
            ModelError::InvalidState { .. } | ModelError::NonConvergent { .. }
        )
    }
}

impl From<CoreError> for ModelError {
    fn from(err: CoreError) -> Self {
        ModelError::InvalidState {
            what: err.to_string(),
        }
    }
}
