//! Error types for problem construction and sampling.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-level errors: all of these surface before any simulation runs.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("No bound given for variable '{0}'")]
    MissingBound(String),

    #[error("Duplicate variable name: {0}")]
    DuplicateVariable(String),

    #[error("Length mismatch for {what}: expected {expected}, found {found}")]
    LengthMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite value for {what}: {value}")]
    NonFinite { what: String, value: f64 },

    #[error("Invalid bound for '{name}': {reason}")]
    InvalidBound { name: String, reason: String },

    #[error("Problem has no variables")]
    EmptyProblem,

    #[error("Failed to read bound table {path}: {message}")]
    BoundTable { path: PathBuf, message: String },

    #[error("Proxy transform error: {0}")]
    Proxy(String),

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Design matrix row {row} has {found} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Analysis error: {0}")]
    Analysis(String),
}

pub type DesignResult<T> = Result<T, DesignError>;
