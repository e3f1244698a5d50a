//! wq-results: run artifact assembly, persistence and scratch cleanup.

pub mod artifact;
pub mod assemble;
pub mod cleanup;
pub mod hash;
pub mod store;

pub use artifact::{ArtifactMeta, RunArtifact, RunMetadata};
pub use assemble::{ArtifactAssembler, SavedArtifact, assemble_and_save};
pub use cleanup::{SweepReport, WorkspaceSnapshot};
pub use hash::design_fingerprint;
pub use store::{load_artifact, save_artifact};

use std::path::{Path, PathBuf};

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write artifact {}: {source}{}", path.display(), rescue_note(rescue.as_deref()))]
    Persist {
        path: PathBuf,
        rescue: Option<PathBuf>,
        source: std::io::Error,
    },

    #[error("Failed to read artifact {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid artifact: {0}")]
    Invalid(String),
}

fn rescue_note(rescue: Option<&Path>) -> String {
    match rescue {
        Some(path) => format!(" (rescue copy written to {})", path.display()),
        None => " (rescue copy could not be written)".to_string(),
    }
}
