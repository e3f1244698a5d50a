//! wq-study: study file format and validation.

pub mod schema;
pub mod validate;

pub use schema::*;
pub use validate::{ValidationError, validate_study};

use std::path::Path;

pub const LATEST_VERSION: u32 = 1;

pub type StudyResult<T> = Result<T, StudyError>;

#[derive(thiserror::Error, Debug)]
pub enum StudyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn load_yaml(path: &Path) -> StudyResult<StudyConfig> {
    let content = std::fs::read_to_string(path)?;
    let study: StudyConfig = serde_yaml::from_str(&content)?;
    validate_study(&study)?;
    Ok(study)
}

pub fn save_yaml(path: &Path, study: &StudyConfig) -> StudyResult<()> {
    validate_study(study)?;
    let content = serde_yaml::to_string(study)?;
    std::fs::write(path, content)?;
    Ok(())
}

pub fn load_json(path: &Path) -> StudyResult<StudyConfig> {
    let content = std::fs::read_to_string(path)?;
    let study: StudyConfig = serde_json::from_str(&content)?;
    validate_study(&study)?;
    Ok(study)
}
