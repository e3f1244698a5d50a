//! Study loading and path resolution.

use std::path::{Path, PathBuf};
use wq_study::StudyConfig;

use crate::error::{AppError, AppResult};

/// A validated study with the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedStudy {
    pub config: StudyConfig,
    pub path: PathBuf,
    pub base_dir: PathBuf,
}

impl LoadedStudy {
    /// `path` as an absolute path, relative ones joined onto the study directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn network_file(&self) -> PathBuf {
        self.resolve(&self.config.network_file)
    }

    pub fn reaction_file(&self) -> PathBuf {
        self.resolve(&self.config.reaction_file)
    }

    /// Artifact destination: `override_path` (relative to the current
    /// directory, as typed on a command line), the study's `output_path`
    /// (relative to the study), or `<network stem>_morris.json` in the
    /// study directory.
    pub fn output_path(&self, override_path: Option<&Path>) -> AppResult<PathBuf> {
        Ok(match (override_path, &self.config.output_path) {
            (Some(path), _) if path.is_absolute() => path.to_path_buf(),
            (Some(path), _) => std::env::current_dir()?.join(path),
            (None, Some(path)) => self.resolve(path),
            (None, None) => self.base_dir.join(self.config.default_output_name()),
        })
    }

    pub fn name(&self) -> String {
        self.config.name.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "study".to_string())
        })
    }
}

/// Load and validate a study file (YAML, or JSON by extension).
pub fn load_study(path: &Path) -> AppResult<LoadedStudy> {
    if !path.exists() {
        return Err(AppError::StudyFileRead {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        });
    }
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => wq_study::load_json(path)?,
        _ => wq_study::load_yaml(path)?,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let base_dir = std::fs::canonicalize(&dir).map_err(|source| AppError::StudyFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LoadedStudy {
        config,
        path: path.to_path_buf(),
        base_dir,
    })
}

/// Load a study and check that every file it references exists.
pub fn validate_study_file(path: &Path) -> AppResult<LoadedStudy> {
    let study = load_study(path)?;
    let mut referenced = vec![
        ("network_file", study.network_file()),
        ("reaction_file", study.reaction_file()),
    ];
    if let wq_study::BoundSourceDef::Table { path } = &study.config.bound_source {
        referenced.push(("bound_source path", study.resolve(path)));
    }
    for (field, file) in referenced {
        if !file.is_file() {
            return Err(AppError::InvalidInput(format!(
                "{field} {} does not exist",
                file.display()
            )));
        }
    }
    Ok(study)
}
