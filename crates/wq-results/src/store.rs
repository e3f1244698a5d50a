//! Artifact persistence.
//!
//! Writes go to a temporary file next to the destination which is then
//! renamed over it, so a crash never leaves a half-written artifact. If the
//! write fails, a rescue copy is attempted in the system temp directory so
//! a finished batch is not lost to a bad output path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::artifact::RunArtifact;
use crate::{ResultsError, ResultsResult};

pub fn save_artifact(artifact: &RunArtifact, path: &Path) -> ResultsResult<()> {
    let bytes = serde_json::to_vec(artifact)?;
    match write_atomic(path, &bytes) {
        Ok(()) => {
            info!(path = %path.display(), bytes = bytes.len(), "artifact saved");
            Ok(())
        }
        Err(source) => {
            let rescue = write_rescue(path, &bytes);
            error!(
                path = %path.display(),
                rescue = ?rescue,
                error = %source,
                "artifact write failed"
            );
            Err(ResultsError::Persist {
                path: path.to_path_buf(),
                rescue,
                source,
            })
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn write_rescue(path: &Path, bytes: &[u8]) -> Option<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let rescue = std::env::temp_dir().join(format!("{stem}.rescue-{stamp}.json"));
    fs::write(&rescue, bytes).ok().map(|()| rescue)
}

pub fn load_artifact(path: &Path) -> ResultsResult<RunArtifact> {
    let content = fs::read(path).map_err(|source| ResultsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact: RunArtifact = serde_json::from_slice(&content)?;
    artifact.validate()?;
    Ok(artifact)
}
