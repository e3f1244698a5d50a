//! Artifact assembly: bundle, persist, clean the workspace.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use wq_batch::RowOutcome;
use wq_design::{DesignMatrix, ProblemSpec};

use crate::ResultsResult;
use crate::artifact::{RunArtifact, RunMetadata};
use crate::cleanup::{SweepReport, WorkspaceSnapshot};
use crate::store::save_artifact;

/// What a completed save reports back.
#[derive(Debug, Clone)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub removed: Vec<PathBuf>,
    /// Scratch entries the sweep could not remove.
    pub leftover: Vec<PathBuf>,
    pub failed_rows: Vec<usize>,
    pub design_fingerprint: String,
}

/// Brackets a run: [`ArtifactAssembler::begin`] before any model is opened,
/// [`ArtifactAssembler::finish`] once the batch reached its terminal state.
#[derive(Debug)]
pub struct ArtifactAssembler {
    snapshot: Option<WorkspaceSnapshot>,
}

impl ArtifactAssembler {
    /// Snapshot `workspace` so scratch files created by the run can be removed.
    pub fn begin(workspace: &Path) -> ResultsResult<Self> {
        Ok(Self {
            snapshot: Some(WorkspaceSnapshot::capture(workspace)?),
        })
    }

    pub fn without_cleanup() -> Self {
        Self { snapshot: None }
    }

    /// Assemble the artifact, write it to `path`, then remove scratch
    /// entries created since [`ArtifactAssembler::begin`].
    ///
    /// Cleanup runs after the write, whether or not it succeeded, and is
    /// best-effort: entries that cannot be removed are logged and listed in
    /// [`SavedArtifact::leftover`].
    pub fn finish(
        self,
        problem: ProblemSpec,
        design: DesignMatrix,
        results: Vec<RowOutcome>,
        metadata: RunMetadata,
        path: &Path,
    ) -> ResultsResult<SavedArtifact> {
        let artifact = RunArtifact::assemble(problem, design, results, metadata)?;
        let saved = save_artifact(&artifact, path);

        let sweep = match &self.snapshot {
            Some(snapshot) => snapshot.sweep(&[path]).unwrap_or_else(|err| {
                warn!(root = %snapshot.root().display(), "workspace cleanup skipped: {err}");
                SweepReport::default()
            }),
            None => SweepReport::default(),
        };
        saved?;
        if !sweep.removed.is_empty() {
            info!(count = sweep.removed.len(), "scratch entries removed");
        }
        Ok(SavedArtifact {
            path: path.to_path_buf(),
            removed: sweep.removed,
            leftover: sweep.leftover.into_iter().map(|(p, _)| p).collect(),
            failed_rows: artifact.meta.failed_rows.clone(),
            design_fingerprint: artifact.meta.design_fingerprint.clone(),
        })
    }
}

/// Assemble and persist without a workspace snapshot.
pub fn assemble_and_save(
    problem: ProblemSpec,
    design: DesignMatrix,
    results: Vec<RowOutcome>,
    metadata: RunMetadata,
    path: &Path,
) -> ResultsResult<SavedArtifact> {
    ArtifactAssembler::without_cleanup().finish(problem, design, results, metadata, path)
}
