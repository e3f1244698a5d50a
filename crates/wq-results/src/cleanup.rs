//! Scratch-file cleanup by before/after directory snapshot.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::ResultsResult;

/// Top-level listing of a directory at one point in time.
#[derive(Debug, Clone)]
pub struct WorkspaceSnapshot {
    root: PathBuf,
    entries: BTreeSet<OsString>,
}

/// Outcome of a best-effort sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    /// New entries that could not be removed, with the reason.
    pub leftover: Vec<(PathBuf, String)>,
}

impl WorkspaceSnapshot {
    pub fn capture(root: &Path) -> ResultsResult<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            entries: list(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entries present now that were not present at capture time.
    pub fn new_entries(&self) -> ResultsResult<Vec<PathBuf>> {
        Ok(list(&self.root)?
            .into_iter()
            .filter(|name| !self.entries.contains(name))
            .map(|name| self.root.join(name))
            .collect())
    }

    /// Remove every new entry except `keep` and the directories holding it.
    ///
    /// A failed removal is logged and reported, never fatal; only failing to
    /// list the root is an error.
    pub fn sweep(&self, keep: &[&Path]) -> ResultsResult<SweepReport> {
        self.sweep_with(keep, remove_entry)
    }

    fn sweep_with<F>(&self, keep: &[&Path], mut remove: F) -> ResultsResult<SweepReport>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let keep: Vec<PathBuf> = keep.iter().filter_map(|p| fs::canonicalize(p).ok()).collect();
        let mut report = SweepReport::default();
        for path in self.new_entries()? {
            let kept = fs::canonicalize(&path)
                .map(|c| keep.iter().any(|k| k.starts_with(&c)))
                .unwrap_or(false);
            if kept {
                continue;
            }
            match remove(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "scratch entry removed");
                    report.removed.push(path);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "scratch entry left behind");
                    report.leftover.push((path, err.to_string()));
                }
            }
        }
        Ok(report)
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn list(root: &Path) -> ResultsResult<BTreeSet<OsString>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(root)? {
        names.insert(entry?.file_name());
    }
    Ok(names)
}
