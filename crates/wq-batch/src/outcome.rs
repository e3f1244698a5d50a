//! Per-row outcomes, failure markers and the batch report.

use serde::{Deserialize, Serialize};
use std::fmt;
use wq_model::QualityResults;

/// What happens when a row fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record a failure marker at the row's index and keep going.
    #[default]
    Continue,
    /// End the batch at the first failure, reporting its row index.
    Abort,
}

/// Why a row has no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFailure {
    /// The solver rejected or failed the run.
    Solver { message: String },
    /// The row itself could not be applied to the model.
    InvalidRow { message: String },
    /// The evaluator panicked.
    Panicked { message: String },
    /// The row exceeded the per-row timeout; its worker was replaced.
    TimedOut { after_s: f64 },
    /// The worker died while evaluating the row on every attempt.
    WorkerLost { attempts: u32, message: String },
}

impl RowFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            RowFailure::Solver { .. } => "solver",
            RowFailure::InvalidRow { .. } => "invalid_row",
            RowFailure::Panicked { .. } => "panicked",
            RowFailure::TimedOut { .. } => "timed_out",
            RowFailure::WorkerLost { .. } => "worker_lost",
        }
    }
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowFailure::Solver { message }
            | RowFailure::InvalidRow { message }
            | RowFailure::Panicked { message } => write!(f, "{}: {message}", self.kind()),
            RowFailure::TimedOut { after_s } => write!(f, "timed_out after {after_s:.1} s"),
            RowFailure::WorkerLost { attempts, message } => {
                write!(f, "worker_lost after {attempts} attempt(s): {message}")
            }
        }
    }
}

/// Result slot for one design row.
///
/// Serialized untagged: a completed row is the bare result mapping, a failed
/// row is `{ "failure": { "kind": ..., ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowOutcome {
    Failed { failure: RowFailure },
    Completed(QualityResults),
}

impl RowOutcome {
    pub fn failed(failure: RowFailure) -> Self {
        RowOutcome::Failed { failure }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RowOutcome::Failed { .. })
    }

    pub fn results(&self) -> Option<&QualityResults> {
        match self {
            RowOutcome::Completed(results) => Some(results),
            RowOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&RowFailure> {
        match self {
            RowOutcome::Failed { failure } => Some(failure),
            RowOutcome::Completed(_) => None,
        }
    }
}

/// Everything a finished batch hands back, outcomes in row order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<RowOutcome>,
    pub worker_count: usize,
    pub respawns: usize,
    pub elapsed_s: f64,
}

impl BatchReport {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_failed())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &RowFailure)> + '_ {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.failure().map(|f| (i, f)))
    }

    pub fn completed(&self) -> usize {
        self.outcomes.len() - self.failures().count()
    }
}
