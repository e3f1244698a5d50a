//! Query helpers over saved run artifacts.

use serde::Serialize;
use std::str::FromStr;
use tracing::warn;
use wq_design::{MorrisIndices, analyze};
use wq_model::{EntityKind, EntityTrace};
use wq_results::RunArtifact;

use crate::error::{AppError, AppResult};

/// Summary of an artifact's problem and results.
#[derive(Debug, Clone)]
pub struct ArtifactSummary {
    pub study_name: Option<String>,
    pub created_at: String,
    pub variables: Vec<String>,
    pub bounds: Vec<(f64, f64)>,
    pub rows: usize,
    pub failed_rows: Vec<usize>,
    pub trajectories: usize,
    pub seed: u64,
    pub node_count: usize,
    pub link_count: usize,
    pub design_fingerprint: String,
}

pub fn summarize(artifact: &RunArtifact) -> ArtifactSummary {
    let first = artifact.results.iter().find_map(|o| o.results());
    let node_count = artifact
        .nodes
        .as_ref()
        .map(Vec::len)
        .or_else(|| first.map(|r| r.node.len()))
        .unwrap_or(0);
    let link_count = artifact
        .links
        .as_ref()
        .map(Vec::len)
        .or_else(|| first.map(|r| r.link.len()))
        .unwrap_or(0);
    ArtifactSummary {
        study_name: artifact.meta.study_name.clone(),
        created_at: artifact.meta.created_at.clone(),
        variables: artifact.problem.names().to_vec(),
        bounds: artifact.problem.bounds().to_vec(),
        rows: artifact.param_values.rows(),
        failed_rows: artifact.failed_rows().to_vec(),
        trajectories: artifact.meta.trajectories,
        seed: artifact.meta.seed,
        node_count,
        link_count,
        design_fingerprint: artifact.meta.design_fingerprint.clone(),
    }
}

/// How a species time series collapses to one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    #[default]
    Final,
    Mean,
    Max,
}

impl Reduction {
    pub fn apply(self, series: &[f64]) -> Option<f64> {
        let last = *series.last()?;
        Some(match self {
            Reduction::Final => last,
            Reduction::Mean => series.iter().sum::<f64>() / series.len() as f64,
            Reduction::Max => series.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

impl FromStr for Reduction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "final" => Ok(Reduction::Final),
            "mean" => Ok(Reduction::Mean),
            "max" => Ok(Reduction::Max),
            other => Err(AppError::InvalidInput(format!(
                "unknown reduction '{other}' (expected final, mean or max)"
            ))),
        }
    }
}

/// One scalar output per row: a species at an entity, reduced over time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSelector {
    pub kind: EntityKind,
    pub entity: String,
    pub species: String,
    pub reduction: Reduction,
}

/// Per-row series of one species at one entity; `None` for failed rows.
fn row_series(
    artifact: &RunArtifact,
    kind: EntityKind,
    entity: &str,
    species: &str,
) -> AppResult<Vec<Option<Vec<f64>>>> {
    let mut rows = Vec::with_capacity(artifact.results.len());
    for (index, outcome) in artifact.results.iter().enumerate() {
        let Some(results) = outcome.results() else {
            rows.push(None);
            continue;
        };
        let trace = results.trace(kind, entity).ok_or_else(|| {
            AppError::InvalidInput(format!("row {index} has no {kind} '{entity}'"))
        })?;
        let series = trace.species_series(species).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "row {index} has no species '{species}' at {kind} '{entity}'"
            ))
        })?;
        rows.push(Some(series));
    }
    Ok(rows)
}

/// First completed row's trace for `entity`, the source of time and age axes.
fn reference_trace<'a>(
    artifact: &'a RunArtifact,
    kind: EntityKind,
    entity: &str,
) -> Option<&'a EntityTrace> {
    artifact
        .results
        .iter()
        .find_map(|o| o.results())
        .and_then(|r| r.trace(kind, entity))
}

/// Per-row metric values; `None` for failed rows and empty series.
pub fn extract_metric(artifact: &RunArtifact, selector: &MetricSelector) -> AppResult<Vec<Option<f64>>> {
    let rows = row_series(artifact, selector.kind, &selector.entity, &selector.species)?;
    Ok(rows
        .into_iter()
        .map(|series| series.and_then(|s| selector.reduction.apply(&s)))
        .collect())
}

fn warn_skipped(indices: &MorrisIndices) {
    if indices.trajectories_skipped > 0 {
        warn!(
            skipped = indices.trajectories_skipped,
            used = indices.trajectories_used,
            "trajectories with failed rows left out of the screening"
        );
    }
}

/// Morris screening of the selected metric.
pub fn screen(artifact: &RunArtifact, selector: &MetricSelector) -> AppResult<MorrisIndices> {
    let outputs = extract_metric(artifact, selector)?;
    let indices = analyze(&artifact.problem, &artifact.param_values, &outputs)?;
    warn_skipped(&indices);
    Ok(indices)
}

/// Morris indices of one species at one entity at every reporting time.
#[derive(Debug, Clone, Serialize)]
pub struct TimeScreening {
    pub entity: String,
    pub species: String,
    pub names: Vec<String>,
    pub time_s: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_h: Option<Vec<f64>>,
    pub steps: Vec<MorrisIndices>,
}

impl TimeScreening {
    /// Per-variable mean of `mu_star` over reporting times, skipping `NaN`.
    pub fn mean_mu_star(&self) -> Vec<f64> {
        self.mean_over_steps(|step| &step.mu_star)
    }

    pub fn mean_sigma(&self) -> Vec<f64> {
        self.mean_over_steps(|step| &step.sigma)
    }

    fn mean_over_steps<F>(&self, field: F) -> Vec<f64>
    where
        F: Fn(&MorrisIndices) -> &Vec<f64>,
    {
        (0..self.names.len())
            .map(|v| {
                let finite: Vec<f64> = self
                    .steps
                    .iter()
                    .map(|step| field(step)[v])
                    .filter(|x| x.is_finite())
                    .collect();
                if finite.is_empty() {
                    f64::NAN
                } else {
                    finite.iter().sum::<f64>() / finite.len() as f64
                }
            })
            .collect()
    }
}

/// Screen `species` at `entity` separately at each reporting time.
pub fn screen_over_time(
    artifact: &RunArtifact,
    kind: EntityKind,
    entity: &str,
    species: &str,
) -> AppResult<TimeScreening> {
    let rows = row_series(artifact, kind, entity, species)?;
    let reference = reference_trace(artifact, kind, entity).ok_or_else(|| {
        AppError::InvalidInput("artifact has no completed rows to screen".to_string())
    })?;
    let time_s = reference.time_axis();

    let mut steps = Vec::with_capacity(time_s.len());
    for t in 0..time_s.len() {
        let outputs: Vec<Option<f64>> = rows
            .iter()
            .map(|series| series.as_ref().and_then(|s| s.get(t).copied()))
            .collect();
        steps.push(analyze(&artifact.problem, &artifact.param_values, &outputs)?);
    }
    if let Some(first) = steps.first() {
        warn_skipped(first);
    }
    Ok(TimeScreening {
        entity: entity.to_string(),
        species: species.to_string(),
        names: artifact.problem.names().to_vec(),
        time_s,
        age_h: reference.age_axis(),
        steps,
    })
}

/// Time-averaged indices for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityScreening {
    pub entity: String,
    pub mean_mu_star: Vec<f64>,
    pub mean_sigma: Vec<f64>,
}

/// Time-averaged screening of `species` at every entity of `kind`.
pub fn screen_entities(
    artifact: &RunArtifact,
    kind: EntityKind,
    species: &str,
) -> AppResult<Vec<EntityScreening>> {
    let first = artifact
        .results
        .iter()
        .find_map(|o| o.results())
        .ok_or_else(|| {
            AppError::InvalidInput("artifact has no completed rows to screen".to_string())
        })?;
    first
        .entities(kind)
        .keys()
        .map(|entity| {
            let over_time = screen_over_time(artifact, kind, entity, species)?;
            Ok(EntityScreening {
                entity: entity.clone(),
                mean_mu_star: over_time.mean_mu_star(),
                mean_sigma: over_time.mean_sigma(),
            })
        })
        .collect()
}
