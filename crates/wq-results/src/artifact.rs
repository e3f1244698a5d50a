//! The persisted run artifact.
//!
//! Field names are the contract with downstream statistics: `problem`,
//! `param_values`, `results`, `constants_vary`, `species_vary` and the
//! optional baseline extras. `results[i]` belongs to `param_values[i]`.

use serde::{Deserialize, Serialize};
use wq_batch::RowOutcome;
use wq_design::{DesignMatrix, ProblemSpec};

use crate::hash::design_fingerprint;
use crate::{ResultsError, ResultsResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub problem: ProblemSpec,
    pub param_values: DesignMatrix,
    pub results: Vec<RowOutcome>,
    pub constants_vary: Vec<String>,
    pub species_vary: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_demands: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inp_file: Option<String>,
    pub meta: ArtifactMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// RFC 3339, UTC.
    pub created_at: String,
    pub tool_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_name: Option<String>,
    pub seed: u64,
    pub trajectories: usize,
    pub total_samples: usize,
    pub num_levels: usize,
    pub design_fingerprint: String,
    pub failed_rows: Vec<usize>,
    pub elapsed_s: f64,
}

/// Run facts the assembler cannot derive from problem, design and results.
#[derive(Debug, Clone, Default)]
pub struct RunMetadata {
    pub study_name: Option<String>,
    pub constants_vary: Vec<String>,
    pub species_vary: Vec<String>,
    pub seed: u64,
    pub trajectories: usize,
    pub total_samples: usize,
    pub num_levels: usize,
    pub nodes: Option<Vec<String>>,
    pub links: Option<Vec<String>>,
    pub base_demands: Option<Vec<f64>>,
    pub inp_file: Option<String>,
    pub elapsed_s: f64,
}

impl RunArtifact {
    pub fn assemble(
        problem: ProblemSpec,
        design: DesignMatrix,
        results: Vec<RowOutcome>,
        metadata: RunMetadata,
    ) -> ResultsResult<Self> {
        let failed_rows = results
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_failed())
            .map(|(i, _)| i)
            .collect();
        let meta = ArtifactMeta {
            created_at: chrono::Utc::now().to_rfc3339(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            study_name: metadata.study_name,
            seed: metadata.seed,
            trajectories: metadata.trajectories,
            total_samples: metadata.total_samples,
            num_levels: metadata.num_levels,
            design_fingerprint: design_fingerprint(&problem, &design),
            failed_rows,
            elapsed_s: metadata.elapsed_s,
        };
        let artifact = Self {
            problem,
            param_values: design,
            results,
            constants_vary: metadata.constants_vary,
            species_vary: metadata.species_vary,
            nodes: metadata.nodes,
            links: metadata.links,
            base_demands: metadata.base_demands,
            inp_file: metadata.inp_file,
            meta,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Structural checks shared by assembly and loading.
    pub fn validate(&self) -> ResultsResult<()> {
        let (rows, cols) = self.param_values.shape();
        if rows > 0 && cols != self.problem.num_vars() {
            return Err(ResultsError::Invalid(format!(
                "param_values has {cols} columns but the problem has {} variables",
                self.problem.num_vars()
            )));
        }
        if self.results.len() != rows {
            return Err(ResultsError::Invalid(format!(
                "{} results for {rows} parameter rows",
                self.results.len()
            )));
        }
        if let (Some(nodes), Some(demands)) = (&self.nodes, &self.base_demands) {
            if nodes.len() != demands.len() {
                return Err(ResultsError::Invalid(format!(
                    "{} nodes but {} base demands",
                    nodes.len(),
                    demands.len()
                )));
            }
        }
        if let Some(&bad) = self.meta.failed_rows.iter().find(|&&i| i >= rows) {
            return Err(ResultsError::Invalid(format!(
                "failed row index {bad} out of range"
            )));
        }
        Ok(())
    }

    pub fn failed_rows(&self) -> &[usize] {
        &self.meta.failed_rows
    }
}
