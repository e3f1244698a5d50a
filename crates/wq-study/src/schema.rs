//! Study schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wq_batch::FailurePolicy;
use wq_design::ProxySpec;
use wq_model::ResultLayout;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudyConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optimal trajectories kept from the pool.
    pub trajectories: usize,
    /// Size of the trajectory pool the optimal subset is drawn from.
    #[serde(default = "default_total_samples")]
    pub total_samples: usize,
    #[serde(default = "default_num_levels")]
    pub num_levels: usize,
    pub seed: u64,
    /// Simulation horizon.
    pub days: f64,
    pub network_file: PathBuf,
    pub reaction_file: PathBuf,
    /// Entity whose initial concentrations are read as the species baseline.
    pub reference_entity: String,
    #[serde(default)]
    pub constants_vary: Vec<String>,
    #[serde(default)]
    pub species_vary: Vec<String>,
    pub bound_source: BoundSourceDef,
    #[serde(default)]
    pub proxy: ProxySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub quality: QualityDef,
    #[serde(default)]
    pub execution: ExecutionDef,
}

fn default_version() -> u32 {
    crate::LATEST_VERSION
}

fn default_total_samples() -> usize {
    1000
}

fn default_num_levels() -> usize {
    wq_design::DEFAULT_NUM_LEVELS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundSourceDef {
    /// Headerless `name,percent` CSV.
    Table { path: PathBuf },
    /// `[low · baseline, high · baseline]` for every variable.
    Factor { low: f64, high: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityDef {
    #[serde(default)]
    pub layout: ResultLayout,
    /// Reporting starts on this day of the horizon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_start_day: Option<f64>,
    #[serde(default = "default_true")]
    pub include_links: bool,
    #[serde(default)]
    pub include_age: bool,
}

impl Default for QualityDef {
    fn default() -> Self {
        Self {
            layout: ResultLayout::BySpecies,
            report_start_day: None,
            include_links: true,
            include_age: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendDef {
    /// One OS process per worker.
    #[default]
    Process,
    /// In-process worker threads; needs a model binding without shared state.
    Thread,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default = "default_worker_fraction")]
    pub worker_fraction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_timeout_s: Option<f64>,
    /// How long a worker may take to open the model before it is replaced.
    #[serde(default = "default_setup_timeout_s")]
    pub setup_timeout_s: f64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_max_row_retries")]
    pub max_row_retries: u32,
    #[serde(default)]
    pub backend: BackendDef,
    #[serde(default)]
    pub resolve_hydraulics: bool,
}

impl Default for ExecutionDef {
    fn default() -> Self {
        Self {
            workers: None,
            worker_fraction: default_worker_fraction(),
            row_timeout_s: None,
            setup_timeout_s: default_setup_timeout_s(),
            failure_policy: FailurePolicy::Continue,
            max_row_retries: default_max_row_retries(),
            backend: BackendDef::Process,
            resolve_hydraulics: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_worker_fraction() -> f64 {
    wq_batch::DEFAULT_WORKER_FRACTION
}

fn default_setup_timeout_s() -> f64 {
    wq_batch::DEFAULT_SETUP_TIMEOUT.as_secs_f64()
}

fn default_max_row_retries() -> u32 {
    1
}

impl StudyConfig {
    pub fn duration_s(&self) -> f64 {
        self.days * 86_400.0
    }

    /// `<network stem>_morris.json` next to the study when no output is given.
    pub fn default_output_name(&self) -> String {
        let stem = self
            .network_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "study".to_string());
        format!("{stem}_morris.json")
    }
}
