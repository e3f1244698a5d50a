//! The model binding contract.

use std::path::Path;

use crate::error::ModelResult;
use crate::types::{QualityRequest, QualityResults};

/// Thin binding over a hydraulic/water-quality solver.
///
/// A binding owns mutable solver state (the open network, loaded reaction
/// scheme, current constants and initial concentrations). Instances are never
/// shared: every batch worker opens its own.
pub trait ModelBinding {
    /// Open a network definition, directing the solver report to `report_file`.
    fn open(&mut self, network_file: &Path, report_file: &Path) -> ModelResult<()>;

    fn close(&mut self) -> ModelResult<()>;

    fn open_reaction_scheme(&mut self, scheme_file: &Path) -> ModelResult<()>;

    fn close_reaction_scheme(&mut self) -> ModelResult<()>;

    /// Simulation duration in seconds.
    fn set_time_horizon(&mut self, seconds: f64) -> ModelResult<()>;

    fn solve_hydraulics(&mut self) -> ModelResult<()>;

    fn get_constants(&self, names: &[String]) -> ModelResult<Vec<f64>>;

    fn set_constants(&mut self, names: &[String], values: &[f64]) -> ModelResult<()>;

    fn get_initial_concentration(&self, entity_id: &str, species: &[String])
        -> ModelResult<Vec<f64>>;

    fn set_initial_concentration(
        &mut self,
        entity_id: &str,
        species: &[String],
        values: &[f64],
    ) -> ModelResult<()>;

    fn run_quality_simulation(&mut self, request: &QualityRequest) -> ModelResult<QualityResults>;

    fn node_ids(&self) -> ModelResult<Vec<String>>;

    fn link_ids(&self) -> ModelResult<Vec<String>>;

    /// Base demand per node, aligned with [`ModelBinding::node_ids`].
    fn base_demands(&self) -> ModelResult<Vec<f64>>;
}
