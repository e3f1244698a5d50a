//! Evaluation of one design row against a model binding.

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use tracing::debug;
use wq_core::ensure_same_len;
use wq_design::{ProxySpec, ProxyTransform};
use wq_model::{ModelBinding, QualityRequest, QualityResults};

use crate::error::EvalError;
use crate::outcome::{RowFailure, RowOutcome};

/// Everything a worker needs to open its own model instance.
///
/// Shipped to worker processes verbatim, so paths should be absolute;
/// `report_file` is resolved against the worker's scratch directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub network_file: PathBuf,
    pub reaction_file: PathBuf,
    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,
    /// Simulation horizon, seconds.
    pub duration_s: f64,
    /// Entity whose initial concentrations are varied.
    pub reference_entity: String,
    pub constants_vary: Vec<String>,
    pub species_vary: Vec<String>,
    #[serde(default)]
    pub proxy: ProxySpec,
    /// Re-solve hydraulics before every run.
    #[serde(default)]
    pub resolve_hydraulics: bool,
    #[serde(default)]
    pub quality: QualityRequest,
}

fn default_report_file() -> PathBuf {
    PathBuf::from("model.rpt")
}

/// Maps one design row to one simulation result.
pub trait Evaluator {
    fn evaluate(&mut self, row: &[f64]) -> Result<QualityResults, EvalError>;
}

/// Builds evaluators inside workers.
pub trait EvaluatorFactory: Send + Sync + 'static {
    type Evaluator: Evaluator;

    /// A fresh evaluator whose scratch files live under `workdir`.
    fn create(&self, workdir: &Path) -> Result<Self::Evaluator, EvalError>;

    /// True when separately created evaluators share no process-global
    /// state and may therefore run on threads of one process.
    fn independent_instances(&self) -> bool {
        false
    }
}

/// Baseline model state read before sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub constants: Vec<f64>,
    pub concentrations: Vec<f64>,
    pub node_ids: Vec<String>,
    pub link_ids: Vec<String>,
    pub base_demands: Vec<f64>,
}

/// [`Evaluator`] over a [`ModelBinding`] opened from an [`EvaluationConfig`].
pub struct ModelEvaluator<B: ModelBinding> {
    binding: B,
    config: EvaluationConfig,
    proxy: Box<dyn ProxyTransform>,
    width: usize,
    closed: bool,
}

impl<B: ModelBinding> ModelEvaluator<B> {
    /// Open network and scheme, set the horizon and solve hydraulics once.
    pub fn open(mut binding: B, config: EvaluationConfig, workdir: &Path) -> Result<Self, EvalError> {
        let report = workdir.join(&config.report_file);
        binding.open(&config.network_file, &report)?;
        binding.open_reaction_scheme(&config.reaction_file)?;
        binding.set_time_horizon(config.duration_s)?;
        binding.solve_hydraulics()?;

        let proxy = config.proxy.transform();
        let width = config.constants_vary.len() + proxy.proxy_len(&config.species_vary)?;
        debug!(
            network = %config.network_file.display(),
            proxy = proxy.name(),
            width,
            "model evaluator opened"
        );
        Ok(Self {
            binding,
            config,
            proxy,
            width,
            closed: false,
        })
    }

    /// Number of values a row must carry.
    pub fn row_width(&self) -> usize {
        self.width
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub fn baseline(&self) -> Result<Baseline, EvalError> {
        let constants = self.binding.get_constants(&self.config.constants_vary)?;
        let concentrations = self
            .binding
            .get_initial_concentration(&self.config.reference_entity, &self.config.species_vary)?;
        Ok(Baseline {
            constants,
            concentrations,
            node_ids: self.binding.node_ids()?,
            link_ids: self.binding.link_ids()?,
            base_demands: self.binding.base_demands()?,
        })
    }

    pub fn close(&mut self) -> Result<(), EvalError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.binding.close_reaction_scheme()?;
        self.binding.close()?;
        Ok(())
    }
}

impl<B: ModelBinding> Evaluator for ModelEvaluator<B> {
    fn evaluate(&mut self, row: &[f64]) -> Result<QualityResults, EvalError> {
        ensure_same_len("design row", self.width, row.len())?;
        let cfg = &self.config;
        let (constants, species) = row.split_at(cfg.constants_vary.len());

        let native = self.proxy.to_native(&cfg.species_vary, species)?;
        self.binding
            .set_initial_concentration(&cfg.reference_entity, &cfg.species_vary, &native)?;
        self.binding.set_constants(&cfg.constants_vary, constants)?;
        if cfg.resolve_hydraulics {
            self.binding.solve_hydraulics()?;
        }
        Ok(self.binding.run_quality_simulation(&cfg.quality)?)
    }
}

impl<B: ModelBinding> Drop for ModelEvaluator<B> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "closing model evaluator failed");
        }
    }
}

/// [`EvaluatorFactory`] producing [`ModelEvaluator`]s over fresh bindings.
pub struct ModelEvaluatorFactory<B> {
    config: EvaluationConfig,
    make: fn() -> B,
    independent: bool,
}

impl<B: ModelBinding + 'static> ModelEvaluatorFactory<B> {
    pub fn new(config: EvaluationConfig, make: fn() -> B) -> Self {
        Self {
            config,
            make,
            independent: false,
        }
    }

    /// Declare that bindings of type `B` hold no process-global state.
    pub fn with_independent_instances(mut self, independent: bool) -> Self {
        self.independent = independent;
        self
    }
}

impl<B: ModelBinding + 'static> EvaluatorFactory for ModelEvaluatorFactory<B> {
    type Evaluator = ModelEvaluator<B>;

    fn create(&self, workdir: &Path) -> Result<Self::Evaluator, EvalError> {
        ModelEvaluator::open((self.make)(), self.config.clone(), workdir)
    }

    fn independent_instances(&self) -> bool {
        self.independent
    }
}

/// Evaluate one row, turning errors and panics into failure markers.
/// The flag is true when the evaluator panicked and should be rebuilt.
pub(crate) fn evaluate_guarded<E: Evaluator>(evaluator: &mut E, row: &[f64]) -> (RowOutcome, bool) {
    match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(row))) {
        Ok(Ok(results)) => (RowOutcome::Completed(results), false),
        Ok(Err(err)) => (RowOutcome::failed(err.to_failure()), false),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "evaluator panicked".to_string());
            (RowOutcome::failed(RowFailure::Panicked { message }), true)
        }
    }
}
