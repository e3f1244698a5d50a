//! Run execution service.
//!
//! One study run: snapshot the workspace, read the baseline, build the
//! problem, sample the design, evaluate every row across the worker pool
//! and persist the artifact. Stage events go to an optional callback.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use wq_batch::{
    BatchOptions, BatchProgress, BatchReport, ModelEvaluator, ModelEvaluatorFactory,
    ProcessSpawner, RowFailure, ThreadSpawner, WorkerLauncher, WorkerSetup, WorkerSpawner,
    run_all,
};
use wq_core::Stopwatch;
use wq_design::{DesignMatrix, build_problem, problem_variable_names, sample_with};
use wq_model::BatchReactor;
use wq_results::{ArtifactAssembler, RunMetadata};
use wq_study::BackendDef;

use crate::compile;
use crate::error::AppResult;
use crate::progress::{RunProgressEvent, RunStage};
use crate::study_service::{self, LoadedStudy};

/// Command-line overrides of the study's execution settings.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub workers: Option<usize>,
    pub backend: Option<BackendDef>,
    pub output_path: Option<PathBuf>,
}

/// Request to execute a study.
pub struct RunRequest<'a> {
    pub study_path: &'a Path,
    pub overrides: RunOverrides,
    /// Command that starts a worker process; defaults to this executable
    /// re-invoked as `worker`.
    pub launcher: Option<WorkerLauncher>,
    /// Directory snapshotted for scratch cleanup; defaults to the study directory.
    pub workspace: Option<PathBuf>,
}

impl<'a> RunRequest<'a> {
    pub fn new(study_path: &'a Path) -> Self {
        Self {
            study_path,
            overrides: RunOverrides::default(),
            launcher: None,
            workspace: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunTimingSummary {
    pub load_time_s: f64,
    pub baseline_time_s: f64,
    pub problem_time_s: f64,
    pub sample_time_s: f64,
    pub evaluate_time_s: f64,
    pub save_time_s: f64,
    pub total_time_s: f64,
}

#[derive(Debug, Clone)]
pub struct RunResponse {
    pub artifact_path: PathBuf,
    pub study_name: String,
    pub variables: Vec<String>,
    pub rows: usize,
    pub failures: Vec<(usize, RowFailure)>,
    pub worker_count: usize,
    pub respawns: usize,
    pub backend: &'static str,
    pub removed: Vec<PathBuf>,
    /// Scratch entries that could not be removed.
    pub leftover: Vec<PathBuf>,
    pub design_fingerprint: String,
    pub timing: RunTimingSummary,
}

impl RunResponse {
    pub fn failed_rows(&self) -> Vec<usize> {
        self.failures.iter().map(|(i, _)| *i).collect()
    }
}

type ProgressCallback<'a> = Option<&'a mut dyn FnMut(RunProgressEvent)>;

fn emit_progress(
    progress_cb: &mut ProgressCallback<'_>,
    stage: RunStage,
    clock: &Stopwatch,
    message: Option<String>,
    batch: Option<BatchProgress>,
) {
    if let Some(cb) = progress_cb.as_deref_mut() {
        cb(RunProgressEvent {
            stage,
            elapsed_wall_s: clock.elapsed_s(),
            message,
            batch,
        });
    }
}

/// Execute a study end to end.
pub fn run_study(
    request: &RunRequest,
    mut progress_cb: ProgressCallback<'_>,
) -> AppResult<RunResponse> {
    let mut clock = Stopwatch::start();
    let mut timing = RunTimingSummary::default();

    emit_progress(
        &mut progress_cb,
        RunStage::LoadingStudy,
        &clock,
        Some(format!("Loading {}", request.study_path.display())),
        None,
    );
    let study = study_service::validate_study_file(request.study_path)?;
    // Bound problems are configuration errors; report them before any model opens.
    let rule = compile::bound_rule(&study)?;
    let proxy = study.config.proxy.transform();
    rule.check_covers(&problem_variable_names(
        &study.config.constants_vary,
        &study.config.species_vary,
        proxy.as_ref(),
    )?)?;
    let artifact_path = study.output_path(request.overrides.output_path.as_deref())?;
    let workspace = match &request.workspace {
        Some(dir) => dir.clone(),
        None => study.base_dir.clone(),
    };
    let assembler = ArtifactAssembler::begin(&workspace)?;
    let eval_config = compile::evaluation_config(&study);
    timing.load_time_s = clock.lap("load");

    emit_progress(
        &mut progress_cb,
        RunStage::ReadingBaseline,
        &clock,
        Some(format!("Opening {}", eval_config.network_file.display())),
        None,
    );
    let baseline = {
        let scratch = tempfile::Builder::new()
            .prefix("wq-baseline-")
            .tempdir_in(&workspace)?;
        let mut evaluator =
            ModelEvaluator::open(BatchReactor::new(), eval_config.clone(), scratch.path())?;
        let baseline = evaluator.baseline()?;
        evaluator.close()?;
        baseline
    };
    timing.baseline_time_s = clock.lap("baseline");

    emit_progress(&mut progress_cb, RunStage::BuildingProblem, &clock, None, None);
    let problem = build_problem(
        &study.config.constants_vary,
        &study.config.species_vary,
        &baseline.constants,
        &baseline.concentrations,
        &rule,
        proxy.as_ref(),
    )?;
    timing.problem_time_s = clock.lap("problem");

    emit_progress(
        &mut progress_cb,
        RunStage::SamplingDesign,
        &clock,
        Some(format!(
            "{} variables, {} of {} trajectories",
            problem.num_vars(),
            study.config.trajectories,
            study.config.total_samples
        )),
        None,
    );
    let design = sample_with(
        &problem,
        study.config.total_samples,
        &compile::sample_options(&study),
        study.config.seed,
    )?;
    timing.sample_time_s = clock.lap("sample");

    let options = compile::batch_options(&study.config.execution, request.overrides.workers);
    let backend = request
        .overrides
        .backend
        .unwrap_or(study.config.execution.backend);
    let report = match backend {
        BackendDef::Thread => {
            let factory = ModelEvaluatorFactory::new(eval_config, BatchReactor::new)
                .with_independent_instances(true);
            let spawner = ThreadSpawner::new(factory)?.with_scratch_root(&workspace);
            evaluate(&design, &spawner, &options, &mut progress_cb, &clock)?
        }
        BackendDef::Process => {
            let launcher = match &request.launcher {
                Some(launcher) => launcher.clone(),
                None => WorkerLauncher::current_exe(vec!["worker".to_string()])?,
            };
            let setup = WorkerSetup {
                evaluation: eval_config,
            };
            let spawner = ProcessSpawner::new(launcher, setup).with_scratch_root(&workspace);
            evaluate(&design, &spawner, &options, &mut progress_cb, &clock)?
        }
    };
    timing.evaluate_time_s = clock.lap("evaluate");
    let backend_label = match backend {
        BackendDef::Thread => "thread",
        BackendDef::Process => "process",
    };
    let failures: Vec<(usize, RowFailure)> =
        report.failures().map(|(i, f)| (i, f.clone())).collect();
    for (index, failure) in &failures {
        warn!(row = index, kind = failure.kind(), "{failure}");
    }

    emit_progress(&mut progress_cb, RunStage::AssemblingArtifact, &clock, None, None);
    let metadata = run_metadata(&study, &baseline, clock.elapsed_s());
    let variables = problem.names().to_vec();
    let rows = design.rows();

    emit_progress(
        &mut progress_cb,
        RunStage::SavingArtifact,
        &clock,
        Some(format!("Writing {}", artifact_path.display())),
        None,
    );
    let saved = assembler.finish(problem, design, report.outcomes, metadata, &artifact_path)?;
    timing.save_time_s = clock.lap("save");
    timing.total_time_s = clock.elapsed_s();

    info!(
        path = %saved.path.display(),
        rows,
        failed = failures.len(),
        elapsed_s = timing.total_time_s,
        "study run finished"
    );
    emit_progress(&mut progress_cb, RunStage::Completed, &clock, None, None);

    Ok(RunResponse {
        artifact_path: saved.path,
        study_name: study.name(),
        variables,
        rows,
        failures,
        worker_count: report.worker_count,
        respawns: report.respawns,
        backend: backend_label,
        removed: saved.removed,
        leftover: saved.leftover,
        design_fingerprint: saved.design_fingerprint,
        timing,
    })
}

fn evaluate<S: WorkerSpawner>(
    design: &DesignMatrix,
    spawner: &S,
    options: &BatchOptions,
    progress_cb: &mut ProgressCallback<'_>,
    clock: &Stopwatch,
) -> AppResult<BatchReport> {
    emit_progress(
        progress_cb,
        RunStage::EvaluatingRows,
        clock,
        Some(format!("{} rows on {} workers", design.rows(), spawner.backend())),
        None,
    );
    let mut forward = |batch: &BatchProgress| {
        emit_progress(
            progress_cb,
            RunStage::EvaluatingRows,
            clock,
            None,
            Some(batch.clone()),
        );
    };
    let forward: &mut dyn FnMut(&BatchProgress) = &mut forward;
    Ok(run_all(design, spawner, options, Some(forward))?)
}

fn run_metadata(study: &LoadedStudy, baseline: &wq_batch::Baseline, elapsed_s: f64) -> RunMetadata {
    let config = &study.config;
    RunMetadata {
        study_name: Some(study.name()),
        constants_vary: config.constants_vary.clone(),
        species_vary: config.species_vary.clone(),
        seed: config.seed,
        trajectories: config.trajectories,
        total_samples: config.total_samples,
        num_levels: config.num_levels,
        nodes: Some(baseline.node_ids.clone()),
        links: Some(baseline.link_ids.clone()),
        base_demands: Some(baseline.base_demands.clone()),
        inp_file: Some(config.network_file.to_string_lossy().into_owned()),
        elapsed_s,
    }
}
