use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wq_app::{
    AppError, AppResult, MetricSelector, Reduction, RunOverrides, RunProgressEvent, RunRequest,
    RunResponse, RunStage, RunTimingSummary, query, run_service, study_service,
};
use wq_batch::{ModelEvaluator, serve};
use wq_model::{BatchReactor, EntityKind};
use wq_study::BackendDef;

/// Exit status when the run finished but some rows failed.
const EXIT_ROWS_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "wq-cli")]
#[command(about = "Morris sensitivity studies for water-quality models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a study file and the files it references
    Validate {
        /// Path to the study YAML file
        study_path: PathBuf,
    },
    /// Sample the design, evaluate every row and save the artifact
    Run {
        /// Path to the study YAML file
        study_path: PathBuf,
        /// Number of workers (defaults to a fraction of the available cores)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Evaluate rows on threads of this process instead of worker processes
        #[arg(long)]
        in_process: bool,
        /// Artifact path (overrides the study's output_path)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Do not draw the progress line
        #[arg(long)]
        quiet: bool,
    },
    /// Summarize a saved artifact
    Inspect {
        /// Path to the artifact JSON file
        artifact_path: PathBuf,
    },
    /// Morris screening of one output metric in a saved artifact
    Screen {
        /// Path to the artifact JSON file
        artifact_path: PathBuf,
        /// Entity kind: node or link
        #[arg(long, default_value = "node")]
        kind: EntityKind,
        /// Entity ID; with --over-time and no entity, every entity of the kind
        #[arg(long)]
        entity: Option<String>,
        /// Species name
        #[arg(long)]
        species: String,
        /// How the time series becomes one value: final, mean or max
        #[arg(long, default_value = "final")]
        reduction: Reduction,
        /// Screen each reporting time separately instead of one reduced value
        #[arg(long)]
        over_time: bool,
        /// Print the indices as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve design rows over stdin/stdout (started by `run`)
    #[command(hide = true)]
    Worker,
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Validate { study_path } => cmd_validate(&study_path),
        Commands::Run {
            study_path,
            workers,
            in_process,
            output,
            quiet,
        } => cmd_run(
            &study_path,
            RunOverrides {
                workers,
                backend: in_process.then_some(BackendDef::Thread),
                output_path: output,
            },
            quiet,
        ),
        Commands::Inspect { artifact_path } => cmd_inspect(&artifact_path),
        Commands::Screen {
            artifact_path,
            kind,
            entity,
            species,
            reduction,
            over_time,
            json,
        } => match (over_time, entity) {
            (false, Some(entity)) => cmd_screen(
                &artifact_path,
                &MetricSelector {
                    kind,
                    entity,
                    species,
                    reduction,
                },
                json,
            ),
            (false, None) => Err(AppError::InvalidInput(
                "--entity is required unless --over-time is given".to_string(),
            )),
            (true, Some(entity)) => {
                cmd_screen_over_time(&artifact_path, kind, &entity, &species, json)
            }
            (true, None) => cmd_screen_entities(&artifact_path, kind, &species, json),
        },
        Commands::Worker => cmd_worker(),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries the worker protocol.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}

fn cmd_validate(study_path: &Path) -> AppResult<ExitCode> {
    println!("Validating study: {}", study_path.display());
    let study = study_service::validate_study_file(study_path)?;
    let config = &study.config;
    println!("✓ Study is valid");
    println!(
        "  Variables: {} constants, {} species",
        config.constants_vary.len(),
        config.species_vary.len()
    );
    println!(
        "  Design: {} of {} trajectories, {} levels, seed {}",
        config.trajectories, config.total_samples, config.num_levels, config.seed
    );
    println!("  Output: {}", study.output_path(None)?.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(study_path: &Path, overrides: RunOverrides, quiet: bool) -> AppResult<ExitCode> {
    println!("Running study: {}", study_path.display());

    let request = RunRequest {
        overrides,
        ..RunRequest::new(study_path)
    };

    let mut last_emit = Instant::now();
    let mut last_stage = None;
    let mut throttled = |event: RunProgressEvent| {
        let emit_now = last_stage != Some(event.stage) || last_emit.elapsed().as_millis() >= 100;
        if emit_now {
            render_cli_progress(&event);
            last_stage = Some(event.stage);
            last_emit = Instant::now();
        }
    };
    let render: &mut dyn FnMut(RunProgressEvent) = &mut throttled;
    let progress = if quiet { None } else { Some(render) };
    let response = run_service::run_study(&request, progress)?;
    if !quiet {
        clear_progress_line();
    }

    println!(
        "✓ Evaluated {} rows of {} variables on {} {} workers",
        response.rows,
        response.variables.len(),
        response.worker_count,
        response.backend
    );
    println!("  Artifact: {}", response.artifact_path.display());
    if !response.removed.is_empty() {
        println!("  Scratch entries removed: {}", response.removed.len());
    }
    for path in &response.leftover {
        println!("  ! Could not remove scratch entry {}", path.display());
    }
    print_timing_summary(&response.timing);

    if response.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        print_failure_summary(&response);
        Ok(ExitCode::from(EXIT_ROWS_FAILED))
    }
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(120));
    let _ = io::stdout().flush();
}

fn render_cli_progress(event: &RunProgressEvent) {
    match (&event.stage, &event.batch) {
        (RunStage::EvaluatingRows, Some(batch)) => {
            let width = 28usize;
            let fraction = if batch.total == 0 {
                1.0
            } else {
                batch.completed as f64 / batch.total as f64
            };
            let filled = ((fraction * width as f64).round() as usize).min(width);
            let bar = format!(
                "{}{}",
                "#".repeat(filled),
                "-".repeat(width.saturating_sub(filled))
            );
            print!(
                "\r[{}] {:>6.2}%  rows={}/{}  failed={}  workers={}  elapsed={:.1}s",
                bar,
                fraction * 100.0,
                batch.completed,
                batch.total,
                batch.failed,
                batch.workers,
                event.elapsed_wall_s
            );
        }
        _ => {
            let spinner = ['|', '/', '-', '\\'];
            let spin_idx = ((event.elapsed_wall_s * 10.0) as usize) % spinner.len();
            let mut line = format!(
                "\r{} {}  elapsed={:.2}s",
                spinner[spin_idx],
                event.stage.label(),
                event.elapsed_wall_s
            );
            if let Some(msg) = &event.message {
                line.push_str(&format!("  {}", msg));
            }
            print!("{}", line);
        }
    }
    let _ = io::stdout().flush();
}

fn print_timing_summary(timing: &RunTimingSummary) {
    let total = timing.total_time_s.max(1.0e-12);
    let pct = |s: f64| 100.0 * s / total;

    println!("\nTiming summary:");
    println!("  Load:     {:.3}s ({:.1}%)", timing.load_time_s, pct(timing.load_time_s));
    println!(
        "  Baseline: {:.3}s ({:.1}%)",
        timing.baseline_time_s,
        pct(timing.baseline_time_s)
    );
    println!(
        "  Design:   {:.3}s ({:.1}%)",
        timing.problem_time_s + timing.sample_time_s,
        pct(timing.problem_time_s + timing.sample_time_s)
    );
    println!(
        "  Evaluate: {:.3}s ({:.1}%)",
        timing.evaluate_time_s,
        pct(timing.evaluate_time_s)
    );
    println!("  Save:     {:.3}s ({:.1}%)", timing.save_time_s, pct(timing.save_time_s));
    println!("  Total:    {:.3}s", timing.total_time_s);
}

fn print_failure_summary(response: &RunResponse) {
    println!(
        "\n{} of {} rows failed:",
        response.failures.len(),
        response.rows
    );
    for (index, failure) in &response.failures {
        println!("  row {index}: [{}] {failure}", failure.kind());
    }
}

fn cmd_inspect(artifact_path: &Path) -> AppResult<ExitCode> {
    let artifact = wq_results::load_artifact(artifact_path)?;
    let summary = query::summarize(&artifact);

    println!("Artifact: {}", artifact_path.display());
    if let Some(name) = &summary.study_name {
        println!("  Study: {name}");
    }
    println!("  Created: {}", summary.created_at);
    println!(
        "  Rows: {} ({} trajectories, seed {})",
        summary.rows, summary.trajectories, summary.seed
    );
    println!("  Failed rows: {}", summary.failed_rows.len());
    println!("  Nodes: {}  Links: {}", summary.node_count, summary.link_count);
    println!("  Fingerprint: {}", summary.design_fingerprint);

    println!("\nVariables:");
    for (name, (low, high)) in summary.variables.iter().zip(&summary.bounds) {
        println!("  {name:<12} [{low:.6e}, {high:.6e}]");
    }
    if !summary.failed_rows.is_empty() {
        println!("\nFailed rows:");
        for index in &summary.failed_rows {
            if let Some(failure) = artifact.results[*index].failure() {
                println!("  row {index}: [{}] {failure}", failure.kind());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_screen(artifact_path: &Path, selector: &MetricSelector, json: bool) -> AppResult<ExitCode> {
    let artifact = wq_results::load_artifact(artifact_path)?;
    let indices = query::screen(&artifact, selector)?;

    if json {
        return print_json(&indices);
    }

    println!(
        "Morris screening of {} at {} '{}' ({:?})",
        selector.species, selector.kind, selector.entity, selector.reduction
    );
    println!(
        "  Trajectories used: {}  skipped: {}",
        indices.trajectories_used, indices.trajectories_skipped
    );
    println!("\n  {:<12} {:>12} {:>12} {:>12}", "variable", "mu*", "mu", "sigma");
    for i in indices.ranking() {
        println!(
            "  {:<12} {:>12.4e} {:>12.4e} {:>12.4e}",
            indices.names[i], indices.mu_star[i], indices.mu[i], indices.sigma[i]
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: serde::Serialize>(value: &T) -> AppResult<ExitCode> {
    let text =
        serde_json::to_string_pretty(value).map_err(|e| AppError::InvalidInput(e.to_string()))?;
    println!("{text}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_screen_over_time(
    artifact_path: &Path,
    kind: EntityKind,
    entity: &str,
    species: &str,
    json: bool,
) -> AppResult<ExitCode> {
    let artifact = wq_results::load_artifact(artifact_path)?;
    let screening = query::screen_over_time(&artifact, kind, entity, species)?;
    if json {
        return print_json(&screening);
    }

    println!("mu* of {species} at {kind} '{entity}' per reporting time");
    print!("\n  {:>10}", "time [h]");
    for name in &screening.names {
        print!(" {name:>12}");
    }
    println!();
    for (t, step) in screening.time_s.iter().zip(&screening.steps) {
        print!("  {:>10.2}", t / 3600.0);
        for value in &step.mu_star {
            print!(" {value:>12.4e}");
        }
        println!();
    }
    print!("  {:>10}", "mean");
    for value in screening.mean_mu_star() {
        print!(" {value:>12.4e}");
    }
    println!();
    Ok(ExitCode::SUCCESS)
}

fn cmd_screen_entities(
    artifact_path: &Path,
    kind: EntityKind,
    species: &str,
    json: bool,
) -> AppResult<ExitCode> {
    let artifact = wq_results::load_artifact(artifact_path)?;
    let rows = query::screen_entities(&artifact, kind, species)?;
    if json {
        return print_json(&rows);
    }

    println!("Time-averaged mu* of {species} per {kind}");
    print!("\n  {:<10}", kind.to_string());
    for name in artifact.problem.names() {
        print!(" {name:>12}");
    }
    println!();
    for row in &rows {
        print!("  {:<10}", row.entity);
        for value in &row.mean_mu_star {
            print!(" {value:>12.4e}");
        }
        println!();
    }
    Ok(ExitCode::SUCCESS)
}

/// Worker process: the working directory is this worker's scratch directory.
fn cmd_worker() -> AppResult<ExitCode> {
    let workdir = std::env::current_dir()?;
    let served = serve(io::stdin().lock(), io::stdout().lock(), &workdir, |setup, dir| {
        ModelEvaluator::open(BatchReactor::new(), setup.evaluation.clone(), dir)
    })?;
    debug!(served, "worker finished");
    Ok(ExitCode::SUCCESS)
}
