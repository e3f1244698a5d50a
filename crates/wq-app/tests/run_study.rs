use std::fs;
use std::path::Path;

use wq_app::{
    AppError, MetricSelector, Reduction, RunOverrides, RunProgressEvent, RunRequest, RunStage,
    extract_metric, run_study, screen, screen_entities, screen_over_time, summarize,
};
use wq_model::EntityKind;
use wq_results::load_artifact;
use wq_study::BackendDef;

const NETWORK: &str = r#"
nodes:
  - { id: "1", source: true }
  - { id: "2", base_demand: 12.0, travel_time_h: 0.5 }
  - { id: "3", base_demand: 30.0, travel_time_h: 1.5 }
links:
  - { id: "a", from: "1", to: "2" }
  - { id: "b", from: "2", to: "3" }
"#;

const SCHEME: &str = r#"
quality_step_s: 900
constants: { Kb: 0.3, Kd: 0.1, Y: 0.2 }
species:
  - { id: CL2, initial: 1.2 }
  - { id: DOC, initial: 2.0 }
  - { id: BIO, initial: 0.0 }
reactions:
  - { reactant: CL2, rate: Kb }
  - { reactant: DOC, rate: Kd, products: [ { species: BIO, yield: Y } ] }
"#;

fn write_study(dir: &Path, bounds_csv: &str) -> std::path::PathBuf {
    fs::write(dir.join("net.yaml"), NETWORK).unwrap();
    fs::write(dir.join("scheme.yaml"), SCHEME).unwrap();
    fs::write(dir.join("bounds.csv"), bounds_csv).unwrap();
    let study = dir.join("study.yaml");
    fs::write(
        &study,
        r#"
name: beaker
trajectories: 4
total_samples: 20
seed: 4
days: 1
network_file: net.yaml
reaction_file: scheme.yaml
reference_entity: "1"
constants_vary: [Kb, Kd]
species_vary: [CL2, DOC]
bound_source: { type: table, path: bounds.csv }
output_path: beaker_morris.json
execution: { backend: thread, workers: 3 }
"#,
    )
    .unwrap();
    study
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn chlorine_at_far_node() -> MetricSelector {
    MetricSelector {
        kind: EntityKind::Node,
        entity: "3".to_string(),
        species: "CL2".to_string(),
        reduction: Reduction::Final,
    }
}

#[test]
fn thread_backend_run_leaves_only_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let study = write_study(dir.path(), "Kb,20\nKd,20\nCL2,10\nDOC,10\n");
    let before = listing(dir.path());

    let mut events: Vec<RunProgressEvent> = Vec::new();
    let mut record = |e: RunProgressEvent| events.push(e);
    let response = run_study(&RunRequest::new(&study), Some(&mut record)).unwrap();

    assert_eq!(response.rows, 4 * 5);
    assert!(response.failures.is_empty());
    assert_eq!(response.worker_count, 3);
    assert_eq!(response.backend, "thread");
    assert_eq!(response.variables, vec!["Kb", "Kd", "CL2", "DOC"]);

    let mut expected = before.clone();
    expected.push("beaker_morris.json".to_string());
    expected.sort();
    assert_eq!(listing(dir.path()), expected);

    assert_eq!(events.first().unwrap().stage, RunStage::LoadingStudy);
    assert_eq!(events.last().unwrap().stage, RunStage::Completed);
    let last_batch = events.iter().filter_map(|e| e.batch.clone()).last().unwrap();
    assert_eq!(last_batch.completed, last_batch.total);

    let artifact = load_artifact(&response.artifact_path).unwrap();
    let (low, high) = artifact.problem.bounds()[0];
    assert!((low - 0.24).abs() < 1e-12 && (high - 0.36).abs() < 1e-12);
    assert_eq!(artifact.nodes, Some(vec!["1".into(), "2".into(), "3".into()]));
    assert_eq!(artifact.base_demands, Some(vec![0.0, 12.0, 30.0]));

    let summary = summarize(&artifact);
    assert_eq!(summary.rows, 20);
    assert_eq!(summary.node_count, 3);

    let indices = screen(&artifact, &chlorine_at_far_node()).unwrap();
    assert_eq!(indices.trajectories_used, 4);
    // Chlorine decay does not depend on the carbon pool.
    let doc = indices.names.iter().position(|n| n == "DOC").unwrap();
    let kb = indices.names.iter().position(|n| n == "Kb").unwrap();
    assert!(indices.mu_star[doc].abs() < 1e-12);
    assert!(indices.mu_star[kb] > 0.0);

    // The last reporting time reproduces the final-value screening.
    let over_time = screen_over_time(&artifact, EntityKind::Node, "3", "CL2").unwrap();
    assert_eq!(over_time.steps.len(), over_time.time_s.len());
    assert_eq!(over_time.steps.last().unwrap().mu_star, indices.mu_star);
    assert!(over_time.mean_mu_star()[kb] > 0.0);

    let per_node = screen_entities(&artifact, EntityKind::Node, "CL2").unwrap();
    let ids: Vec<&str> = per_node.iter().map(|e| e.entity.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3"]);
    for row in &per_node {
        assert!(row.mean_mu_star[doc].abs() < 1e-12, "{}", row.entity);
    }
}

#[test]
fn rows_with_negative_rates_fail_and_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    // 400% puts the two lowest grid levels of Kb below zero, so every
    // trajectory holds at least one row the reactor rejects.
    let study = write_study(dir.path(), "Kb,400\nKd,20\nCL2,10\nDOC,10\n");
    let output = dir.path().join("out").join("partial.json");
    let request = RunRequest {
        overrides: RunOverrides {
            workers: Some(2),
            backend: Some(BackendDef::Thread),
            output_path: Some(output.clone()),
        },
        ..RunRequest::new(&study)
    };
    let response = run_study(&request, None).unwrap();
    assert!(!response.failures.is_empty());
    assert!(response.leftover.is_empty());

    let artifact = load_artifact(&output).unwrap();
    let negative: Vec<usize> = artifact
        .param_values
        .iter_rows()
        .enumerate()
        .filter(|(_, row)| row[0] < 0.0)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(response.failed_rows(), negative);
    assert_eq!(artifact.failed_rows(), negative.as_slice());
    for i in &negative {
        assert_eq!(artifact.results[*i].failure().unwrap().kind(), "solver");
    }

    let values = extract_metric(&artifact, &chlorine_at_far_node()).unwrap();
    for (i, value) in values.iter().enumerate() {
        assert_eq!(value.is_none(), negative.contains(&i));
    }
}

#[test]
fn missing_bound_fails_before_any_row_runs() {
    let dir = tempfile::tempdir().unwrap();
    let study = write_study(dir.path(), "Kb,20\nKd,20\nCL2,10\n");
    let before = listing(dir.path());

    let mut stages = Vec::new();
    let mut record = |e: RunProgressEvent| stages.push(e.stage);
    let err = run_study(&RunRequest::new(&study), Some(&mut record)).unwrap_err();
    assert!(matches!(err, AppError::Design(_)), "{err}");
    assert!(err.to_string().contains("DOC"), "{err}");
    // Reported before the baseline model was ever opened.
    assert_eq!(stages, vec![RunStage::LoadingStudy]);
    assert_eq!(listing(dir.path()), before);
}
