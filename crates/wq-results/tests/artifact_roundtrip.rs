use std::collections::BTreeMap;
use std::fs;

use wq_batch::{RowFailure, RowOutcome};
use wq_design::{DesignMatrix, ProblemSpec};
use wq_model::{EntityTrace, QualityResults, SpeciesSeries};
use wq_results::{
    ArtifactAssembler, ResultsError, RunMetadata, assemble_and_save, load_artifact,
};

fn problem() -> ProblemSpec {
    ProblemSpec::new(
        vec!["k1".into(), "TOTNH".into()],
        vec![(8.0, 12.0), (0.5, 1.5)],
    )
    .unwrap()
}

fn design() -> DesignMatrix {
    DesignMatrix::from_rows(vec![
        vec![8.0, 0.5],
        vec![12.0, 0.5],
        vec![12.0, 1.5],
    ])
    .unwrap()
}

fn completed(value: f64) -> RowOutcome {
    let mut species = BTreeMap::new();
    species.insert("NH2CL".to_string(), vec![value, value * 0.5]);
    let mut results = QualityResults::default();
    results.node.insert(
        "1".into(),
        EntityTrace::BySpecies(SpeciesSeries {
            time_s: vec![0.0, 300.0],
            age_h: Some(vec![0.0, 0.0]),
            species,
        }),
    );
    RowOutcome::Completed(results)
}

fn metadata() -> RunMetadata {
    RunMetadata {
        study_name: Some("beaker".into()),
        constants_vary: vec!["k1".into()],
        species_vary: vec!["TOTNH".into()],
        seed: 4,
        trajectories: 1,
        total_samples: 10,
        num_levels: 4,
        nodes: Some(vec!["1".into(), "2".into()]),
        links: Some(vec!["p".into()]),
        base_demands: Some(vec![0.0, 5.0]),
        inp_file: Some("beaker.yaml".into()),
        elapsed_s: 1.5,
    }
}

#[test]
fn artifact_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("beaker_morris.json");
    let results = vec![
        completed(1.0),
        RowOutcome::failed(RowFailure::Solver {
            message: "negative initial".into(),
        }),
        completed(2.0),
    ];

    let saved = assemble_and_save(problem(), design(), results.clone(), metadata(), &path).unwrap();
    assert_eq!(saved.failed_rows, vec![1]);

    let loaded = load_artifact(&path).unwrap();
    assert_eq!(loaded.problem, problem());
    assert_eq!(loaded.param_values, design());
    assert_eq!(loaded.results, results);
    assert_eq!(loaded.meta.failed_rows, vec![1]);
    assert_eq!(loaded.meta.design_fingerprint, saved.design_fingerprint);
    assert_eq!(loaded.base_demands, Some(vec![0.0, 5.0]));

    // Only the artifact itself is left in the output directory.
    let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn downstream_field_names_are_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.json");
    assemble_and_save(
        problem(),
        design(),
        vec![completed(1.0), completed(1.0), completed(1.0)],
        metadata(),
        &path,
    )
    .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    for key in [
        "problem",
        "param_values",
        "results",
        "constants_vary",
        "species_vary",
        "nodes",
        "links",
        "base_demands",
        "inp_file",
    ] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    assert_eq!(json["problem"]["names"][1], "TOTNH");
    assert_eq!(json["param_values"][2][0], 12.0);
}

#[test]
fn workspace_is_left_as_found_plus_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("study.yaml"), "name: x").unwrap();
    let before: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();

    let assembler = ArtifactAssembler::begin(dir.path()).unwrap();
    fs::write(dir.path().join("model.rpt"), "solver report").unwrap();
    fs::write(dir.path().join("hydraulics.tmp"), [1u8, 2, 3]).unwrap();

    let path = dir.path().join("run.json");
    let saved = assembler
        .finish(
            problem(),
            design(),
            vec![completed(1.0), completed(2.0), completed(3.0)],
            metadata(),
            &path,
        )
        .unwrap();
    assert_eq!(saved.removed.len(), 2);

    let mut after: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    after.sort();
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(after, vec!["run.json", "study.yaml"]);
}

#[test]
fn unwritable_destination_leaves_a_rescue_copy() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where a directory is expected.
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "").unwrap();
    let path = blocker.join("artifact.json");

    let err = assemble_and_save(
        problem(),
        design(),
        vec![completed(1.0), completed(2.0), completed(3.0)],
        metadata(),
        &path,
    )
    .unwrap_err();
    match err {
        ResultsError::Persist {
            rescue: Some(rescue),
            ..
        } => {
            let loaded = load_artifact(&rescue).unwrap();
            assert_eq!(loaded.results.len(), 3);
            fs::remove_file(rescue).unwrap();
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn output_directory_inside_the_workspace_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = ArtifactAssembler::begin(dir.path()).unwrap();
    fs::write(dir.path().join("model.rpt"), "solver report").unwrap();

    let path = dir.path().join("out").join("run.json");
    let saved = assembler
        .finish(
            problem(),
            design(),
            vec![completed(1.0), completed(2.0), completed(3.0)],
            metadata(),
            &path,
        )
        .unwrap();
    assert_eq!(saved.removed, vec![dir.path().join("model.rpt")]);
    assert!(load_artifact(&path).is_ok());
}

#[test]
fn cleanup_trouble_never_costs_the_artifact() {
    let workspace = tempfile::tempdir().unwrap();
    let scratch = workspace.path().join("scratch");
    fs::create_dir(&scratch).unwrap();
    let assembler = ArtifactAssembler::begin(&scratch).unwrap();
    // The snapshotted directory disappears, so the sweep cannot even list it.
    fs::remove_dir_all(&scratch).unwrap();

    let out = tempfile::tempdir().unwrap();
    let path = out.path().join("run.json");
    let saved = assembler
        .finish(
            problem(),
            design(),
            vec![completed(1.0), completed(2.0), completed(3.0)],
            metadata(),
            &path,
        )
        .unwrap();
    assert!(saved.removed.is_empty());
    assert_eq!(load_artifact(&path).unwrap().results.len(), 3);
}

#[test]
fn param_values_reload_bit_for_bit() {
    // Bound-scaled values with full 17-digit mantissas across magnitudes.
    let mut rows = Vec::new();
    let mut x = 0.123_456_789_f64;
    for i in 0..400 {
        x = (x * 3.987_654_321 + 0.318_309_886).fract();
        let scale = 10f64.powi(i % 13 - 6);
        rows.push(vec![(0.8 + 0.45 * x) * scale, (1.25 - 0.45 * x) / scale]);
    }
    let design = DesignMatrix::from_rows(rows).unwrap();
    let problem = ProblemSpec::new(
        vec!["k1".into(), "TOTNH".into()],
        vec![(0.0, 1e7), (0.0, 1e7)],
    )
    .unwrap();
    let results = vec![completed(1.0); design.rows()];

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bits.json");
    assemble_and_save(problem, design.clone(), results, metadata(), &path).unwrap();
    let loaded = load_artifact(&path).unwrap();

    for i in 0..design.rows() {
        let saved: Vec<u64> = design.row(i).iter().map(|v| v.to_bits()).collect();
        let back: Vec<u64> = loaded.param_values.row(i).iter().map(|v| v.to_bits()).collect();
        assert_eq!(saved, back, "row {i}");
    }
}
