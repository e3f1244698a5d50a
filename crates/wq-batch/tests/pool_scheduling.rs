use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use wq_batch::{
    BatchError, BatchOptions, BatchProgress, EvalError, Evaluator, EvaluatorFactory,
    FailurePolicy, RowFailure, RowOutcome, RowTask, ThreadSpawner, Worker, WorkerEvent, WorkerId,
    WorkerSpawner, run_all,
};
use wq_design::DesignMatrix;
use wq_model::{EntityTrace, QualityResults, SpeciesSeries};

/// Result carrying the row's first value and its sum.
fn echo(row: &[f64]) -> QualityResults {
    let mut species = BTreeMap::new();
    species.insert("first".to_string(), vec![row[0]]);
    species.insert("sum".to_string(), vec![row.iter().sum()]);
    let mut results = QualityResults::default();
    results.node.insert(
        "echo".into(),
        EntityTrace::BySpecies(SpeciesSeries {
            time_s: vec![0.0],
            age_h: None,
            species,
        }),
    );
    results
}

fn first_value(outcome: &RowOutcome) -> f64 {
    outcome.results().unwrap().node["echo"]
        .species_series("first")
        .unwrap()[0]
}

fn design(rows: usize) -> DesignMatrix {
    DesignMatrix::from_rows((0..rows).map(|i| vec![i as f64, 0.5, 2.0]).collect()).unwrap()
}

#[derive(Clone, Copy)]
enum Behaviour {
    Echo,
    FailOn(f64),
    PanicOn(f64),
    HangOn(f64),
}

struct TestEvaluator(Behaviour);

impl Evaluator for TestEvaluator {
    fn evaluate(&mut self, row: &[f64]) -> Result<QualityResults, EvalError> {
        // Uneven durations so completion order differs from submission order.
        std::thread::sleep(Duration::from_millis((row[0] as u64 * 7) % 5));
        match self.0 {
            Behaviour::FailOn(v) if row[0] == v => {
                Err(EvalError::Invalid(format!("row with {v} rejected")))
            }
            Behaviour::PanicOn(v) if row[0] == v => panic!("evaluator crashed on {v}"),
            Behaviour::HangOn(v) if row[0] == v => {
                std::thread::sleep(Duration::from_secs(2));
                Ok(echo(row))
            }
            _ => Ok(echo(row)),
        }
    }
}

struct TestFactory {
    behaviour: Behaviour,
    independent: bool,
}

impl EvaluatorFactory for TestFactory {
    type Evaluator = TestEvaluator;

    fn create(&self, _workdir: &Path) -> Result<TestEvaluator, EvalError> {
        Ok(TestEvaluator(self.behaviour))
    }

    fn independent_instances(&self) -> bool {
        self.independent
    }
}

fn spawner(behaviour: Behaviour) -> ThreadSpawner<TestFactory> {
    ThreadSpawner::new(TestFactory {
        behaviour,
        independent: true,
    })
    .unwrap()
}

fn options(workers: usize) -> BatchOptions {
    BatchOptions {
        worker_count: Some(workers),
        ..BatchOptions::default()
    }
}

#[test]
fn outcomes_follow_row_order_for_any_worker_count() {
    let rows = design(24);
    for workers in [1, 2, 8] {
        let report = run_all(&rows, &spawner(Behaviour::Echo), &options(workers), None).unwrap();
        assert_eq!(report.worker_count, workers);
        assert_eq!(report.outcomes.len(), 24);
        for (i, outcome) in report.outcomes.iter().enumerate() {
            assert_eq!(first_value(outcome), i as f64, "workers={workers}");
        }
    }
}

#[test]
fn failing_row_is_marked_and_the_rest_complete() {
    let rows = design(10);
    let report = run_all(&rows, &spawner(Behaviour::FailOn(4.0)), &options(3), None).unwrap();
    assert_eq!(report.failed_indices(), vec![4]);
    assert_eq!(report.completed(), 9);
    match report.outcomes[4].failure() {
        Some(RowFailure::InvalidRow { message }) => assert!(message.contains("rejected")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(first_value(&report.outcomes[5]), 5.0);
}

#[test]
fn abort_policy_reports_the_failing_index() {
    let rows = design(10);
    let opts = BatchOptions {
        failure_policy: FailurePolicy::Abort,
        ..options(2)
    };
    let err = run_all(&rows, &spawner(Behaviour::FailOn(4.0)), &opts, None).unwrap_err();
    assert!(matches!(err, BatchError::RowFailed { index: 4, .. }), "{err}");
}

#[test]
fn panics_are_recorded_per_row() {
    let rows = design(6);
    let report = run_all(&rows, &spawner(Behaviour::PanicOn(3.0)), &options(2), None).unwrap();
    assert_eq!(report.failed_indices(), vec![3]);
    assert_eq!(report.outcomes[3].failure().unwrap().kind(), "panicked");
}

#[test]
fn hung_row_times_out_without_stalling_the_batch() {
    let rows = design(6);
    let opts = BatchOptions {
        row_timeout: Some(Duration::from_millis(300)),
        ..options(2)
    };
    let report = run_all(&rows, &spawner(Behaviour::HangOn(2.0)), &opts, None).unwrap();
    assert_eq!(report.failed_indices(), vec![2]);
    assert!(matches!(
        report.outcomes[2].failure(),
        Some(RowFailure::TimedOut { after_s }) if *after_s >= 0.3
    ));
    assert_eq!(first_value(&report.outcomes[5]), 5.0);
}

#[test]
fn progress_counts_every_row() {
    let rows = design(8);
    let mut seen: Vec<BatchProgress> = Vec::new();
    let mut record = |p: &BatchProgress| seen.push(p.clone());
    let cb: &mut dyn FnMut(&BatchProgress) = &mut record;
    run_all(&rows, &spawner(Behaviour::FailOn(1.0)), &options(2), Some(cb)).unwrap();
    assert_eq!(seen.len(), 8);
    let last = seen.last().unwrap();
    assert_eq!((last.completed, last.failed, last.total), (8, 1, 8));
}

#[test]
fn shared_state_factories_are_refused_on_threads() {
    let result = ThreadSpawner::new(TestFactory {
        behaviour: Behaviour::Echo,
        independent: false,
    });
    assert!(matches!(result, Err(BatchError::Config(_))));
}

/// How a spawned worker comes up.
#[derive(Clone, Copy)]
enum Setup {
    Ready,
    Exit,
    Fail,
    Hang,
}

/// Spawner whose workers die while holding a chosen row.
struct CrashingSpawner {
    crash_row: usize,
    crashes_left: Arc<AtomicUsize>,
    /// Setup of each slot's first worker.
    first: Setup,
    /// Setup of replacement workers while `replacement_faults` lasts.
    replacement: Setup,
    replacement_faults: Arc<AtomicUsize>,
}

struct CrashingWorker {
    id: WorkerId,
    events: Sender<WorkerEvent>,
    crash_row: usize,
    crashes_left: Arc<AtomicUsize>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl WorkerSpawner for CrashingSpawner {
    type Worker = CrashingWorker;

    fn backend(&self) -> &'static str {
        "crashing"
    }

    fn spawn(
        &self,
        id: WorkerId,
        events: Sender<WorkerEvent>,
    ) -> Result<CrashingWorker, BatchError> {
        let setup = if id.generation == 0 {
            self.first
        } else if take_one(&self.replacement_faults) {
            self.replacement
        } else {
            Setup::Ready
        };
        let first = match setup {
            Setup::Ready => Some(WorkerEvent::Ready { worker: id }),
            Setup::Exit => Some(WorkerEvent::Exited {
                worker: id,
                reason: "exit status 101".into(),
            }),
            Setup::Fail => Some(WorkerEvent::SetupFailed {
                worker: id,
                message: "network file unreadable".into(),
            }),
            Setup::Hang => None,
        };
        if let Some(event) = first {
            events.send(event).unwrap();
        }
        Ok(CrashingWorker {
            id,
            events,
            crash_row: self.crash_row,
            crashes_left: Arc::clone(&self.crashes_left),
        })
    }
}

impl Worker for CrashingWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn submit(&mut self, task: RowTask) -> Result<(), BatchError> {
        let crash = task.index == self.crash_row && take_one(&self.crashes_left);
        let event = if crash {
            WorkerEvent::Exited {
                worker: self.id,
                reason: "killed by signal 9".into(),
            }
        } else {
            WorkerEvent::Finished {
                worker: self.id,
                index: task.index,
                outcome: RowOutcome::Completed(echo(&task.values)),
            }
        };
        self.events.send(event).unwrap();
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn terminate(&mut self) {}
}

fn crashing(crashes: usize) -> CrashingSpawner {
    CrashingSpawner {
        crash_row: 5,
        crashes_left: Arc::new(AtomicUsize::new(crashes)),
        first: Setup::Ready,
        replacement: Setup::Ready,
        replacement_faults: Arc::new(AtomicUsize::new(0)),
    }
}

#[test]
fn crashed_row_is_retried_on_a_fresh_worker() {
    let rows = design(10);
    let report = run_all(&rows, &crashing(1), &options(2), None).unwrap();
    assert!(report.failed_indices().is_empty());
    assert_eq!(first_value(&report.outcomes[5]), 5.0);
    assert!(report.respawns >= 1);
}

#[test]
fn row_that_keeps_killing_workers_is_marked_lost() {
    let rows = design(10);
    let opts = BatchOptions {
        max_row_retries: 2,
        ..options(2)
    };
    let report = run_all(&rows, &crashing(100), &opts, None).unwrap();
    assert_eq!(report.failed_indices(), vec![5]);
    assert!(matches!(
        report.outcomes[5].failure(),
        Some(RowFailure::WorkerLost { attempts: 3, .. })
    ));
}

#[test]
fn worker_dying_during_setup_ends_the_batch() {
    let rows = design(4);
    let spawner = CrashingSpawner {
        first: Setup::Exit,
        ..crashing(0)
    };
    let err = run_all(&rows, &spawner, &options(2), None).unwrap_err();
    assert!(matches!(err, BatchError::WorkerSetup { .. }), "{err}");
}

#[test]
fn workers_stuck_in_setup_end_the_batch_at_the_deadline() {
    let rows = design(4);
    let spawner = CrashingSpawner {
        first: Setup::Hang,
        ..crashing(0)
    };
    let opts = BatchOptions {
        setup_timeout: Some(Duration::from_millis(200)),
        row_timeout: Some(Duration::from_secs(1)),
        ..options(2)
    };
    let started = Instant::now();
    let err = run_all(&rows, &spawner, &opts, None).unwrap_err();
    match err {
        BatchError::WorkerSetup { message, .. } => {
            assert!(message.contains("not ready"), "{message}")
        }
        other => panic!("unexpected {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

fn flaky_replacement(setup: Setup) -> CrashingSpawner {
    CrashingSpawner {
        replacement: setup,
        replacement_faults: Arc::new(AtomicUsize::new(1)),
        ..crashing(1)
    }
}

#[test]
fn replacement_failing_setup_costs_the_row_an_attempt() {
    let rows = design(10);
    let report = run_all(&rows, &flaky_replacement(Setup::Fail), &options(1), None).unwrap();
    assert_eq!(report.failed_indices(), vec![5]);
    match report.outcomes[5].failure() {
        Some(RowFailure::WorkerLost { attempts: 2, message }) => {
            assert!(message.contains("network file unreadable"), "{message}")
        }
        other => panic!("unexpected {other:?}"),
    }
    for i in [0, 4, 6, 9] {
        assert_eq!(first_value(&report.outcomes[i]), i as f64);
    }
}

#[test]
fn replacement_stuck_in_setup_is_replaced_at_the_deadline() {
    let rows = design(10);
    let opts = BatchOptions {
        setup_timeout: Some(Duration::from_millis(200)),
        ..options(1)
    };
    let report = run_all(&rows, &flaky_replacement(Setup::Hang), &opts, None).unwrap();
    assert_eq!(report.failed_indices(), vec![5]);
    assert!(matches!(
        report.outcomes[5].failure(),
        Some(RowFailure::WorkerLost { attempts: 2, .. })
    ));
    assert_eq!(first_value(&report.outcomes[9]), 9.0);
    assert!(report.respawns >= 2);
}

#[test]
fn empty_design_needs_no_workers() {
    let rows = DesignMatrix::from_rows(Vec::new()).unwrap();
    let report = run_all(&rows, &spawner(Behaviour::Echo), &options(4), None).unwrap();
    assert!(report.outcomes.is_empty());
}
