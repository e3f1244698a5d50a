//! In-process worker backend.
//!
//! Each worker is a thread that builds its own evaluator, so no evaluator
//! is ever shared. Only usable when the factory declares its instances
//! independent: a binding with process-global solver state must go through
//! the process backend. A timed-out thread cannot be killed; it is detached
//! and its late reply is discarded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{BatchError, BatchResult};
use crate::evaluate::{EvaluatorFactory, evaluate_guarded};
use crate::pool::{Worker, WorkerEvent, WorkerId, WorkerSpawner};
use crate::protocol::RowTask;

pub struct ThreadSpawner<F: EvaluatorFactory> {
    factory: Arc<F>,
    scratch_root: Option<PathBuf>,
}

impl<F: EvaluatorFactory> ThreadSpawner<F> {
    pub fn new(factory: F) -> BatchResult<Self> {
        if !factory.independent_instances() {
            return Err(BatchError::Config(
                "evaluators from this factory may share process state; use the process backend"
                    .into(),
            ));
        }
        Ok(Self {
            factory: Arc::new(factory),
            scratch_root: None,
        })
    }

    /// Create per-worker scratch directories under `root` instead of the
    /// system temp directory.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

pub(crate) fn scratch_dir(root: Option<&Path>, slot: usize) -> std::io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    let prefix = format!("wq-worker-{slot}-");
    builder.prefix(&prefix);
    match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
}

impl<F: EvaluatorFactory> WorkerSpawner for ThreadSpawner<F> {
    type Worker = ThreadWorker;

    fn backend(&self) -> &'static str {
        "thread"
    }

    fn spawn(&self, id: WorkerId, events: Sender<WorkerEvent>) -> BatchResult<ThreadWorker> {
        let spawn_error = |e: std::io::Error| BatchError::Spawn {
            slot: id.slot,
            message: e.to_string(),
        };
        let scratch = scratch_dir(self.scratch_root.as_deref(), id.slot).map_err(spawn_error)?;
        let (tasks, task_rx) = mpsc::channel();
        let factory = Arc::clone(&self.factory);
        let handle = std::thread::Builder::new()
            .name(format!("wq-worker-{}", id.slot))
            .spawn(move || worker_loop(id, factory, scratch, task_rx, events))
            .map_err(spawn_error)?;
        Ok(ThreadWorker {
            id,
            tasks: Some(tasks),
            handle: Some(handle),
        })
    }
}

/// Sends [`WorkerEvent::Exited`] when the worker thread ends, unwinding
/// included.
struct ExitNotice {
    id: WorkerId,
    events: Sender<WorkerEvent>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let reason = if std::thread::panicking() {
            "worker thread panicked"
        } else {
            "worker thread exited"
        };
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.id,
            reason: reason.to_string(),
        });
    }
}

fn worker_loop<F: EvaluatorFactory>(
    id: WorkerId,
    factory: Arc<F>,
    scratch: TempDir,
    tasks: Receiver<RowTask>,
    events: Sender<WorkerEvent>,
) {
    let _notice = ExitNotice {
        id,
        events: events.clone(),
    };
    let workdir = scratch.path();
    let mut evaluator = match factory.create(workdir) {
        Ok(evaluator) => evaluator,
        Err(err) => {
            let _ = events.send(WorkerEvent::SetupFailed {
                worker: id,
                message: err.to_string(),
            });
            return;
        }
    };
    if events.send(WorkerEvent::Ready { worker: id }).is_err() {
        return;
    }

    while let Ok(task) = tasks.recv() {
        let (outcome, panicked) = evaluate_guarded(&mut evaluator, &task.values);
        let finished = WorkerEvent::Finished {
            worker: id,
            index: task.index,
            outcome,
        };
        if events.send(finished).is_err() {
            return;
        }
        if panicked {
            match factory.create(workdir) {
                Ok(fresh) => evaluator = fresh,
                Err(err) => {
                    debug!(slot = id.slot, error = %err, "rebuilding evaluator failed");
                    return;
                }
            }
        }
    }
}

pub struct ThreadWorker {
    id: WorkerId,
    tasks: Option<Sender<RowTask>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker for ThreadWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn submit(&mut self, task: RowTask) -> BatchResult<()> {
        let tasks = self
            .tasks
            .as_ref()
            .ok_or_else(|| BatchError::Protocol("worker already stopped".into()))?;
        tasks
            .send(task)
            .map_err(|_| BatchError::Protocol(format!("worker thread {} is gone", self.id.slot)))
    }

    fn shutdown(&mut self) {
        self.tasks = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn terminate(&mut self) {
        self.tasks = None;
        // Detached: the thread exits once its current row returns.
        self.handle = None;
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
