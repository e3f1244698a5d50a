//! Worker-process backend.
//!
//! Every worker is a freshly launched OS process (never a fork of the
//! parent), started in its own temporary directory so solver scratch files
//! cannot collide. The parent writes [`WorkerSetup`] and [`RowTask`] lines
//! to the child's stdin; a reader thread turns the child's stdout into
//! [`WorkerEvent`]s. Dropping a [`ProcessWorker`] kills and reaps the child
//! and removes its directory.

use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::debug;

use crate::error::{BatchError, BatchResult};
use crate::pool::{Worker, WorkerEvent, WorkerId, WorkerSpawner};
use crate::protocol::{RowTask, WorkerReply, WorkerSetup, read_message, write_message};
use crate::thread::scratch_dir;

/// How long a worker may take to exit after its input is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command line that starts a worker process.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The running executable, re-invoked with `args`.
    pub fn current_exe(args: Vec<String>) -> BatchResult<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

pub struct ProcessSpawner {
    launcher: WorkerLauncher,
    setup: WorkerSetup,
    scratch_root: Option<PathBuf>,
}

impl ProcessSpawner {
    pub fn new(launcher: WorkerLauncher, setup: WorkerSetup) -> Self {
        Self {
            launcher,
            setup,
            scratch_root: None,
        }
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

impl WorkerSpawner for ProcessSpawner {
    type Worker = ProcessWorker;

    fn backend(&self) -> &'static str {
        "process"
    }

    fn spawn(&self, id: WorkerId, events: Sender<WorkerEvent>) -> BatchResult<ProcessWorker> {
        let spawn_error = |message: String| BatchError::Spawn {
            slot: id.slot,
            message,
        };
        let scratch = scratch_dir(self.scratch_root.as_deref(), id.slot)
            .map_err(|e| spawn_error(format!("scratch directory: {e}")))?;

        let mut child = Command::new(&self.launcher.program)
            .args(&self.launcher.args)
            .current_dir(scratch.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_error(format!("{}: {e}", self.launcher.program.display())))?;

        // From here on the worker owns the child, so every error path reaps it.
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let mut worker = ProcessWorker {
            id,
            child,
            stdin,
            reader: None,
            finished: false,
            _scratch: scratch,
        };
        let stdout = stdout.ok_or_else(|| spawn_error("child stdout not captured".into()))?;
        worker.reader = Some(
            std::thread::Builder::new()
                .name(format!("wq-worker-{}-reader", id.slot))
                .spawn(move || forward_replies(id, stdout, events))
                .map_err(|e| spawn_error(e.to_string()))?,
        );

        let stdin = worker
            .stdin
            .as_mut()
            .ok_or_else(|| spawn_error("child stdin not captured".into()))?;
        write_message(stdin, &self.setup)
            .map_err(|e| spawn_error(format!("sending setup: {e}")))?;
        debug!(slot = id.slot, pid = worker.child.id(), "worker process started");
        Ok(worker)
    }
}

fn forward_replies(id: WorkerId, stdout: ChildStdout, events: Sender<WorkerEvent>) {
    let mut reader = BufReader::new(stdout);
    loop {
        let event = match read_message::<_, WorkerReply>(&mut reader) {
            Ok(Some(WorkerReply::Ready)) => WorkerEvent::Ready { worker: id },
            Ok(Some(WorkerReply::Done { index, outcome })) => WorkerEvent::Finished {
                worker: id,
                index,
                outcome,
            },
            Ok(Some(WorkerReply::SetupFailed { message })) => {
                WorkerEvent::SetupFailed { worker: id, message }
            }
            Ok(None) => {
                let _ = events.send(WorkerEvent::Exited {
                    worker: id,
                    reason: "worker process closed its output".into(),
                });
                return;
            }
            Err(err) => {
                let _ = events.send(WorkerEvent::Exited {
                    worker: id,
                    reason: err.to_string(),
                });
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

pub struct ProcessWorker {
    id: WorkerId,
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    finished: bool,
    _scratch: TempDir,
}

impl ProcessWorker {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn reap(&mut self) {
        if let Err(err) = self.child.wait() {
            debug!(slot = self.id.slot, error = %err, "waiting for worker failed");
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.finished = true;
    }
}

impl Worker for ProcessWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn submit(&mut self, task: RowTask) -> BatchResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BatchError::Protocol("worker input already closed".into()))?;
        write_message(stdin, &task)
    }

    fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.stdin = None;
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                _ => {
                    let _ = self.child.kill();
                    break;
                }
            }
        }
        self.reap();
        debug!(slot = self.id.slot, "worker process shut down");
    }

    fn terminate(&mut self) {
        if self.finished {
            return;
        }
        self.stdin = None;
        let _ = self.child.kill();
        self.reap();
        debug!(slot = self.id.slot, "worker process terminated");
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
