//! Parallel evaluation driver.
//!
//! Rows are handed one at a time to whichever worker is idle. Outcomes land
//! in a slot per row index, so the returned sequence is in input order no
//! matter which worker finished first. A worker is replaced when it times
//! out or dies; the row it held is retried or marked failed.
//!
//! Setup failures (an exit, an error or a missed setup deadline before the
//! worker reports ready) end the batch only while no worker has come up yet.
//! After that, a failed replacement costs the next waiting row one attempt.
//! Workers are shut down gracefully when the batch completes and terminated
//! on every other exit path (dropping a worker terminates it).

use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wq_core::Stopwatch;
use wq_design::DesignMatrix;

use crate::error::{BatchError, BatchResult};
use crate::outcome::{BatchReport, FailurePolicy, RowFailure, RowOutcome};
use crate::policy::{DEFAULT_SETUP_TIMEOUT, DEFAULT_WORKER_FRACTION, resolve_worker_count};
use crate::protocol::RowTask;

/// Upper bound on how long the scheduler sleeps between checks.
const HEARTBEAT: Duration = Duration::from_millis(250);

/// Identifies one incarnation of a worker slot. The generation changes
/// whenever the slot is refilled, so late events from a replaced worker are
/// recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub slot: usize,
    pub generation: u32,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Ready {
        worker: WorkerId,
    },
    Finished {
        worker: WorkerId,
        index: usize,
        outcome: RowOutcome,
    },
    SetupFailed {
        worker: WorkerId,
        message: String,
    },
    Exited {
        worker: WorkerId,
        reason: String,
    },
}

impl WorkerEvent {
    fn worker(&self) -> WorkerId {
        match self {
            WorkerEvent::Ready { worker }
            | WorkerEvent::Finished { worker, .. }
            | WorkerEvent::SetupFailed { worker, .. }
            | WorkerEvent::Exited { worker, .. } => *worker,
        }
    }
}

/// A live worker. Dropping it must terminate it.
pub trait Worker {
    fn id(&self) -> WorkerId;

    /// Hand one row to the worker. Its outcome arrives as a
    /// [`WorkerEvent::Finished`].
    fn submit(&mut self, task: RowTask) -> BatchResult<()>;

    /// No more rows: let the worker exit and wait for it.
    fn shutdown(&mut self);

    /// Stop now, abandoning any row in flight.
    fn terminate(&mut self);
}

/// Starts workers that report back over `events`.
pub trait WorkerSpawner {
    type Worker: Worker;

    fn backend(&self) -> &'static str;

    fn spawn(&self, id: WorkerId, events: Sender<WorkerEvent>) -> BatchResult<Self::Worker>;
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Explicit worker count; `None` uses `worker_fraction` of the machine.
    pub worker_count: Option<usize>,
    pub worker_fraction: f64,
    pub row_timeout: Option<Duration>,
    /// Deadline for a spawned worker to report ready.
    pub setup_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    /// Extra attempts for a row whose worker died under it.
    pub max_row_retries: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            worker_count: None,
            worker_fraction: DEFAULT_WORKER_FRACTION,
            row_timeout: None,
            setup_timeout: Some(DEFAULT_SETUP_TIMEOUT),
            failure_policy: FailurePolicy::Continue,
            max_row_retries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub workers: usize,
    pub elapsed_s: f64,
}

struct Slot<W> {
    worker: W,
    spawned_at: Instant,
    ready: bool,
    busy: Option<(usize, Instant)>,
}

struct Batch<'a, S: WorkerSpawner> {
    spawner: &'a S,
    options: &'a BatchOptions,
    events: Sender<WorkerEvent>,
    slots: Vec<Option<Slot<S::Worker>>>,
    generations: Vec<u32>,
    spawned: usize,
    /// Set once any worker has reported ready.
    came_up: bool,
    results: Vec<Option<RowOutcome>>,
    pending: VecDeque<usize>,
    attempts: Vec<u32>,
    done: usize,
    failed: usize,
    stopwatch: Stopwatch,
}

/// Evaluate every row of `rows` on workers from `spawner`.
///
/// Outcomes come back in row order. Under [`FailurePolicy::Continue`] a
/// failed row holds a failure marker; under [`FailurePolicy::Abort`] the
/// first failure ends the batch with [`BatchError::RowFailed`].
pub fn run_all<S: WorkerSpawner>(
    rows: &DesignMatrix,
    spawner: &S,
    options: &BatchOptions,
    mut progress: Option<&mut dyn FnMut(&BatchProgress)>,
) -> BatchResult<BatchReport> {
    let total = rows.rows();
    let stopwatch = Stopwatch::start();
    if total == 0 {
        return Ok(BatchReport {
            outcomes: Vec::new(),
            worker_count: 0,
            respawns: 0,
            elapsed_s: stopwatch.elapsed_s(),
        });
    }
    let worker_count = resolve_worker_count(options.worker_count, options.worker_fraction, total);
    info!(
        rows = total,
        workers = worker_count,
        backend = spawner.backend(),
        policy = ?options.failure_policy,
        "batch started"
    );

    let (tx, rx) = mpsc::channel();
    let mut batch = Batch {
        spawner,
        options,
        events: tx,
        slots: (0..worker_count).map(|_| None).collect(),
        generations: vec![0; worker_count],
        spawned: 0,
        came_up: false,
        results: vec![None; total],
        pending: (0..total).collect(),
        attempts: vec![0; total],
        done: 0,
        failed: 0,
        stopwatch,
    };

    while batch.done < total {
        batch.fill_slots()?;
        batch.dispatch(rows, &mut progress)?;
        match rx.recv_timeout(batch.next_wait()) {
            Ok(event) => batch.handle(event, &mut progress)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BatchError::Protocol("worker event channel closed".into()));
            }
        }
        batch.expire_timeouts(&mut progress)?;
    }

    batch.shutdown_all();
    let respawns = batch.spawned.saturating_sub(worker_count);
    let elapsed_s = batch.stopwatch.elapsed_s();
    info!(
        rows = total,
        failed = batch.failed,
        respawns,
        elapsed_s,
        "batch finished"
    );
    let outcomes = batch
        .results
        .into_iter()
        .enumerate()
        .map(|(i, o)| {
            o.ok_or_else(|| BatchError::Protocol(format!("row {i} has no outcome")))
        })
        .collect::<BatchResult<Vec<_>>>()?;
    Ok(BatchReport {
        outcomes,
        worker_count,
        respawns,
        elapsed_s,
    })
}

impl<S: WorkerSpawner> Batch<'_, S> {
    fn live(&self, id: WorkerId) -> bool {
        matches!(&self.slots[id.slot], Some(slot) if slot.worker.id() == id)
    }

    /// Workers that are starting or idle, i.e. able to take a row soon.
    fn capacity(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|s| !s.ready || s.busy.is_none())
            .count()
    }

    fn fill_slots(&mut self) -> BatchResult<()> {
        for slot in 0..self.slots.len() {
            if self.slots[slot].is_some() || self.pending.len() <= self.capacity() {
                continue;
            }
            let id = WorkerId {
                slot,
                generation: self.generations[slot],
            };
            self.generations[slot] += 1;
            let worker = self.spawner.spawn(id, self.events.clone())?;
            self.spawned += 1;
            debug!(slot, generation = id.generation, "worker spawned");
            self.slots[slot] = Some(Slot {
                worker,
                spawned_at: Instant::now(),
                ready: false,
                busy: None,
            });
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        rows: &DesignMatrix,
        progress: &mut Option<&mut dyn FnMut(&BatchProgress)>,
    ) -> BatchResult<()> {
        for slot in 0..self.slots.len() {
            let idle = matches!(&self.slots[slot], Some(s) if s.ready && s.busy.is_none());
            if !idle {
                continue;
            }
            let Some(index) = self.pending.pop_front() else {
                return Ok(());
            };
            let task = RowTask {
                index,
                values: rows.row(index).to_vec(),
            };
            let submitted = match self.slots[slot].as_mut() {
                Some(s) => {
                    s.busy = Some((index, Instant::now()));
                    s.worker.submit(task)
                }
                None => continue,
            };
            if let Err(err) = submitted {
                self.lose_worker(slot, &err.to_string(), progress)?;
            }
        }
        Ok(())
    }

    /// Time until the nearest row or setup deadline, capped at [`HEARTBEAT`].
    fn next_wait(&self) -> Duration {
        self.slots
            .iter()
            .flatten()
            .filter_map(|s| match s.busy {
                Some((_, started)) => self
                    .options
                    .row_timeout
                    .map(|t| t.saturating_sub(started.elapsed())),
                None if !s.ready => self
                    .options
                    .setup_timeout
                    .map(|t| t.saturating_sub(s.spawned_at.elapsed())),
                None => None,
            })
            .min()
            .unwrap_or(HEARTBEAT)
            .min(HEARTBEAT)
    }

    fn handle(
        &mut self,
        event: WorkerEvent,
        progress: &mut Option<&mut dyn FnMut(&BatchProgress)>,
    ) -> BatchResult<()> {
        let id = event.worker();
        if !self.live(id) {
            debug!(slot = id.slot, generation = id.generation, "event from replaced worker dropped");
            return Ok(());
        }
        match event {
            WorkerEvent::Ready { .. } => {
                if let Some(slot) = self.slots[id.slot].as_mut() {
                    slot.ready = true;
                }
                self.came_up = true;
                debug!(slot = id.slot, "worker ready");
            }
            WorkerEvent::Finished { index, outcome, .. } => {
                let expected = self.slots[id.slot]
                    .as_mut()
                    .and_then(|s| s.busy.take())
                    .map(|(i, _)| i);
                if expected != Some(index) {
                    return Err(BatchError::Protocol(format!(
                        "worker {} answered row {index}, expected {expected:?}",
                        id.slot
                    )));
                }
                self.record(index, outcome, progress)?;
            }
            WorkerEvent::SetupFailed { message, .. } => {
                if let Some(mut failed) = self.slots[id.slot].take() {
                    failed.worker.terminate();
                }
                self.setup_lost(id.slot, message, progress)?;
            }
            WorkerEvent::Exited { reason, .. } => {
                self.lose_worker(id.slot, &reason, progress)?;
            }
        }
        Ok(())
    }

    /// The worker in `slot` is gone. Its row is retried or marked lost.
    fn lose_worker(
        &mut self,
        slot: usize,
        reason: &str,
        progress: &mut Option<&mut dyn FnMut(&BatchProgress)>,
    ) -> BatchResult<()> {
        let Some(mut lost) = self.slots[slot].take() else {
            return Ok(());
        };
        lost.worker.terminate();
        if !lost.ready {
            return self.setup_lost(
                slot,
                format!("worker exited before becoming ready: {reason}"),
                progress,
            );
        }
        let Some((index, _)) = lost.busy else {
            debug!(slot, reason, "idle worker exited");
            return Ok(());
        };
        self.charge(index, slot, reason, progress)
    }

    /// A worker in `slot` (already removed) failed before becoming ready.
    fn setup_lost(
        &mut self,
        slot: usize,
        message: String,
        progress: &mut Option<&mut dyn FnMut(&BatchProgress)>,
    ) -> BatchResult<()> {
        if !self.came_up {
            return Err(BatchError::WorkerSetup { slot, message });
        }
        warn!(slot, "replacement worker failed during setup: {message}");
        match self.pending.pop_front() {
            Some(index) => self.charge(index, slot, &message, progress),
            None => Ok(()),
        }
    }

    /// Count one lost attempt against `index`: retry it or mark it lost.
    fn charge(
        &mut self,
        index: usize,
        slot: usize,
        reason: &str,
        progress: &mut Option<&mut dyn FnMut(&BatchProgress)>,
    ) -> BatchResult<()> {
        self.attempts[index] += 1;
        let attempts = self.attempts[index];
        if attempts > self.options.max_row_retries {
            self.record(
                index,
                RowOutcome::failed(RowFailure::WorkerLost {
                    attempts,
                    message: reason.to_string(),
                }),
                progress,
            )
        } else {
            warn!(row = index, slot, attempts, reason, "worker lost, retrying row");
            self.pending.push_front(index);
            Ok(())
        }
    }

    fn expire_timeouts(
        &mut self,
        progress: &mut Option<&mut dyn FnMut(&BatchProgress)>,
    ) -> BatchResult<()> {
        if let Some(limit) = self.options.setup_timeout {
            for slot in 0..self.slots.len() {
                let stalled = matches!(
                    &self.slots[slot],
                    Some(s) if !s.ready && s.spawned_at.elapsed() >= limit
                );
                if !stalled {
                    continue;
                }
                if let Some(mut stuck) = self.slots[slot].take() {
                    stuck.worker.terminate();
                }
                self.setup_lost(
                    slot,
                    format!("worker not ready after {:.1}s", limit.as_secs_f64()),
                    progress,
                )?;
            }
        }
        let Some(timeout) = self.options.row_timeout else {
            return Ok(());
        };
        for slot in 0..self.slots.len() {
            let expired = match &self.slots[slot] {
                Some(Slot {
                    busy: Some((index, started)),
                    ..
                }) if started.elapsed() >= timeout => Some((*index, started.elapsed())),
                _ => None,
            };
            let Some((index, after)) = expired else {
                continue;
            };
            if let Some(mut hung) = self.slots[slot].take() {
                hung.worker.terminate();
            }
            self.record(
                index,
                RowOutcome::failed(RowFailure::TimedOut {
                    after_s: after.as_secs_f64(),
                }),
                progress,
            )?;
        }
        Ok(())
    }

    fn record(
        &mut self,
        index: usize,
        outcome: RowOutcome,
        progress: &mut Option<&mut dyn FnMut(&BatchProgress)>,
    ) -> BatchResult<()> {
        if self.results[index].is_some() {
            return Ok(());
        }
        if let Some(failure) = outcome.failure() {
            warn!(row = index, kind = failure.kind(), "row failed: {failure}");
            if self.options.failure_policy == FailurePolicy::Abort {
                return Err(BatchError::RowFailed {
                    index,
                    failure: failure.clone(),
                });
            }
            self.failed += 1;
        }
        self.results[index] = Some(outcome);
        self.done += 1;

        if let Some(cb) = progress.as_deref_mut() {
            cb(&BatchProgress {
                completed: self.done,
                failed: self.failed,
                total: self.results.len(),
                workers: self.slots.iter().flatten().count(),
                elapsed_s: self.stopwatch.elapsed_s(),
            });
        }
        Ok(())
    }

    fn shutdown_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(mut live) = slot.take() {
                live.worker.shutdown();
            }
        }
    }
}
