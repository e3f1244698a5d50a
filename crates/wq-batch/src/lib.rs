//! wq-batch: evaluation of design rows across a pool of isolated workers.
//!
//! - evaluate (one design row -> one quality simulation)
//! - pool (scheduling, ordering, timeouts, crash retry, failure policy)
//! - process / thread (worker backends behind [`WorkerSpawner`])
//! - protocol + worker (line-delimited JSON spoken by worker processes)

pub mod error;
pub mod evaluate;
pub mod outcome;
pub mod policy;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod thread;
pub mod worker;

pub use error::{BatchError, BatchResult, EvalError};
pub use evaluate::{
    Baseline, EvaluationConfig, Evaluator, EvaluatorFactory, ModelEvaluator, ModelEvaluatorFactory,
};
pub use outcome::{BatchReport, FailurePolicy, RowFailure, RowOutcome};
pub use policy::{
    DEFAULT_SETUP_TIMEOUT, DEFAULT_WORKER_FRACTION, default_worker_count, resolve_worker_count,
};
pub use pool::{
    BatchOptions, BatchProgress, Worker, WorkerEvent, WorkerId, WorkerSpawner, run_all,
};
pub use process::{ProcessSpawner, WorkerLauncher};
pub use protocol::{RowTask, WorkerReply, WorkerSetup};
pub use thread::ThreadSpawner;
pub use worker::serve;
