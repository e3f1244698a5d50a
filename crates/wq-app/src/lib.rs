//! Shared application service layer for wqmorris.
//!
//! Centralizes study loading, compilation of a study into runtime options,
//! run orchestration (baseline, problem, design, batch, artifact) and the
//! queries the command line runs against saved artifacts.

pub mod compile;
pub mod error;
pub mod progress;
pub mod query;
pub mod run_service;
pub mod study_service;

pub use error::{AppError, AppResult};
pub use progress::{RunProgressEvent, RunStage};
pub use query::{
    ArtifactSummary, EntityScreening, MetricSelector, Reduction, TimeScreening, extract_metric,
    screen, screen_entities, screen_over_time, summarize,
};
pub use run_service::{RunOverrides, RunRequest, RunResponse, RunTimingSummary, run_study};
pub use study_service::{LoadedStudy, load_study, validate_study_file};
