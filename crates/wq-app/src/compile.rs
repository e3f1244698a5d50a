//! Compilation of a loaded study into runtime options.

use std::time::Duration;
use wq_batch::{BatchOptions, EvaluationConfig};
use wq_design::{BoundRule, BoundTable, SampleOptions};
use wq_model::QualityRequest;
use wq_study::{BoundSourceDef, ExecutionDef, QualityDef};

use crate::error::AppResult;
use crate::study_service::LoadedStudy;

pub fn evaluation_config(study: &LoadedStudy) -> EvaluationConfig {
    let config = &study.config;
    EvaluationConfig {
        network_file: study.network_file(),
        reaction_file: study.reaction_file(),
        report_file: "model.rpt".into(),
        duration_s: config.duration_s(),
        reference_entity: config.reference_entity.clone(),
        constants_vary: config.constants_vary.clone(),
        species_vary: config.species_vary.clone(),
        proxy: config.proxy.clone(),
        resolve_hydraulics: config.execution.resolve_hydraulics,
        quality: quality_request(&config.quality),
    }
}

pub fn quality_request(quality: &QualityDef) -> QualityRequest {
    QualityRequest {
        layout: quality.layout,
        start_s: quality.report_start_day.unwrap_or(0.0) * 86_400.0,
        include_links: quality.include_links,
        include_age: quality.include_age,
    }
}

pub fn batch_options(execution: &ExecutionDef, workers: Option<usize>) -> BatchOptions {
    BatchOptions {
        worker_count: workers.or(execution.workers),
        worker_fraction: execution.worker_fraction,
        row_timeout: execution.row_timeout_s.map(Duration::from_secs_f64),
        setup_timeout: Some(Duration::from_secs_f64(execution.setup_timeout_s)),
        failure_policy: execution.failure_policy,
        max_row_retries: execution.max_row_retries,
    }
}

/// The study's bound source; percent tables are read from disk here.
pub fn bound_rule(study: &LoadedStudy) -> AppResult<BoundRule> {
    Ok(match &study.config.bound_source {
        BoundSourceDef::Table { path } => {
            BoundRule::Percent(BoundTable::from_csv_path(&study.resolve(path))?)
        }
        BoundSourceDef::Factor { low, high } => BoundRule::Factor {
            low: *low,
            high: *high,
        },
    })
}

pub fn sample_options(study: &LoadedStudy) -> SampleOptions {
    SampleOptions {
        num_levels: study.config.num_levels,
        optimal_trajectories: Some(study.config.trajectories),
    }
}
