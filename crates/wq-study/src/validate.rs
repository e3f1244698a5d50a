//! Study validation logic.

use crate::schema::{BoundSourceDef, ExecutionDef, QualityDef, StudyConfig};
use std::collections::HashSet;
use wq_design::ProxySpec;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Duplicate name: {name} in {context}")]
    DuplicateName { name: String, context: String },

    #[error("Missing reference: {name} in {context}")]
    MissingReference { name: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported version: {version}")]
    UnsupportedVersion { version: u32 },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

pub fn validate_study(study: &StudyConfig) -> Result<(), ValidationError> {
    if study.version > crate::LATEST_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            version: study.version,
        });
    }

    if study.constants_vary.is_empty() && study.species_vary.is_empty() {
        return Err(invalid(
            "constants_vary/species_vary",
            "[]",
            "at least one variable must vary",
        ));
    }
    check_unique(&study.constants_vary, "constants_vary")?;
    check_unique(&study.species_vary, "species_vary")?;
    if let Some(name) = study
        .constants_vary
        .iter()
        .find(|c| study.species_vary.contains(c))
    {
        return Err(ValidationError::DuplicateName {
            name: name.clone(),
            context: "constants_vary and species_vary".to_string(),
        });
    }

    if study.trajectories < 2 {
        return Err(invalid(
            "trajectories",
            study.trajectories,
            "at least two trajectories are needed",
        ));
    }
    if study.total_samples < study.trajectories {
        return Err(invalid(
            "total_samples",
            study.total_samples,
            "must be at least the number of trajectories",
        ));
    }
    if study.num_levels < 2 || study.num_levels % 2 != 0 {
        return Err(invalid(
            "num_levels",
            study.num_levels,
            "must be even and at least 2",
        ));
    }
    if !study.days.is_finite() || study.days <= 0.0 {
        return Err(invalid("days", study.days, "must be positive and finite"));
    }
    if study.reference_entity.trim().is_empty() {
        return Err(invalid("reference_entity", "''", "must not be empty"));
    }

    validate_bounds(&study.bound_source)?;
    validate_proxy(&study.proxy, study)?;
    validate_quality(&study.quality, study.days)?;
    validate_execution(&study.execution)?;
    Ok(())
}

fn check_unique(names: &[String], context: &str) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::DuplicateName {
                name: name.clone(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_bounds(source: &BoundSourceDef) -> Result<(), ValidationError> {
    match source {
        BoundSourceDef::Table { path } => {
            if path.as_os_str().is_empty() {
                return Err(invalid("bound_source path", "''", "must not be empty"));
            }
        }
        BoundSourceDef::Factor { low, high } => {
            if !low.is_finite() || !high.is_finite() {
                return Err(invalid(
                    "bound_source factor",
                    format!("[{low}, {high}]"),
                    "must be finite",
                ));
            }
            if low > high {
                return Err(invalid(
                    "bound_source factor",
                    format!("[{low}, {high}]"),
                    "low must not exceed high",
                ));
            }
        }
    }
    Ok(())
}

fn validate_proxy(proxy: &ProxySpec, study: &StudyConfig) -> Result<(), ValidationError> {
    let ProxySpec::CarbonPoolSplit(split) = proxy else {
        return Ok(());
    };
    split
        .check()
        .map_err(|e| invalid("proxy", "carbon_pool_split", &e.to_string()))?;
    for fraction in &split.fractions {
        if !study.species_vary.contains(&fraction.species) {
            return Err(ValidationError::MissingReference {
                name: fraction.species.clone(),
                context: format!("proxy fraction '{}' species (not in species_vary)", fraction.name),
            });
        }
    }
    let mut names: Vec<&String> = study.constants_vary.iter().collect();
    names.push(&split.total.name);
    names.extend(split.fractions.iter().map(|f| &f.name));
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::DuplicateName {
                name: name.clone(),
                context: "proxy variables".to_string(),
            });
        }
    }
    Ok(())
}

fn validate_quality(quality: &QualityDef, days: f64) -> Result<(), ValidationError> {
    if let Some(day) = quality.report_start_day {
        if !day.is_finite() || day < 0.0 || day >= days {
            return Err(invalid(
                "quality report_start_day",
                day,
                "must lie in [0, days)",
            ));
        }
    }
    Ok(())
}

fn validate_execution(execution: &ExecutionDef) -> Result<(), ValidationError> {
    if execution.workers == Some(0) {
        return Err(invalid("execution workers", 0, "must be at least 1"));
    }
    let fraction = execution.worker_fraction;
    if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
        return Err(invalid(
            "execution worker_fraction",
            fraction,
            "must lie in (0, 1]",
        ));
    }
    if let Some(t) = execution.row_timeout_s {
        if !t.is_finite() || t <= 0.0 {
            return Err(invalid(
                "execution row_timeout_s",
                t,
                "must be positive and finite",
            ));
        }
    }
    let setup = execution.setup_timeout_s;
    if !setup.is_finite() || setup <= 0.0 {
        return Err(invalid(
            "execution setup_timeout_s",
            setup,
            "must be positive and finite",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ExecutionDef;

    fn study() -> StudyConfig {
        serde_yaml::from_str(
            r#"
trajectories: 3
seed: 4
days: 3
network_file: net.yaml
reaction_file: scheme.yaml
reference_entity: "1"
constants_vary: [k1]
species_vary: [DOC1, DOC2, TOTNH]
bound_source: { type: factor, low: 0.8, high: 1.25 }
"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_are_filled_in() {
        let s = study();
        assert_eq!(s.total_samples, 1000);
        assert_eq!(s.num_levels, 4);
        assert_eq!(s.execution, ExecutionDef::default());
        assert!(s.quality.include_links);
        validate_study(&s).unwrap();
    }

    #[test]
    fn odd_levels_are_rejected() {
        let mut s = study();
        s.num_levels = 5;
        assert!(matches!(
            validate_study(&s),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn variable_in_both_lists_is_rejected() {
        let mut s = study();
        s.species_vary.push("k1".into());
        assert!(matches!(
            validate_study(&s),
            Err(ValidationError::DuplicateName { .. })
        ));
    }

    #[test]
    fn report_start_must_precede_the_horizon() {
        let mut s = study();
        s.quality.report_start_day = Some(3.0);
        assert!(validate_study(&s).is_err());
        s.quality.report_start_day = Some(2.0);
        validate_study(&s).unwrap();
    }

    #[test]
    fn proxy_fraction_must_name_a_varied_species() {
        let mut s = study();
        s.proxy = serde_yaml::from_str(
            r#"
type: carbon_pool_split
total: { name: TOC, baseline: 1.5 }
fractions:
  - { name: S1, species: DOC1 }
  - { name: S3, species: DOC3 }
"#,
        )
        .unwrap();
        assert!(matches!(
            validate_study(&s),
            Err(ValidationError::MissingReference { .. })
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut s = study();
        s.execution.workers = Some(0);
        assert!(validate_study(&s).is_err());
    }

    #[test]
    fn setup_timeout_must_be_positive() {
        let mut s = study();
        assert_eq!(s.execution.setup_timeout_s, 120.0);
        s.execution.setup_timeout_s = 0.0;
        assert!(validate_study(&s).is_err());
    }
}
