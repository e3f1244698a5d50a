//! Sensitivity problem: ordered variables with `(low, high)` bounds.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::bounds::BoundRule;
use crate::error::{DesignError, DesignResult};
use crate::proxy::ProxyTransform;

/// Ordered variable names and their bounds.
///
/// Immutable once built. Serialized as
/// `{ "num_vars": n, "names": [...], "bounds": [[low, high], ...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProblemRecord", into = "ProblemRecord")]
pub struct ProblemSpec {
    names: Vec<String>,
    bounds: Vec<(f64, f64)>,
}

#[derive(Serialize, Deserialize)]
struct ProblemRecord {
    num_vars: usize,
    names: Vec<String>,
    bounds: Vec<[f64; 2]>,
}

impl ProblemSpec {
    pub fn new(names: Vec<String>, bounds: Vec<(f64, f64)>) -> DesignResult<Self> {
        if names.is_empty() {
            return Err(DesignError::EmptyProblem);
        }
        if names.len() != bounds.len() {
            return Err(DesignError::LengthMismatch {
                what: "problem bounds".to_string(),
                expected: names.len(),
                found: bounds.len(),
            });
        }
        let mut seen = HashSet::new();
        for (name, &(low, high)) in names.iter().zip(&bounds) {
            if !seen.insert(name.as_str()) {
                return Err(DesignError::DuplicateVariable(name.clone()));
            }
            for value in [low, high] {
                if !value.is_finite() {
                    return Err(DesignError::NonFinite {
                        what: format!("bound of '{name}'"),
                        value,
                    });
                }
            }
            if low > high {
                return Err(DesignError::InvalidBound {
                    name: name.clone(),
                    reason: format!("low {low} exceeds high {high}"),
                });
            }
        }
        Ok(Self { names, bounds })
    }

    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl TryFrom<ProblemRecord> for ProblemSpec {
    type Error = DesignError;

    fn try_from(record: ProblemRecord) -> Result<Self, Self::Error> {
        if record.num_vars != record.names.len() {
            return Err(DesignError::LengthMismatch {
                what: "problem names".to_string(),
                expected: record.num_vars,
                found: record.names.len(),
            });
        }
        let bounds = record.bounds.into_iter().map(|[lo, hi]| (lo, hi)).collect();
        ProblemSpec::new(record.names, bounds)
    }
}

impl From<ProblemSpec> for ProblemRecord {
    fn from(problem: ProblemSpec) -> Self {
        Self {
            num_vars: problem.names.len(),
            bounds: problem.bounds.iter().map(|&(lo, hi)| [lo, hi]).collect(),
            names: problem.names,
        }
    }
}

/// Names of the problem variables: constants, then proxy-space species.
pub fn problem_variable_names(
    constants_vary: &[String],
    species_vary: &[String],
    proxy: &dyn ProxyTransform,
) -> DesignResult<Vec<String>> {
    let mut names = constants_vary.to_vec();
    names.extend(proxy.variable_names(species_vary)?);
    Ok(names)
}

/// Build the problem from baseline model state.
///
/// Variables are the constants in declared order, then the proxy-space
/// species variables. Every variable gets its bounds from `rule`.
pub fn build_problem(
    constants_vary: &[String],
    species_vary: &[String],
    baseline_constants: &[f64],
    baseline_concentrations: &[f64],
    rule: &BoundRule,
    proxy: &dyn ProxyTransform,
) -> DesignResult<ProblemSpec> {
    if constants_vary.len() != baseline_constants.len() {
        return Err(DesignError::LengthMismatch {
            what: "baseline constants".to_string(),
            expected: constants_vary.len(),
            found: baseline_constants.len(),
        });
    }
    if species_vary.len() != baseline_concentrations.len() {
        return Err(DesignError::LengthMismatch {
            what: "baseline concentrations".to_string(),
            expected: species_vary.len(),
            found: baseline_concentrations.len(),
        });
    }

    let mut variables: Vec<(String, f64)> = constants_vary
        .iter()
        .cloned()
        .zip(baseline_constants.iter().copied())
        .collect();
    variables.extend(proxy.baseline(species_vary, baseline_concentrations)?);

    let mut names = Vec::with_capacity(variables.len());
    let mut bounds = Vec::with_capacity(variables.len());
    for (name, baseline) in variables {
        let pair = rule.bounds_for(&name, baseline)?;
        debug!(variable = %name, baseline, low = pair.0, high = pair.1, "bounds");
        names.push(name);
        bounds.push(pair);
    }

    ProblemSpec::new(names, bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::BoundTable;
    use crate::proxy::{CarbonPoolSplit, PoolFraction, ProxySpec, ProxyVariable};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn constants_come_before_species() {
        let table = BoundTable::from_pairs([("k1", 20.0), ("k2", 10.0), ("A", 50.0)]).unwrap();
        let problem = build_problem(
            &names(&["k1", "k2"]),
            &names(&["A"]),
            &[10.0, 1.0],
            &[2.0],
            &BoundRule::Percent(table),
            ProxySpec::None.transform().as_ref(),
        )
        .unwrap();
        assert_eq!(problem.names(), names(&["k1", "k2", "A"]).as_slice());
        assert!((problem.bounds()[0].0 - 8.0).abs() < 1e-12);
        assert!((problem.bounds()[0].1 - 12.0).abs() < 1e-12);
        assert_eq!(problem.bounds()[2], (1.0, 3.0));
    }

    #[test]
    fn missing_bound_names_the_variable() {
        let table = BoundTable::from_pairs([("k1", 20.0)]).unwrap();
        let err = build_problem(
            &names(&["k1"]),
            &names(&["A"]),
            &[1.0],
            &[1.0],
            &BoundRule::Percent(table),
            ProxySpec::None.transform().as_ref(),
        )
        .unwrap_err();
        assert!(matches!(err, DesignError::MissingBound(ref n) if n == "A"));
    }

    #[test]
    fn proxy_variables_replace_pool_species() {
        let split = ProxySpec::CarbonPoolSplit(CarbonPoolSplit {
            total: ProxyVariable {
                name: "TOC".into(),
                baseline: 1.5,
            },
            fractions: vec![PoolFraction {
                name: "S1".into(),
                species: "DOC1".into(),
                baseline: Some(0.016),
            }],
            divisor: 12000.0,
        });
        let problem = build_problem(
            &names(&["k1"]),
            &names(&["DOC1", "NH"]),
            &[1.0],
            &[0.0, 4.0],
            &BoundRule::Factor {
                low: 0.8,
                high: 1.25,
            },
            split.transform().as_ref(),
        )
        .unwrap();
        assert_eq!(problem.names(), names(&["k1", "TOC", "S1", "NH"]).as_slice());
        assert_eq!(problem.bounds()[3], (3.2, 5.0));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = build_problem(
            &names(&["k1", "k2"]),
            &[],
            &[1.0],
            &[],
            &BoundRule::Factor {
                low: 0.5,
                high: 2.0,
            },
            ProxySpec::None.transform().as_ref(),
        )
        .unwrap_err();
        assert!(matches!(err, DesignError::LengthMismatch { .. }));
    }

    #[test]
    fn serialized_shape_is_stable() {
        let problem = ProblemSpec::new(names(&["a", "b"]), vec![(0.0, 1.0), (2.0, 3.0)]).unwrap();
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["num_vars"], 2);
        assert_eq!(json["bounds"][1][0], 2.0);
        let back: ProblemSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, problem);
    }

    #[test]
    fn deserialization_checks_invariants() {
        let bad = r#"{"num_vars":1,"names":["a"],"bounds":[[2.0,1.0]]}"#;
        assert!(serde_json::from_str::<ProblemSpec>(bad).is_err());
        let dup = r#"{"num_vars":2,"names":["a","a"],"bounds":[[0,1],[0,1]]}"#;
        assert!(serde_json::from_str::<ProblemSpec>(dup).is_err());
    }
}
