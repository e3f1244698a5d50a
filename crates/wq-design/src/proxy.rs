//! Proxy transforms between sampled variables and native model species.
//!
//! Some studies sample quantities that the model does not store directly
//! (a bulk organic-carbon total split into pool fractions, say) and convert
//! them to native initial concentrations before each run. The conversion is
//! a named, swappable step: the problem builder asks it for the proxy-space
//! variable list and the evaluator asks it for native values, so both sides
//! share one formula.

use serde::{Deserialize, Serialize};

use crate::error::{DesignError, DesignResult};

pub trait ProxyTransform: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Proxy-space variables and their baselines, given native species and
    /// their baseline concentrations.
    fn baseline(&self, species: &[String], native: &[f64]) -> DesignResult<Vec<(String, f64)>>;

    /// Map one row's proxy-space values to native concentrations, aligned
    /// with `species`.
    fn to_native(&self, species: &[String], proxy: &[f64]) -> DesignResult<Vec<f64>>;

    /// Number of proxy-space variables for `species`.
    fn proxy_len(&self, species: &[String]) -> DesignResult<usize>;

    /// Proxy-space variable names, in the order [`ProxyTransform::baseline`]
    /// returns them. Needs no model state.
    fn variable_names(&self, species: &[String]) -> DesignResult<Vec<String>>;
}

/// Serializable selection of a proxy transform.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxySpec {
    /// Species are sampled directly.
    #[default]
    None,
    CarbonPoolSplit(CarbonPoolSplit),
}

impl ProxySpec {
    pub fn transform(&self) -> Box<dyn ProxyTransform> {
        match self {
            ProxySpec::None => Box::new(Identity),
            ProxySpec::CarbonPoolSplit(split) => Box::new(split.clone()),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, ProxySpec::None)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl ProxyTransform for Identity {
    fn name(&self) -> &'static str {
        "none"
    }

    fn baseline(&self, species: &[String], native: &[f64]) -> DesignResult<Vec<(String, f64)>> {
        check_len("native baseline", species.len(), native.len())?;
        Ok(species.iter().cloned().zip(native.iter().copied()).collect())
    }

    fn to_native(&self, species: &[String], proxy: &[f64]) -> DesignResult<Vec<f64>> {
        check_len("species values", species.len(), proxy.len())?;
        Ok(proxy.to_vec())
    }

    fn proxy_len(&self, species: &[String]) -> DesignResult<usize> {
        Ok(species.len())
    }

    fn variable_names(&self, species: &[String]) -> DesignResult<Vec<String>> {
        Ok(species.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyVariable {
    pub name: String,
    pub baseline: f64,
}

/// One pool fraction `S` standing in for native species `species`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolFraction {
    pub name: String,
    pub species: String,
    /// When absent, derived from the native baseline: `S = DOC · divisor / total`.
    #[serde(default)]
    pub baseline: Option<f64>,
}

/// Total organic carbon plus pool fractions replacing pool species.
///
/// `DOC_i = S_i · TOC / divisor`. Proxy variables are ordered
/// `[total, fractions.., remaining species..]` with remaining species in
/// their declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonPoolSplit {
    pub total: ProxyVariable,
    pub fractions: Vec<PoolFraction>,
    #[serde(default = "default_divisor")]
    pub divisor: f64,
}

fn default_divisor() -> f64 {
    12000.0
}

impl CarbonPoolSplit {
    pub fn check(&self) -> DesignResult<()> {
        if !self.divisor.is_finite() || self.divisor == 0.0 {
            return Err(DesignError::Proxy(format!(
                "divisor must be finite and non-zero, got {}",
                self.divisor
            )));
        }
        if self.fractions.is_empty() {
            return Err(DesignError::Proxy("carbon pool split has no fractions".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        seen.insert(self.total.name.as_str());
        for fraction in &self.fractions {
            if !seen.insert(fraction.name.as_str()) {
                return Err(DesignError::DuplicateVariable(fraction.name.clone()));
            }
        }
        let mut pooled = std::collections::HashSet::new();
        for fraction in &self.fractions {
            if !pooled.insert(fraction.species.as_str()) {
                return Err(DesignError::Proxy(format!(
                    "species '{}' is split by more than one fraction",
                    fraction.species
                )));
            }
        }
        Ok(())
    }

    /// Indices into `species` of each fraction's pool species.
    fn pool_indices(&self, species: &[String]) -> DesignResult<Vec<usize>> {
        self.check()?;
        self.fractions
            .iter()
            .map(|f| {
                species.iter().position(|s| s == &f.species).ok_or_else(|| {
                    DesignError::Proxy(format!(
                        "pool species '{}' for fraction '{}' is not among the varied species",
                        f.species, f.name
                    ))
                })
            })
            .collect()
    }

    fn remaining<'a>(&self, species: &'a [String], pool: &[usize]) -> Vec<(usize, &'a String)> {
        species
            .iter()
            .enumerate()
            .filter(|(i, _)| !pool.contains(i))
            .collect()
    }
}

impl ProxyTransform for CarbonPoolSplit {
    fn name(&self) -> &'static str {
        "carbon_pool_split"
    }

    fn baseline(&self, species: &[String], native: &[f64]) -> DesignResult<Vec<(String, f64)>> {
        check_len("native baseline", species.len(), native.len())?;
        let pool = self.pool_indices(species)?;
        let total = self.total.baseline;
        if !total.is_finite() || total == 0.0 {
            return Err(DesignError::Proxy(format!(
                "total '{}' baseline must be finite and non-zero, got {total}",
                self.total.name
            )));
        }

        let mut out = Vec::with_capacity(1 + species.len());
        out.push((self.total.name.clone(), total));
        for (fraction, &idx) in self.fractions.iter().zip(&pool) {
            let value = fraction
                .baseline
                .unwrap_or(native[idx] * self.divisor / total);
            out.push((fraction.name.clone(), value));
        }
        for (i, name) in self.remaining(species, &pool) {
            out.push((name.clone(), native[i]));
        }
        Ok(out)
    }

    fn to_native(&self, species: &[String], proxy: &[f64]) -> DesignResult<Vec<f64>> {
        let pool = self.pool_indices(species)?;
        let expected = 1 + self.fractions.len() + species.len() - pool.len();
        check_len("proxy values", expected, proxy.len())?;

        let total = proxy[0];
        let mut native = vec![0.0; species.len()];
        for (k, &idx) in pool.iter().enumerate() {
            native[idx] = proxy[1 + k] * total / self.divisor;
        }
        let offset = 1 + self.fractions.len();
        for (k, (i, _)) in self.remaining(species, &pool).into_iter().enumerate() {
            native[i] = proxy[offset + k];
        }
        Ok(native)
    }

    fn proxy_len(&self, species: &[String]) -> DesignResult<usize> {
        let pool = self.pool_indices(species)?;
        Ok(1 + self.fractions.len() + species.len() - pool.len())
    }

    fn variable_names(&self, species: &[String]) -> DesignResult<Vec<String>> {
        let pool = self.pool_indices(species)?;
        let mut names = vec![self.total.name.clone()];
        names.extend(self.fractions.iter().map(|f| f.name.clone()));
        names.extend(self.remaining(species, &pool).into_iter().map(|(_, n)| n.clone()));
        Ok(names)
    }
}

fn check_len(what: &str, expected: usize, found: usize) -> DesignResult<()> {
    if expected != found {
        return Err(DesignError::LengthMismatch {
            what: what.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn beaker_split() -> CarbonPoolSplit {
        CarbonPoolSplit {
            total: ProxyVariable {
                name: "TOC".into(),
                baseline: 1.5,
            },
            fractions: vec![
                PoolFraction {
                    name: "S1".into(),
                    species: "DOC1".into(),
                    baseline: Some(0.016),
                },
                PoolFraction {
                    name: "S2".into(),
                    species: "DOC2".into(),
                    baseline: Some(0.57),
                },
            ],
            divisor: 12000.0,
        }
    }

    #[test]
    fn identity_passes_through() {
        let species = names(&["A", "B"]);
        let t = ProxySpec::None.transform();
        assert_eq!(t.to_native(&species, &[1.0, 2.0]).unwrap(), vec![1.0, 2.0]);
        assert!(t.to_native(&species, &[1.0]).is_err());
    }

    #[test]
    fn carbon_split_orders_proxy_variables() {
        let species = names(&["DOC1", "DOC2", "TOTNH", "TOTCO"]);
        let split = beaker_split();
        let vars = split.baseline(&species, &[0.0, 0.0, 3.0, 4.0]).unwrap();
        let labels: Vec<&str> = vars.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(labels, ["TOC", "S1", "S2", "TOTNH", "TOTCO"]);
        assert_eq!(vars[3].1, 3.0);
        assert_eq!(split.proxy_len(&species).unwrap(), 5);
        assert_eq!(split.variable_names(&species).unwrap(), labels);
    }

    #[test]
    fn carbon_split_converts_fractions() {
        let species = names(&["DOC1", "DOC2", "TOTNH"]);
        let split = beaker_split();
        let native = split
            .to_native(&species, &[1.5, 0.016, 0.57, 2.0])
            .unwrap();
        assert!((native[0] - 0.016 * 1.5 / 12000.0).abs() < 1e-15);
        assert!((native[1] - 0.57 * 1.5 / 12000.0).abs() < 1e-15);
        assert_eq!(native[2], 2.0);
    }

    #[test]
    fn missing_fraction_baseline_is_derived_from_native() {
        let species = names(&["DOC1"]);
        let mut split = beaker_split();
        split.fractions.truncate(1);
        split.fractions[0].baseline = None;
        let vars = split.baseline(&species, &[0.002]).unwrap();
        assert!((vars[1].1 - 16.0).abs() < 1e-9);
        let back = split.to_native(&species, &[vars[0].1, vars[1].1]).unwrap();
        assert!((back[0] - 0.002).abs() < 1e-15);
    }

    #[test]
    fn unknown_pool_species_is_rejected() {
        let species = names(&["TOTNH"]);
        assert!(matches!(
            beaker_split().baseline(&species, &[1.0]),
            Err(DesignError::Proxy(_))
        ));
    }

    #[test]
    fn spec_round_trips_through_yaml_shape() {
        let json = r#"{"type":"carbon_pool_split","total":{"name":"TOC","baseline":1.5},
            "fractions":[{"name":"S1","species":"DOC1"}]}"#;
        let spec: ProxySpec = serde_json::from_str(json).unwrap();
        match spec {
            ProxySpec::CarbonPoolSplit(split) => assert_eq!(split.divisor, 12000.0),
            other => panic!("unexpected {other:?}"),
        }
    }
}
