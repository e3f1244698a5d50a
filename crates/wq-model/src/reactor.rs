//! Reference batch-reactor binding.
//!
//! Water leaves the source node carrying that node's initial concentrations
//! and reacts with first-order kinetics while it travels. Every entity sees
//! the source trajectory delayed by its travel time; until that water
//! arrives the entity holds its own initial concentrations.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use wq_core::{ensure_finite, ensure_non_negative};

use crate::binding::ModelBinding;
use crate::error::{ModelError, ModelResult};
use crate::files::{NetworkFile, SchemeFile};
use crate::types::{
    EntityKind, EntityTrace, QualityRequest, QualityResults, ResultLayout, SpeciesSeries,
    TimeSample,
};

/// Concentrations slightly below zero from round-off are clamped to zero.
const NEGATIVE_TOLERANCE: f64 = 1e-9;

#[derive(Debug)]
struct Report {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Report {
    fn create(path: &Path) -> ModelResult<Self> {
        let file = File::create(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    fn line(&mut self, text: &str) -> ModelResult<()> {
        writeln!(self.writer, "{text}").map_err(|source| ModelError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn finish(mut self) -> ModelResult<()> {
        self.writer.flush().map_err(|source| ModelError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
struct Reaction {
    reactant: usize,
    rate: String,
    products: Vec<(usize, String)>,
}

#[derive(Debug, Clone)]
struct LoadedScheme {
    step_s: f64,
    constants: BTreeMap<String, f64>,
    species: Vec<String>,
    defaults: Vec<f64>,
    reactions: Vec<Reaction>,
    initial: BTreeMap<String, Vec<f64>>,
}

impl LoadedScheme {
    fn compile(file: SchemeFile) -> Self {
        let species: Vec<String> = file.species.iter().map(|s| s.id.clone()).collect();
        let index = |name: &str| species.iter().position(|s| s == name).unwrap_or(0);
        let reactions = file
            .reactions
            .iter()
            .map(|r| Reaction {
                reactant: index(&r.reactant),
                rate: r.rate.clone(),
                products: r
                    .products
                    .iter()
                    .map(|p| (index(&p.species), p.yield_constant.clone()))
                    .collect(),
            })
            .collect();
        let defaults: Vec<f64> = file.species.iter().map(|s| s.initial).collect();
        let initial = file
            .initial
            .iter()
            .map(|(node, values)| {
                let row = species
                    .iter()
                    .zip(&defaults)
                    .map(|(name, default)| values.get(name).copied().unwrap_or(*default))
                    .collect();
                (node.clone(), row)
            })
            .collect();
        Self {
            step_s: file.quality_step_s,
            constants: file.constants,
            species,
            defaults,
            reactions,
            initial,
        }
    }

    fn species_index(&self, name: &str) -> ModelResult<usize> {
        self.species
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| ModelError::UnknownSpecies(name.to_string()))
    }

    fn node_state(&self, node: &str) -> &[f64] {
        self.initial
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(&self.defaults)
    }

    fn constant(&self, name: &str) -> ModelResult<f64> {
        let value = *self
            .constants
            .get(name)
            .ok_or_else(|| ModelError::UnknownConstant(name.to_string()))?;
        Ok(ensure_non_negative(value, name)?)
    }
}

/// Per-entity travel time from the source, hours.
#[derive(Debug, Clone, Default)]
struct Hydraulics {
    node_lag_h: BTreeMap<String, f64>,
    link_lag_h: BTreeMap<String, f64>,
    link_upstream: BTreeMap<String, String>,
}

/// Self-contained [`ModelBinding`] driven by YAML network and scheme files.
#[derive(Debug, Default)]
pub struct BatchReactor {
    network: Option<NetworkFile>,
    report: Option<Report>,
    scheme: Option<LoadedScheme>,
    horizon_s: f64,
    hydraulics: Option<Hydraulics>,
}

impl BatchReactor {
    pub fn new() -> Self {
        Self::default()
    }

    fn network(&self) -> ModelResult<&NetworkFile> {
        self.network.as_ref().ok_or(ModelError::NotOpen)
    }

    fn scheme(&self) -> ModelResult<&LoadedScheme> {
        self.scheme.as_ref().ok_or(ModelError::SchemeNotOpen)
    }

    fn scheme_mut(&mut self) -> ModelResult<&mut LoadedScheme> {
        self.scheme.as_mut().ok_or(ModelError::SchemeNotOpen)
    }

    fn report_line(&mut self, text: &str) -> ModelResult<()> {
        match self.report.as_mut() {
            Some(report) => report.line(text),
            None => Ok(()),
        }
    }

    /// Integrate the source water from t=0 to the horizon, one state per step.
    fn integrate_source(&self, scheme: &LoadedScheme, c0: &[f64]) -> ModelResult<Vec<Vec<f64>>> {
        let rates: Vec<f64> = scheme
            .reactions
            .iter()
            .map(|r| scheme.constant(&r.rate))
            .collect::<ModelResult<_>>()?;
        let yields: Vec<Vec<f64>> = scheme
            .reactions
            .iter()
            .map(|r| {
                r.products
                    .iter()
                    .map(|(_, name)| scheme.constant(name))
                    .collect::<ModelResult<Vec<_>>>()
            })
            .collect::<ModelResult<_>>()?;

        let rhs = |c: &[f64]| -> Vec<f64> {
            let mut dc = vec![0.0; c.len()];
            for ((reaction, k), ys) in scheme.reactions.iter().zip(&rates).zip(&yields) {
                let flux = k * c[reaction.reactant];
                dc[reaction.reactant] -= flux;
                for ((product, _), y) in reaction.products.iter().zip(ys) {
                    dc[*product] += y * flux;
                }
            }
            dc
        };

        let h = scheme.step_s / 3600.0;
        let steps = (self.horizon_s / scheme.step_s).floor() as usize;
        let mut states = Vec::with_capacity(steps + 1);
        let mut c = c0.to_vec();
        states.push(c.clone());

        for step in 1..=steps {
            let k1 = rhs(&c);
            let mid1: Vec<f64> = c.iter().zip(&k1).map(|(x, d)| x + 0.5 * h * d).collect();
            let k2 = rhs(&mid1);
            let mid2: Vec<f64> = c.iter().zip(&k2).map(|(x, d)| x + 0.5 * h * d).collect();
            let k3 = rhs(&mid2);
            let end: Vec<f64> = c.iter().zip(&k3).map(|(x, d)| x + h * d).collect();
            let k4 = rhs(&end);

            for i in 0..c.len() {
                let next = c[i] + h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
                if !next.is_finite() || next < -NEGATIVE_TOLERANCE {
                    return Err(ModelError::NonConvergent {
                        time_s: step as f64 * scheme.step_s,
                        what: format!("species '{}' reached {}", scheme.species[i], next),
                    });
                }
                c[i] = next.max(0.0);
            }
            states.push(c.clone());
        }
        Ok(states)
    }
}

/// Linear interpolation into a step-sampled trajectory.
fn state_at(states: &[Vec<f64>], step_h: f64, t_h: f64) -> Vec<f64> {
    let last = states.len() - 1;
    let pos = (t_h / step_h).max(0.0);
    let lo = (pos.floor() as usize).min(last);
    let hi = (lo + 1).min(last);
    let frac = if hi == lo { 0.0 } else { pos - lo as f64 };
    states[lo]
        .iter()
        .zip(&states[hi])
        .map(|(a, b)| a + (b - a) * frac)
        .collect()
}

fn build_trace(
    layout: ResultLayout,
    species: &[String],
    times_s: &[f64],
    ages_h: Option<Vec<f64>>,
    values: Vec<Vec<f64>>,
) -> EntityTrace {
    match layout {
        ResultLayout::BySpecies => {
            let columns = species
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), values.iter().map(|row| row[i]).collect()))
                .collect();
            EntityTrace::BySpecies(SpeciesSeries {
                time_s: times_s.to_vec(),
                age_h: ages_h,
                species: columns,
            })
        }
        ResultLayout::ByTime => EntityTrace::ByTime(
            times_s
                .iter()
                .enumerate()
                .map(|(k, t)| TimeSample {
                    time_s: *t,
                    age_h: ages_h.as_ref().map(|a| a[k]),
                    values: species
                        .iter()
                        .cloned()
                        .zip(values[k].iter().copied())
                        .collect(),
                })
                .collect(),
        ),
    }
}

impl ModelBinding for BatchReactor {
    fn open(&mut self, network_file: &Path, report_file: &Path) -> ModelResult<()> {
        let network = NetworkFile::load(network_file)?;
        let mut report = Report::create(report_file)?;
        report.line("wqmorris batch reactor report")?;
        report.line(&format!("network: {}", network_file.display()))?;
        debug!(
            network = %network_file.display(),
            nodes = network.nodes.len(),
            links = network.links.len(),
            "network opened"
        );
        self.network = Some(network);
        self.report = Some(report);
        self.hydraulics = None;
        Ok(())
    }

    fn close(&mut self) -> ModelResult<()> {
        self.network = None;
        self.hydraulics = None;
        if let Some(mut report) = self.report.take() {
            report.line("closed")?;
            report.finish()?;
        }
        Ok(())
    }

    fn open_reaction_scheme(&mut self, scheme_file: &Path) -> ModelResult<()> {
        self.network()?;
        let scheme = SchemeFile::load(scheme_file)?;
        self.report_line(&format!("reaction scheme: {}", scheme_file.display()))?;
        self.scheme = Some(LoadedScheme::compile(scheme));
        Ok(())
    }

    fn close_reaction_scheme(&mut self) -> ModelResult<()> {
        self.scheme = None;
        Ok(())
    }

    fn set_time_horizon(&mut self, seconds: f64) -> ModelResult<()> {
        let seconds = ensure_finite(seconds, "time horizon")?;
        if seconds <= 0.0 {
            return Err(ModelError::InvalidState {
                what: format!("time horizon must be positive, got {seconds}"),
            });
        }
        self.horizon_s = seconds;
        Ok(())
    }

    fn solve_hydraulics(&mut self) -> ModelResult<()> {
        let network = self.network()?;
        if self.horizon_s <= 0.0 {
            return Err(ModelError::InvalidState {
                what: "time horizon not set".to_string(),
            });
        }
        let mut hydraulics = Hydraulics::default();
        for node in &network.nodes {
            hydraulics
                .node_lag_h
                .insert(node.id.clone(), node.travel_time_h);
        }
        for link in &network.links {
            let from = hydraulics.node_lag_h[&link.from];
            let to = hydraulics.node_lag_h[&link.to];
            hydraulics
                .link_lag_h
                .insert(link.id.clone(), 0.5 * (from + to));
            let upstream = if from <= to { &link.from } else { &link.to };
            hydraulics
                .link_upstream
                .insert(link.id.clone(), upstream.clone());
        }
        self.hydraulics = Some(hydraulics);
        self.report_line(&format!("hydraulics solved for {} s", self.horizon_s))?;
        Ok(())
    }

    fn get_constants(&self, names: &[String]) -> ModelResult<Vec<f64>> {
        let scheme = self.scheme()?;
        names
            .iter()
            .map(|name| {
                scheme
                    .constants
                    .get(name)
                    .copied()
                    .ok_or_else(|| ModelError::UnknownConstant(name.clone()))
            })
            .collect()
    }

    fn set_constants(&mut self, names: &[String], values: &[f64]) -> ModelResult<()> {
        if names.len() != values.len() {
            return Err(ModelError::LengthMismatch {
                names: names.len(),
                values: values.len(),
            });
        }
        let scheme = self.scheme_mut()?;
        for (name, value) in names.iter().zip(values) {
            let slot = scheme
                .constants
                .get_mut(name)
                .ok_or_else(|| ModelError::UnknownConstant(name.clone()))?;
            *slot = *value;
        }
        Ok(())
    }

    fn get_initial_concentration(
        &self,
        entity_id: &str,
        species: &[String],
    ) -> ModelResult<Vec<f64>> {
        if !self.network()?.nodes.iter().any(|n| n.id == entity_id) {
            return Err(ModelError::UnknownEntity(entity_id.to_string()));
        }
        let scheme = self.scheme()?;
        let state = scheme.node_state(entity_id);
        species
            .iter()
            .map(|name| Ok(state[scheme.species_index(name)?]))
            .collect()
    }

    fn set_initial_concentration(
        &mut self,
        entity_id: &str,
        species: &[String],
        values: &[f64],
    ) -> ModelResult<()> {
        if species.len() != values.len() {
            return Err(ModelError::LengthMismatch {
                names: species.len(),
                values: values.len(),
            });
        }
        if !self.network()?.nodes.iter().any(|n| n.id == entity_id) {
            return Err(ModelError::UnknownEntity(entity_id.to_string()));
        }
        let scheme = self.scheme_mut()?;
        let indices = species
            .iter()
            .map(|name| scheme.species_index(name))
            .collect::<ModelResult<Vec<_>>>()?;
        let mut state = scheme.node_state(entity_id).to_vec();
        for (i, value) in indices.into_iter().zip(values) {
            state[i] = *value;
        }
        scheme.initial.insert(entity_id.to_string(), state);
        Ok(())
    }

    fn run_quality_simulation(&mut self, request: &QualityRequest) -> ModelResult<QualityResults> {
        let network = self.network()?;
        let scheme = self.scheme()?;
        let hydraulics = self.hydraulics.as_ref().ok_or(ModelError::HydraulicsNotSolved)?;

        for node in &network.nodes {
            for (name, value) in scheme.species.iter().zip(scheme.node_state(&node.id)) {
                ensure_non_negative(*value, &format!("initial {name} at node {}", node.id))?;
            }
        }

        let source = network.source_node();
        let states = self.integrate_source(scheme, scheme.node_state(&source.id))?;
        let step_h = scheme.step_s / 3600.0;
        let source_lag_h = source.travel_time_h;

        let times_s: Vec<f64> = (0..states.len())
            .map(|k| k as f64 * scheme.step_s)
            .filter(|t| *t >= request.start_s)
            .collect();

        let sample = |lag_h: f64, own: &[f64]| -> (Vec<Vec<f64>>, Vec<f64>) {
            let lag_h = (lag_h - source_lag_h).max(0.0);
            let mut values = Vec::with_capacity(times_s.len());
            let mut ages = Vec::with_capacity(times_s.len());
            for t_s in &times_s {
                let t_h = t_s / 3600.0;
                if t_h < lag_h {
                    values.push(own.to_vec());
                } else {
                    values.push(state_at(&states, step_h, t_h - lag_h));
                }
                ages.push(t_h.min(lag_h));
            }
            (values, ages)
        };

        let mut results = QualityResults::default();
        for node in &network.nodes {
            let (values, ages) = sample(hydraulics.node_lag_h[&node.id], scheme.node_state(&node.id));
            let trace = build_trace(
                request.layout,
                &scheme.species,
                &times_s,
                request.include_age.then_some(ages),
                values,
            );
            results.entities_mut(EntityKind::Node).insert(node.id.clone(), trace);
        }
        if request.include_links {
            for link in &network.links {
                let upstream = &hydraulics.link_upstream[&link.id];
                let (values, ages) =
                    sample(hydraulics.link_lag_h[&link.id], scheme.node_state(upstream));
                let trace = build_trace(
                    request.layout,
                    &scheme.species,
                    &times_s,
                    request.include_age.then_some(ages),
                    values,
                );
                results.entities_mut(EntityKind::Link).insert(link.id.clone(), trace);
            }
        }

        let reported = times_s.len();
        self.report_line(&format!("quality run: {reported} reporting steps"))?;
        Ok(results)
    }

    fn node_ids(&self) -> ModelResult<Vec<String>> {
        Ok(self.network()?.nodes.iter().map(|n| n.id.clone()).collect())
    }

    fn link_ids(&self) -> ModelResult<Vec<String>> {
        Ok(self.network()?.links.iter().map(|l| l.id.clone()).collect())
    }

    fn base_demands(&self) -> ModelResult<Vec<f64>> {
        Ok(self.network()?.nodes.iter().map(|n| n.base_demand).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const NETWORK: &str = r#"
title: two pipes
nodes:
  - { id: "9", source: true }
  - { id: "10", base_demand: 150.0, travel_time_h: 1.0 }
  - { id: "11", base_demand: 80.0, travel_time_h: 2.0 }
links:
  - { id: "110", from: "9", to: "10" }
  - { id: "111", from: "10", to: "11" }
"#;

    const SCHEME: &str = r#"
quality_step_s: 900
constants: { Kb: 0.5, MU: 0.1, Yg: 0.4 }
species:
  - { id: CL2, initial: 1.0 }
  - { id: S, initial: 2.0 }
  - { id: Xb, initial: 0.0 }
reactions:
  - { reactant: CL2, rate: Kb }
  - { reactant: S, rate: MU, products: [ { species: Xb, yield: Yg } ] }
"#;

    fn open_reactor(dir: &Path) -> BatchReactor {
        let net = dir.join("net.yaml");
        let scheme = dir.join("scheme.yaml");
        fs::write(&net, NETWORK).unwrap();
        fs::write(&scheme, SCHEME).unwrap();
        let mut reactor = BatchReactor::new();
        reactor.open(&net, &dir.join("report.rpt")).unwrap();
        reactor.open_reaction_scheme(&scheme).unwrap();
        reactor.set_time_horizon(4.0 * 3600.0).unwrap();
        reactor.solve_hydraulics().unwrap();
        reactor
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn source_decay_matches_first_order_solution() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        let results = reactor
            .run_quality_simulation(&QualityRequest::default())
            .unwrap();
        let cl2 = results
            .trace(EntityKind::Node, "9")
            .unwrap()
            .species_series("CL2")
            .unwrap();
        // 4 h at 900 s steps
        assert_eq!(cl2.len(), 17);
        let expected = (-0.5f64 * 4.0).exp();
        assert!((cl2[16] - expected).abs() < 1e-5, "{} vs {}", cl2[16], expected);
    }

    #[test]
    fn downstream_node_lags_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        let request = QualityRequest {
            include_age: true,
            ..QualityRequest::default()
        };
        let results = reactor.run_quality_simulation(&request).unwrap();
        let source = results.trace(EntityKind::Node, "9").unwrap();
        let down = results.trace(EntityKind::Node, "10").unwrap();
        let src = source.species_series("CL2").unwrap();
        let dwn = down.species_series("CL2").unwrap();
        // one hour lag = four steps
        assert!((dwn[8] - src[4]).abs() < 1e-12);
        match down {
            EntityTrace::BySpecies(series) => {
                let ages = series.age_h.as_ref().unwrap();
                assert_eq!(ages[0], 0.0);
                assert_eq!(*ages.last().unwrap(), 1.0);
            }
            EntityTrace::ByTime(_) => panic!("expected by-species layout"),
        }
    }

    #[test]
    fn yield_products_grow() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        let results = reactor
            .run_quality_simulation(&QualityRequest::default())
            .unwrap();
        let xb = results
            .trace(EntityKind::Node, "9")
            .unwrap()
            .species_series("Xb")
            .unwrap();
        assert_eq!(xb[0], 0.0);
        assert!(xb.windows(2).all(|w| w[1] >= w[0]));
        assert!(*xb.last().unwrap() > 0.0);
    }

    #[test]
    fn by_time_layout_and_start_filter() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        let request = QualityRequest {
            layout: ResultLayout::ByTime,
            start_s: 3.0 * 3600.0,
            include_links: false,
            include_age: false,
        };
        let results = reactor.run_quality_simulation(&request).unwrap();
        assert!(results.link.is_empty());
        match results.trace(EntityKind::Node, "11").unwrap() {
            EntityTrace::ByTime(samples) => {
                assert_eq!(samples.len(), 5);
                assert_eq!(samples[0].time_s, 3.0 * 3600.0);
                assert!(samples[0].values.contains_key("S"));
            }
            EntityTrace::BySpecies(_) => panic!("expected by-time layout"),
        }
    }

    #[test]
    fn setters_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        reactor
            .set_constants(&names(&["Kb"]), &[0.25])
            .unwrap();
        assert_eq!(reactor.get_constants(&names(&["Kb", "Yg"])).unwrap(), vec![0.25, 0.4]);

        reactor
            .set_initial_concentration("9", &names(&["S"]), &[3.0])
            .unwrap();
        assert_eq!(
            reactor
                .get_initial_concentration("9", &names(&["CL2", "S"]))
                .unwrap(),
            vec![1.0, 3.0]
        );
        assert_eq!(
            reactor
                .get_initial_concentration("10", &names(&["S"]))
                .unwrap(),
            vec![2.0]
        );
    }

    #[test]
    fn negative_initial_concentration_is_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        reactor
            .set_initial_concentration("9", &names(&["CL2"]), &[-0.1])
            .unwrap();
        let err = reactor
            .run_quality_simulation(&QualityRequest::default())
            .unwrap_err();
        assert!(err.is_solver_failure(), "{err}");
    }

    #[test]
    fn unknown_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        assert!(matches!(
            reactor.get_constants(&names(&["nope"])),
            Err(ModelError::UnknownConstant(_))
        ));
        assert!(matches!(
            reactor.get_initial_concentration("42", &names(&["CL2"])),
            Err(ModelError::UnknownEntity(_))
        ));
        assert!(matches!(
            reactor.set_constants(&names(&["Kb"]), &[1.0, 2.0]),
            Err(ModelError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn quality_requires_hydraulics() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = open_reactor(dir.path());
        reactor.close().unwrap();
        assert!(matches!(
            reactor.run_quality_simulation(&QualityRequest::default()),
            Err(ModelError::NotOpen)
        ));
        assert!(dir.path().join("report.rpt").exists());
    }
}
