//! Quality simulation request and result types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of network entity a series is reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Link,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Link => "link",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(EntityKind::Node),
            "link" => Ok(EntityKind::Link),
            other => Err(format!("unknown entity kind '{other}' (expected node or link)")),
        }
    }
}

/// How per-entity output is arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultLayout {
    /// One column per species, sharing a time axis.
    #[default]
    BySpecies,
    /// One record per reporting time holding every species value.
    ByTime,
}

/// Arguments to a quality simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRequest {
    pub layout: ResultLayout,
    /// Reporting starts at this simulation time (seconds).
    #[serde(default)]
    pub start_s: f64,
    #[serde(default = "default_true")]
    pub include_links: bool,
    /// Attach the water age axis (hours) to every series.
    #[serde(default)]
    pub include_age: bool,
}

fn default_true() -> bool {
    true
}

impl Default for QualityRequest {
    fn default() -> Self {
        Self {
            layout: ResultLayout::BySpecies,
            start_s: 0.0,
            include_links: true,
            include_age: false,
        }
    }
}

/// Column-oriented series for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSeries {
    pub time_s: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_h: Option<Vec<f64>>,
    pub species: BTreeMap<String, Vec<f64>>,
}

/// All species values for one entity at one reporting time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSample {
    pub time_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_h: Option<f64>,
    pub values: BTreeMap<String, f64>,
}

/// Output for a single node or link, in the layout that was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityTrace {
    BySpecies(SpeciesSeries),
    ByTime(Vec<TimeSample>),
}

impl EntityTrace {
    /// Values of one species over time, whichever layout is stored.
    pub fn species_series(&self, species: &str) -> Option<Vec<f64>> {
        match self {
            EntityTrace::BySpecies(series) => series.species.get(species).cloned(),
            EntityTrace::ByTime(samples) => samples
                .iter()
                .map(|s| s.values.get(species).copied())
                .collect(),
        }
    }

    pub fn time_axis(&self) -> Vec<f64> {
        match self {
            EntityTrace::BySpecies(series) => series.time_s.clone(),
            EntityTrace::ByTime(samples) => samples.iter().map(|s| s.time_s).collect(),
        }
    }

    /// Water age per reporting time, when it was recorded.
    pub fn age_axis(&self) -> Option<Vec<f64>> {
        match self {
            EntityTrace::BySpecies(series) => series.age_h.clone(),
            EntityTrace::ByTime(samples) => samples.iter().map(|s| s.age_h).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntityTrace::BySpecies(series) => series.time_s.len(),
            EntityTrace::ByTime(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one quality simulation: entity kind, then entity id, then series.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityResults {
    #[serde(default)]
    pub node: BTreeMap<String, EntityTrace>,
    #[serde(default)]
    pub link: BTreeMap<String, EntityTrace>,
}

impl QualityResults {
    pub fn entities(&self, kind: EntityKind) -> &BTreeMap<String, EntityTrace> {
        match kind {
            EntityKind::Node => &self.node,
            EntityKind::Link => &self.link,
        }
    }

    pub fn entities_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<String, EntityTrace> {
        match kind {
            EntityKind::Node => &mut self.node,
            EntityKind::Link => &mut self.link,
        }
    }

    pub fn trace(&self, kind: EntityKind, id: &str) -> Option<&EntityTrace> {
        self.entities(kind).get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_series() -> EntityTrace {
        let mut species = BTreeMap::new();
        species.insert("CL2".to_string(), vec![1.0, 0.9]);
        EntityTrace::BySpecies(SpeciesSeries {
            time_s: vec![0.0, 300.0],
            age_h: None,
            species,
        })
    }

    #[test]
    fn untagged_trace_layouts_are_distinguishable() {
        let by_species = sample_series();
        let json = serde_json::to_string(&by_species).unwrap();
        let back: EntityTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, by_species);

        let mut values = BTreeMap::new();
        values.insert("CL2".to_string(), 1.0);
        let by_time = EntityTrace::ByTime(vec![TimeSample {
            time_s: 0.0,
            age_h: Some(0.0),
            values,
        }]);
        let json = serde_json::to_string(&by_time).unwrap();
        assert!(json.starts_with('['));
        let back: EntityTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, by_time);
    }

    #[test]
    fn species_series_reads_both_layouts() {
        let trace = sample_series();
        assert_eq!(trace.species_series("CL2"), Some(vec![1.0, 0.9]));
        assert_eq!(trace.species_series("Xb"), None);
        assert_eq!(trace.time_axis(), vec![0.0, 300.0]);
    }

    #[test]
    fn entity_kind_parses() {
        assert_eq!("node".parse::<EntityKind>().unwrap(), EntityKind::Node);
        assert!("pipe".parse::<EntityKind>().is_err());
    }
}
