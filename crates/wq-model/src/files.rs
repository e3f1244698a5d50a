//! Network and reaction-scheme file formats read by [`crate::BatchReactor`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFile {
    #[serde(default)]
    pub title: Option<String>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    #[serde(default)]
    pub base_demand: f64,
    /// Travel time from the source node, hours.
    #[serde(default)]
    pub travel_time_h: f64,
    /// Marks the node whose water feeds the network. Defaults to the first node.
    #[serde(default)]
    pub source: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDef {
    pub id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeFile {
    /// Quality time step, seconds.
    #[serde(default = "default_quality_step_s")]
    pub quality_step_s: f64,
    #[serde(default)]
    pub constants: BTreeMap<String, f64>,
    pub species: Vec<SpeciesDef>,
    #[serde(default)]
    pub reactions: Vec<ReactionDef>,
    /// Per-node initial concentration overrides: node id -> species -> value.
    #[serde(default)]
    pub initial: BTreeMap<String, BTreeMap<String, f64>>,
}

fn default_quality_step_s() -> f64 {
    300.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDef {
    pub id: String,
    #[serde(default)]
    pub initial: f64,
}

/// First-order loss of `reactant` at `rate` (1/h), optionally feeding products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDef {
    pub reactant: String,
    /// Name of the rate constant.
    pub rate: String,
    #[serde(default)]
    pub products: Vec<YieldDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldDef {
    pub species: String,
    /// Name of the yield coefficient constant.
    #[serde(rename = "yield")]
    pub yield_constant: String,
}

fn read(path: &Path) -> ModelResult<String> {
    std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_error(path: &Path, err: serde_yaml::Error) -> ModelError {
    ModelError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

impl NetworkFile {
    pub fn load(path: &Path) -> ModelResult<Self> {
        let content = read(path)?;
        let network: NetworkFile =
            serde_yaml::from_str(&content).map_err(|e| parse_error(path, e))?;
        network.check(path)?;
        Ok(network)
    }

    fn check(&self, path: &Path) -> ModelResult<()> {
        let fail = |message: String| ModelError::Parse {
            path: path.to_path_buf(),
            message,
        };
        if self.nodes.is_empty() {
            return Err(fail("network has no nodes".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(fail(format!("duplicate node id '{}'", node.id)));
            }
            if !node.travel_time_h.is_finite() || node.travel_time_h < 0.0 {
                return Err(fail(format!(
                    "node '{}' has invalid travel time {}",
                    node.id, node.travel_time_h
                )));
            }
        }
        if self.nodes.iter().filter(|n| n.source).count() > 1 {
            return Err(fail("more than one source node".to_string()));
        }
        let mut link_ids = std::collections::HashSet::new();
        for link in &self.links {
            if !link_ids.insert(link.id.as_str()) {
                return Err(fail(format!("duplicate link id '{}'", link.id)));
            }
            for end in [&link.from, &link.to] {
                if !seen.contains(end.as_str()) {
                    return Err(fail(format!(
                        "link '{}' references unknown node '{}'",
                        link.id, end
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn source_node(&self) -> &NodeDef {
        self.nodes
            .iter()
            .find(|n| n.source)
            .unwrap_or(&self.nodes[0])
    }
}

impl SchemeFile {
    pub fn load(path: &Path) -> ModelResult<Self> {
        let content = read(path)?;
        let scheme: SchemeFile =
            serde_yaml::from_str(&content).map_err(|e| parse_error(path, e))?;
        scheme.check(path)?;
        Ok(scheme)
    }

    fn check(&self, path: &Path) -> ModelResult<()> {
        let fail = |message: String| ModelError::Parse {
            path: path.to_path_buf(),
            message,
        };
        if !self.quality_step_s.is_finite() || self.quality_step_s <= 0.0 {
            return Err(fail(format!(
                "quality_step_s must be positive, got {}",
                self.quality_step_s
            )));
        }
        let species: std::collections::HashSet<&str> =
            self.species.iter().map(|s| s.id.as_str()).collect();
        if species.len() != self.species.len() {
            return Err(fail("duplicate species id".to_string()));
        }
        for reaction in &self.reactions {
            if !species.contains(reaction.reactant.as_str()) {
                return Err(fail(format!("unknown reactant '{}'", reaction.reactant)));
            }
            if !self.constants.contains_key(&reaction.rate) {
                return Err(fail(format!("unknown rate constant '{}'", reaction.rate)));
            }
            for product in &reaction.products {
                if !species.contains(product.species.as_str()) {
                    return Err(fail(format!("unknown product '{}'", product.species)));
                }
                if !self.constants.contains_key(&product.yield_constant) {
                    return Err(fail(format!(
                        "unknown yield constant '{}'",
                        product.yield_constant
                    )));
                }
            }
        }
        for (node, values) in &self.initial {
            for name in values.keys() {
                if !species.contains(name.as_str()) {
                    return Err(fail(format!(
                        "initial concentration for unknown species '{}' at node '{}'",
                        name, node
                    )));
                }
            }
        }
        Ok(())
    }
}
