//! Bound rules: percent half-width tables and fixed multiplicative ranges.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use tracing::warn;

use crate::error::{DesignError, DesignResult};

/// Percent half-width per variable name, e.g. `k1 -> 20` for ±20 %.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundTable {
    percent: BTreeMap<String, f64>,
}

impl BoundTable {
    pub fn from_pairs<I, S>(pairs: I) -> DesignResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut percent = BTreeMap::new();
        for (name, pct) in pairs {
            let name = name.into();
            check_percent(&name, pct)?;
            if percent.insert(name.clone(), pct).is_some() {
                return Err(DesignError::DuplicateVariable(name));
            }
        }
        Ok(Self { percent })
    }

    /// Headerless two-column CSV: `name,percent`.
    pub fn from_csv_path(path: &Path) -> DesignResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| DesignError::BoundTable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_reader(file).map_err(|err| match err {
            DesignError::BoundTable { message, .. } => DesignError::BoundTable {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_reader<R: Read>(reader: R) -> DesignResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let table_error = |message: String| DesignError::BoundTable {
            path: Default::default(),
            message,
        };

        let mut pairs = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| table_error(e.to_string()))?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let name = record
                .get(0)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| table_error(format!("line {}: missing variable name", line + 1)))?;
            let raw = record
                .get(1)
                .ok_or_else(|| table_error(format!("line {}: missing percent for '{name}'", line + 1)))?;
            let pct: f64 = raw.parse().map_err(|_| {
                table_error(format!("line {}: '{raw}' is not a number", line + 1))
            })?;
            pairs.push((name.to_string(), pct));
        }
        Self::from_pairs(pairs)
    }

    pub fn percent(&self, name: &str) -> Option<f64> {
        self.percent.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.percent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.percent.is_empty()
    }
}

fn check_percent(name: &str, pct: f64) -> DesignResult<()> {
    if !pct.is_finite() || pct < 0.0 {
        return Err(DesignError::InvalidBound {
            name: name.to_string(),
            reason: format!("percent half-width must be a non-negative number, got {pct}"),
        });
    }
    Ok(())
}

/// How a variable's baseline becomes a `(low, high)` range.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundRule {
    /// `baseline · (1 ∓ pct/100)` with `pct` looked up per variable.
    Percent(BoundTable),
    /// `[low · baseline, high · baseline]` for every variable.
    Factor { low: f64, high: f64 },
}

impl BoundRule {
    /// Check up front that every variable in `names` has a bound, so a
    /// bad table is reported before any model is opened.
    pub fn check_covers(&self, names: &[String]) -> DesignResult<()> {
        match self {
            BoundRule::Percent(table) => {
                match names.iter().find(|n| table.percent(n.as_str()).is_none()) {
                    Some(missing) => Err(DesignError::MissingBound(missing.clone())),
                    None => Ok(()),
                }
            }
            BoundRule::Factor { .. } => names
                .first()
                .map_or(Ok(()), |name| self.bounds_for(name, 1.0).map(|_| ())),
        }
    }

    /// Bounds for one variable, always ordered `low <= high`.
    pub fn bounds_for(&self, name: &str, baseline: f64) -> DesignResult<(f64, f64)> {
        if !baseline.is_finite() {
            return Err(DesignError::NonFinite {
                what: format!("baseline of '{name}'"),
                value: baseline,
            });
        }
        let (a, b) = match self {
            BoundRule::Percent(table) => {
                let pct = table
                    .percent(name)
                    .ok_or_else(|| DesignError::MissingBound(name.to_string()))?;
                (baseline * (1.0 - pct / 100.0), baseline * (1.0 + pct / 100.0))
            }
            BoundRule::Factor { low, high } => {
                if !(low.is_finite() && high.is_finite()) || low > high {
                    return Err(DesignError::InvalidBound {
                        name: name.to_string(),
                        reason: format!("factor range [{low}, {high}] is not ordered"),
                    });
                }
                (baseline * low, baseline * high)
            }
        };
        if baseline < 0.0 {
            warn!(
                variable = name,
                baseline, "negative baseline: bound pair reordered to keep low <= high"
            );
        }
        Ok((a.min(b), a.max(b)))
    }
}
