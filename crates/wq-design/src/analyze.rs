//! Morris elementary-effect screening for one scalar output per row.

use serde::Serialize;
use tracing::debug;

use crate::error::{DesignError, DesignResult};
use crate::matrix::DesignMatrix;
use crate::problem::ProblemSpec;

/// Per-variable screening statistics, aligned with the problem's names.
///
/// Variables without any usable elementary effect report `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorrisIndices {
    pub names: Vec<String>,
    pub mu: Vec<f64>,
    pub mu_star: Vec<f64>,
    /// Sample standard deviation (ddof = 1).
    pub sigma: Vec<f64>,
    pub trajectories_used: usize,
    pub trajectories_skipped: usize,
}

impl MorrisIndices {
    /// Variable indices ordered by descending `mu_star`, `NaN` last.
    pub fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.names.len()).collect();
        order.sort_by(|&a, &b| {
            let (x, y) = (self.mu_star[a], self.mu_star[b]);
            match (x.is_nan(), y.is_nan()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => y.total_cmp(&x),
            }
        });
        order
    }
}

/// Compute Morris indices. `outputs[i]` is the scalar for design row `i`,
/// `None` for failed rows. Trajectories touching a failed or non-finite
/// output are skipped whole.
pub fn analyze(
    problem: &ProblemSpec,
    design: &DesignMatrix,
    outputs: &[Option<f64>],
) -> DesignResult<MorrisIndices> {
    let k = problem.num_vars();
    if design.cols() != k {
        return Err(DesignError::LengthMismatch {
            what: "design columns".to_string(),
            expected: k,
            found: design.cols(),
        });
    }
    if outputs.len() != design.rows() {
        return Err(DesignError::LengthMismatch {
            what: "outputs".to_string(),
            expected: design.rows(),
            found: outputs.len(),
        });
    }
    if design.rows() % (k + 1) != 0 {
        return Err(DesignError::Analysis(format!(
            "{} rows do not form whole trajectories of {} points",
            design.rows(),
            k + 1
        )));
    }

    let ranges: Vec<f64> = problem.bounds().iter().map(|&(lo, hi)| hi - lo).collect();
    let mut effects: Vec<Vec<f64>> = vec![Vec::new(); k];
    let mut used = 0;
    let mut skipped = 0;

    for t in 0..design.rows() / (k + 1) {
        let first = t * (k + 1);
        let ys: Option<Vec<f64>> = outputs[first..first + k + 1]
            .iter()
            .map(|y| y.filter(|v| v.is_finite()))
            .collect();
        let Some(ys) = ys else {
            skipped += 1;
            continue;
        };
        used += 1;

        for s in 0..k {
            let a = design.row(first + s);
            let b = design.row(first + s + 1);
            // The moved variable is the one with the largest unit-space step.
            let mut moved = None;
            let mut largest = 0.0;
            for v in 0..k {
                if ranges[v] <= 0.0 {
                    continue;
                }
                let step = (b[v] - a[v]) / ranges[v];
                if step.abs() > largest {
                    largest = step.abs();
                    moved = Some((v, step));
                }
            }
            let Some((v, step)) = moved else { continue };
            effects[v].push((ys[s + 1] - ys[s]) / step);
        }
    }

    if skipped > 0 {
        debug!(skipped, used, "trajectories skipped due to failed rows");
    }
    if used == 0 {
        return Err(DesignError::Analysis("no complete trajectories".to_string()));
    }

    let mut mu = Vec::with_capacity(k);
    let mut mu_star = Vec::with_capacity(k);
    let mut sigma = Vec::with_capacity(k);
    for ee in &effects {
        let n = ee.len() as f64;
        if ee.is_empty() {
            mu.push(f64::NAN);
            mu_star.push(f64::NAN);
            sigma.push(f64::NAN);
            continue;
        }
        let mean = ee.iter().sum::<f64>() / n;
        mu.push(mean);
        mu_star.push(ee.iter().map(|e| e.abs()).sum::<f64>() / n);
        sigma.push(if ee.len() > 1 {
            (ee.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            f64::NAN
        });
    }

    Ok(MorrisIndices {
        names: problem.names().to_vec(),
        mu,
        mu_star,
        sigma,
        trajectories_used: used,
        trajectories_skipped: skipped,
    })
}
