//! Method of Morris trajectory design.
//!
//! Each trajectory is `num_vars + 1` points on a `p`-level grid in the unit
//! hypercube; consecutive points differ in exactly one variable by the jump
//! `Δ = p / (2(p - 1))`. A pool of `total_samples` trajectories is drawn
//! from a seeded generator and, when requested, the best-spread subset is
//! kept (largest summed squared inter-trajectory distance).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{DesignError, DesignResult};
use crate::matrix::DesignMatrix;
use crate::problem::ProblemSpec;

pub const DEFAULT_NUM_LEVELS: usize = 4;

/// Swap-refinement passes over the selected set.
const MAX_SWAP_PASSES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOptions {
    /// Grid levels `p`; must be even and at least 2.
    pub num_levels: usize,
    /// Best-spread subset size; `None` keeps the whole pool.
    pub optimal_trajectories: Option<usize>,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            num_levels: DEFAULT_NUM_LEVELS,
            optimal_trajectories: None,
        }
    }
}

/// Morris design with the default grid, keeping `optimal_trajectories` of
/// a `total_samples` pool. Rows = `optimal_trajectories × (num_vars + 1)`.
pub fn sample(
    problem: &ProblemSpec,
    total_samples: usize,
    optimal_trajectories: usize,
    seed: u64,
) -> DesignResult<DesignMatrix> {
    sample_with(
        problem,
        total_samples,
        &SampleOptions {
            num_levels: DEFAULT_NUM_LEVELS,
            optimal_trajectories: Some(optimal_trajectories),
        },
        seed,
    )
}

pub fn sample_with(
    problem: &ProblemSpec,
    total_samples: usize,
    options: &SampleOptions,
    seed: u64,
) -> DesignResult<DesignMatrix> {
    let p = options.num_levels;
    if p < 2 || p % 2 != 0 {
        return Err(DesignError::Sampling(format!(
            "num_levels must be even and at least 2, got {p}"
        )));
    }
    if total_samples == 0 {
        return Err(DesignError::Sampling("total_samples must be positive".into()));
    }
    if let Some(r) = options.optimal_trajectories {
        if r < 2 {
            return Err(DesignError::Sampling(format!(
                "optimal_trajectories must be at least 2, got {r}"
            )));
        }
        if r > total_samples {
            return Err(DesignError::Sampling(format!(
                "optimal_trajectories ({r}) exceeds total_samples ({total_samples})"
            )));
        }
    }

    let k = problem.num_vars();
    let mut rng = StdRng::seed_from_u64(seed);
    let pool: Vec<Trajectory> = (0..total_samples)
        .map(|_| Trajectory::draw(k, p, &mut rng))
        .collect();

    let selected = match options.optimal_trajectories {
        Some(r) if r < total_samples => select_optimal(&pool, r),
        _ => (0..total_samples).collect(),
    };
    info!(
        num_vars = k,
        pool = total_samples,
        selected = selected.len(),
        num_levels = p,
        seed,
        "morris design generated"
    );

    let mut values = Vec::with_capacity(selected.len() * (k + 1) * k);
    for &t in &selected {
        for point in &pool[t].points {
            for (u, &(low, high)) in point.iter().zip(problem.bounds()) {
                values.push(low + u * (high - low));
            }
        }
    }
    DesignMatrix::new(selected.len() * (k + 1), k, values)
}

/// `k + 1` unit-cube points, stored as rows.
#[derive(Debug, Clone)]
struct Trajectory {
    points: Vec<Vec<f64>>,
}

impl Trajectory {
    fn draw(k: usize, p: usize, rng: &mut StdRng) -> Self {
        let delta = p as f64 / (2.0 * (p as f64 - 1.0));
        let base_levels = p / 2;

        let base: Vec<f64> = (0..k)
            .map(|_| rng.gen_range(0..base_levels) as f64 / (p as f64 - 1.0))
            .collect();
        let up: Vec<bool> = (0..k).map(|_| rng.gen_bool(0.5)).collect();
        let mut order: Vec<usize> = (0..k).collect();
        order.shuffle(rng);

        // Down-steps start one jump above the base and move to it.
        let mut current: Vec<f64> = base
            .iter()
            .zip(&up)
            .map(|(&b, &u)| if u { b } else { b + delta })
            .collect();
        let mut points = Vec::with_capacity(k + 1);
        points.push(current.clone());
        for &v in &order {
            current[v] = if up[v] { base[v] + delta } else { base[v] };
            points.push(current.clone());
        }
        Self { points }
    }

    /// Sum of Euclidean distances over all point pairs.
    fn distance(&self, other: &Trajectory) -> f64 {
        let mut total = 0.0;
        for a in &self.points {
            for b in &other.points {
                let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                total += sq.sqrt();
            }
        }
        total
    }
}

/// Pairwise squared distances, computed in parallel; row-major `n × n`.
fn squared_distances(pool: &[Trajectory]) -> Vec<f64> {
    let n = pool.len();
    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i + 1..n)
                .map(|j| {
                    let d = pool[i].distance(&pool[j]);
                    d * d
                })
                .collect()
        })
        .collect();
    let mut full = vec![0.0; n * n];
    for (i, row) in upper.iter().enumerate() {
        for (offset, &d2) in row.iter().enumerate() {
            let j = i + 1 + offset;
            full[i * n + j] = d2;
            full[j * n + i] = d2;
        }
    }
    full
}

fn spread(d2: &[f64], n: usize, set: &[usize]) -> f64 {
    let mut total = 0.0;
    for (a, &i) in set.iter().enumerate() {
        for &j in &set[a + 1..] {
            total += d2[i * n + j];
        }
    }
    total
}

/// Greedy seed pair, greedy growth, then swap refinement. Ties resolve to
/// the lowest index, so the result depends only on the pool.
fn select_optimal(pool: &[Trajectory], r: usize) -> Vec<usize> {
    let n = pool.len();
    let d2 = squared_distances(pool);

    let mut best_pair = (0, 1);
    let mut best = f64::NEG_INFINITY;
    for i in 0..n {
        for j in i + 1..n {
            if d2[i * n + j] > best {
                best = d2[i * n + j];
                best_pair = (i, j);
            }
        }
    }
    let mut selected = vec![best_pair.0, best_pair.1];
    let mut in_set = vec![false; n];
    in_set[best_pair.0] = true;
    in_set[best_pair.1] = true;

    while selected.len() < r {
        let mut pick = None;
        let mut gain = f64::NEG_INFINITY;
        for c in (0..n).filter(|&c| !in_set[c]) {
            let g: f64 = selected.iter().map(|&s| d2[c * n + s]).sum();
            if g > gain {
                gain = g;
                pick = Some(c);
            }
        }
        let Some(c) = pick else { break };
        in_set[c] = true;
        selected.push(c);
    }

    let mut current = spread(&d2, n, &selected);
    for pass in 0..MAX_SWAP_PASSES {
        let mut improved = false;
        for slot in 0..selected.len() {
            let out = selected[slot];
            let without: f64 = selected
                .iter()
                .filter(|&&s| s != out)
                .map(|&s| d2[out * n + s])
                .sum();
            for c in 0..n {
                if in_set[c] {
                    continue;
                }
                let with: f64 = selected
                    .iter()
                    .filter(|&&s| s != out)
                    .map(|&s| d2[c * n + s])
                    .sum();
                if with - without > 1e-12 * current.max(1.0) {
                    in_set[out] = false;
                    in_set[c] = true;
                    selected[slot] = c;
                    current += with - without;
                    improved = true;
                    break;
                }
            }
        }
        if !improved {
            debug!(passes = pass + 1, spread = current, "trajectory selection converged");
            break;
        }
    }

    selected.sort_unstable();
    selected
}
