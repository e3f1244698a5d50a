//! Worker-count policy.

use std::time::Duration;
use wq_core::round_to_count;

/// Share of available execution units used by default.
pub const DEFAULT_WORKER_FRACTION: f64 = 0.85;

/// How long a fresh worker may take to report ready.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(120);

/// `round(available_parallelism × fraction)`, at least 1.
pub fn default_worker_count(fraction: f64) -> usize {
    let units = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    count_for(units, fraction)
}

fn count_for(units: usize, fraction: f64) -> usize {
    round_to_count(units as f64 * fraction).max(1)
}

/// Explicit override or the default fraction, clamped to `1..=rows`.
pub fn resolve_worker_count(requested: Option<usize>, fraction: f64, rows: usize) -> usize {
    let wanted = requested.unwrap_or_else(|| default_worker_count(fraction));
    wanted.clamp(1, rows.max(1))
}
