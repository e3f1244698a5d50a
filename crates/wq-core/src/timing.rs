//! Wall-clock timing for stage and batch reporting.

use std::time::{Duration, Instant};

/// Stopwatch with named laps.
///
/// Each lap records the time since the previous lap (or since start), so a
/// run can report how long each stage took alongside the total.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    started: Instant,
    last_lap: Instant,
    laps: Vec<(&'static str, Duration)>,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

impl Stopwatch {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_lap: now,
            laps: Vec::new(),
        }
    }

    /// Record a lap and return its duration in seconds.
    pub fn lap(&mut self, label: &'static str) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_lap);
        self.last_lap = now;
        self.laps.push((label, elapsed));
        elapsed.as_secs_f64()
    }

    pub fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Total seconds recorded under `label` (labels may repeat).
    pub fn lap_total_s(&self, label: &str) -> f64 {
        self.laps
            .iter()
            .filter(|(l, _)| *l == label)
            .map(|(_, d)| d.as_secs_f64())
            .sum()
    }

    pub fn laps(&self) -> &[(&'static str, Duration)] {
        &self.laps
    }
}
