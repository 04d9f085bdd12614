//! Cross-run trajectory comparison.
//!
//! Every later run is compared with run 0, vehicle by vehicle and tick by
//! tick. Vehicles are matched by position in the run (ascending actor id),
//! which lines up across runs as long as the spawn sequence is reproduced.

use crate::error::HarnessError;
use crate::recorder::RunResult;
use serde::Serialize;
use tracing::{info, warn};

/// Deviation of one vehicle from run 0, accumulated over all later runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleDeviation {
    /// Vehicle index within a run
    pub vehicle: usize,

    /// Signed mean of `run_0 - run_i` over runs, ticks and axes
    pub mean_diff: f64,

    /// Mean of `|run_0 - run_i|`
    pub mean_abs_diff: f64,

    /// Largest single-axis difference seen
    pub max_abs_diff: f64,
}

/// Result of comparing a run set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evaluation {
    /// Only one run; nothing to compare against
    SingleRun,

    /// One entry per vehicle of run 0 that some later run also has
    Compared {
        runs: usize,
        vehicles: Vec<VehicleDeviation>,
    },
}

impl Evaluation {
    /// Human-readable report, one line per vehicle.
    pub fn report_lines(&self) -> Vec<String> {
        match self {
            Evaluation::SingleRun => {
                vec!["Cannot compute differences for only one iteration.".to_string()]
            }
            Evaluation::Compared { vehicles, .. } => vehicles
                .iter()
                .map(|v| format!("vehicle {} mean diff: {:.4}", v.vehicle, v.mean_diff))
                .collect(),
        }
    }

    /// True when no vehicle strays further than `tolerance` on any axis.
    ///
    /// A single run is trivially reproducible.
    pub fn is_reproducible(&self, tolerance: f64) -> bool {
        match self {
            Evaluation::SingleRun => true,
            Evaluation::Compared { vehicles, .. } => {
                vehicles.iter().all(|v| v.max_abs_diff <= tolerance)
            }
        }
    }

    /// Per-vehicle deviations (empty for a single run).
    pub fn deviations(&self) -> &[VehicleDeviation] {
        match self {
            Evaluation::SingleRun => &[],
            Evaluation::Compared { vehicles, .. } => vehicles,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    abs_sum: f64,
    max_abs: f64,
    samples: usize,
}

impl Accumulator {
    fn push(&mut self, diff: f64) {
        self.sum += diff;
        self.abs_sum += diff.abs();
        self.max_abs = self.max_abs.max(diff.abs());
        self.samples += 1;
    }

    fn finish(self, vehicle: usize) -> VehicleDeviation {
        let n = self.samples.max(1) as f64;
        VehicleDeviation {
            vehicle,
            mean_diff: self.sum / n,
            mean_abs_diff: self.abs_sum / n,
            max_abs_diff: self.max_abs,
        }
    }
}

/// Checks that `run` has the trajectory lengths of `reference` over their
/// shared vehicles and returns how many vehicles they share.
///
/// A differing vehicle count (a spawn rejected in one run only) is logged
/// and the comparison falls back to the common prefix.
fn check_shape(index: usize, reference: &RunResult, run: &RunResult) -> Result<usize, HarnessError> {
    let shared = reference.vehicle_count().min(run.vehicle_count());
    if run.vehicle_count() != reference.vehicle_count() {
        warn!(
            "run {} has {} vehicles, run 0 has {}; comparing the first {}",
            index,
            run.vehicle_count(),
            reference.vehicle_count(),
            shared
        );
    }

    for (vehicle, (a, b)) in reference
        .trajectories
        .iter()
        .zip(&run.trajectories)
        .enumerate()
    {
        if a.len() != b.len() {
            return Err(HarnessError::ShapeMismatch {
                run: index,
                detail: format!(
                    "vehicle {} has {} samples, expected {}",
                    vehicle,
                    b.len(),
                    a.len()
                ),
            });
        }
    }
    Ok(shared)
}

/// Compares every run with run 0.
///
/// Vehicle `i` is reported when at least one later run has a vehicle `i`,
/// and only runs that have it contribute to its statistics. The signed mean
/// can cancel out (drifts of opposite sign); the absolute and max
/// statistics cannot.
pub fn evaluate(runs: &[RunResult]) -> Result<Evaluation, HarnessError> {
    let (reference, rest) = runs.split_first().ok_or(HarnessError::EmptyRunSet)?;

    if rest.is_empty() {
        info!("Cannot compute differences for only one iteration.");
        return Ok(Evaluation::SingleRun);
    }

    let mut compared = 0;
    for (offset, run) in rest.iter().enumerate() {
        compared = compared.max(check_shape(offset + 1, reference, run)?);
    }

    let vehicles = reference
        .trajectories
        .iter()
        .take(compared)
        .enumerate()
        .map(|(vehicle, base)| {
            let mut acc = Accumulator::default();
            for other in rest.iter().filter_map(|run| run.trajectories.get(vehicle)) {
                for (p0, pi) in base.iter().zip(other) {
                    for axis in 0..3 {
                        acc.push(f64::from(p0[axis]) - f64::from(pi[axis]));
                    }
                }
            }
            acc.finish(vehicle)
        })
        .collect();

    Ok(Evaluation::Compared {
        runs: runs.len(),
        vehicles,
    })
}
