//! CARLA Reproducibility Harness
//!
//! Runs the same seeded traffic scenario several times and checks that the
//! simulator reproduces every vehicle's trajectory.
//!
//! # Run Lifecycle
//!
//! ```text
//!   Setup ──────────► Running ──────────────────────► Teardown
//!   snapshot settings  seed RNG, spawn population       destroy actors
//!   sync + fixed step  for each tick: sample, tick()    restore settings
//!   TM synchronous                                      TM asynchronous
//! ```
//!
//! Teardown is owned by [`RunSession`] and runs on every exit path, so a
//! failing tick never leaves vehicles behind or the world stuck in
//! synchronous mode.
//!
//! # Determinism
//!
//! All harness-side randomness (spawn point shuffle, blueprint choice,
//! colors, driver ids) comes from a `ChaCha8Rng` seeded at the start of
//! every run. Any remaining divergence between runs is the simulator's.
//!
//! # Usage
//!
//! ```ignore
//! use repro_sim::{run_harness, HarnessConfig, ScriptedSimulator};
//!
//! let sim = ScriptedSimulator::town(100, 1234);
//! let config = HarnessConfig::default().with_iterations(2).with_ticks(300);
//!
//! let outcome = run_harness(&sim, &config, false)?;
//! for line in outcome.evaluation.report_lines() {
//!     println!("{}", line);
//! }
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod lights;
pub mod population;
pub mod recorder;
pub mod runner;
pub mod scripted;
pub mod session;

pub use config::{HarnessConfig, PopulationConfig, RunConfig};
pub use error::HarnessError;
pub use evaluator::{evaluate, Evaluation, VehicleDeviation};
pub use lights::{reset_all_traffic_light_groups, traffic_light_groups};
pub use population::{filter_blueprints, is_safe_blueprint, SpawnPlan, SpawnReport};
pub use recorder::{RunResult, RunSet, TrajectoryRecorder};
pub use runner::{run_harness, run_once, HarnessOutcome};
pub use scripted::ScriptedSimulator;
pub use session::RunSession;
