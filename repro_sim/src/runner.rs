//! Top-level orchestration: repeated seeded runs, persistence, evaluation, plot.

use crate::config::{HarnessConfig, RunConfig};
use crate::error::HarnessError;
use crate::evaluator::{evaluate, Evaluation};
use crate::lights::reset_all_traffic_light_groups;
use crate::recorder::{timestamp_formatted, RunResult, RunSet, TrajectoryRecorder};
use crate::session::RunSession;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use repro_core::{render_overlay, PlotOptions};
use repro_env::{Simulator, TrafficManager, Trajectory};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span};

/// Everything a harness invocation produced.
#[derive(Debug)]
pub struct HarnessOutcome {
    /// Runs in execution order
    pub runs: RunSet,

    pub evaluation: Evaluation,

    /// Files written for each run (empty without an output directory)
    pub run_files: Vec<PathBuf>,

    /// Overlay plot, when requested
    pub plot_path: Option<PathBuf>,
}

fn tick_progress(ticks: usize) -> ProgressBar {
    let bar = ProgressBar::new(ticks as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ticks ({eta})")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

/// Executes one run: setup, spawn, `ticks` sample-then-step iterations, teardown.
///
/// The run RNG is seeded from `config.seed` here, so every run with the same
/// configuration draws the same spawn points and blueprints.
pub fn run_once<S: Simulator>(
    sim: &S,
    config: &RunConfig,
    show_progress: bool,
) -> Result<RunResult, HarnessError> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let mut session = RunSession::open(sim, config.fps, config.tm_port)?;

    if let Some(seed) = config.tm_seed {
        session.traffic_manager().set_random_device_seed(seed)?;
    }

    let report = session.spawn_population(&config.population, config.vehicles, &mut rng)?;
    debug!("Spawn report: {:?}", report);

    session.traffic_manager().reset_traffic_lights()?;
    if config.reset_light_groups {
        let groups = reset_all_traffic_light_groups(sim)?;
        info!("Reset {} traffic light groups", groups);
    }

    let progress = show_progress.then(|| tick_progress(config.ticks));
    let mut recorder = TrajectoryRecorder::new();
    for _ in 0..config.ticks {
        session.sample(&mut recorder)?;
        session.step()?;
        if let Some(bar) = &progress {
            bar.inc(1);
        }
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    session.close()?;
    Ok(recorder.finish())
}

/// Runs the configured number of iterations and compares them.
///
/// Any run failure aborts the harness after that run's teardown. A plot
/// failure is reported the same way, since it is only attempted on request.
/// Runs with differing vehicle counts are still compared over the vehicles
/// they share.
pub fn run_harness<S: Simulator>(
    sim: &S,
    config: &HarnessConfig,
    show_progress: bool,
) -> Result<HarnessOutcome, HarnessError> {
    config.validate()?;

    if let Some(dst) = &config.dst {
        fs::create_dir_all(dst)?;
    }

    let mut runs = RunSet::with_capacity(config.iterations);
    let mut run_files = Vec::new();

    for iteration in 0..config.iterations {
        let span = info_span!("run", iteration, seed = config.run.seed);
        let _enter = span.enter();

        info!("Starting run {}/{}", iteration + 1, config.iterations);
        let run = run_once(sim, &config.run, show_progress)?;
        info!(
            "✓ Recorded {} vehicles over {} ticks",
            run.vehicle_count(),
            run.tick_count()
        );

        if let Some(dst) = &config.dst {
            run_files.push(run.write_to_dir(dst)?);
        }
        runs.push(run);
    }

    // Plot first: it is the diagnostic for runs that cannot be compared
    let plot_path = if config.plot {
        let dir = config.dst.clone().unwrap_or_else(|| PathBuf::from("."));
        Some(plot_runs(&dir, &runs)?)
    } else {
        None
    };

    let evaluation = evaluate(&runs)?;
    for deviation in evaluation.deviations() {
        debug!(
            "vehicle {}: mean |diff| {:.4}, max |diff| {:.4}",
            deviation.vehicle, deviation.mean_abs_diff, deviation.max_abs_diff
        );
    }

    Ok(HarnessOutcome {
        runs,
        evaluation,
        run_files,
        plot_path,
    })
}

/// Renders the overlay of every run into `dir/trajectories_<timestamp>.svg`.
pub fn plot_runs(dir: &Path, runs: &[RunResult]) -> Result<PathBuf, HarnessError> {
    let path = dir.join(format!("trajectories_{}.svg", timestamp_formatted()));
    let layers: Vec<&[Trajectory]> = runs.iter().map(|r| r.trajectories.as_slice()).collect();
    render_overlay(&path, &layers, &PlotOptions::default())?;
    Ok(path)
}
