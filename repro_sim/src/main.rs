//! carla-repro CLI
//!
//! Spawns autopilot traffic, records every vehicle's trajectory over a fixed
//! number of synchronous ticks, repeats with the same seed and reports how far
//! the runs diverge.

use clap::Parser;
use repro_env::Simulator;
use repro_sim::{run_harness, HarnessConfig, HarnessError, PopulationConfig, RunConfig, ScriptedSimulator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Spawn points of the offline town.
const OFFLINE_SPAWN_POINTS: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "carla-repro")]
#[command(about = "Check that seeded CARLA traffic runs reproduce the same trajectories", long_about = None)]
#[command(after_help = "Live mode needs a build with `--features carla` (cargo build --features carla); \
without it, only --offline runs against the scripted simulator.")]
struct Args {
    /// Number of runs with identical seeding
    #[arg(short, long, default_value = "3")]
    iterations: usize,

    /// Ticks per run
    #[arg(short, long, default_value = "2000")]
    ticks: usize,

    /// Number of autopilot vehicles
    #[arg(short = 'n', long, default_value = "15")]
    vehicles: usize,

    /// Render the trajectory overlay after all runs
    #[arg(long)]
    plot: bool,

    /// Directory for persisted runs and the plot
    #[arg(long)]
    dst: Option<PathBuf>,

    /// Simulator host (live mode, requires the `carla` feature)
    #[arg(long, env = "CARLA_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Simulator port
    #[arg(short, long, env = "CARLA_PORT", default_value = "2000")]
    port: u16,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Traffic manager port
    #[arg(long, default_value = "8000")]
    tm_port: u16,

    /// Fixed step rate in Hz
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Seed re-applied at the start of every run
    #[arg(short, long, default_value = "1234")]
    seed: u64,

    /// Seed for the traffic manager's random device
    #[arg(long)]
    tm_seed: Option<u64>,

    /// Reset every traffic light group after spawning
    #[arg(long)]
    reset_light_groups: bool,

    /// Probability (0.0 - 1.0) that a vehicle ignores traffic lights
    #[arg(long, default_value = "0.0")]
    p_ignore_lights: f32,

    /// Keep 2-wheeled and blacklisted blueprints
    #[arg(long)]
    allow_unsafe_vehicles: bool,

    /// Run against the in-process scripted simulator instead of CARLA (always available)
    #[arg(long)]
    offline: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the evaluation as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            iterations: self.iterations,
            run: RunConfig {
                ticks: self.ticks,
                vehicles: self.vehicles,
                fps: self.fps,
                seed: self.seed,
                tm_port: self.tm_port,
                tm_seed: self.tm_seed,
                reset_light_groups: self.reset_light_groups,
                population: PopulationConfig {
                    disable_unsafe_vehicles: !self.allow_unsafe_vehicles,
                    p_ignore_traffic_lights: self.p_ignore_lights,
                    ..Default::default()
                },
            },
            plot: self.plot,
            dst: self.dst.clone(),
        }
    }
}

fn report<S: Simulator>(sim: &S, args: &Args) -> Result<(), HarnessError> {
    let config = args.harness_config();
    let outcome = run_harness(sim, &config, !args.json)?;

    if args.json {
        let summary = serde_json::json!({
            "iterations": outcome.runs.len(),
            "ticks": config.run.ticks,
            "seed": config.run.seed,
            "evaluation": outcome.evaluation,
            "run_files": outcome.run_files,
            "plot": outcome.plot_path,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in outcome.evaluation.report_lines() {
            println!("{}", line);
        }
    }
    Ok(())
}

#[cfg(feature = "carla")]
fn run_live(args: &Args) -> Result<(), HarnessError> {
    use repro_core::{CarlaBridge, ZmqTransport};
    use std::time::Duration;

    let bridge = CarlaBridge::<ZmqTransport>::connect(
        &args.host,
        args.port,
        Duration::from_secs(args.timeout),
    )?;
    report(&bridge, args)
}

#[cfg(not(feature = "carla"))]
fn run_live(_args: &Args) -> Result<(), HarnessError> {
    error!("❌ Live mode requires the 'carla' feature.");
    error!("   Build with: cargo build --features carla");
    error!("   Or pass --offline to use the scripted simulator.");
    Err(HarnessError::InvalidConfig("built without CARLA support".into()))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    info!("carla-repro v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let result = if args.offline {
        info!("Offline mode: scripted town with {} spawn points", OFFLINE_SPAWN_POINTS);
        report(&ScriptedSimulator::town(OFFLINE_SPAWN_POINTS, args.seed), &args)
    } else {
        run_live(&args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}
