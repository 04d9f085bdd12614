//! carla-repro Core - Live Simulator Adapter and Trajectory Plotting
//!
//! This library connects the reproducibility harness to the outside world:
//! 1. **Bridge**: `CarlaBridge` implements the `repro_env::Simulator`
//!    capabilities over a JSON request/response channel (feature `carla`)
//! 2. **Plot**: SVG overlay of recorded trajectories (feature `plot`)

pub mod carla_bridge;
pub mod plot;

// Re-export key types for convenience
pub use carla_bridge::{BridgeError, CarlaBridge, Transport, ZmqTransport};
pub use plot::{render_overlay, PlotError, PlotOptions};
