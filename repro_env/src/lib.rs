//! Simulator Abstraction Layer
//!
//! This crate describes the external driving simulator as a small set of
//! capabilities so that the reproducibility harness never touches a
//! concrete client library:
//! - World: settings, blueprint catalog, spawn points, batched spawns, ticks
//! - Actors: location sampling and destruction
//! - Traffic manager: autopilot behavior of spawned vehicles
//!
//! # Example
//!
//! ```ignore
//! use repro_env::{ActorHandle, Simulator};
//!
//! fn sample<S: Simulator>(sim: &S, actors: &[S::Actor]) -> Result<(), EnvError> {
//!     for actor in actors {
//!         let loc = actor.location()?;
//!         println!("{} at ({}, {})", actor.id(), loc.x, loc.y);
//!     }
//!     sim.tick()?;
//!     Ok(())
//! }
//! ```

mod error;
mod simulator;
mod types;

pub use error::EnvError;
pub use simulator::{ActorHandle, Simulator, TrafficManager};
pub use types::{
    ActorId, Blueprint, BlueprintAttribute, Location, Rotation, SpawnCommand, SpawnResponse,
    TrafficLightInfo, Trajectory, Transform, WorldSettings,
};
