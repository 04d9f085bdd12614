//! Capability traits for the external simulator.

use crate::error::EnvError;
use crate::types::{
    ActorId, Blueprint, Location, SpawnCommand, SpawnResponse, TrafficLightInfo, Transform,
    WorldSettings,
};

/// The world of a connected simulator.
///
/// This trait abstracts the simulator client so that the harness can drive
/// both a live CARLA server and an in-process scripted world.
///
/// # Implementations
///
/// - **Live**: `CarlaBridge` in `repro_core` - JSON requests over ZeroMQ
/// - **Offline**: `ScriptedSimulator` in `repro_sim` - seeded kinematics
///
/// # Blocking
///
/// Every method is a blocking request/response round trip. Implementations
/// use interior mutability so that actor handles can share the connection.
pub trait Simulator {
    /// Handle to a spawned actor.
    type Actor: ActorHandle;

    /// Handle to the traffic manager.
    type TrafficManager: TrafficManager;

    /// Returns the current world settings.
    fn settings(&self) -> Result<WorldSettings, EnvError>;

    /// Applies world settings.
    fn apply_settings(&self, settings: &WorldSettings) -> Result<(), EnvError>;

    /// Returns the blueprints whose id matches the wildcard `pattern`.
    fn blueprints(&self, pattern: &str) -> Result<Vec<Blueprint>, EnvError>;

    /// Returns the recommended spawn points of the current map, in map order.
    fn spawn_points(&self) -> Result<Vec<Transform>, EnvError>;

    /// Executes a spawn batch synchronously.
    ///
    /// With `do_tick` the world advances one step after the batch so that the
    /// new actors exist before they are sampled.
    ///
    /// # Returns
    /// One response per command, in command order. A failing item does not
    /// abort the rest of the batch.
    fn apply_batch_sync(
        &self,
        batch: Vec<SpawnCommand>,
        do_tick: bool,
    ) -> Result<Vec<SpawnResponse>, EnvError>;

    /// Looks up an actor by id.
    fn actor(&self, id: ActorId) -> Result<Option<Self::Actor>, EnvError>;

    /// Returns the traffic manager listening on `port`.
    fn traffic_manager(&self, port: u16) -> Result<Self::TrafficManager, EnvError>;

    /// Returns every traffic light together with its group.
    fn traffic_lights(&self) -> Result<Vec<TrafficLightInfo>, EnvError>;

    /// Resets the cycle of the group that `light` belongs to.
    fn reset_traffic_light_group(&self, light: ActorId) -> Result<(), EnvError>;

    /// Advances the world by one fixed step.
    ///
    /// Blocks until the simulator confirms the step and returns its frame number.
    fn tick(&self) -> Result<u64, EnvError>;
}

/// A spawned actor.
pub trait ActorHandle {
    /// Returns the actor id.
    fn id(&self) -> ActorId;

    /// Returns the current location of the actor.
    fn location(&self) -> Result<Location, EnvError>;

    /// Removes the actor from the world.
    ///
    /// Returns `false` if the simulator reports the actor was already gone.
    fn destroy(&self) -> Result<bool, EnvError>;
}

/// The simulator's traffic-control subsystem driving autopilot actors.
pub trait TrafficManager {
    /// Port the traffic manager listens on (used by autopilot commands).
    fn port(&self) -> u16;

    /// Minimum center-to-center distance to the leading vehicle, in meters.
    fn set_global_distance_to_leading_vehicle(&self, meters: f32) -> Result<(), EnvError>;

    /// Percentage below the speed limit (negative values exceed it).
    fn global_percentage_speed_difference(&self, percentage: f32) -> Result<(), EnvError>;

    /// Teleports far-away vehicles instead of simulating their dynamics.
    fn set_hybrid_physics_mode(&self, enabled: bool) -> Result<(), EnvError>;

    /// Lock-steps the traffic manager with synchronous world ticks.
    fn set_synchronous_mode(&self, enabled: bool) -> Result<(), EnvError>;

    /// Seeds the traffic manager's internal random device.
    fn set_random_device_seed(&self, seed: u64) -> Result<(), EnvError>;

    /// Percentage of traffic lights `actor` ignores.
    fn ignore_lights_percentage(&self, actor: ActorId, percentage: f32) -> Result<(), EnvError>;

    /// Resets every traffic light in the map to its initial state.
    fn reset_traffic_lights(&self) -> Result<(), EnvError>;
}
