//! In-process scripted simulator.
//!
//! A deterministic stand-in for a live CARLA server:
//! - Spawn points and the blueprint catalog are fixed at construction
//! - Vehicles move with constant velocity along their spawn heading
//! - Actor ids keep increasing across runs, like a long-lived server
//!
//! Faults and nondeterminism can be injected to exercise the harness.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use repro_env::{
    ActorHandle, ActorId, Blueprint, BlueprintAttribute, EnvError, Location, Rotation, Simulator,
    SpawnCommand, SpawnResponse, TrafficLightInfo, TrafficManager, Transform, WorldSettings,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Step length used when the world is not in fixed-step mode.
const VARIABLE_STEP_SECS: f64 = 0.05;

/// Cruise speed before the traffic manager's speed difference, in m/s.
const BASE_SPEED: f32 = 10.0;

/// Returns true when `text` matches `pattern`, where `*` matches any run of characters.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) || text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }

    let mut rest = &text[first.len()..text.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

/// Traffic manager state as last configured by the harness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficManagerState {
    pub synchronous: bool,
    pub hybrid_physics: bool,
    pub distance_to_leading_vehicle: f32,
    pub speed_difference_percentage: f32,
    pub random_device_seed: Option<u64>,
    pub ignore_lights: BTreeMap<ActorId, f32>,
    pub light_resets: usize,
}

#[derive(Debug, Clone)]
struct ScriptedVehicle {
    blueprint: Blueprint,
    position: Vector3<f32>,
    heading: Vector3<f32>,
}

struct ScriptedWorld {
    settings: WorldSettings,
    settings_history: Vec<WorldSettings>,
    blueprints: Vec<Blueprint>,
    spawn_points: Vec<Transform>,
    traffic_lights: Vec<TrafficLightInfo>,
    group_resets: Vec<ActorId>,
    vehicles: BTreeMap<ActorId, ScriptedVehicle>,
    destroyed: Vec<ActorId>,
    next_id: u32,
    frame: u64,
    ticks: u64,
    tm: TrafficManagerState,
    fail_at_tick: Option<u64>,
    batches: u64,
    reject_in_batch: Option<u64>,
    jitter: Option<(ChaCha8Rng, f32)>,
}

impl ScriptedWorld {
    fn step(&mut self) {
        let dt = self.settings.fixed_delta_seconds.unwrap_or(VARIABLE_STEP_SECS) as f32;
        let speed = BASE_SPEED * (1.0 - self.tm.speed_difference_percentage / 100.0);

        for vehicle in self.vehicles.values_mut() {
            vehicle.position += vehicle.heading * speed * dt;
            if let Some((rng, magnitude)) = self.jitter.as_mut() {
                vehicle.position.x += rng.gen_range(-*magnitude..=*magnitude);
                vehicle.position.y += rng.gen_range(-*magnitude..=*magnitude);
            }
        }
        self.frame += 1;
    }

    fn spawn(&mut self, command: SpawnCommand) -> SpawnResponse {
        let position = command.transform.location.to_vector();
        let occupied = self
            .vehicles
            .values()
            .any(|v| (v.position - position).norm() < 1.0);
        if occupied {
            return Err("Spawn failed because of collision at spawn position".to_string());
        }

        let yaw = command.transform.rotation.yaw.to_radians();
        let id = ActorId(self.next_id);
        self.next_id += 1;
        self.vehicles.insert(
            id,
            ScriptedVehicle {
                blueprint: command.blueprint,
                position,
                heading: Vector3::new(yaw.cos(), yaw.sin(), 0.0),
            },
        );
        Ok(id)
    }
}

/// Deterministic in-process simulator.
///
/// Cloning shares the underlying world, so a test can keep a clone to
/// inspect the world after the harness is done with it.
#[derive(Clone)]
pub struct ScriptedSimulator {
    world: Rc<RefCell<ScriptedWorld>>,
}

impl ScriptedSimulator {
    /// Creates a world with the given spawn points and blueprint catalog.
    pub fn new(spawn_points: Vec<Transform>, blueprints: Vec<Blueprint>) -> Self {
        Self {
            world: Rc::new(RefCell::new(ScriptedWorld {
                settings: WorldSettings::default(),
                settings_history: Vec::new(),
                blueprints,
                spawn_points,
                traffic_lights: Vec::new(),
                group_resets: Vec::new(),
                vehicles: BTreeMap::new(),
                destroyed: Vec::new(),
                next_id: 100,
                frame: 0,
                ticks: 0,
                tm: TrafficManagerState::default(),
                fail_at_tick: None,
                batches: 0,
                reject_in_batch: None,
                jitter: None,
            })),
        }
    }

    /// A town with `spawn_point_count` spawn points on a 50 m grid and the default catalog.
    ///
    /// Headings come from `map_seed`, so two towns with the same seed are identical.
    pub fn town(spawn_point_count: usize, map_seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(map_seed);
        let spawn_points = (0..spawn_point_count)
            .map(|i| {
                let location = Location::new((i % 10) as f32 * 50.0, (i / 10) as f32 * 50.0, 0.3);
                let rotation = Rotation {
                    yaw: rng.gen_range(0..4) as f32 * 90.0,
                    ..Default::default()
                };
                Transform::new(location, rotation)
            })
            .collect();
        Self::new(spawn_points, default_catalog())
    }

    /// Sets the traffic lights reported by the world.
    pub fn with_traffic_lights(self, lights: Vec<TrafficLightInfo>) -> Self {
        self.world.borrow_mut().traffic_lights = lights;
        self
    }

    /// Makes the `n`-th call to `tick()` (1-based, counted over the world's lifetime) fail.
    pub fn fail_at_tick(self, n: u64) -> Self {
        self.world.borrow_mut().fail_at_tick = Some(n);
        self
    }

    /// Makes the last item of the `n`-th spawn batch (1-based) fail with a
    /// per-item error, as a live server does when a spawn point is blocked.
    pub fn reject_last_spawn_in_batch(self, n: u64) -> Self {
        self.world.borrow_mut().reject_in_batch = Some(n);
        self
    }

    /// Adds uniform noise of up to `magnitude` meters per step from an RNG that
    /// is never re-seeded, so repeated runs drift apart.
    pub fn with_nondeterminism(self, seed: u64, magnitude: f32) -> Self {
        self.world.borrow_mut().jitter = Some((ChaCha8Rng::seed_from_u64(seed), magnitude));
        self
    }

    /// Number of actors currently alive.
    pub fn live_actor_count(&self) -> usize {
        self.world.borrow().vehicles.len()
    }

    /// Ids of every destroyed actor, in destruction order.
    pub fn destroyed(&self) -> Vec<ActorId> {
        self.world.borrow().destroyed.clone()
    }

    /// Current world settings.
    pub fn current_settings(&self) -> WorldSettings {
        self.world.borrow().settings
    }

    /// Every settings value applied so far, in order.
    pub fn settings_history(&self) -> Vec<WorldSettings> {
        self.world.borrow().settings_history.clone()
    }

    /// Traffic manager state.
    pub fn traffic_manager_state(&self) -> TrafficManagerState {
        self.world.borrow().tm.clone()
    }

    /// Lights on which `reset_traffic_light_group` was called, in call order.
    pub fn group_resets(&self) -> Vec<ActorId> {
        self.world.borrow().group_resets.clone()
    }

    /// Blueprints of the live actors, ordered by actor id.
    pub fn live_blueprints(&self) -> Vec<Blueprint> {
        self.world
            .borrow()
            .vehicles
            .values()
            .map(|v| v.blueprint.clone())
            .collect()
    }

    /// Current frame number.
    pub fn frame(&self) -> u64 {
        self.world.borrow().frame
    }
}

impl Simulator for ScriptedSimulator {
    type Actor = ScriptedActor;
    type TrafficManager = ScriptedTrafficManager;

    fn settings(&self) -> Result<WorldSettings, EnvError> {
        Ok(self.world.borrow().settings)
    }

    fn apply_settings(&self, settings: &WorldSettings) -> Result<(), EnvError> {
        let mut world = self.world.borrow_mut();
        world.settings = *settings;
        world.settings_history.push(*settings);
        Ok(())
    }

    fn blueprints(&self, pattern: &str) -> Result<Vec<Blueprint>, EnvError> {
        Ok(self
            .world
            .borrow()
            .blueprints
            .iter()
            .filter(|bp| wildcard_match(pattern, &bp.id))
            .cloned()
            .collect())
    }

    fn spawn_points(&self) -> Result<Vec<Transform>, EnvError> {
        Ok(self.world.borrow().spawn_points.clone())
    }

    fn apply_batch_sync(
        &self,
        batch: Vec<SpawnCommand>,
        do_tick: bool,
    ) -> Result<Vec<SpawnResponse>, EnvError> {
        let mut world = self.world.borrow_mut();
        world.batches += 1;
        let reject_last = world.reject_in_batch == Some(world.batches);

        let last = batch.len().saturating_sub(1);
        let responses: Vec<SpawnResponse> = batch
            .into_iter()
            .enumerate()
            .map(|(i, cmd)| {
                if reject_last && i == last {
                    Err("Spawn failed because of collision at spawn position".to_string())
                } else {
                    world.spawn(cmd)
                }
            })
            .collect();
        if do_tick && world.settings.synchronous_mode {
            world.step();
        }
        Ok(responses)
    }

    fn actor(&self, id: ActorId) -> Result<Option<Self::Actor>, EnvError> {
        let exists = self.world.borrow().vehicles.contains_key(&id);
        Ok(exists.then(|| ScriptedActor {
            id,
            world: Rc::clone(&self.world),
        }))
    }

    fn traffic_manager(&self, port: u16) -> Result<Self::TrafficManager, EnvError> {
        Ok(ScriptedTrafficManager {
            port,
            world: Rc::clone(&self.world),
        })
    }

    fn traffic_lights(&self) -> Result<Vec<TrafficLightInfo>, EnvError> {
        Ok(self.world.borrow().traffic_lights.clone())
    }

    fn reset_traffic_light_group(&self, light: ActorId) -> Result<(), EnvError> {
        let mut world = self.world.borrow_mut();
        if !world.traffic_lights.iter().any(|tl| tl.id == light) {
            return Err(EnvError::UnknownActor(light));
        }
        world.group_resets.push(light);
        Ok(())
    }

    fn tick(&self) -> Result<u64, EnvError> {
        let mut world = self.world.borrow_mut();
        world.ticks += 1;
        if world.fail_at_tick == Some(world.ticks) {
            return Err(EnvError::rpc(format!("scripted fault at tick {}", world.ticks)));
        }
        world.step();
        Ok(world.frame)
    }
}

/// Actor of a [`ScriptedSimulator`].
pub struct ScriptedActor {
    id: ActorId,
    world: Rc<RefCell<ScriptedWorld>>,
}

impl ActorHandle for ScriptedActor {
    fn id(&self) -> ActorId {
        self.id
    }

    fn location(&self) -> Result<Location, EnvError> {
        self.world
            .borrow()
            .vehicles
            .get(&self.id)
            .map(|v| Location::from(v.position))
            .ok_or(EnvError::UnknownActor(self.id))
    }

    fn destroy(&self) -> Result<bool, EnvError> {
        let mut world = self.world.borrow_mut();
        let removed = world.vehicles.remove(&self.id).is_some();
        if removed {
            world.destroyed.push(self.id);
        }
        Ok(removed)
    }
}

/// Traffic manager of a [`ScriptedSimulator`].
pub struct ScriptedTrafficManager {
    port: u16,
    world: Rc<RefCell<ScriptedWorld>>,
}

impl ScriptedTrafficManager {
    fn update(&self, f: impl FnOnce(&mut TrafficManagerState)) -> Result<(), EnvError> {
        f(&mut self.world.borrow_mut().tm);
        Ok(())
    }
}

impl TrafficManager for ScriptedTrafficManager {
    fn port(&self) -> u16 {
        self.port
    }

    fn set_global_distance_to_leading_vehicle(&self, meters: f32) -> Result<(), EnvError> {
        self.update(|tm| tm.distance_to_leading_vehicle = meters)
    }

    fn global_percentage_speed_difference(&self, percentage: f32) -> Result<(), EnvError> {
        self.update(|tm| tm.speed_difference_percentage = percentage)
    }

    fn set_hybrid_physics_mode(&self, enabled: bool) -> Result<(), EnvError> {
        self.update(|tm| tm.hybrid_physics = enabled)
    }

    fn set_synchronous_mode(&self, enabled: bool) -> Result<(), EnvError> {
        self.update(|tm| tm.synchronous = enabled)
    }

    fn set_random_device_seed(&self, seed: u64) -> Result<(), EnvError> {
        self.update(|tm| tm.random_device_seed = Some(seed))
    }

    fn ignore_lights_percentage(&self, actor: ActorId, percentage: f32) -> Result<(), EnvError> {
        self.update(|tm| {
            tm.ignore_lights.insert(actor, percentage);
        })
    }

    fn reset_traffic_lights(&self) -> Result<(), EnvError> {
        self.update(|tm| tm.light_resets += 1)
    }
}

/// Vehicle catalog resembling a stock CARLA install, unsafe models included.
pub fn default_catalog() -> Vec<Blueprint> {
    let car = |id: &str| {
        Blueprint::new(id)
            .with_attribute("number_of_wheels", BlueprintAttribute::new("4"))
            .with_attribute(
                "color",
                BlueprintAttribute::new("255,255,255")
                    .with_recommended(&["255,255,255", "17,37,103", "200,0,0"]),
            )
            .with_attribute(
                "driver_id",
                BlueprintAttribute::new("0").with_recommended(&["0", "1", "2"]),
            )
            .with_attribute("role_name", BlueprintAttribute::new("none"))
    };
    let bike = |id: &str| {
        Blueprint::new(id)
            .with_attribute("number_of_wheels", BlueprintAttribute::new("2"))
            .with_attribute(
                "driver_id",
                BlueprintAttribute::new("0").with_recommended(&["0", "1"]),
            )
    };

    vec![
        car("vehicle.audi.tt"),
        car("vehicle.tesla.model3"),
        car("vehicle.lincoln.mkz_2017"),
        car("vehicle.bmw.isetta"),
        car("vehicle.carlamotors.carlacola"),
        car("vehicle.tesla.cybertruck"),
        car("vehicle.volkswagen.t2"),
        car("vehicle.nissan.patrol"),
        bike("vehicle.yamaha.yzf"),
        bike("vehicle.bh.crossbike"),
        Blueprint::new("vehicle.mini.cooper_s")
            .with_attribute("number_of_wheels", BlueprintAttribute::new("4")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_command(x: f32, yaw: f32) -> SpawnCommand {
        SpawnCommand {
            blueprint: Blueprint::new("vehicle.audi.tt"),
            transform: Transform::new(Location::new(x, 0.0, 0.0), Rotation { yaw, ..Default::default() }),
            autopilot_port: 8000,
        }
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("vehicle.*", "vehicle.audi.tt"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("vehicle.*.tt", "vehicle.audi.tt"));
        assert!(wildcard_match("vehicle.audi.tt", "vehicle.audi.tt"));
        assert!(!wildcard_match("vehicle.*", "walker.pedestrian.0001"));
        assert!(!wildcard_match("vehicle.*.tt", "vehicle.audi.a2"));
        assert!(!wildcard_match("a*a", "a"));
    }

    #[test]
    fn test_catalog_filter_by_pattern() {
        let sim = ScriptedSimulator::town(4, 1);
        let all = sim.blueprints("vehicle.*").unwrap();
        assert_eq!(all.len(), default_catalog().len());

        let teslas = sim.blueprints("vehicle.tesla.*").unwrap();
        assert_eq!(teslas.len(), 2);
    }

    #[test]
    fn test_town_is_deterministic() {
        let a = ScriptedSimulator::town(20, 9).spawn_points().unwrap();
        let b = ScriptedSimulator::town(20, 9).spawn_points().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_vehicles_move_along_heading() {
        let sim = ScriptedSimulator::town(0, 1);
        sim.apply_settings(&WorldSettings::default().synchronous(10)).unwrap();

        let responses = sim
            .apply_batch_sync(vec![spawn_command(0.0, 90.0)], false)
            .unwrap();
        let id = responses[0].clone().unwrap();
        let actor = sim.actor(id).unwrap().unwrap();

        sim.tick().unwrap();

        let loc = actor.location().unwrap();
        // 10 m/s for 0.1 s along +y
        approx::assert_abs_diff_eq!(loc.x, 0.0, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(loc.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_spawn_collision_is_reported_per_item() {
        let sim = ScriptedSimulator::town(0, 1);
        let responses = sim
            .apply_batch_sync(
                vec![spawn_command(0.0, 0.0), spawn_command(0.0, 0.0), spawn_command(10.0, 0.0)],
                true,
            )
            .unwrap();

        assert!(responses[0].is_ok());
        assert!(responses[1].as_ref().unwrap_err().contains("collision"));
        assert!(responses[2].is_ok());
        assert_eq!(sim.live_actor_count(), 2);
    }

    #[test]
    fn test_ids_keep_increasing_after_destroy() {
        let sim = ScriptedSimulator::town(0, 1);
        let first = sim.apply_batch_sync(vec![spawn_command(0.0, 0.0)], false).unwrap();
        let first = first[0].clone().unwrap();
        assert!(sim.actor(first).unwrap().unwrap().destroy().unwrap());

        let second = sim.apply_batch_sync(vec![spawn_command(0.0, 0.0)], false).unwrap();
        assert!(second[0].clone().unwrap() > first);
        assert_eq!(sim.destroyed(), vec![first]);
    }

    #[test]
    fn test_destroyed_actor_has_no_location() {
        let sim = ScriptedSimulator::town(0, 1);
        let id = sim.apply_batch_sync(vec![spawn_command(0.0, 0.0)], false).unwrap()[0]
            .clone()
            .unwrap();
        let actor = sim.actor(id).unwrap().unwrap();

        assert!(actor.destroy().unwrap());
        assert!(!actor.destroy().unwrap());
        assert!(matches!(actor.location(), Err(EnvError::UnknownActor(_))));
        assert!(sim.actor(id).unwrap().is_none());
    }

    #[test]
    fn test_rejected_batch_item() {
        let sim = ScriptedSimulator::town(0, 1).reject_last_spawn_in_batch(2);
        let first = sim
            .apply_batch_sync(vec![spawn_command(0.0, 0.0), spawn_command(10.0, 0.0)], false)
            .unwrap();
        assert!(first.iter().all(|r| r.is_ok()));

        let second = sim
            .apply_batch_sync(vec![spawn_command(20.0, 0.0), spawn_command(30.0, 0.0)], false)
            .unwrap();
        assert!(second[0].is_ok());
        assert!(second[1].is_err());
        assert_eq!(sim.live_actor_count(), 3);
    }

    #[test]
    fn test_fault_injection() {
        let sim = ScriptedSimulator::town(0, 1).fail_at_tick(2);
        assert!(sim.tick().is_ok());
        assert!(matches!(sim.tick(), Err(EnvError::RpcError(_))));
        assert!(sim.tick().is_ok());
    }

    #[test]
    fn test_traffic_manager_state() {
        let sim = ScriptedSimulator::town(0, 1);
        let tm = sim.traffic_manager(8000).unwrap();
        tm.set_synchronous_mode(true).unwrap();
        tm.set_hybrid_physics_mode(true).unwrap();
        tm.ignore_lights_percentage(ActorId(5), 40.0).unwrap();
        tm.reset_traffic_lights().unwrap();

        let state = sim.traffic_manager_state();
        assert!(state.synchronous);
        assert!(state.hybrid_physics);
        assert_eq!(state.ignore_lights.get(&ActorId(5)), Some(&40.0));
        assert_eq!(state.light_resets, 1);
    }
}
