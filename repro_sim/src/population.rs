//! Population setup: blueprint filtering, spawn selection and autopilot registration.

use crate::config::PopulationConfig;
use crate::error::HarnessError;
use rand::seq::SliceRandom;
use rand::Rng;
use repro_env::{
    ActorHandle, ActorId, Blueprint, Simulator, SpawnCommand, SpawnResponse, TrafficManager,
    Transform,
};
use tracing::{debug, error, info, warn};

/// Blueprint id suffixes excluded when unsafe vehicles are disabled.
pub const UNSAFE_SUFFIXES: [&str; 4] = ["isetta", "carlacola", "cybertruck", "t2"];

/// Returns true for 4-wheeled blueprints outside the blacklist.
pub fn is_safe_blueprint(blueprint: &Blueprint) -> bool {
    blueprint.number_of_wheels() == Some(4)
        && !UNSAFE_SUFFIXES
            .iter()
            .any(|suffix| blueprint.id.ends_with(suffix))
}

/// Applies the safety heuristics to a catalog, keeping catalog order.
pub fn filter_blueprints(catalog: Vec<Blueprint>, disable_unsafe_vehicles: bool) -> Vec<Blueprint> {
    if !disable_unsafe_vehicles {
        return catalog;
    }
    catalog.into_iter().filter(is_safe_blueprint).collect()
}

/// How many vehicles a run actually spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnPlan {
    /// Vehicles asked for
    pub requested: usize,

    /// Spawn points the map offers
    pub available: usize,

    /// Spawn commands issued
    pub count: usize,
}

impl SpawnPlan {
    /// True when the map had fewer spawn points than requested.
    pub fn truncated(&self) -> bool {
        self.count < self.requested
    }
}

/// Picks the spawn transforms for `requested` vehicles.
///
/// With more spawn points than needed the points are shuffled and a prefix is
/// used. With fewer, a warning is logged and every point is used in map order.
pub fn select_spawn_points<R: Rng>(
    mut spawn_points: Vec<Transform>,
    requested: usize,
    rng: &mut R,
) -> (Vec<Transform>, SpawnPlan) {
    let available = spawn_points.len();

    if requested < available {
        spawn_points.shuffle(rng);
    } else if requested > available {
        warn!(
            "requested {} vehicles, but could only find {} spawn points",
            requested, available
        );
    }

    let count = requested.min(available);
    spawn_points.truncate(count);

    (spawn_points, SpawnPlan { requested, available, count })
}

/// Builds one spawn-then-autopilot command per transform.
///
/// Each command gets a uniformly chosen blueprint with randomized `color` and
/// `driver_id` (when the blueprint has them) and `role_name = autopilot`.
pub fn build_batch<R: Rng>(
    blueprints: &[Blueprint],
    transforms: &[Transform],
    autopilot_port: u16,
    rng: &mut R,
) -> Result<Vec<SpawnCommand>, HarnessError> {
    if transforms.is_empty() {
        return Ok(Vec::new());
    }
    if blueprints.is_empty() {
        return Err(HarnessError::NoBlueprints);
    }

    let mut batch = Vec::with_capacity(transforms.len());
    for transform in transforms {
        let mut blueprint = blueprints
            .choose(rng)
            .cloned()
            .ok_or(HarnessError::NoBlueprints)?;

        for name in ["color", "driver_id"] {
            let choice = blueprint
                .attribute(name)
                .and_then(|attr| attr.recommended_values.choose(rng))
                .cloned();
            if let Some(value) = choice {
                blueprint.set_attribute(name, value);
            }
        }
        blueprint.set_attribute("role_name", "autopilot");

        batch.push(SpawnCommand {
            blueprint,
            transform: *transform,
            autopilot_port,
        });
    }

    Ok(batch)
}

/// Splits batch responses into spawned ids (response order) and a failure count.
///
/// Failures are logged individually.
pub fn collect_spawned(responses: Vec<SpawnResponse>) -> (Vec<ActorId>, usize) {
    let mut spawned = Vec::with_capacity(responses.len());
    let mut failed = 0;

    for response in responses {
        match response {
            Ok(id) => spawned.push(id),
            Err(message) => {
                error!("{}", message);
                failed += 1;
            }
        }
    }

    (spawned, failed)
}

/// Outcome of a population setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnReport {
    pub plan: SpawnPlan,

    /// Actors spawned, verified and handed to the traffic manager
    pub spawned: usize,

    /// Batch items the simulator rejected
    pub failed: usize,

    /// Spawned ids the world could not resolve to an actor
    pub unresolved: usize,
}

/// Applies the global traffic-manager rules of `config`.
pub fn configure_traffic_manager<T: TrafficManager>(
    tm: &T,
    config: &PopulationConfig,
) -> Result<(), HarnessError> {
    tm.set_global_distance_to_leading_vehicle(config.distance_to_leading_vehicle)?;
    tm.global_percentage_speed_difference(config.speed_difference_percentage)?;
    tm.set_hybrid_physics_mode(config.hybrid_physics)?;
    Ok(())
}

/// Spawns up to `requested` autopilot vehicles.
///
/// Every verified actor is pushed into `actors` as soon as it is resolved, so
/// the caller owns it for cleanup even if a later step fails.
pub fn spawn_vehicles<S: Simulator, R: Rng>(
    sim: &S,
    tm: &S::TrafficManager,
    config: &PopulationConfig,
    requested: usize,
    rng: &mut R,
    actors: &mut Vec<S::Actor>,
) -> Result<SpawnReport, HarnessError> {
    configure_traffic_manager(tm, config)?;

    let catalog = sim.blueprints(&config.blueprint_filter)?;
    let catalog_size = catalog.len();
    let blueprints = filter_blueprints(catalog, config.disable_unsafe_vehicles);
    debug!(
        "{} of {} blueprints pass the filter",
        blueprints.len(),
        catalog_size
    );

    let (transforms, plan) = select_spawn_points(sim.spawn_points()?, requested, rng);
    let batch = build_batch(&blueprints, &transforms, tm.port(), rng)?;

    let responses = sim.apply_batch_sync(batch, true)?;
    let (ids, failed) = collect_spawned(responses);

    let ignore_percentage = config.p_ignore_traffic_lights * 100.0;
    let mut unresolved = 0;
    for id in ids {
        let actor = match sim.actor(id)? {
            Some(actor) if actor.id() == id => actor,
            Some(actor) => {
                error!("actor lookup for {} returned {}", id, actor.id());
                unresolved += 1;
                continue;
            }
            None => {
                error!("spawned actor {} is not in the world", id);
                unresolved += 1;
                continue;
            }
        };
        actors.push(actor);
        tm.ignore_lights_percentage(id, ignore_percentage)?;
    }

    let spawned = actors.len();
    info!("{} vehicles were spawned", spawned);

    Ok(SpawnReport {
        plan,
        spawned,
        failed,
        unresolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{default_catalog, ScriptedSimulator};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use repro_env::{BlueprintAttribute, Location, WorldSettings};
    use tracing_test::traced_test;

    fn transforms(n: usize) -> Vec<Transform> {
        (0..n)
            .map(|i| Transform::at(Location::new(i as f32 * 20.0, 0.0, 0.0)))
            .collect()
    }

    #[test]
    fn test_filter_removes_unsafe_blueprints() {
        let filtered = filter_blueprints(default_catalog(), true);

        assert!(!filtered.is_empty());
        for bp in &filtered {
            assert_eq!(bp.number_of_wheels(), Some(4), "{}", bp.id);
            for suffix in UNSAFE_SUFFIXES {
                assert!(!bp.id.ends_with(suffix), "{}", bp.id);
            }
        }
    }

    #[test]
    fn test_filter_disabled_keeps_catalog() {
        let catalog = default_catalog();
        assert_eq!(filter_blueprints(catalog.clone(), false), catalog);
    }

    #[test]
    fn test_blueprint_without_wheel_count_is_unsafe() {
        assert!(!is_safe_blueprint(&Blueprint::new("vehicle.mystery")));
        assert!(is_safe_blueprint(
            &Blueprint::new("vehicle.audi.a2")
                .with_attribute("number_of_wheels", BlueprintAttribute::new("4"))
        ));
    }

    #[traced_test]
    #[test]
    fn test_selection_truncates_when_short_of_spawn_points() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let points = transforms(3);
        let (selected, plan) = select_spawn_points(points.clone(), 5, &mut rng);

        assert_eq!(plan, SpawnPlan { requested: 5, available: 3, count: 3 });
        assert!(plan.truncated());
        // No shuffle when every point is used
        assert_eq!(selected, points);

        logs_assert(|lines: &[&str]| {
            let warnings = lines
                .iter()
                .filter(|l| l.contains("WARN") && l.contains("could only find"))
                .count();
            match warnings {
                1 => Ok(()),
                n => Err(format!("expected exactly one spawn point warning, got {}", n)),
            }
        });
    }

    #[traced_test]
    #[test]
    fn test_selection_with_enough_points_does_not_warn() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        select_spawn_points(transforms(8), 5, &mut rng);
        assert!(!logs_contain("could only find"));
    }

    #[test]
    fn test_selection_exact_count_keeps_map_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let points = transforms(4);
        let (selected, plan) = select_spawn_points(points.clone(), 4, &mut rng);
        assert_eq!(selected, points);
        assert!(!plan.truncated());
    }

    #[test]
    fn test_selection_is_seed_deterministic() {
        let points = transforms(50);

        let (a, _) = select_spawn_points(points.clone(), 10, &mut ChaCha8Rng::seed_from_u64(7));
        let (b, _) = select_spawn_points(points.clone(), 10, &mut ChaCha8Rng::seed_from_u64(7));
        let (c, _) = select_spawn_points(points, 10, &mut ChaCha8Rng::seed_from_u64(8));

        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_batch_randomizes_attributes_from_recommendations() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let blueprints = filter_blueprints(default_catalog(), true);
        let batch = build_batch(&blueprints, &transforms(20), 8000, &mut rng).unwrap();

        assert_eq!(batch.len(), 20);
        for cmd in &batch {
            assert_eq!(cmd.autopilot_port, 8000);
            assert_eq!(cmd.blueprint.attribute("role_name").unwrap().value, "autopilot");
            if let Some(color) = cmd.blueprint.attribute("color") {
                assert!(color.recommended_values.contains(&color.value));
            }
            if let Some(driver) = cmd.blueprint.attribute("driver_id") {
                assert!(driver.recommended_values.contains(&driver.value));
            }
        }
    }

    #[test]
    fn test_batch_requires_blueprints() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(matches!(
            build_batch(&[], &transforms(1), 8000, &mut rng),
            Err(HarnessError::NoBlueprints)
        ));
        assert!(build_batch(&[], &[], 8000, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn test_collect_spawned_skips_errors() {
        let (ids, failed) = collect_spawned(vec![
            Ok(ActorId(4)),
            Err("collision".into()),
            Ok(ActorId(2)),
        ]);
        assert_eq!(ids, vec![ActorId(4), ActorId(2)]);
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_spawn_vehicles_registers_autopilot() {
        let sim = ScriptedSimulator::town(30, 5);
        sim.apply_settings(&WorldSettings::default().synchronous(30)).unwrap();
        let tm = sim.traffic_manager(8000).unwrap();

        let config = PopulationConfig {
            p_ignore_traffic_lights: 0.25,
            ..Default::default()
        };
        let mut actors = Vec::new();
        let report = spawn_vehicles(
            &sim,
            &tm,
            &config,
            12,
            &mut ChaCha8Rng::seed_from_u64(1234),
            &mut actors,
        )
        .unwrap();

        assert_eq!(report.spawned, 12);
        assert_eq!(report.failed, 0);
        assert_eq!(actors.len(), 12);

        let state = sim.traffic_manager_state();
        assert_eq!(state.distance_to_leading_vehicle, 5.0);
        assert_eq!(state.speed_difference_percentage, 30.0);
        assert!(state.hybrid_physics);
        assert_eq!(state.ignore_lights.len(), 12);
        assert!(state.ignore_lights.values().all(|p| (*p - 25.0).abs() < 1e-6));

        for bp in sim.live_blueprints() {
            assert!(is_safe_blueprint(&bp), "{}", bp.id);
        }
    }

    #[test]
    fn test_spawn_vehicles_with_too_few_spawn_points() {
        let sim = ScriptedSimulator::town(4, 5);
        let tm = sim.traffic_manager(8000).unwrap();

        let mut actors = Vec::new();
        let report = spawn_vehicles(
            &sim,
            &tm,
            &PopulationConfig::default(),
            10,
            &mut ChaCha8Rng::seed_from_u64(1),
            &mut actors,
        )
        .unwrap();

        assert!(report.plan.truncated());
        assert_eq!(report.plan.count, 4);
        assert_eq!(report.spawned, 4);
    }
}
