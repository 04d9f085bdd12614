//! Harness configuration.

use crate::error::HarnessError;
use std::path::PathBuf;

/// Traffic-manager rules and blueprint filtering for spawned vehicles.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationConfig {
    /// Center-to-center distance to the leading vehicle, in meters
    pub distance_to_leading_vehicle: f32,

    /// Percentage below the speed limit (`-20` drives at 120% of the limit)
    pub speed_difference_percentage: f32,

    /// Teleport far-away vehicles instead of simulating their dynamics
    pub hybrid_physics: bool,

    /// Drop non-4-wheeled and blacklisted blueprints
    pub disable_unsafe_vehicles: bool,

    /// Probability (0.0 - 1.0) that a vehicle ignores traffic lights
    pub p_ignore_traffic_lights: f32,

    /// Wildcard pattern selecting the blueprint catalog
    pub blueprint_filter: String,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            distance_to_leading_vehicle: 5.0,
            speed_difference_percentage: 30.0,
            hybrid_physics: true,
            disable_unsafe_vehicles: true,
            p_ignore_traffic_lights: 0.0,
            blueprint_filter: "vehicle.*".to_string(),
        }
    }
}

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Ticks to simulate (one position sample per tick)
    pub ticks: usize,

    /// Vehicles to spawn
    pub vehicles: usize,

    /// Fixed step rate in Hz
    pub fps: u32,

    /// Seed of the run RNG, re-applied at the start of every run
    pub seed: u64,

    /// Traffic manager port
    pub tm_port: u16,

    /// Optional seed for the traffic manager's random device
    pub tm_seed: Option<u64>,

    /// Reset every traffic light group after spawning
    pub reset_light_groups: bool,

    pub population: PopulationConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ticks: 2000,
            vehicles: 15,
            fps: 30,
            seed: 1234,
            tm_port: 8000,
            tm_seed: None,
            reset_light_groups: false,
            population: PopulationConfig::default(),
        }
    }
}

/// Configuration for the whole harness invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Number of runs with identical seeding
    pub iterations: usize,

    pub run: RunConfig,

    /// Render the trajectory overlay after all runs
    pub plot: bool,

    /// Directory for persisted runs and the plot
    pub dst: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            run: RunConfig::default(),
            plot: false,
            dst: None,
        }
    }
}

impl HarnessConfig {
    /// Sets the number of iterations.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the ticks per run.
    pub fn with_ticks(mut self, ticks: usize) -> Self {
        self.run.ticks = ticks;
        self
    }

    /// Sets the vehicle count.
    pub fn with_vehicles(mut self, vehicles: usize) -> Self {
        self.run.vehicles = vehicles;
        self
    }

    /// Sets the run seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.run.seed = seed;
        self
    }

    /// Sets the output directory.
    pub fn with_dst(mut self, dst: impl Into<PathBuf>) -> Self {
        self.dst = Some(dst.into());
        self
    }

    /// Enables the overlay plot.
    pub fn with_plot(mut self, plot: bool) -> Self {
        self.plot = plot;
        self
    }

    /// Rejects configurations no run could satisfy.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.iterations == 0 {
            return Err(HarnessError::InvalidConfig("iterations must be at least 1".into()));
        }
        if self.run.ticks == 0 {
            return Err(HarnessError::InvalidConfig("ticks must be at least 1".into()));
        }
        if self.run.fps == 0 {
            return Err(HarnessError::InvalidConfig("fps must be at least 1".into()));
        }
        let p = self.run.population.p_ignore_traffic_lights;
        if !(0.0..=1.0).contains(&p) {
            return Err(HarnessError::InvalidConfig(format!(
                "ignore-lights probability {} is outside [0, 1]",
                p
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.iterations, 3);
        assert_eq!(config.run.ticks, 2000);
        assert_eq!(config.run.vehicles, 15);
        assert!(!config.plot);
        assert!(config.dst.is_none());
        assert_eq!(config.run.population.distance_to_leading_vehicle, 5.0);
        assert_eq!(config.run.population.speed_difference_percentage, 30.0);
        assert!(config.run.population.disable_unsafe_vehicles);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = HarnessConfig::default()
            .with_iterations(2)
            .with_ticks(10)
            .with_vehicles(4)
            .with_seed(7)
            .with_plot(true)
            .with_dst("out");

        assert_eq!(config.iterations, 2);
        assert_eq!(config.run.ticks, 10);
        assert_eq!(config.run.vehicles, 4);
        assert_eq!(config.run.seed, 7);
        assert!(config.plot);
        assert_eq!(config.dst, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_validation_rejects_degenerate_values() {
        assert!(HarnessConfig::default().with_iterations(0).validate().is_err());
        assert!(HarnessConfig::default().with_ticks(0).validate().is_err());

        let mut config = HarnessConfig::default();
        config.run.population.p_ignore_traffic_lights = 1.5;
        assert!(matches!(config.validate(), Err(HarnessError::InvalidConfig(_))));

        config.run.population.p_ignore_traffic_lights = 1.0;
        config.run.fps = 0;
        assert!(config.validate().is_err());
    }
}
