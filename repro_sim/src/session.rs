//! Run session: world setup and guaranteed teardown.
//!
//! A [`RunSession`] switches the world to synchronous fixed-step mode when it
//! is opened and owns every actor spawned during the run. Closing it (or
//! dropping it, when a run fails part-way) destroys the actors, restores the
//! settings captured at open and takes the traffic manager out of synchronous
//! mode.

use crate::config::PopulationConfig;
use crate::error::HarnessError;
use crate::population::{spawn_vehicles, SpawnReport};
use crate::recorder::TrajectoryRecorder;
use rand::Rng;
use repro_env::{ActorHandle, EnvError, Simulator, TrafficManager, WorldSettings};
use tracing::{debug, error, info, warn};

/// An open run on a simulator.
pub struct RunSession<'a, S: Simulator> {
    sim: &'a S,
    traffic_manager: S::TrafficManager,
    original_settings: WorldSettings,
    actors: Vec<S::Actor>,
    closed: bool,
}

impl<'a, S: Simulator> RunSession<'a, S> {
    /// Captures the current settings and enters synchronous mode at `fps`.
    ///
    /// If entering synchronous mode fails, whatever was already changed is
    /// rolled back before the error is returned. A zero `fps` is rejected
    /// before the world is touched.
    pub fn open(sim: &'a S, fps: u32, tm_port: u16) -> Result<Self, HarnessError> {
        if fps == 0 {
            return Err(HarnessError::InvalidConfig("fps must be at least 1".into()));
        }

        let original_settings = sim.settings()?;
        let traffic_manager = sim.traffic_manager(tm_port)?;

        // Guard exists before anything is changed
        let session = Self {
            sim,
            traffic_manager,
            original_settings,
            actors: Vec::new(),
            closed: false,
        };

        session.traffic_manager.set_synchronous_mode(true)?;
        sim.apply_settings(&original_settings.synchronous(fps))?;
        debug!("World in synchronous mode at {} fps", fps);

        Ok(session)
    }

    /// Spawns the autopilot population; spawned actors are owned by the session.
    pub fn spawn_population<R: Rng>(
        &mut self,
        config: &PopulationConfig,
        requested: usize,
        rng: &mut R,
    ) -> Result<SpawnReport, HarnessError> {
        spawn_vehicles(
            self.sim,
            &self.traffic_manager,
            config,
            requested,
            rng,
            &mut self.actors,
        )
    }

    pub fn actors(&self) -> &[S::Actor] {
        &self.actors
    }

    pub fn traffic_manager(&self) -> &S::TrafficManager {
        &self.traffic_manager
    }

    pub fn simulator(&self) -> &'a S {
        self.sim
    }

    /// Records the current position of every owned actor.
    pub fn sample(&self, recorder: &mut TrajectoryRecorder) -> Result<(), EnvError> {
        recorder.record(&self.actors)
    }

    /// Advances the world by one tick.
    pub fn step(&self) -> Result<u64, EnvError> {
        self.sim.tick()
    }

    /// Tears the session down and reports the first cleanup error.
    pub fn close(mut self) -> Result<(), HarnessError> {
        self.closed = true;
        self.teardown().map_err(HarnessError::from)
    }

    /// Attempts every cleanup step even if an earlier one fails.
    fn teardown(&mut self) -> Result<(), EnvError> {
        let mut first_error: Option<EnvError> = None;
        let mut keep = |result: Result<(), EnvError>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!("Additional cleanup error: {}", e);
                }
            }
        };

        let count = self.actors.len();
        for actor in self.actors.drain(..) {
            let id = actor.id();
            keep(actor.destroy().map(|removed| {
                if !removed {
                    debug!("Actor {} was already gone", id);
                }
            }));
        }
        info!("Destroyed {} actors", count);

        keep(self.sim.apply_settings(&self.original_settings));
        keep(self.traffic_manager.set_synchronous_mode(false));

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: Simulator> Drop for RunSession<'_, S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.teardown() {
            error!("❌ Cleanup after failed run: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedSimulator;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_open_enters_synchronous_mode() {
        let sim = ScriptedSimulator::town(10, 1);
        let session = RunSession::open(&sim, 30, 8000).unwrap();

        let settings = sim.current_settings();
        assert!(settings.synchronous_mode);
        assert!(settings.no_rendering_mode);
        assert_eq!(settings.fixed_delta_seconds, Some(1.0 / 30.0));
        assert!(sim.traffic_manager_state().synchronous);
        assert_eq!(session.traffic_manager().port(), 8000);

        session.close().unwrap();
    }

    #[test]
    fn test_open_rejects_zero_fps() {
        let sim = ScriptedSimulator::town(10, 1);
        let result = RunSession::open(&sim, 0, 8000);

        assert!(matches!(result, Err(HarnessError::InvalidConfig(_))));
        assert!(sim.settings_history().is_empty());
        assert!(!sim.traffic_manager_state().synchronous);
    }

    #[test]
    fn test_close_restores_and_destroys() {
        let sim = ScriptedSimulator::town(10, 1);
        let before = sim.current_settings();

        let mut session = RunSession::open(&sim, 20, 8000).unwrap();
        let report = session
            .spawn_population(&PopulationConfig::default(), 5, &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        assert_eq!(report.spawned, 5);
        assert_eq!(sim.live_actor_count(), 5);

        session.close().unwrap();

        assert_eq!(sim.live_actor_count(), 0);
        assert_eq!(sim.destroyed().len(), 5);
        assert_eq!(sim.current_settings(), before);
        assert!(!sim.traffic_manager_state().synchronous);
    }

    #[test]
    fn test_drop_cleans_up_after_failure() {
        let sim = ScriptedSimulator::town(10, 1).fail_at_tick(3);
        let before = sim.current_settings();

        let result: Result<(), HarnessError> = (|| {
            let mut session = RunSession::open(&sim, 30, 8000)?;
            session.spawn_population(
                &PopulationConfig::default(),
                4,
                &mut ChaCha8Rng::seed_from_u64(1),
            )?;
            for _ in 0..10 {
                session.step()?;
            }
            session.close()
        })();

        assert!(matches!(result, Err(HarnessError::Env(EnvError::RpcError(_)))));
        assert_eq!(sim.live_actor_count(), 0);
        assert_eq!(sim.destroyed().len(), 4);
        assert_eq!(sim.current_settings(), before);
    }

    #[test]
    fn test_sample_and_step() {
        let sim = ScriptedSimulator::town(10, 1);
        let mut session = RunSession::open(&sim, 10, 8000).unwrap();
        session
            .spawn_population(&PopulationConfig::default(), 3, &mut ChaCha8Rng::seed_from_u64(2))
            .unwrap();

        let mut recorder = TrajectoryRecorder::new();
        for _ in 0..5 {
            session.sample(&mut recorder).unwrap();
            session.step().unwrap();
        }
        session.close().unwrap();

        let run = recorder.finish();
        assert_eq!(run.vehicle_count(), 3);
        assert_eq!(run.tick_count(), 5);
    }
}
