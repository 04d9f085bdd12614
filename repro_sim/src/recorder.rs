//! Per-tick position recording and run persistence.

use crate::error::HarnessError;
use repro_env::{ActorHandle, ActorId, EnvError, Trajectory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Timestamp format used in output file names.
pub const TIMESTAMP_FORMAT: &str = "%y%m%d_%H%M%S";

/// Current local time as `YYMMDD_HHMMSS`.
pub fn timestamp_formatted() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Accumulates one position per actor per tick.
#[derive(Debug, Default)]
pub struct TrajectoryRecorder {
    tracks: BTreeMap<ActorId, Trajectory>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples the current location of every actor.
    pub fn record<A: ActorHandle>(&mut self, actors: &[A]) -> Result<(), EnvError> {
        for actor in actors {
            let location = actor.location()?;
            self.tracks
                .entry(actor.id())
                .or_default()
                .push(location.to_vector());
        }
        Ok(())
    }

    /// Number of actors with at least one sample.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Freezes the recording into a run ordered by ascending actor id.
    pub fn finish(self) -> RunResult {
        let (actor_ids, trajectories) = self.tracks.into_iter().unzip();
        RunResult {
            actor_ids,
            trajectories,
        }
    }
}

/// The trajectories of one run.
///
/// `trajectories[i]` belongs to `actor_ids[i]`; ids are ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub actor_ids: Vec<ActorId>,
    pub trajectories: Vec<Trajectory>,
}

impl RunResult {
    /// Builds a run from trajectories already in vehicle order.
    ///
    /// Actor ids are synthesized as 0..n. Used for runs read back from disk,
    /// which only carry positions.
    pub fn from_trajectories(trajectories: Vec<Trajectory>) -> Self {
        let actor_ids = (0..trajectories.len() as u32).map(ActorId).collect();
        Self {
            actor_ids,
            trajectories,
        }
    }

    pub fn vehicle_count(&self) -> usize {
        self.trajectories.len()
    }

    /// Length of the first trajectory (0 for a run without vehicles).
    pub fn tick_count(&self) -> usize {
        self.trajectories.first().map_or(0, Vec::len)
    }

    /// Writes the trajectories to `dir/pos_<timestamp>.p`.
    ///
    /// The file holds the list of trajectories as JSON, each a list of
    /// `[x, y, z]` triples. An existing file is never overwritten: `_1`, `_2`,
    /// ... is appended to the stem until a free name is found.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, HarnessError> {
        let stem = format!("pos_{}", timestamp_formatted());
        let (path, file) = create_unique(dir, &stem, "p")?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.trajectories)?;
        writer.flush()?;

        info!("Saved {} trajectories to {}", self.vehicle_count(), path.display());
        Ok(path)
    }

    /// Reads a run written by [`RunResult::write_to_dir`].
    pub fn read_from_file(path: &Path) -> Result<Self, HarnessError> {
        let reader = BufReader::new(File::open(path)?);
        let trajectories: Vec<Trajectory> = serde_json::from_reader(reader)?;
        Ok(Self::from_trajectories(trajectories))
    }
}

/// Runs in execution order.
pub type RunSet = Vec<RunResult>;

fn create_unique(dir: &Path, stem: &str, ext: &str) -> Result<(PathBuf, File), HarnessError> {
    fs::create_dir_all(dir)?;

    let mut suffix = 0usize;
    loop {
        let name = if suffix == 0 {
            format!("{}.{}", stem, ext)
        } else {
            format!("{}_{}.{}", stem, suffix, ext)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
