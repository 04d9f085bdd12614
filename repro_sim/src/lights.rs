//! Traffic light group resets.

use repro_env::{ActorId, EnvError, Simulator, TrafficLightInfo};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Distinct traffic light groups, ordered by their lowest light id.
///
/// Each group is sorted and deduplicated. Group members that do not appear in
/// `lights` are dropped, and a light whose group is empty forms a group of its own.
pub fn traffic_light_groups(lights: &[TrafficLightInfo]) -> Vec<Vec<ActorId>> {
    let known: HashSet<ActorId> = lights.iter().map(|tl| tl.id).collect();

    let groups: BTreeSet<Vec<ActorId>> = lights
        .iter()
        .map(|tl| {
            let mut group: Vec<ActorId> = tl
                .group
                .iter()
                .copied()
                .filter(|id| known.contains(id))
                .collect();
            if group.is_empty() {
                group.push(tl.id);
            }
            group.sort_unstable();
            group.dedup();
            group
        })
        .collect();

    // BTreeSet orders lexicographically, i.e. by lowest id first
    groups.into_iter().collect()
}

/// Resets every traffic light group once, through its lowest-id light.
///
/// Returns the number of groups reset.
pub fn reset_all_traffic_light_groups<S: Simulator>(sim: &S) -> Result<usize, EnvError> {
    let groups = traffic_light_groups(&sim.traffic_lights()?);
    for group in &groups {
        if let Some(&first) = group.first() {
            sim.reset_traffic_light_group(first)?;
        }
    }
    debug!("Reset {} traffic light groups", groups.len());
    Ok(groups.len())
}
