//! Common types exchanged with the simulator.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of an actor owned by the simulator.
///
/// The harness never holds simulator state for an actor, only this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u32);

impl ActorId {
    /// Returns the raw numeric id.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in simulator world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Location {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Converts to a fixed-size vector `[x, y, z]`.
    pub fn to_vector(&self) -> Vector3<f32> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl From<Vector3<f32>> for Location {
    fn from(v: Vector3<f32>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Ordered positions of one actor, one sample per tick.
pub type Trajectory = Vec<Vector3<f32>>;

/// Orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Location plus orientation. Spawn points are transforms.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub location: Location,
    pub rotation: Rotation,
}

impl Transform {
    pub fn new(location: Location, rotation: Rotation) -> Self {
        Self { location, rotation }
    }

    /// Transform at `location` with zero rotation.
    pub fn at(location: Location) -> Self {
        Self::new(location, Rotation::default())
    }
}

/// World configuration as reported and accepted by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldSettings {
    /// World advances only on explicit `tick()` requests
    pub synchronous_mode: bool,

    /// Skip rendering on the server
    pub no_rendering_mode: bool,

    /// Fixed step length in seconds (`None` = variable step)
    pub fixed_delta_seconds: Option<f64>,
}

impl WorldSettings {
    /// Returns a copy switched to synchronous fixed-step mode at `fps`.
    pub fn synchronous(&self, fps: u32) -> Self {
        Self {
            synchronous_mode: true,
            no_rendering_mode: true,
            fixed_delta_seconds: Some(1.0 / fps as f64),
        }
    }
}

/// A configurable blueprint attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlueprintAttribute {
    /// Current value
    pub value: String,

    /// Values the simulator recommends for this attribute
    #[serde(default)]
    pub recommended_values: Vec<String>,
}

impl BlueprintAttribute {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            recommended_values: Vec::new(),
        }
    }

    pub fn with_recommended(mut self, values: &[&str]) -> Self {
        self.recommended_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// Template describing a spawnable actor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    /// Blueprint id, e.g. "vehicle.tesla.model3"
    pub id: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, BlueprintAttribute>,
}

impl Blueprint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute insertion.
    pub fn with_attribute(mut self, name: &str, attribute: BlueprintAttribute) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&BlueprintAttribute> {
        self.attributes.get(name)
    }

    /// Sets the value of an attribute, creating it if absent.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes
            .entry(name.to_string())
            .or_default()
            .value = value.into();
    }

    /// Parses `number_of_wheels`, if the blueprint exposes it.
    pub fn number_of_wheels(&self) -> Option<u32> {
        self.attribute("number_of_wheels")?.value.trim().parse().ok()
    }
}

/// One item of a batched spawn: spawn `blueprint` at `transform`, then hand
/// the new actor to the traffic manager listening on `autopilot_port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnCommand {
    pub blueprint: Blueprint,
    pub transform: Transform,
    pub autopilot_port: u16,
}

/// Per-item outcome of a batched spawn.
pub type SpawnResponse = Result<ActorId, String>;

/// A traffic light and the ids of every light in its group (itself included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficLightInfo {
    pub id: ActorId,
    pub group: Vec<ActorId>,
}
