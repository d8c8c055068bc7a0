//! Scene identifiers and sensor placements resolved from the scene graph

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::sensor::SensorQuery;

/// Object (database node) identifier inside a loaded scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One geometric placement (fragment) of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub u32);

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sensor query resolved to one fragment's world position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSensor {
    pub query: SensorQuery,
    pub object_id: ObjectId,
    pub fragment_id: FragmentId,
    pub world_position: Vec3,
}

/// World-space translation of a 4x4 transform
pub fn position_from_transform(matrix: &Mat4) -> Vec3 {
    matrix.w_axis.truncate()
}
