//! In-match state: opponent motion, tower health, spawn parity

pub mod interpolate;
pub mod remote;
pub mod spawn;
pub mod tower;

pub use remote::RemoteEntity;
pub use spawn::{SpawnAssignment, SpawnSlots, SpawnTransform};
pub use tower::TowerState;

use crate::net::protocol::{Quat, Vec3};

/// A full pose: position plus separate body and aim orientations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub body_rotation: Quat,
    pub aim_rotation: Quat,
}

impl Pose {
    pub fn at_spawn(spawn: SpawnTransform) -> Self {
        Self {
            position: spawn.position,
            body_rotation: spawn.rotation,
            aim_rotation: spawn.rotation,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::default(),
            body_rotation: Quat::IDENTITY,
            aim_rotation: Quat::IDENTITY,
        }
    }
}
