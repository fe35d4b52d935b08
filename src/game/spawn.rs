//! Spawn slot assignment
//!
//! The arena has two fixed slots facing each other across the field.
//! Player number decides the side: player 1 owns slot A1, player 2 owns
//! slot A2, and the opponent always takes the other one.

use crate::net::protocol::{Quat, Vec3};

/// World transform of one spawn slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnTransform {
    pub position: Vec3,
    pub rotation: Quat,
}

/// The two arena spawn slots
#[derive(Debug, Clone, Copy)]
pub struct SpawnSlots {
    pub a1: SpawnTransform,
    pub a2: SpawnTransform,
}

impl Default for SpawnSlots {
    fn default() -> Self {
        Self {
            // A1 looks down +z, A2 stands opposite rotated 180 degrees
            // about the vertical axis.
            a1: SpawnTransform {
                position: Vec3::new(0.0, 0.0, -12.0),
                rotation: Quat::IDENTITY,
            },
            a2: SpawnTransform {
                position: Vec3::new(0.0, 0.0, 12.0),
                rotation: Quat::new(0.0, 1.0, 0.0, 0.0),
            },
        }
    }
}

/// Spawn transforms resolved for one side of the match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnAssignment {
    pub local: SpawnTransform,
    pub opponent: SpawnTransform,
}

impl SpawnSlots {
    /// Resolve slots by player-number parity.
    pub fn assign(&self, local_player_number: u8) -> SpawnAssignment {
        if local_player_number == 1 {
            SpawnAssignment {
                local: self.a1,
                opponent: self.a2,
            }
        } else {
            SpawnAssignment {
                local: self.a2,
                opponent: self.a1,
            }
        }
    }
}
