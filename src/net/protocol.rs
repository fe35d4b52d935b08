//! Relay protocol message definitions
//! These are the wire types exchanged with the match relay

use serde::{Deserialize, Serialize};

/// Position on the wire
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Orientation on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One player's generated loadout for a match.
/// Received once per match via `builds_ready`, one per side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub tower_hp: f32,
    pub tower_description: String,
    pub tower_model_url: String,

    pub bomb_damage: f32,
    pub bomb_description: String,
    pub bomb_model_url: String,

    pub shield_hp: f32,
    pub shield_description: String,
    pub shield_model_url: String,

    pub tone: String,
}

/// Messages exchanged with the match relay.
///
/// One WebSocket text frame carries exactly one message. Fields are only
/// meaningful together with the tag. The relay stamps `player_number` onto
/// forwarded peer frames; it is absent on frames we send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Server acknowledged the queue request
    Queued,

    /// An opponent was found; assigns the local player number (1 or 2)
    Matched { player_number: u8 },

    /// Client requests matchmaking
    JoinQueue,

    /// Client submits its build prompt
    SubmitPrompt { prompt: String },

    /// Both prompts are in; the relay is generating builds
    BothPromptsIn,

    /// Both builds were generated
    BuildsReady {
        your_build: Build,
        opponent_build: Build,
    },

    /// One per-match model finished generating and is ready to download
    AssetReady {
        /// Asset kind ("tower", "bomb", "shield")
        name: String,
        player_number: u8,
        url: String,
    },

    /// Server signals that play may begin once assets are in
    Playing,

    /// Periodic absolute pose report (body and aim rotations separate)
    PlayerUpdate {
        position: Vec3,
        rotation1: Quat,
        rotation2: Quat,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_number: Option<u8>,
    },

    /// A shot was fired with the given damage power
    Shoot {
        power: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_number: Option<u8>,
    },

    /// Absolute tower health broadcast (not a delta)
    TowerHp {
        hp: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_number: Option<u8>,
    },

    /// Match is over; `winner` is the winning player number
    GameOver { winner: u8 },
}
