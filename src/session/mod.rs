//! Match session: state machine, events, periodic loops

pub mod machine;

use std::collections::HashMap;

use crate::assets::{AssetKey, AssetKind, AssetObject};
use crate::game::SpawnAssignment;
use crate::net::protocol::Build;

pub use machine::{Session, SessionConfig, SessionHandle};

/// Stage of the match session, published on a watch channel.
///
/// Stages only ever move forward; an inbound message whose tag is not
/// meaningful in the current stage is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// No connection attempt yet
    Idle,
    /// Transport connect in progress
    Connecting,
    /// join_queue sent, waiting for an opponent
    Queued,
    /// Opponent found, local player number known
    Matched,
    /// Builds received, waiting on asset delivery and the play signal
    NegotiatingAssets,
    /// Match running
    Playing,
    /// game_over received; terminal
    Ended,
}

/// Which side of the match a tower belongs to, from the local point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TowerSide {
    /// The tower this client defends; health arrives from the peer
    Local,
    /// The tower local shots hit; this client is the damage authority
    Opponent,
}

/// Everything the embedding game needs to start rendering the match
#[derive(Debug, Clone)]
pub struct MatchSetup {
    pub player_number: u8,
    pub local_build: Build,
    pub opponent_build: Build,
    pub spawns: SpawnAssignment,
    /// All six materialized match assets, keyed by kind + player number
    pub assets: HashMap<AssetKey, AssetObject>,
    /// Local input drives local shooting
    pub local_shooting_enabled: bool,
    /// Opponent shot visuals are driven only by inbound shoot frames
    pub opponent_shooting_enabled: bool,
}

impl MatchSetup {
    /// The peer's player number.
    pub fn opponent_number(&self) -> u8 {
        if self.player_number == 1 {
            2
        } else {
            1
        }
    }

    /// Resolve a materialized asset through player parity: which generated
    /// model belongs to this side and which to the opponent.
    pub fn asset_for(&self, kind: AssetKind, side: TowerSide) -> Option<&AssetObject> {
        let player_number = match side {
            TowerSide::Local => self.player_number,
            TowerSide::Opponent => self.opponent_number(),
        };
        self.assets.get(&AssetKey::new(kind, player_number))
    }
}

/// Discrete session notifications for the UI and renderer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Queue request acknowledged by the relay
    Queued,
    /// An opponent was found
    OpponentFound { player_number: u8 },
    /// Both prompts are in; builds are being generated
    Analyzing,
    /// Builds arrived; asset negotiation started
    Preparing,
    /// One more asset finished materializing
    AssetProgress { ready: usize, total: usize },
    /// All assets in and the relay gave the play signal
    MatchStarted(Box<MatchSetup>),
    /// The opponent fired; forwarded immediately, never smoothed
    OpponentShot { power: f32 },
    /// A tower's health changed (locally computed or peer overwrite)
    TowerHpChanged { side: TowerSide, hp: f32 },
    /// Terminal result
    GameOver { victory: bool },
    /// The transport died before the match finished
    Disconnected,
}
