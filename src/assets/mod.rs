//! Per-match asset negotiation
//!
//! Each match ships six generated models: one tower, one bomb and one shield
//! per player. The relay announces them one by one; the barrier joins all
//! six downloads before play can start.

pub mod barrier;
pub mod factory;

use std::fmt;

pub use barrier::AssetBarrier;
pub use factory::{AssetFactory, AssetObject, HttpAssetFactory, MaterializeError};

/// Kind of a per-match generated model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Tower,
    Bomb,
    Shield,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Tower => "tower",
            AssetKind::Bomb => "bomb",
            AssetKind::Shield => "shield",
        }
    }

    /// Parse the `name` field of an `asset_ready` frame.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "tower" => Some(AssetKind::Tower),
            "bomb" => Some(AssetKind::Bomb),
            "shield" => Some(AssetKind::Shield),
            _ => None,
        }
    }
}

/// Identity of one expected asset: kind plus owning player number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetKey {
    pub kind: AssetKind,
    pub player_number: u8,
}

impl AssetKey {
    pub fn new(kind: AssetKind, player_number: u8) -> Self {
        Self {
            kind,
            player_number,
        }
    }

    /// The fixed set of keys every match must deliver.
    pub fn expected_for_match() -> [AssetKey; 6] {
        [
            AssetKey::new(AssetKind::Tower, 1),
            AssetKey::new(AssetKind::Tower, 2),
            AssetKey::new(AssetKind::Bomb, 1),
            AssetKey::new(AssetKind::Bomb, 2),
            AssetKey::new(AssetKind::Shield, 1),
            AssetKey::new(AssetKind::Shield, 2),
        ]
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.as_str(), self.player_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_as_kind_plus_player() {
        assert_eq!(AssetKey::new(AssetKind::Tower, 1).to_string(), "tower1");
        assert_eq!(AssetKey::new(AssetKind::Shield, 2).to_string(), "shield2");
    }

    #[test]
    fn a_match_expects_exactly_six_assets() {
        let keys = AssetKey::expected_for_match();
        assert_eq!(keys.len(), 6);
        for kind in [AssetKind::Tower, AssetKind::Bomb, AssetKind::Shield] {
            for player in [1, 2] {
                assert!(keys.contains(&AssetKey::new(kind, player)));
            }
        }
    }
}
