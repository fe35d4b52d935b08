//! Tower health authority
//!
//! Each client computes damage for the tower its own shots hit and
//! broadcasts the resulting absolute health; the peer overwrites its copy
//! with whatever arrives. Local applications are cooldown-gated to suppress
//! duplicate collision callbacks; remote overwrites never are.

use tokio::time::Instant;

use crate::util::time::TOWER_SHOT_COOLDOWN;

/// Health state of one tower
#[derive(Debug, Clone)]
pub struct TowerState {
    hp: f32,
    start_hp: f32,
    last_accepted: Option<Instant>,
}

impl TowerState {
    pub fn new(start_hp: f32) -> Self {
        Self {
            hp: start_hp,
            start_hp,
            last_accepted: None,
        }
    }

    pub fn hp(&self) -> f32 {
        self.hp
    }

    pub fn start_hp(&self) -> f32 {
        self.start_hp
    }

    /// Zero health is terminal for the tower.
    pub fn is_destroyed(&self) -> bool {
        self.hp <= 0.0
    }

    /// Apply locally-computed damage from a collision callback.
    ///
    /// Rejected (returns `None`) when the tower is already destroyed or a
    /// previous application was accepted less than the cooldown ago.
    /// Accepted calls return the resulting absolute health, which the
    /// caller broadcasts as `tower_hp`.
    pub fn apply_local_damage(&mut self, amount: f32) -> Option<f32> {
        if self.is_destroyed() {
            return None;
        }

        let now = Instant::now();
        if let Some(last) = self.last_accepted {
            if now.duration_since(last) < TOWER_SHOT_COOLDOWN {
                return None;
            }
        }

        self.last_accepted = Some(now);
        self.hp = (self.hp - amount).clamp(0.0, self.start_hp);
        Some(self.hp)
    }

    /// Overwrite health with the peer's broadcast absolute value. Always
    /// honored, clamped, no cooldown.
    pub fn apply_remote_health(&mut self, value: f32) -> f32 {
        self.hp = value.clamp(0.0, self.start_hp);
        self.hp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn damage_subtracts_and_reports_absolute_health() {
        let mut tower = TowerState::new(100.0);
        assert_eq!(tower.apply_local_damage(25.0), Some(75.0));
        assert_eq!(tower.hp(), 75.0);
    }

    #[tokio::test(start_paused = true)]
    async fn applications_within_the_cooldown_are_rejected() {
        let mut tower = TowerState::new(100.0);

        assert_eq!(tower.apply_local_damage(25.0), Some(75.0));

        // A second collision callback 100ms later is the same shot.
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(tower.apply_local_damage(25.0), None);
        assert_eq!(tower.hp(), 75.0);

        // Past the cooldown a new shot counts.
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(tower.apply_local_damage(25.0), Some(50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn health_is_clamped_into_valid_range() {
        let mut tower = TowerState::new(100.0);

        assert_eq!(tower.apply_local_damage(250.0), Some(0.0));
        assert!(tower.is_destroyed());

        assert_eq!(tower.apply_remote_health(-40.0), 0.0);
        assert_eq!(tower.apply_remote_health(500.0), 100.0);
        assert_eq!(tower.hp(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_towers_ignore_further_damage() {
        let mut tower = TowerState::new(50.0);
        assert_eq!(tower.apply_local_damage(50.0), Some(0.0));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(tower.apply_local_damage(10.0), None);
        assert_eq!(tower.hp(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_overwrites_ignore_the_cooldown() {
        let mut tower = TowerState::new(100.0);

        assert_eq!(tower.apply_local_damage(10.0), Some(90.0));
        // Peer broadcast lands immediately after a local application.
        assert_eq!(tower.apply_remote_health(60.0), 60.0);
        assert_eq!(tower.hp(), 60.0);
    }
}
