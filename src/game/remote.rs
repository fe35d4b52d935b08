//! Remote entity synchronization
//!
//! Converts the opponent's periodic absolute pose reports into smooth
//! continuous motion. Only the latest report matters: each `player_update`
//! overwrites the target wholesale, and the rendered pose chases it every
//! frame. Discrete events (shoot) bypass this entirely.

use crate::game::interpolate::{
    lerp_vec3, slerp, smoothing_factor, POSITION_SMOOTHING_RATE, ROTATION_SMOOTHING_RATE,
};
use crate::game::Pose;
use crate::net::protocol::{Quat, Vec3};

/// Interpolated view of the remote player
#[derive(Debug, Clone)]
pub struct RemoteEntity {
    rendered: Pose,
    target: Pose,
}

impl RemoteEntity {
    /// Both rendered and target start at the spawn pose, so an opponent that
    /// never reports simply stands at spawn.
    pub fn new(spawn: Pose) -> Self {
        Self {
            rendered: spawn,
            target: spawn,
        }
    }

    /// Overwrite the target pose with the latest report. Unfiltered: any
    /// received pose is trusted.
    pub fn set_target(&mut self, position: Vec3, body_rotation: Quat, aim_rotation: Quat) {
        self.target = Pose {
            position,
            body_rotation,
            aim_rotation,
        };
    }

    /// Advance the rendered pose toward the target. Driven by the render
    /// loop with the frame delta in seconds.
    pub fn tick(&mut self, dt: f32) -> Pose {
        let position_t = smoothing_factor(POSITION_SMOOTHING_RATE, dt);
        let rotation_t = smoothing_factor(ROTATION_SMOOTHING_RATE, dt);

        self.rendered.position = lerp_vec3(self.rendered.position, self.target.position, position_t);
        self.rendered.body_rotation = slerp(
            self.rendered.body_rotation,
            self.target.body_rotation,
            rotation_t,
        );
        self.rendered.aim_rotation = slerp(
            self.rendered.aim_rotation,
            self.target.aim_rotation,
            rotation_t,
        );

        self.rendered
    }

    pub fn rendered(&self) -> Pose {
        self.rendered
    }

    pub fn target(&self) -> Pose {
        self.target
    }
}
