//! Pose smoothing math
//!
//! Remote poses arrive as sparse absolute reports; the renderer chases them
//! with exponential smoothing so motion stays continuous between reports.

use crate::net::protocol::{Quat, Vec3};

/// Smoothing rate for position (per second)
pub const POSITION_SMOOTHING_RATE: f32 = 10.0;

/// Smoothing rate for body and aim rotations (per second)
pub const ROTATION_SMOOTHING_RATE: f32 = 12.0;

/// Frame-rate independent smoothing factor: the fraction of the remaining
/// distance covered after `dt` seconds at the given rate. Always in [0, 1),
/// so chasing a target can never overshoot it.
pub fn smoothing_factor(rate: f32, dt: f32) -> f32 {
    1.0 - (-rate * dt.max(0.0)).exp()
}

pub fn lerp_vec3(from: Vec3, to: Vec3, t: f32) -> Vec3 {
    Vec3::new(
        from.x + (to.x - from.x) * t,
        from.y + (to.y - from.y) * t,
        from.z + (to.z - from.z) * t,
    )
}

fn dot(a: Quat, b: Quat) -> f32 {
    a.x * b.x + a.y * b.y + a.z * b.z + a.w * b.w
}

fn normalize(q: Quat) -> Quat {
    let len = dot(q, q).sqrt();
    if len <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    Quat::new(q.x / len, q.y / len, q.z / len, q.w / len)
}

/// Spherical interpolation along the shortest arc.
pub fn slerp(from: Quat, to: Quat, t: f32) -> Quat {
    let mut cos_theta = dot(from, to);
    let mut to = to;

    // Take the short way around.
    if cos_theta < 0.0 {
        cos_theta = -cos_theta;
        to = Quat::new(-to.x, -to.y, -to.z, -to.w);
    }

    // Nearly parallel: sin(theta) degenerates, fall back to nlerp.
    if cos_theta > 0.9995 {
        return normalize(lerp_quat(from, to, t));
    }

    let theta = cos_theta.clamp(-1.0, 1.0).acos();
    let sin_theta = theta.sin();
    let s_from = ((1.0 - t) * theta).sin() / sin_theta;
    let s_to = (t * theta).sin() / sin_theta;

    Quat::new(
        from.x * s_from + to.x * s_to,
        from.y * s_from + to.y * s_to,
        from.z * s_from + to.z * s_to,
        from.w * s_from + to.w * s_to,
    )
}

fn lerp_quat(from: Quat, to: Quat, t: f32) -> Quat {
    Quat::new(
        from.x + (to.x - from.x) * t,
        from.y + (to.y - from.y) * t,
        from.z + (to.z - from.z) * t,
        from.w + (to.w - from.w) * t,
    )
}

/// Angular distance between two orientations in radians.
pub fn angle_between(a: Quat, b: Quat) -> f32 {
    let d = dot(a, b).abs().clamp(0.0, 1.0);
    2.0 * d.acos()
}
