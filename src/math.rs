// src/math.rs
//! Small vector helpers shared by the solver.
//!
//! All angles are in degrees at the API boundary (slope limits are authored
//! that way) and radians internally.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Magnitude under which a direction is considered degenerate.
pub const DIRECTION_EPSILON: f32 = 1e-5;

/// Unit vector or zero when the input is too short to carry a direction.
#[inline]
pub fn normalized(v: Vec3) -> Vec3 {
    let len = v.length();
    if len > DIRECTION_EPSILON {
        v / len
    } else {
        Vec3::ZERO
    }
}

/// Removes the component of `v` along `normal`.
#[inline]
pub fn project_on_plane(v: Vec3, normal: Vec3) -> Vec3 {
    let sq = normal.length_squared();
    if sq < f32::EPSILON {
        return v;
    }
    v - normal * (v.dot(normal) / sq)
}

/// Component of `v` along `onto`.
#[inline]
pub fn project(v: Vec3, onto: Vec3) -> Vec3 {
    let sq = onto.length_squared();
    if sq < f32::EPSILON {
        return Vec3::ZERO;
    }
    onto * (v.dot(onto) / sq)
}

/// Unsigned angle in degrees, zero when either vector is degenerate.
#[inline]
pub fn angle_between(a: Vec3, b: Vec3) -> f32 {
    let denom = (a.length_squared() * b.length_squared()).sqrt();
    if denom < 1e-15 {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Reorients `direction` so it lies on the surface described by `surface_normal`
/// without drifting sideways relative to `up`. Returns a unit vector (or zero).
#[inline]
pub fn direction_tangent_to_surface(direction: Vec3, surface_normal: Vec3, up: Vec3) -> Vec3 {
    let direction_right = direction.cross(up);
    normalized(surface_normal.cross(direction_right))
}

/// Rotation whose local +Z maps to `forward` and local +Y leans toward `up`.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let f = normalized(forward);
    if f == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut right = normalized(up.cross(f));
    if right == Vec3::ZERO {
        // forward is parallel to up, any perpendicular right axis will do
        let fallback = if f.x.abs() < 0.9 { Vec3::X } else { Vec3::Z };
        right = normalized(fallback.cross(f));
    }
    let true_up = f.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, true_up, f)).normalize()
}

/// Angular velocity (axis * rad/s) that rotates `from` into `to` over `dt`.
pub fn angular_velocity_between(from: Quat, to: Quat, dt: f32) -> Vec3 {
    if dt <= 0.0 {
        return Vec3::ZERO;
    }
    let mut delta = (to * from.inverse()).normalize();
    if delta.w < 0.0 {
        delta = -delta;
    }
    delta.to_scaled_axis() / dt
}

/// Replaces any non-finite vector with zero.
#[inline]
pub fn sanitize(v: Vec3) -> Vec3 {
    if v.is_nan() || !v.is_finite() {
        Vec3::ZERO
    } else {
        v
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Pose                                     */
/* -------------------------------------------------------------------------- */

/// World-space position and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose { position: Vec3::ZERO, rotation: Quat::IDENTITY };

    #[inline]
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Lerp/slerp toward `to`, `t` clamped to `[0, 1]`.
    pub fn interpolate(&self, to: &Pose, t: f32) -> Pose {
        let t = t.clamp(0.0, 1.0);
        Pose {
            position: self.position.lerp(to.position, t),
            rotation: self.rotation.slerp(to.rotation, t),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn plane_projection() {
        let v = Vec3::new(3.0, -2.0, 1.0);
        assert!(close(project_on_plane(v, Vec3::Y), Vec3::new(3.0, 0.0, 1.0)));
        assert!(close(project(v, Vec3::Y * 2.0), Vec3::new(0.0, -2.0, 0.0)));
        assert_eq!(project_on_plane(v, Vec3::ZERO), v);
    }

    #[test]
    fn angles_in_degrees() {
        assert!((angle_between(Vec3::Y, Vec3::X) - 90.0).abs() < 1e-4);
        assert!((angle_between(Vec3::Y, Vec3::Y) - 0.0).abs() < 1e-4);
        assert_eq!(angle_between(Vec3::ZERO, Vec3::Y), 0.0);
    }

    #[test]
    fn tangent_keeps_heading_on_flat_ground() {
        let dir = direction_tangent_to_surface(Vec3::new(2.0, 0.0, 0.0), Vec3::Y, Vec3::Y);
        assert!(close(dir, Vec3::X));

        // on a slope rising toward +x the heading tilts up but stays in the xy plane
        let slope = Vec3::new(-1.0, 1.0, 0.0).normalize();
        let dir = direction_tangent_to_surface(Vec3::X, slope, Vec3::Y);
        assert!(dir.y > 0.0 && dir.x > 0.0 && dir.z.abs() < 1e-5);
        assert!(dir.dot(slope).abs() < 1e-5);
    }

    #[test]
    fn look_rotation_maps_forward() {
        let rot = look_rotation(Vec3::Z, Vec3::Y);
        assert!(close(rot * Vec3::Z, Vec3::Z));

        let rot = look_rotation(Vec3::X, Vec3::Y);
        assert!(close(rot * Vec3::Z, Vec3::X));
        assert!(close(rot * Vec3::Y, Vec3::Y));

        let rot = look_rotation(Vec3::Y, Vec3::Y);
        assert!(close(rot * Vec3::Z, Vec3::Y));
    }

    #[test]
    fn angular_velocity_roundtrip() {
        let from = Quat::IDENTITY;
        let to = Quat::from_rotation_y(0.5);
        let w = angular_velocity_between(from, to, 0.25);
        assert!(close(w, Vec3::new(0.0, 2.0, 0.0)));
        assert_eq!(angular_velocity_between(from, to, 0.0), Vec3::ZERO);
    }

    #[test]
    fn pose_interpolation_is_clamped() {
        let a = Pose::new(Vec3::ZERO, Quat::IDENTITY);
        let b = Pose::new(Vec3::new(2.0, 0.0, 0.0), Quat::from_rotation_y(1.0));
        assert!(close(a.interpolate(&b, 0.5).position, Vec3::new(1.0, 0.0, 0.0)));
        assert!(close(a.interpolate(&b, 4.0).position, b.position));
    }

    #[test]
    fn sanitize_nan() {
        assert_eq!(sanitize(Vec3::new(f32::NAN, 1.0, 0.0)), Vec3::ZERO);
        assert_eq!(sanitize(Vec3::ONE), Vec3::ONE);
    }
}
