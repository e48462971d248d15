// src/policy.rs
//! Behaviour hooks injected into motors and movers.
//!
//! A [`CharacterController`] shapes velocity and rotation, listens to hits and
//! decides which colliders count. Every hook has a default so a controller
//! only implements what it cares about.

use glam::{Quat, Vec3};

use crate::collision::ColliderId;
use crate::math::{direction_tangent_to_surface, normalized, project_on_plane};
use crate::motor::MotorCore;
use crate::report::{HitStabilityReport, RigidbodyProjectionHit};

/// Grounding snapshot handed to velocity projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionContext {
    /// Stable on ground and not being forced off it.
    pub grounded: bool,
    pub ground_normal: Vec3,
    pub up: Vec3,
}

impl ProjectionContext {
    /// Default obstruction projection.
    ///
    /// Grounded: stable hits reorient along the new surface keeping speed,
    /// blocking hits slide along the obstruction while following the ground.
    /// Airborne: stable hits are landings (flatten, then reorient), anything
    /// else is a plain plane projection.
    pub fn project(&self, velocity: Vec3, obstruction_normal: Vec3, stable_on_hit: bool) -> Vec3 {
        let speed = velocity.length();
        if self.grounded {
            if stable_on_hit {
                direction_tangent_to_surface(velocity, obstruction_normal, self.up) * speed
            } else {
                let right_along_ground = normalized(obstruction_normal.cross(self.ground_normal));
                let up_along_ground = normalized(right_along_ground.cross(obstruction_normal));
                let along = direction_tangent_to_surface(velocity, up_along_ground, self.up) * speed;
                project_on_plane(along, obstruction_normal)
            }
        } else if stable_on_hit {
            let flat = project_on_plane(velocity, self.up);
            direction_tangent_to_surface(flat, obstruction_normal, self.up) * flat.length()
        } else {
            project_on_plane(velocity, obstruction_normal)
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                           Character Controller                             */
/* -------------------------------------------------------------------------- */

/// Per-archetype character behaviour.
///
/// Update hooks receive the motor core so they can read grounding, force an
/// unground or resize the capsule. Hit hooks run inside the solver and only
/// see the hit.
#[allow(unused_variables)]
pub trait CharacterController {
    fn before_update(&mut self, motor: &mut MotorCore, dt: f32) {}

    fn update_rotation(&mut self, motor: &mut MotorCore, rotation: &mut Quat, dt: f32) {}

    fn update_velocity(&mut self, motor: &mut MotorCore, velocity: &mut Vec3, dt: f32) {}

    /// Runs after ground probing, before attached-body handling.
    fn post_grounding_update(&mut self, motor: &mut MotorCore, dt: f32) {}

    fn after_update(&mut self, motor: &mut MotorCore, dt: f32) {}

    /// Extra collider filtering on top of the motor's own rules.
    fn is_collider_valid_for_collisions(&self, collider: ColliderId) -> bool {
        true
    }

    fn on_ground_hit(&mut self, collider: ColliderId, normal: Vec3, point: Vec3, report: &HitStabilityReport) {}

    fn on_movement_hit(&mut self, collider: ColliderId, normal: Vec3, point: Vec3, report: &HitStabilityReport) {}

    /// Last word on a hit's stability report.
    fn process_hit_stability_report(
        &mut self,
        collider: ColliderId,
        normal: Vec3,
        point: Vec3,
        at_position: Vec3,
        at_rotation: Quat,
        report: &mut HitStabilityReport,
    ) {
    }

    fn on_discrete_collision_detected(&mut self, collider: ColliderId) {}

    /// Velocity after hitting an obstruction.
    fn handle_velocity_projection(
        &self,
        context: &ProjectionContext,
        velocity: Vec3,
        obstruction_normal: Vec3,
        stable_on_hit: bool,
    ) -> Vec3 {
        context.project(velocity, obstruction_normal, stable_on_hit)
    }

    /// Extra interaction with a pushed body when running simulated-dynamic.
    fn handle_simulated_rigidbody_interaction(
        &mut self,
        processed_velocity: &mut Vec3,
        hit: &RigidbodyProjectionHit,
        dt: f32,
    ) {
    }
}

/// Controller that keeps whatever velocity it is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassiveController;

impl CharacterController for PassiveController {}

/* -------------------------------------------------------------------------- */
/*                             Mover Controller                               */
/* -------------------------------------------------------------------------- */

/// Drives a platform mover. `position` and `rotation` start at the current
/// pose and must be left at the goal pose for this tick.
pub trait MoverController {
    fn update_movement(&mut self, position: &mut Vec3, rotation: &mut Quat, dt: f32);
}

impl<F> MoverController for F
where
    F: FnMut(&mut Vec3, &mut Quat, f32),
{
    fn update_movement(&mut self, position: &mut Vec3, rotation: &mut Quat, dt: f32) {
        self(position, rotation, dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    const GROUNDED: ProjectionContext = ProjectionContext { grounded: true, ground_normal: Vec3::Y, up: Vec3::Y };
    const AIRBORNE: ProjectionContext = ProjectionContext { grounded: false, ground_normal: Vec3::Y, up: Vec3::Y };

    #[test]
    fn airborne_wall_hit_removes_normal_component() {
        let v = AIRBORNE.project(Vec3::new(5.0, 0.0, 0.0), Vec3::NEG_X, false);
        assert!(v.x.abs() < 1e-5);
        let v = AIRBORNE.project(Vec3::new(5.0, 0.0, 2.0), Vec3::NEG_X, false);
        assert!(close(v, Vec3::new(0.0, 0.0, 2.0)));
    }

    #[test]
    fn landing_flattens_then_reorients() {
        let v = AIRBORNE.project(Vec3::new(0.0, -10.0, 0.0), Vec3::Y, true);
        assert!(close(v, Vec3::ZERO));

        let v = AIRBORNE.project(Vec3::new(3.0, -10.0, 0.0), Vec3::Y, true);
        assert!(close(v, Vec3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn grounded_slope_keeps_speed() {
        let slope = Vec3::new(-1.0, 1.0, 0.0).normalize();
        let v = GROUNDED.project(Vec3::new(4.0, 0.0, 0.0), slope, true);
        assert!((v.length() - 4.0).abs() < 1e-4);
        assert!(v.dot(slope).abs() < 1e-4);
    }

    #[test]
    fn grounded_wall_hit_stays_on_ground_plane() {
        let v = GROUNDED.project(Vec3::new(3.0, 0.0, 3.0), Vec3::NEG_X, false);
        assert!(v.x.abs() < 1e-4);
        assert!(v.y.abs() < 1e-4);
        assert!(v.z > 0.0);
    }

    #[test]
    fn closures_are_mover_controllers() {
        let mut mover = |p: &mut Vec3, _r: &mut Quat, dt: f32| *p += Vec3::X * dt;
        let mut p = Vec3::ZERO;
        let mut r = Quat::IDENTITY;
        mover.update_movement(&mut p, &mut r, 0.5);
        assert!(close(p, Vec3::new(0.5, 0.0, 0.0)));
    }
}
