// src/mover.rs
//! Kinematic platform movers.
//!
//! A [`PhysicsMover`] asks its [`MoverController`] for a goal pose every tick
//! and derives the linear and angular velocity that characters standing on it
//! inherit. Velocities are always recomputed from the pose delta, never
//! integrated on their own.

use glam::{Quat, Vec3};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::collision::{BodyId, CollisionWorld, MoverVelocity};
use crate::math::{angular_velocity_between, Pose};
use crate::policy::MoverController;

/// Everything needed to rewind a mover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoverState {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
}

/// A platform backed by a kinematic body in the collision world.
pub struct PhysicsMover {
    body: BodyId,
    controller: Box<dyn MoverController>,

    transient_position: Vec3,
    transient_rotation: Quat,
    initial_simulation_position: Vec3,
    initial_simulation_rotation: Quat,
    initial_tick_position: Vec3,
    initial_tick_rotation: Quat,

    velocity: Vec3,
    angular_velocity: Vec3,
}

impl PhysicsMover {
    pub fn new(body: BodyId, position: Vec3, rotation: Quat, controller: Box<dyn MoverController>) -> Self {
        let rotation = rotation.normalize();
        Self {
            body,
            controller,
            transient_position: position,
            transient_rotation: rotation,
            initial_simulation_position: position,
            initial_simulation_rotation: rotation,
            initial_tick_position: position,
            initial_tick_rotation: rotation,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }

    #[inline]
    pub fn body(&self) -> BodyId {
        self.body
    }

    #[inline]
    pub fn controller_mut(&mut self) -> &mut dyn MoverController {
        self.controller.as_mut()
    }

    pub fn set_controller(&mut self, controller: Box<dyn MoverController>) {
        self.controller = controller;
    }

    #[inline] pub fn transient_position(&self) -> Vec3 { self.transient_position }
    #[inline] pub fn transient_rotation(&self) -> Quat { self.transient_rotation }
    #[inline] pub fn velocity(&self) -> Vec3 { self.velocity }
    #[inline] pub fn angular_velocity(&self) -> Vec3 { self.angular_velocity }

    #[inline]
    pub fn transient_pose(&self) -> Pose {
        Pose::new(self.transient_position, self.transient_rotation)
    }

    #[inline]
    pub fn initial_simulation_pose(&self) -> Pose {
        Pose::new(self.initial_simulation_position, self.initial_simulation_rotation)
    }

    /// Pose at the start of the last fixed tick, the interpolation origin.
    #[inline]
    pub fn initial_tick_pose(&self) -> Pose {
        Pose::new(self.initial_tick_position, self.initial_tick_rotation)
    }

    pub(crate) fn mark_initial_tick_pose(&mut self) {
        self.initial_tick_position = self.transient_position;
        self.initial_tick_rotation = self.transient_rotation;
    }

    /// What riders need for this tick, pivoting around the pre-tick position.
    pub fn velocities(&self) -> MoverVelocity {
        MoverVelocity {
            linear: self.velocity,
            angular: self.angular_velocity,
            center: self.initial_simulation_position,
        }
    }

    // =========================================================================
    // Teleport
    // =========================================================================

    /// Moves the mover without producing any velocity. The world body follows
    /// on the next [`sync_to_world`](Self::sync_to_world).
    pub fn set_position(&mut self, position: Vec3) {
        self.initial_simulation_position = position;
        self.transient_position = position;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        let rotation = rotation.normalize();
        self.initial_simulation_rotation = rotation;
        self.transient_rotation = rotation;
    }

    pub fn set_position_and_rotation(&mut self, position: Vec3, rotation: Quat) {
        self.set_position(position);
        self.set_rotation(rotation);
    }

    pub fn state(&self) -> MoverState {
        MoverState {
            position: self.transient_position,
            rotation: self.transient_rotation,
            velocity: self.velocity,
            angular_velocity: self.angular_velocity,
        }
    }

    pub fn apply_state(&mut self, state: &MoverState) {
        self.set_position_and_rotation(state.position, state.rotation);
        self.velocity = state.velocity;
        self.angular_velocity = state.angular_velocity;
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Asks the controller for this tick's goal pose and derives velocities
    /// from the delta. A non-positive `dt` yields zero velocities.
    pub fn velocity_update(&mut self, dt: f32) {
        self.initial_simulation_position = self.transient_position;
        self.initial_simulation_rotation = self.transient_rotation;

        let mut position = self.transient_position;
        let mut rotation = self.transient_rotation;
        self.controller.update_movement(&mut position, &mut rotation, dt);
        self.transient_position = position;
        self.transient_rotation = rotation.normalize();

        if dt <= 0.0 {
            self.velocity = Vec3::ZERO;
            self.angular_velocity = Vec3::ZERO;
            return;
        }

        self.velocity = (self.transient_position - self.initial_simulation_position) / dt;
        self.angular_velocity = angular_velocity_between(self.initial_simulation_rotation, self.transient_rotation, dt);
        trace!("mover {:?} v={:?} w={:?}", self.body, self.velocity, self.angular_velocity);
    }

    /// Pushes the transient pose into the backing body. Call
    /// `update_queries` on the world before querying against it.
    pub fn sync_to_world(&self, world: &mut dyn CollisionWorld) {
        world.set_body_pose(self.body, self.transient_position, self.transient_rotation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::LayerMask;
    use crate::rapier_world::RapierWorld;
    use std::f32::consts::FRAC_PI_2;

    const DT: f32 = 1.0 / 50.0;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-3
    }

    fn sliding(speed: Vec3) -> Box<dyn MoverController> {
        Box::new(move |p: &mut Vec3, _r: &mut Quat, dt: f32| *p += speed * dt)
    }

    #[test]
    fn linear_velocity_from_pose_delta() {
        let mut mover = PhysicsMover::new(BodyId(0), Vec3::ZERO, Quat::IDENTITY, sliding(Vec3::new(3.0, 0.0, 1.0)));
        mover.velocity_update(DT);

        assert!(close(mover.velocity(), Vec3::new(3.0, 0.0, 1.0)));
        assert_eq!(mover.angular_velocity(), Vec3::ZERO);
        assert!(close(mover.transient_position(), Vec3::new(3.0, 0.0, 1.0) * DT));
        assert_eq!(mover.initial_simulation_pose().position, Vec3::ZERO);
    }

    #[test]
    fn angular_velocity_from_rotation_delta() {
        let spin = |_p: &mut Vec3, r: &mut Quat, dt: f32| *r = Quat::from_rotation_y(FRAC_PI_2 * dt) * *r;
        let mut mover = PhysicsMover::new(BodyId(0), Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, Box::new(spin));
        mover.velocity_update(DT);

        assert!(close(mover.angular_velocity(), Vec3::new(0.0, FRAC_PI_2, 0.0)));
        assert_eq!(mover.velocity(), Vec3::ZERO);

        let v = mover.velocities();
        assert_eq!(v.center, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(v.angular, mover.angular_velocity());
    }

    #[test]
    fn zero_dt_means_zero_velocity() {
        let jump = |p: &mut Vec3, _r: &mut Quat, _dt: f32| *p += Vec3::X;
        let mut mover = PhysicsMover::new(BodyId(0), Vec3::ZERO, Quat::IDENTITY, Box::new(jump));
        mover.velocity_update(DT);
        assert!(mover.velocity().x > 1.0);

        mover.velocity_update(0.0);
        assert_eq!(mover.velocity(), Vec3::ZERO);
        assert_eq!(mover.angular_velocity(), Vec3::ZERO);
        assert!(close(mover.transient_position(), Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn teleport_produces_no_velocity() {
        let still = |_p: &mut Vec3, _r: &mut Quat, _dt: f32| {};
        let mut mover = PhysicsMover::new(BodyId(0), Vec3::ZERO, Quat::IDENTITY, Box::new(still));
        mover.set_position(Vec3::new(0.0, 10.0, 0.0));
        mover.velocity_update(DT);
        assert_eq!(mover.velocity(), Vec3::ZERO);
        assert_eq!(mover.transient_position(), Vec3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn restored_state_replays_identically() {
        let mut mover = PhysicsMover::new(BodyId(0), Vec3::ZERO, Quat::IDENTITY, sliding(Vec3::new(0.0, 0.0, 2.0)));
        mover.velocity_update(DT);
        let saved = mover.state();
        let json = serde_json::to_string(&saved).unwrap();

        mover.velocity_update(DT);
        let expected = mover.state();

        let restored: MoverState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, saved);
        mover.apply_state(&restored);
        assert_eq!(mover.state(), saved);
        mover.velocity_update(DT);
        assert_eq!(mover.state(), expected);
    }

    #[test]
    fn sync_moves_the_backing_collider() {
        let mut world = RapierWorld::default();
        let (body, collider) = world.spawn_kinematic_box(Vec3::ZERO, Vec3::new(1.0, 0.1, 1.0), Quat::IDENTITY);
        world.update_queries();

        let mut mover = PhysicsMover::new(body, Vec3::ZERO, Quat::IDENTITY, sliding(Vec3::new(50.0, 0.0, 0.0)));
        mover.velocity_update(DT);
        mover.sync_to_world(&mut world);
        world.update_queries();

        let pose = world.collider_pose(collider).unwrap();
        assert!(close(pose.position, Vec3::new(1.0, 0.0, 0.0)));

        let mut hits = Vec::new();
        world.raycast(Vec3::new(1.5, 1.0, 0.0), Vec3::NEG_Y, 2.0, LayerMask::ALL, &|_| true, &mut hits);
        assert_eq!(hits.first().map(|h| h.collider), Some(collider));
    }
}
