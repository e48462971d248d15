// src/motor/queries.rs
//! Filtered collision queries run on behalf of the motor.
//!
//! The `collisions_*` family applies the motor's collider rules (self, attached
//! body, dynamic bodies in kinematic mode, controller veto) and fills the
//! motor's scratch buffers. The `character_*` family on [`CharacterMotor`] is
//! the public flavour: explicit layers, only the motor's own collider removed.

use std::cell::RefCell;

use glam::{Quat, Vec3};
use smallvec::SmallVec;

use super::{CharacterMotor, MotorCore, GROUND_PROBING_BACKSTEP_DISTANCE, SWEEP_PROBING_BACKSTEP_DISTANCE};
use crate::collision::{BodyId, ColliderId, CollisionWorld, LayerMask, RayHit, SweepHit};
use crate::config::RigidbodyInteraction;
use crate::policy::CharacterController;

/// Collider rules frozen at query time.
///
/// Holds copies of the motor fields it needs so the motor's scratch buffers
/// can be borrowed mutably while the filter runs. Dynamic bodies skipped in
/// kinematic mode are remembered so the motor can wake them once the world is
/// mutable again.
pub(crate) struct ColliderValidity<'a> {
    self_collider: Option<ColliderId>,
    moving_from_attached_body: bool,
    attached_body: Option<BodyId>,
    kinematic_mode: bool,
    world: &'a dyn CollisionWorld,
    ctrl: &'a dyn CharacterController,
    skipped_dynamic: RefCell<SmallVec<[BodyId; 4]>>,
}

impl ColliderValidity<'_> {
    pub(crate) fn check(&self, collider: ColliderId) -> bool {
        if Some(collider) == self.self_collider {
            return false;
        }

        if let Some(body) = self.world.collider_body(collider) {
            if let Some(info) = self.world.body_info(body) {
                // the attached body is already accounted for by the carried move
                if self.moving_from_attached_body && (info.is_dynamic() || Some(body) == self.attached_body) {
                    return false;
                }
                if self.kinematic_mode && info.is_dynamic() {
                    let mut skipped = self.skipped_dynamic.borrow_mut();
                    if !skipped.contains(&body) {
                        skipped.push(body);
                    }
                    return false;
                }
            }
        }

        self.ctrl.is_collider_valid_for_collisions(collider)
    }
}

impl MotorCore {
    pub(crate) fn collider_validity<'a>(
        &self,
        world: &'a dyn CollisionWorld,
        ctrl: &'a dyn CharacterController,
    ) -> ColliderValidity<'a> {
        ColliderValidity {
            self_collider: self.collider,
            moving_from_attached_body: self.is_moving_from_attached_body,
            attached_body: self.attached_body,
            kinematic_mode: self.config.rigidbody_interaction == RigidbodyInteraction::Kinematic,
            world,
            ctrl,
            skipped_dynamic: RefCell::new(SmallVec::new()),
        }
    }

    /// Queue the bodies `validity` skipped for waking at the end of the phase.
    pub(crate) fn defer_wakes(&mut self, validity: ColliderValidity<'_>) {
        for body in validity.skipped_dynamic.into_inner() {
            if !self.pending_wakes.contains(&body) {
                self.pending_wakes.push(body);
            }
        }
    }

    pub(crate) fn flush_wakes(&mut self, world: &mut dyn CollisionWorld) {
        for body in self.pending_wakes.drain(..) {
            world.wake_body(body);
        }
    }

    fn query_layers(&self, accept_only_stable_ground: bool) -> LayerMask {
        if accept_only_stable_ground {
            self.collidable_layers & self.config.stable_ground_layers
        } else {
            self.collidable_layers
        }
    }

    /// Valid colliders overlapping the capsule, written to `self.probed`.
    pub(crate) fn collisions_overlap(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &dyn CharacterController,
        position: Vec3,
        rotation: Quat,
        inflate: f32,
        accept_only_stable_ground: bool,
    ) -> usize {
        let layers = self.query_layers(accept_only_stable_ground);
        let cast = self.capsule.cast_inflated(position, rotation, inflate);
        let validity = self.collider_validity(world, ctrl);
        world.overlap_capsule(&cast, layers, &|c| validity.check(c), &mut self.probed);
        self.defer_wakes(validity);
        self.probed.len()
    }

    /// Valid sweep hits in `self.hits`, closest first.
    ///
    /// The cast starts slightly behind `position` so contacts right at the
    /// start are still reported; hits at or behind the start are dropped.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn collisions_sweep(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &dyn CharacterController,
        position: Vec3,
        rotation: Quat,
        direction: Vec3,
        distance: f32,
        inflate: f32,
        accept_only_stable_ground: bool,
    ) -> Option<SweepHit> {
        let layers = self.query_layers(accept_only_stable_ground);
        let cast = self
            .capsule
            .cast_inflated(position, rotation, inflate)
            .translated(-direction * SWEEP_PROBING_BACKSTEP_DISTANCE);
        let validity = self.collider_validity(world, ctrl);

        world.sweep_capsule(
            &cast,
            direction,
            distance + SWEEP_PROBING_BACKSTEP_DISTANCE,
            layers,
            &|c| validity.check(c),
            &mut self.hits,
        );
        self.defer_wakes(validity);
        for hit in self.hits.iter_mut() {
            hit.distance -= SWEEP_PROBING_BACKSTEP_DISTANCE;
        }
        self.hits.retain(|h| h.distance > 0.0);
        self.hits.first().copied()
    }

    /// Closest stable-layer hit below the capsule. The returned distance is
    /// relative to `position` and can be slightly negative when the capsule
    /// already touches the ground.
    pub(crate) fn ground_sweep(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &dyn CharacterController,
        position: Vec3,
        rotation: Quat,
        direction: Vec3,
        distance: f32,
    ) -> Option<SweepHit> {
        let layers = self.query_layers(true);
        let cast = self
            .capsule
            .cast_at(position, rotation)
            .translated(-direction * GROUND_PROBING_BACKSTEP_DISTANCE);
        let validity = self.collider_validity(world, ctrl);

        world.sweep_capsule(
            &cast,
            direction,
            distance + GROUND_PROBING_BACKSTEP_DISTANCE,
            layers,
            &|c| validity.check(c),
            &mut self.hits,
        );
        self.defer_wakes(validity);

        let mut hit = self.hits.iter().find(|h| h.distance > 0.0).copied()?;
        hit.distance -= GROUND_PROBING_BACKSTEP_DISTANCE;
        Some(hit)
    }

    /// Closest valid ray hit, all valid hits left in `self.ray_hits`.
    pub(crate) fn collisions_raycast(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &dyn CharacterController,
        origin: Vec3,
        direction: Vec3,
        distance: f32,
        accept_only_stable_ground: bool,
    ) -> Option<RayHit> {
        let layers = self.query_layers(accept_only_stable_ground);
        let validity = self.collider_validity(world, ctrl);
        world.raycast(origin, direction, distance, layers, &|c| validity.check(c), &mut self.ray_hits);
        self.defer_wakes(validity);
        self.ray_hits.retain(|h| h.distance > 0.0);
        self.ray_hits.first().copied()
    }
}

/* -------------------------------------------------------------------------- */
/*                              Public Queries                                */
/* -------------------------------------------------------------------------- */

impl CharacterMotor {
    /// Colliders overlapping the capsule at the given pose, own collider excluded.
    pub fn character_overlap(
        &self,
        world: &dyn CollisionWorld,
        position: Vec3,
        rotation: Quat,
        layers: LayerMask,
        inflate: f32,
        out: &mut Vec<ColliderId>,
    ) -> usize {
        let own = self.core.collider;
        let cast = self.core.capsule.cast_inflated(position, rotation, inflate);
        world.overlap_capsule(&cast, layers, &|c| Some(c) != own, out);
        out.len()
    }

    /// Capsule sweep from the given pose; hits at distance zero are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn character_sweep(
        &self,
        world: &dyn CollisionWorld,
        position: Vec3,
        rotation: Quat,
        direction: Vec3,
        distance: f32,
        layers: LayerMask,
        inflate: f32,
        out: &mut Vec<SweepHit>,
    ) -> Option<SweepHit> {
        let own = self.core.collider;
        let cast = self.core.capsule.cast_inflated(position, rotation, inflate);
        world.sweep_capsule(&cast, direction, distance, layers, &|c| Some(c) != own, out);
        out.retain(|h| h.distance > 0.0);
        out.first().copied()
    }

    /// Ray cast that ignores the motor's own collider.
    pub fn character_raycast(
        &self,
        world: &dyn CollisionWorld,
        origin: Vec3,
        direction: Vec3,
        distance: f32,
        layers: LayerMask,
        out: &mut Vec<RayHit>,
    ) -> Option<RayHit> {
        let own = self.core.collider;
        world.raycast(origin, direction, distance, layers, &|c| Some(c) != own, out);
        out.retain(|h| h.distance > 0.0);
        out.first().copied()
    }
}
