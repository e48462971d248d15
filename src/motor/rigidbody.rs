// src/motor/rigidbody.rs
//! Momentum exchange with the bodies the character runs into, and the
//! velocity carried by the body it stands on.

use glam::{Quat, Vec3};
use log::trace;

use super::{MotorCore, MAX_RIGIDBODY_OVERLAPS};
use crate::collision::{BodyDirectory, BodyId, ColliderId, CollisionWorld};
use crate::config::RigidbodyInteraction;
use crate::policy::CharacterController;
use crate::report::{CharacterPush, RigidbodyProjectionHit};

/// Velocity changes `(on_character, on_body)` for a contact along `normal`
/// (pointing from the body toward the character).
///
/// The normal component the solver projected away is restored first, then,
/// if the body resists, the relative normal velocity is split by
/// `character_to_body_mass_ratio`.
pub fn compute_collision_resolution(
    normal: Vec3,
    character_velocity: Vec3,
    body_velocity: Vec3,
    character_to_body_mass_ratio: f32,
) -> (Vec3, Vec3) {
    let mut on_character = Vec3::ZERO;
    let mut on_body = Vec3::ZERO;

    let character_normal_speed = character_velocity.dot(normal);
    let body_normal_speed = body_velocity.dot(normal);

    if character_normal_speed < 0.0 {
        on_character += normal * character_normal_speed;
    }

    if body_normal_speed > character_normal_speed {
        let relative = normal * (body_normal_speed - character_normal_speed);
        on_character += relative * (1.0 - character_to_body_mass_ratio);
        on_body -= relative * character_to_body_mass_ratio;
    }

    (on_character, on_body)
}

/// Body under `collider` that the character can ride or push: platform
/// movers and dynamic bodies. Characters are kinematic and never qualify.
pub(crate) fn interactive_body(world: &dyn CollisionWorld, bodies: &BodyDirectory, collider: ColliderId) -> Option<BodyId> {
    let body = world.collider_body(collider)?;
    if bodies.is_mover(body) {
        return Some(body);
    }
    world.body_info(body).filter(|info| info.is_dynamic()).map(|_| body)
}

/// Linear velocity of `body` at `point` (rotation included) and its angular velocity.
pub(crate) fn velocity_from_rigidbody_movement(
    world: &dyn CollisionWorld,
    bodies: &BodyDirectory,
    body: BodyId,
    point: Vec3,
    dt: f32,
) -> (Vec3, Vec3) {
    if dt <= 0.0 {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    let Some(info) = world.body_info(body) else {
        return (Vec3::ZERO, Vec3::ZERO);
    };

    let (mut linear, angular, center) = match bodies.mover(body) {
        Some(mover) if !info.is_dynamic() => (mover.linear, mover.angular, mover.center),
        _ => (info.linear_velocity, info.angular_velocity, info.center_of_mass),
    };

    if angular != Vec3::ZERO {
        let rotated = center + Quat::from_scaled_axis(angular * dt) * (point - center);
        linear += (rotated - point) / dt;
    }

    (linear, angular)
}

impl MotorCore {
    pub(crate) fn store_rigidbody_hit(
        &mut self,
        body: BodyId,
        hit_velocity: Vec3,
        hit_point: Vec3,
        effective_normal: Vec3,
        stable_on_hit: bool,
    ) {
        if self.rigidbody_hits.len() >= MAX_RIGIDBODY_OVERLAPS {
            return;
        }
        self.rigidbody_hits.push(RigidbodyProjectionHit {
            body,
            hit_point,
            effective_normal,
            hit_velocity,
            stable_on_hit,
        });
    }

    /// Applies the recorded body hits to `velocity` and to the bodies. Each
    /// body is pushed at most once per tick; the attached body never is.
    pub(crate) fn process_velocity_for_rigidbody_hits(
        &mut self,
        world: &mut dyn CollisionWorld,
        bodies: &BodyDirectory,
        ctrl: &mut dyn CharacterController,
        velocity: Vec3,
        dt: f32,
    ) -> Vec3 {
        let hits = std::mem::take(&mut self.rigidbody_hits);
        let mut processed = velocity;
        let character_mass = self.config.simulated_character_mass;

        for hit in &hits {
            if self.bodies_pushed.contains(&hit.body) || Some(hit.body) == self.attached_body {
                continue;
            }
            let Some(info) = world.body_info(hit.body) else { continue };
            self.bodies_pushed.push(hit.body);

            let character = bodies.character(hit.body);
            let (body_mass, body_velocity, body_is_dynamic) = match character {
                Some(other) => (other.mass, other.base_velocity, true),
                None if info.is_dynamic() => (info.mass, info.linear_velocity, true),
                None => {
                    let velocity = bodies.mover(hit.body).map_or(info.linear_velocity, |m| m.linear);
                    (info.mass, velocity, false)
                }
            };

            let mut ratio = if character_mass + body_mass > 0.0 {
                character_mass / (character_mass + body_mass)
            } else {
                0.5
            };
            if !body_is_dynamic {
                ratio = 0.0;
            } else if self.config.rigidbody_interaction == RigidbodyInteraction::Kinematic && character.is_none() {
                ratio = 1.0;
            }

            let (on_character, on_body) =
                compute_collision_resolution(hit.effective_normal, hit.hit_velocity, body_velocity, ratio);
            processed += on_character;

            if character.is_some() {
                self.character_pushes.push(CharacterPush { body: hit.body, velocity_change: on_body });
            } else if body_is_dynamic {
                trace!("pushing {:?} by {:?}", hit.body, on_body);
                world.apply_velocity_change_at_point(hit.body, on_body, hit.hit_point);
            }

            if self.config.rigidbody_interaction == RigidbodyInteraction::SimulatedDynamic {
                ctrl.handle_simulated_rigidbody_interaction(&mut processed, hit, dt);
            }
        }

        self.rigidbody_hits = hits;
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::collision::{CharacterBody, MoverVelocity};
    use crate::config::MotorConfig;
    use crate::policy::PassiveController;
    use crate::rapier_world::RapierWorld;

    #[test]
    fn equal_masses_split_the_impact() {
        let (dc, db) = compute_collision_resolution(Vec3::NEG_X, Vec3::new(4.0, 0.0, 0.0), Vec3::ZERO, 0.5);
        assert!(close(db, Vec3::new(2.0, 0.0, 0.0), 1e-5));
        assert!(close(dc, Vec3::new(2.0, 0.0, 0.0), 1e-5));
        // projected velocity has no normal part left, so the character ends at the shared speed
        assert!(close(Vec3::ZERO + dc, db, 1e-5));
    }

    #[test]
    fn immovable_body_gives_nothing_back() {
        let (dc, db) = compute_collision_resolution(Vec3::NEG_X, Vec3::new(4.0, 0.0, 0.0), Vec3::ZERO, 0.0);
        assert_eq!(db, Vec3::ZERO);
        assert!(close(dc, Vec3::ZERO, 1e-6));

        // separating velocities leave both untouched
        let (dc, db) = compute_collision_resolution(Vec3::NEG_X, Vec3::new(-2.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0), 0.5);
        assert_eq!(dc, Vec3::ZERO);
        assert_eq!(db, Vec3::ZERO);
    }

    #[test]
    fn interactive_bodies() {
        let mut world = floor_world();
        let (mover, mover_collider) = world.spawn_kinematic_box(Vec3::new(5.0, 0.0, 0.0), Vec3::splat(0.5), Quat::IDENTITY);
        let (_, plain_collider) = world.spawn_kinematic_box(Vec3::new(-5.0, 0.0, 0.0), Vec3::splat(0.5), Quat::IDENTITY);
        let (dynamic, dynamic_collider) = world.spawn_dynamic_box(Vec3::new(0.0, 3.0, 0.0), Vec3::splat(0.5), 1.0);
        let floor = world.spawn_static_box(Vec3::new(0.0, -10.0, 0.0), Vec3::splat(1.0), Quat::IDENTITY);
        world.update_queries();

        let mut bodies = BodyDirectory::new();
        bodies.set_mover(mover, MoverVelocity::default());

        assert_eq!(interactive_body(&world, &bodies, mover_collider), Some(mover));
        assert_eq!(interactive_body(&world, &bodies, dynamic_collider), Some(dynamic));
        assert_eq!(interactive_body(&world, &bodies, plain_collider), None);
        assert_eq!(interactive_body(&world, &bodies, floor), None);
    }

    #[test]
    fn rotating_platform_carries_tangential_velocity() {
        let mut world = RapierWorld::default();
        let (platform, _) = world.spawn_kinematic_box(Vec3::ZERO, Vec3::new(3.0, 0.5, 3.0), Quat::IDENTITY);
        world.update_queries();

        let mut bodies = BodyDirectory::new();
        bodies.set_mover(platform, MoverVelocity { linear: Vec3::ZERO, angular: Vec3::new(0.0, 1.0, 0.0), center: Vec3::ZERO });

        let (linear, angular) = velocity_from_rigidbody_movement(&world, &bodies, platform, Vec3::X, 1.0 / 120.0);
        assert_eq!(angular, Vec3::Y);
        assert!(close(linear, Vec3::new(0.0, 0.0, -1.0), 1e-2));

        assert_eq!(velocity_from_rigidbody_movement(&world, &bodies, platform, Vec3::X, 0.0), (Vec3::ZERO, Vec3::ZERO));
        world.remove_body(platform);
        assert_eq!(velocity_from_rigidbody_movement(&world, &bodies, platform, Vec3::X, DT), (Vec3::ZERO, Vec3::ZERO));
    }

    #[test]
    fn pushes_dynamic_box() {
        let mut world = floor_world();
        let (crate_body, _) = world.spawn_dynamic_box(Vec3::new(1.0, 0.5, 0.0), Vec3::splat(0.5), 1.0);
        world.update_queries();

        let mut motor = motor_at(Vec3::new(-1.0, 0.003, 0.0));
        tick(&mut motor, &mut world, DT);
        motor.core_mut().set_base_velocity(Vec3::new(4.0, 0.0, 0.0));
        for _ in 0..30 {
            tick(&mut motor, &mut world, DT);
        }

        let info = world.body_info(crate_body).unwrap();
        assert!(info.linear_velocity.x > 0.5, "box velocity {:?}", info.linear_velocity);
        // the world is never stepped, so the box stays put and blocks
        assert!(motor.core().transient_position().x < 0.01);
    }

    #[test]
    fn character_hits_become_pushes() {
        let mut world = floor_world();
        let other_motor = motor_at(Vec3::new(2.0, 0.0, 0.0));
        let (other_body, _) = world.spawn_character_capsule(
            other_motor.core().capsule(),
            Vec3::new(2.0, 0.0, 0.0),
            Quat::IDENTITY,
            crate::collision::LayerMask::DEFAULT,
        );
        world.update_queries();

        let mut bodies = BodyDirectory::new();
        bodies.set_character(other_body, CharacterBody { mass: 1.0, base_velocity: Vec3::ZERO });

        let mut motor = motor_with(MotorConfig::default());
        motor.core.store_rigidbody_hit(other_body, Vec3::new(4.0, 0.0, 0.0), Vec3::new(1.5, 1.0, 0.0), Vec3::NEG_X, false);
        // same body twice in a tick only counts once
        motor.core.store_rigidbody_hit(other_body, Vec3::new(4.0, 0.0, 0.0), Vec3::new(1.5, 1.0, 0.0), Vec3::NEG_X, false);

        let processed =
            motor.core.process_velocity_for_rigidbody_hits(&mut world, &bodies, &mut PassiveController, Vec3::ZERO, DT);
        assert!(close(processed, Vec3::new(2.0, 0.0, 0.0), 1e-5));

        let pushes = motor.core_mut().take_character_pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].body, other_body);
        assert!(close(pushes[0].velocity_change, Vec3::new(2.0, 0.0, 0.0), 1e-5));
        assert!(motor.core_mut().take_character_pushes().is_empty());
    }

    #[test]
    fn attached_body_is_never_pushed() {
        let mut world = floor_world();
        let (body, _) = world.spawn_dynamic_box(Vec3::new(0.0, 3.0, 0.0), Vec3::splat(0.5), 1.0);
        world.update_queries();

        let mut motor = motor_with(MotorConfig::default());
        motor.core.attached_body = Some(body);
        motor.core.store_rigidbody_hit(body, Vec3::new(0.0, -3.0, 0.0), Vec3::new(0.0, 2.5, 0.0), Vec3::Y, true);
        let processed = motor.core.process_velocity_for_rigidbody_hits(
            &mut world,
            &BodyDirectory::new(),
            &mut PassiveController,
            Vec3::ZERO,
            DT,
        );
        assert_eq!(processed, Vec3::ZERO);
        assert_eq!(world.body_info(body).unwrap().linear_velocity, Vec3::ZERO);
    }
}
