// src/motor/solver.rs
//! The movement solver: sweep, slide, step, repeat.
//!
//! A move is split into at most `max_movement_iterations + 1` sweeps. Each
//! sweep advances to the closest obstruction, evaluates its stability, then
//! either climbs it (valid step) or projects the remaining velocity on it.
//! Two consecutive blocking hits may form a crease (slide along it) or a
//! corner (stop).

use glam::{Quat, Vec3};
use log::debug;

use super::{MotorCore, CORRELATION_FOR_VERTICAL_OBSTRUCTION, STEPPING_FORWARD_DISTANCE};
use crate::collision::{ColliderId, CollisionWorld};
use crate::config::{StepHandling, COLLISION_OFFSET};
use crate::math::{normalized, project, project_on_plane};
use crate::policy::{CharacterController, ProjectionContext};
use crate::report::{MoveResult, MovementSweepState};

/// Closest obstruction of one sweep iteration.
#[derive(Debug, Clone, Copy)]
struct Contact {
    collider: ColliderId,
    normal: Vec3,
    point: Vec3,
    distance: f32,
}

/// What the previous projection left behind, for crease detection.
#[derive(Debug, Clone, Copy, Default)]
struct SweepTracker {
    state: MovementSweepState,
    previous_stable: bool,
    previous_velocity: Vec3,
    previous_normal: Vec3,
}

impl SweepTracker {
    fn remember(&mut self, stable: bool, velocity: Vec3, obstruction_normal: Vec3) {
        self.previous_stable = stable;
        self.previous_velocity = velocity;
        self.previous_normal = obstruction_normal;
    }
}

/// Checks whether two blocking planes pin the velocity into their crease.
///
/// Returns the crease direction, oriented along `current_velocity`, when the
/// velocity that entered the second hit cannot escape between the planes.
/// Never reports a crease when the character and both hits are stable.
pub fn evaluate_crease(
    current_velocity: Vec3,
    previous_velocity: Vec3,
    current_normal: Vec3,
    previous_normal: Vec3,
    current_stable: bool,
    previous_stable: bool,
    character_stable: bool,
) -> Option<Vec3> {
    if character_stable && current_stable && previous_stable {
        return None;
    }

    let mut crease = normalized(current_normal.cross(previous_normal));
    if current_normal.dot(previous_normal) >= 0.999 {
        return None;
    }

    let a = normalized(project_on_plane(current_normal, crease));
    let b = normalized(project_on_plane(previous_normal, crease));
    let planes_dot = a.dot(b);
    let entering = normalized(project_on_plane(previous_velocity, crease));

    let constrained = planes_dot <= (-entering).dot(a) + 0.001 && planes_dot <= (-entering).dot(b) + 0.001;
    if !constrained {
        return None;
    }

    if crease.dot(current_velocity) < 0.0 {
        crease = -crease;
    }
    Some(crease)
}

impl MotorCore {
    /// Blocking hits while grounded are flattened into vertical walls so the
    /// character slides along them instead of being pushed up or down.
    pub(crate) fn obstruction_normal(&self, hit_normal: Vec3, stable_on_hit: bool) -> Vec3 {
        let mut normal = hit_normal;
        if self.grounding_status.is_stable_on_ground && !self.must_unground() && !stable_on_hit {
            let left_along_ground = normalized(self.grounding_status.ground_normal.cross(normal));
            normal = normalized(left_along_ground.cross(self.character_up));
        }
        if normal == Vec3::ZERO {
            hit_normal
        } else {
            normal
        }
    }

    fn projection_context(&self) -> ProjectionContext {
        ProjectionContext {
            grounded: self.grounding_status.is_stable_on_ground && !self.must_unground(),
            ground_normal: self.grounding_status.ground_normal,
            up: self.character_up,
        }
    }

    /// Moves the transient position by `velocity * dt`, solving collisions.
    pub(crate) fn internal_character_move(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &mut dyn CharacterController,
        mut velocity: Vec3,
        dt: f32,
    ) -> MoveResult {
        if dt <= 0.0 {
            return MoveResult { velocity, completed: false };
        }
        if self.config.has_planar_constraint {
            velocity = project_on_plane(velocity, self.config.planar_axis());
        }

        let rotation = self.transient_rotation;
        let up = self.character_up;
        let max_iterations = self.config.max_movement_iterations;

        let mut completed = true;
        let mut direction = normalized(velocity);
        let mut remaining = velocity.length() * dt;
        let mut moved = self.transient_position;
        let mut sweeps = 0;
        let mut hit_something = true;
        let mut tracker = SweepTracker::default();

        // overlaps resolved earlier this tick still obstruct
        let overlaps = self.overlaps.clone();
        for overlap in &overlaps {
            if !(direction.dot(overlap.normal) < 0.0) {
                continue;
            }
            let stable = self.is_stable_on_normal(overlap.normal) && !self.must_unground();
            let before = velocity;
            let obstruction = self.obstruction_normal(overlap.normal, stable);
            self.project_velocity(&*ctrl, stable, obstruction, &mut tracker, &mut velocity, &mut remaining, &mut direction);
            tracker.remember(stable, before, obstruction);
        }

        while remaining > 0.0 && sweeps <= max_iterations && hit_something {
            let mut closest = None;

            if self.config.check_movement_initial_overlaps {
                closest = self.most_obstructing_overlap(world, &*ctrl, moved, rotation, direction);
            }
            if closest.is_none() {
                closest = self
                    .collisions_sweep(world, &*ctrl, moved, rotation, direction, remaining + COLLISION_OFFSET, 0.0, false)
                    .map(|hit| Contact { collider: hit.collider, normal: hit.normal, point: hit.point, distance: hit.distance });
            }

            match closest {
                Some(contact) => {
                    let advance = (contact.distance - COLLISION_OFFSET).max(0.0);
                    moved += direction * advance;
                    remaining -= advance;

                    let report = self.evaluate_hit_stability_internal(
                        world,
                        ctrl,
                        contact.collider,
                        contact.normal,
                        contact.point,
                        moved,
                        rotation,
                        velocity,
                    );

                    let mut stepped = false;
                    if self.solve_grounding
                        && self.config.step_handling != StepHandling::None
                        && report.valid_step_detected
                        && contact.normal.dot(up).abs() <= CORRELATION_FOR_VERTICAL_OBSTRUCTION
                    {
                        let max_step = self.config.max_step_height;
                        let forward = normalized(project_on_plane(-contact.normal, up));
                        let start = moved + forward * STEPPING_FORWARD_DISTANCE + up * max_step;

                        self.collisions_sweep(world, &*ctrl, start, rotation, -up, max_step, 0.0, true);
                        if let Some(step) = self.hits.iter().find(|h| Some(h.collider) == report.stepped_collider) {
                            moved = start - up * (step.distance - COLLISION_OFFSET);
                            velocity = project_on_plane(velocity, up);
                            direction = normalized(velocity);
                            stepped = true;
                            debug!("stepped onto {:?}", step.collider);
                        }
                    }

                    if !stepped {
                        let obstruction = self.obstruction_normal(contact.normal, report.is_stable);
                        ctrl.on_movement_hit(contact.collider, contact.normal, contact.point, &report);

                        if self.config.interactive_rigidbody_handling {
                            if let Some(body) = world.collider_body(contact.collider) {
                                self.store_rigidbody_hit(body, velocity, contact.point, obstruction, report.is_stable);
                            }
                        }

                        let stable = report.is_stable && !self.must_unground();
                        let before = velocity;
                        self.project_velocity(&*ctrl, stable, obstruction, &mut tracker, &mut velocity, &mut remaining, &mut direction);
                        tracker.remember(stable, before, obstruction);
                    }
                }
                None => hit_something = false,
            }

            sweeps += 1;
            if sweeps > max_iterations {
                if self.config.kill_remaining_movement_when_exceed_max_movement_iterations {
                    remaining = 0.0;
                }
                if self.config.kill_velocity_when_exceed_max_movement_iterations {
                    velocity = Vec3::ZERO;
                }
                completed = false;
                debug!("movement iterations exhausted, {remaining:.4} left");
            }
        }

        moved += direction * remaining;
        self.transient_position = moved;
        MoveResult { velocity, completed }
    }

    /// Overlap whose separation direction opposes `direction` the most.
    fn most_obstructing_overlap(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &dyn CharacterController,
        position: Vec3,
        rotation: Quat,
        direction: Vec3,
    ) -> Option<Contact> {
        if self.collisions_overlap(world, ctrl, position, rotation, 0.0, false) == 0 {
            return None;
        }

        let cast = self.capsule.cast_at(position, rotation);
        let center = position + rotation * self.capsule.center_offset();
        let mut most_obstructing = 2.0;
        let mut found = None;

        for &collider in &self.probed {
            let Some(penetration) = world.compute_penetration(&cast, collider) else { continue };
            let dot = direction.dot(penetration.direction);
            if dot < 0.0 && dot < most_obstructing {
                most_obstructing = dot;
                found = Some(Contact {
                    collider,
                    normal: penetration.direction,
                    point: center + penetration.direction * penetration.distance,
                    distance: 0.0,
                });
            }
        }
        found
    }

    /// Projects `velocity` on an obstruction and rescales the remaining
    /// distance by the speed that survived.
    #[allow(clippy::too_many_arguments)]
    fn project_velocity(
        &mut self,
        ctrl: &dyn CharacterController,
        stable_on_hit: bool,
        obstruction_normal: Vec3,
        tracker: &mut SweepTracker,
        velocity: &mut Vec3,
        remaining: &mut f32,
        direction: &mut Vec3,
    ) {
        if velocity.length_squared() <= 0.0 {
            return;
        }

        let before = *velocity;
        let context = self.projection_context();

        if stable_on_hit {
            self.last_movement_iteration_found_any_ground = true;
            *velocity = ctrl.handle_velocity_projection(&context, *velocity, obstruction_normal, true);
        } else {
            match tracker.state {
                MovementSweepState::Initial => {
                    *velocity = ctrl.handle_velocity_projection(&context, *velocity, obstruction_normal, false);
                    tracker.state = MovementSweepState::AfterFirstHit;
                }
                MovementSweepState::AfterFirstHit => {
                    let crease = evaluate_crease(
                        *velocity,
                        tracker.previous_velocity,
                        obstruction_normal,
                        tracker.previous_normal,
                        false,
                        tracker.previous_stable,
                        context.grounded,
                    );
                    match crease {
                        Some(_) if context.grounded => {
                            *velocity = Vec3::ZERO;
                            tracker.state = MovementSweepState::FoundBlockingCorner;
                        }
                        Some(crease) => {
                            *velocity = project(*velocity, crease);
                            tracker.state = MovementSweepState::FoundBlockingCrease;
                        }
                        None => {
                            *velocity = ctrl.handle_velocity_projection(&context, *velocity, obstruction_normal, false);
                        }
                    }
                }
                MovementSweepState::FoundBlockingCrease => {
                    *velocity = Vec3::ZERO;
                    tracker.state = MovementSweepState::FoundBlockingCorner;
                }
                MovementSweepState::FoundBlockingCorner => {}
            }
        }

        if self.config.has_planar_constraint {
            *velocity = project_on_plane(*velocity, self.config.planar_axis());
        }

        *remaining *= velocity.length() / before.length();
        *direction = normalized(*velocity);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MotorConfig;
    use crate::motor::CharacterMotor;
    use crate::rapier_world::RapierWorld;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn crease_is_collinear_with_plane_intersection() {
        let n1 = Vec3::NEG_X;
        let n2 = Vec3::NEG_Z;
        let crease = evaluate_crease(Vec3::new(0.0, -2.0, 0.0), Vec3::new(1.0, 0.0, 1.0), n1, n2, false, false, false)
            .expect("corner pins the velocity");
        assert!(crease.cross(n1.cross(n2)).length() < 1e-5);
        assert!(crease.dot(Vec3::new(0.0, -2.0, 0.0)) > 0.0);
    }

    #[test]
    fn no_crease_when_everything_is_stable() {
        let crease = evaluate_crease(Vec3::X, Vec3::new(1.0, 0.0, 1.0), Vec3::NEG_X, Vec3::NEG_Z, true, true, true);
        assert!(crease.is_none());
    }

    #[test]
    fn no_crease_for_parallel_planes_or_escaping_velocity() {
        assert!(evaluate_crease(Vec3::X, Vec3::X, Vec3::NEG_X, Vec3::NEG_X, false, false, false).is_none());
        // obtuse wedge the entering velocity slides out of
        let a = Vec3::new(-1.0, 0.0, 0.2).normalize();
        let b = Vec3::new(-1.0, 0.0, -0.2).normalize();
        assert!(evaluate_crease(Vec3::Z, Vec3::new(0.1, 0.0, 1.0), a, b, false, false, false).is_none());
    }

    #[test]
    fn grounded_obstruction_normal_is_vertical() {
        let mut motor = motor_at(Vec3::ZERO);
        motor.core_mut().grounding_status.is_stable_on_ground = true;
        motor.core_mut().grounding_status.ground_normal = Vec3::Y;

        let slanted = Vec3::new(-1.0, -0.5, 0.0).normalize();
        let n = motor.core().obstruction_normal(slanted, false);
        assert!(n.y.abs() < 1e-5);
        assert!(close(n, Vec3::NEG_X, 1e-4));

        // stable hits and airborne characters keep the raw normal
        assert_eq!(motor.core().obstruction_normal(slanted, true), slanted);
        motor.core_mut().grounding_status.is_stable_on_ground = false;
        assert_eq!(motor.core().obstruction_normal(slanted, false), slanted);
    }

    #[test]
    fn zero_dt_does_not_move() {
        let world = floor_world();
        let mut motor = motor_at(Vec3::new(0.0, 1.0, 0.0));
        let result = motor.core.internal_character_move(&world, motor.controller.as_mut(), Vec3::X, 0.0);
        assert!(!result.completed);
        assert_eq!(motor.core().transient_position(), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn free_move_covers_full_distance() {
        let world = RapierWorld::default();
        let mut motor = motor_at(Vec3::ZERO);
        let result = motor.core.internal_character_move(&world, motor.controller.as_mut(), Vec3::new(2.0, 1.0, 0.0), 0.5);
        assert!(result.completed);
        assert_eq!(result.velocity, Vec3::new(2.0, 1.0, 0.0));
        assert!(close(motor.core().transient_position(), Vec3::new(1.0, 0.5, 0.0), 1e-5));
    }

    #[test]
    fn grounded_corner_stops_the_character() {
        let mut world = floor_world();
        world.spawn_static_box(Vec3::new(1.5, 1.0, 0.0), Vec3::new(0.5, 1.0, 3.0), Quat::IDENTITY);
        world.spawn_static_box(Vec3::new(0.0, 1.0, 1.5), Vec3::new(3.0, 1.0, 0.5), Quat::IDENTITY);
        world.update_queries();

        let mut motor = motor_at(Vec3::new(0.0, 0.003, 0.0));
        tick(&mut motor, &mut world, DT);
        motor.core_mut().set_base_velocity(Vec3::new(3.0, 0.0, 3.0));
        for _ in 0..30 {
            tick(&mut motor, &mut world, DT);
        }

        let core = motor.core();
        assert!(core.base_velocity().length() < 1e-3);
        assert!(core.transient_position().x <= 0.5 + 1e-3);
        assert!(core.transient_position().z <= 0.5 + 1e-3);
    }

    #[test]
    fn moves_terminate_within_iteration_budget() {
        struct HitCounter(Rc<Cell<u32>>);
        impl CharacterController for HitCounter {
            fn on_movement_hit(&mut self, _: ColliderId, _: Vec3, _: Vec3, _: &crate::report::HitStabilityReport) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut rng = StdRng::seed_from_u64(7);
        let mut world = floor_world();
        for _ in 0..40 {
            let center = Vec3::new(rng.gen_range(-4.0..4.0), rng.gen_range(0.0..2.0), rng.gen_range(-4.0..4.0));
            let half = Vec3::new(rng.gen_range(0.1..1.0), rng.gen_range(0.1..1.0), rng.gen_range(0.1..1.0));
            let rotation = Quat::from_rotation_y(rng.gen_range(0.0..3.0)) * Quat::from_rotation_x(rng.gen_range(-0.6..0.6));
            world.spawn_static_box(center, half, rotation);
        }
        world.update_queries();

        let config = MotorConfig { max_movement_iterations: 3, ..MotorConfig::default() };
        let max_sweeps = config.max_movement_iterations + 1;
        let hits = Rc::new(Cell::new(0));
        let mut motor = CharacterMotor::new(config, Box::new(HitCounter(hits.clone()))).unwrap();

        for _ in 0..200 {
            let start = Vec3::new(rng.gen_range(-5.0..5.0), rng.gen_range(0.0..3.0), rng.gen_range(-5.0..5.0));
            let velocity = Vec3::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0));
            motor.core_mut().set_position(start, true);

            hits.set(0);
            let result = motor.core.internal_character_move(&world, motor.controller.as_mut(), velocity, 0.1);

            assert!(hits.get() <= max_sweeps);
            assert!(motor.core().transient_position().is_finite());
            if !result.completed {
                assert_eq!(result.velocity, Vec3::ZERO);
            }
        }
    }
}
