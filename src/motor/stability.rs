// src/motor/stability.rs
//! Hit stability: slope limit, ledge probing and step detection.

use glam::{Quat, Vec3};
use smallvec::SmallVec;

use super::{MotorCore, MAX_HITS_BUDGET, MIN_DISTANCE_FOR_LEDGE, SECONDARY_PROBES_HORIZONTAL, SECONDARY_PROBES_VERTICAL};
use crate::collision::{ColliderId, CollisionWorld, SweepHit};
use crate::config::{StepHandling, COLLISION_OFFSET};
use crate::math::{angle_between, normalized, project, project_on_plane};
use crate::policy::CharacterController;
use crate::report::HitStabilityReport;

impl MotorCore {
    /// Whether a surface with this normal is walkable for the current up direction.
    pub fn is_stable_on_normal(&self, normal: Vec3) -> bool {
        angle_between(self.character_up, normal) <= self.config.max_stable_slope_angle
    }

    /// Ledge and denivelation rules applied on top of the slope test.
    pub(crate) fn is_stable_with_special_cases(&self, report: &HitStabilityReport, velocity: Vec3) -> bool {
        if !self.config.ledge_and_denivelation_handling {
            return true;
        }

        if report.ledge_detected {
            if report.is_moving_towards_empty_side_of_ledge {
                let toward_ledge = project(velocity, report.ledge_facing_direction);
                if toward_ledge.length() >= self.config.max_velocity_for_ledge_snap {
                    return false;
                }
            }
            if report.is_on_empty_side_of_ledge
                && report.distance_from_ledge > self.config.max_stable_distance_from_ledge
            {
                return false;
            }
        }

        if !self.last_grounding_status.found_any_ground
            || report.inner_normal == Vec3::ZERO
            || report.outer_normal == Vec3::ZERO
        {
            return true;
        }

        let max = self.config.max_stable_denivelation_angle;
        if angle_between(report.inner_normal, report.outer_normal) > max {
            return false;
        }
        angle_between(self.last_grounding_status.inner_ground_normal, report.outer_normal) <= max
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn evaluate_hit_stability_internal(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &mut dyn CharacterController,
        collider: ColliderId,
        hit_normal: Vec3,
        hit_point: Vec3,
        at_position: Vec3,
        at_rotation: Quat,
        velocity: Vec3,
    ) -> HitStabilityReport {
        let mut report = HitStabilityReport::default();
        if !self.solve_grounding {
            return report;
        }

        let up = at_rotation * Vec3::Y;
        let inner_direction = normalized(project_on_plane(hit_normal, up));

        report.is_stable = self.is_stable_on_normal(hit_normal);
        report.inner_normal = hit_normal;
        report.outer_normal = hit_normal;

        if self.config.ledge_and_denivelation_handling {
            let ledge_check_height = if self.config.step_handling != StepHandling::None {
                self.config.max_step_height
            } else {
                MIN_DISTANCE_FOR_LEDGE
            };
            let probe_length = ledge_check_height + SECONDARY_PROBES_VERTICAL;
            let probe_origin = hit_point + up * SECONDARY_PROBES_VERTICAL;

            let mut inner_stable = false;
            if let Some(inner) = self.collisions_raycast(
                world,
                &*ctrl,
                probe_origin + inner_direction * SECONDARY_PROBES_HORIZONTAL,
                -up,
                probe_length,
                false,
            ) {
                report.inner_normal = inner.normal;
                report.found_inner_normal = true;
                inner_stable = self.is_stable_on_normal(inner.normal);
            }

            let mut outer_stable = false;
            if let Some(outer) = self.collisions_raycast(
                world,
                &*ctrl,
                probe_origin - inner_direction * SECONDARY_PROBES_HORIZONTAL,
                -up,
                probe_length,
                false,
            ) {
                report.outer_normal = outer.normal;
                report.found_outer_normal = true;
                outer_stable = self.is_stable_on_normal(outer.normal);
            }

            report.ledge_detected = inner_stable != outer_stable;
            if report.ledge_detected {
                report.is_on_empty_side_of_ledge = outer_stable && !inner_stable;
                report.ledge_ground_normal = if outer_stable { report.outer_normal } else { report.inner_normal };
                report.ledge_right_direction = normalized(hit_normal.cross(report.ledge_ground_normal));
                report.ledge_facing_direction = normalized(project_on_plane(
                    report.ledge_ground_normal.cross(report.ledge_right_direction),
                    up,
                ));
                let feet = at_position + at_rotation * self.capsule.bottom_offset();
                report.distance_from_ledge = project_on_plane(hit_point - feet, up).length();
                report.is_moving_towards_empty_side_of_ledge =
                    normalized(velocity).dot(report.ledge_facing_direction) > 0.0;
            }

            if report.is_stable {
                report.is_stable = self.is_stable_with_special_cases(&report, velocity);
            }
        }

        if self.config.step_handling != StepHandling::None && !report.is_stable {
            // no stepping onto dynamic bodies
            let on_dynamic = world
                .collider_body(collider)
                .and_then(|b| world.body_info(b))
                .is_some_and(|info| info.is_dynamic());

            if !on_dynamic {
                self.detect_steps(world, &*ctrl, at_position, at_rotation, hit_point, inner_direction, &mut report);
                if report.valid_step_detected {
                    report.is_stable = true;
                }
            }
        }

        ctrl.process_hit_stability_report(collider, hit_normal, hit_point, at_position, at_rotation, &mut report);
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn detect_steps(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &dyn CharacterController,
        position: Vec3,
        rotation: Quat,
        hit_point: Vec3,
        inner_direction: Vec3,
        report: &mut HitStabilityReport,
    ) {
        let up = rotation * Vec3::Y;
        let max_step = self.config.max_step_height;
        let to_hit = hit_point - position;
        let horizontal_direction = normalized(project_on_plane(to_hit, up));

        // outer check: drop the capsule onto the obstruction, just past the hit point
        let start = hit_point - project(to_hit, up) + up * max_step + horizontal_direction * (COLLISION_OFFSET * 3.0);
        self.collisions_sweep(world, ctrl, start, rotation, -up, max_step + COLLISION_OFFSET, 0.0, true);
        if let Some(collider) = self.check_step_validity(world, ctrl, position, rotation, inner_direction, start) {
            report.valid_step_detected = true;
            report.stepped_collider = Some(collider);
            return;
        }

        if self.config.step_handling != StepHandling::Extra {
            return;
        }

        // minimum reach check, for thin steps the first probe overshoots
        let start = position + up * max_step - inner_direction * self.config.min_required_step_depth;
        self.collisions_sweep(world, ctrl, start, rotation, -up, max_step - COLLISION_OFFSET, 0.0, true);
        if let Some(collider) = self.check_step_validity(world, ctrl, position, rotation, inner_direction, start) {
            report.valid_step_detected = true;
            report.stepped_collider = Some(collider);
        }
    }

    /// Tries the step candidates currently in `self.hits`, farthest first.
    fn check_step_validity(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &dyn CharacterController,
        position: Vec3,
        rotation: Quat,
        inner_direction: Vec3,
        start: Vec3,
    ) -> Option<ColliderId> {
        let up = rotation * Vec3::Y;
        let max_step = self.config.max_step_height;
        let probe_vertical = self.config.step_probe_vertical;
        let probe_horizontal = self.config.step_probe_horizontal;

        // nested queries below reuse self.hits
        let mut candidates: SmallVec<[SweepHit; MAX_HITS_BUDGET]> = self.hits.iter().copied().collect();

        while let Some(index) = farthest(&candidates) {
            let hit = candidates.swap_remove(index);
            let at_step = start - up * (hit.distance - COLLISION_OFFSET);

            if self.collisions_overlap(world, ctrl, at_step, rotation, 0.0, false) > 0 {
                continue;
            }

            let outer_origin = hit.point + up * probe_vertical - inner_direction * probe_horizontal;
            let outer_stable = self
                .collisions_raycast(world, ctrl, outer_origin, -up, max_step + probe_vertical, true)
                .is_some_and(|ray| self.is_stable_on_normal(ray.normal));
            if !outer_stable {
                continue;
            }

            let headroom = max_step - hit.distance;
            if self.collisions_sweep(world, ctrl, position, rotation, up, headroom, 0.0, false).is_some() {
                continue;
            }

            let mut inner_valid = self.config.allow_stepping_without_stable_grounding;
            if !inner_valid {
                let origin = position + project(at_step - position, up);
                inner_valid = self
                    .collisions_raycast(world, ctrl, origin, -up, max_step, true)
                    .is_some_and(|ray| self.is_stable_on_normal(ray.normal));
            }
            if !inner_valid {
                let origin = hit.point + inner_direction * probe_horizontal;
                inner_valid = self
                    .collisions_raycast(world, ctrl, origin, -up, max_step, true)
                    .is_some_and(|ray| self.is_stable_on_normal(ray.normal));
            }

            if inner_valid {
                return Some(hit.collider);
            }
        }

        None
    }
}

fn farthest(hits: &[SweepHit]) -> Option<usize> {
    hits.iter()
        .enumerate()
        .filter(|(_, h)| h.distance > 0.0)
        .max_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MotorConfig;
    use crate::rapier_world::RapierWorld;

    fn tilted(degrees: f32) -> Vec3 {
        Quat::from_rotation_z(degrees.to_radians()) * Vec3::Y
    }

    #[test]
    fn slope_limit_boundary() {
        let motor = motor_at(Vec3::ZERO);
        let core = motor.core();
        assert!(core.is_stable_on_normal(Vec3::Y));
        assert!(core.is_stable_on_normal(tilted(59.99)));
        assert!(!core.is_stable_on_normal(tilted(60.01)));
        assert!(!core.is_stable_on_normal(Vec3::X));
    }

    #[test]
    fn slope_limit_is_inclusive_without_slack() {
        let normal = tilted(35.0);
        let angle = angle_between(Vec3::Y, normal);

        let mut motor = motor_at(Vec3::ZERO);
        motor.core_mut().config.max_stable_slope_angle = angle;
        assert!(motor.core().is_stable_on_normal(normal));

        motor.core_mut().config.max_stable_slope_angle = angle - 1e-4;
        assert!(!motor.core().is_stable_on_normal(normal));
    }

    #[test]
    fn flat_ground_is_stable_without_ledge() {
        let world = floor_world();
        let mut motor = motor_at(Vec3::new(0.0, 0.01, 0.0));
        let floor = {
            let mut out = Vec::new();
            world.overlap_capsule(
                &motor.core().capsule().cast_inflated(Vec3::ZERO, Quat::IDENTITY, 0.05),
                crate::collision::LayerMask::ALL,
                &|_| true,
                &mut out,
            );
            assert_eq!(out.len(), 1, "floor overlap expected, got {out:?}");
            out[0]
        };

        let report = motor.evaluate_hit_stability(
            &world,
            floor,
            Vec3::Y,
            Vec3::ZERO,
            Vec3::new(0.0, 0.01, 0.0),
            Quat::IDENTITY,
            Vec3::new(1.0, 0.0, 0.0),
        );
        assert!(report.is_stable);
        assert!(report.found_inner_normal && report.found_outer_normal);
        assert!(!report.ledge_detected);
        assert!(!report.valid_step_detected);
    }

    #[test]
    fn ledge_over_empty_space_is_detected() {
        let mut world = RapierWorld::default();
        // platform ending at x = 0
        let platform = world.spawn_static_box(Vec3::new(-5.0, -0.5, 0.0), Vec3::new(5.0, 0.5, 5.0), Quat::IDENTITY);
        world.update_queries();

        // capsule hanging past the edge, its bottom sphere resting on the corner
        let normal = Vec3::new(0.3, 0.95, 0.0).normalize();
        let mut motor = motor_at(Vec3::new(0.15, 0.02, 0.0));
        let report = motor.evaluate_hit_stability(
            &world,
            platform,
            normal,
            Vec3::ZERO,
            Vec3::new(0.15, 0.02, 0.0),
            Quat::IDENTITY,
            Vec3::new(1.0, 0.0, 0.0),
        );

        assert!(report.ledge_detected);
        assert!(report.is_on_empty_side_of_ledge);
        assert!(close(report.ledge_ground_normal, Vec3::Y, 1e-3));
        assert!(report.ledge_facing_direction.x > 0.9);
        assert!(report.is_moving_towards_empty_side_of_ledge);
        assert!(!report.is_stable);
    }

    #[test]
    fn low_obstruction_is_a_valid_step() {
        let mut world = floor_world();
        let step = world.spawn_static_box(Vec3::new(1.0, 0.1, 0.0), Vec3::new(0.5, 0.1, 2.0), Quat::IDENTITY);
        world.update_queries();

        let config = MotorConfig {
            capsule_radius: 0.1,
            capsule_height: 1.0,
            capsule_y_offset: 0.5,
            max_step_height: 0.3,
            ..MotorConfig::default()
        };
        let mut motor = motor_with(config);
        let position = Vec3::new(0.39, 0.0, 0.0);
        let report = motor.evaluate_hit_stability(
            &world,
            step,
            Vec3::NEG_X,
            Vec3::new(0.5, 0.15, 0.0),
            position,
            Quat::IDENTITY,
            Vec3::new(3.0, 0.0, 0.0),
        );
        assert!(report.valid_step_detected);
        assert_eq!(report.stepped_collider, Some(step));
        assert!(report.is_stable);

        motor.core_mut().config.step_handling = StepHandling::None;
        let report = motor.evaluate_hit_stability(
            &world,
            step,
            Vec3::NEG_X,
            Vec3::new(0.5, 0.15, 0.0),
            position,
            Quat::IDENTITY,
            Vec3::new(3.0, 0.0, 0.0),
        );
        assert!(!report.valid_step_detected);
        assert!(!report.is_stable);
    }

    #[test]
    fn grounding_disabled_reports_unstable() {
        let world = floor_world();
        let mut motor = motor_at(Vec3::ZERO);
        motor.core_mut().set_ground_solving(false);
        let report = motor.evaluate_hit_stability(
            &world,
            ColliderId(0),
            Vec3::Y,
            Vec3::ZERO,
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::ZERO,
        );
        assert!(!report.is_stable);
    }

    #[test]
    fn denivelation_limit_rejects_sharp_crests() {
        let mut motor = motor_at(Vec3::ZERO);
        motor.core_mut().config.max_stable_denivelation_angle = 30.0;
        motor.core_mut().last_grounding_status.found_any_ground = true;
        motor.core_mut().last_grounding_status.inner_ground_normal = Vec3::Y;

        let gentle = HitStabilityReport { inner_normal: Vec3::Y, outer_normal: tilted(20.0), ..Default::default() };
        assert!(motor.core().is_stable_with_special_cases(&gentle, Vec3::X));

        let sharp = HitStabilityReport { inner_normal: Vec3::Y, outer_normal: tilted(45.0), ..Default::default() };
        assert!(!motor.core().is_stable_with_special_cases(&sharp, Vec3::X));
    }
}
