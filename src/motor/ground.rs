// src/motor/ground.rs
//! Ground probing and snapping.

use glam::{Quat, Vec3};

use super::{MotorCore, GROUND_PROBE_REBOUND_DISTANCE, MAX_GROUNDING_SWEEP_ITERATIONS, MINIMUM_GROUND_PROBING_DISTANCE};
use crate::collision::CollisionWorld;
use crate::config::COLLISION_OFFSET;
use crate::math::{normalized, project_on_plane};
use crate::policy::CharacterController;
use crate::report::GroundingReport;

impl MotorCore {
    /// Sweeps down from `position` looking for ground and fills `report`.
    ///
    /// Unstable hits redirect the sweep along the surface for a short rebound
    /// distance. On stable ground the returned position is snapped to rest
    /// `COLLISION_OFFSET` above it, unless a ledge rule prevents snapping.
    pub(crate) fn probe_ground_internal(
        &mut self,
        world: &dyn CollisionWorld,
        ctrl: &mut dyn CharacterController,
        position: Vec3,
        rotation: Quat,
        distance: f32,
        report: &mut GroundingReport,
    ) -> Vec3 {
        let mut probed_position = position;
        let up = rotation * Vec3::Y;

        let mut remaining = distance.max(MINIMUM_GROUND_PROBING_DISTANCE);
        let mut sweep_position = position;
        let mut sweep_direction = -up;
        let mut sweeps = 0;
        let mut over = false;

        while remaining > 0.0 && sweeps <= MAX_GROUNDING_SWEEP_ITERATIONS && !over {
            match self.ground_sweep(world, &*ctrl, sweep_position, rotation, sweep_direction, remaining) {
                Some(hit) => {
                    let target = sweep_position + sweep_direction * hit.distance;
                    let stability = self.evaluate_hit_stability_internal(
                        world,
                        ctrl,
                        hit.collider,
                        hit.normal,
                        hit.point,
                        target,
                        self.transient_rotation,
                        self.base_velocity,
                    );

                    report.found_any_ground = true;
                    report.ground_normal = hit.normal;
                    report.inner_ground_normal = stability.inner_normal;
                    report.outer_ground_normal = stability.outer_normal;
                    report.ground_collider = Some(hit.collider);
                    report.ground_point = hit.point;
                    report.snapping_prevented = false;

                    if stability.is_stable {
                        report.snapping_prevented = !self.is_stable_with_special_cases(&stability, self.base_velocity);
                        report.is_stable_on_ground = true;

                        if !report.snapping_prevented {
                            probed_position = sweep_position + sweep_direction * (hit.distance - COLLISION_OFFSET);
                        }

                        ctrl.on_ground_hit(hit.collider, hit.normal, hit.point, &stability);
                        over = true;
                    } else {
                        let movement = sweep_direction * hit.distance + up * COLLISION_OFFSET.max(hit.distance);
                        sweep_position += movement;
                        remaining = GROUND_PROBE_REBOUND_DISTANCE.min((remaining - movement.length()).max(0.0));
                        sweep_direction = normalized(project_on_plane(sweep_direction, hit.normal));
                    }
                }
                None => over = true,
            }

            sweeps += 1;
        }

        probed_position
    }
}
