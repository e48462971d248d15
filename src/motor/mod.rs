// src/motor/mod.rs
//! Kinematic character motor.
//!
//! A motor owns one character's transient pose, velocities and grounding,
//! and advances them in two phases per fixed tick:
//!
//! 1. [`CharacterMotor::update_phase1`] runs before platform movers are moved:
//!    pending teleports, decollision, ground probing/snapping and attached body
//!    detection (including the move carried by that body).
//! 2. [`CharacterMotor::update_phase2`] runs once movers sit at their new pose:
//!    rotation, overlap fixes caused by movers, the velocity move itself,
//!    rigidbody pushing and the planar constraint.
//!
//! The solver is split across submodules that all extend [`MotorCore`]:
//! `queries` (filtered collision queries), `stability` (walkability, ledges,
//! steps), `ground` (probing), `solver` (the sweep/project loop) and
//! `rigidbody` (momentum exchange).

mod ground;
mod queries;
mod rigidbody;
mod solver;
mod stability;

use glam::{Quat, Vec3};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::capsule::CapsuleGeometry;
use crate::collision::{BodyDirectory, BodyId, ColliderId, CollisionWorld, LayerMask, RayHit, SweepHit};
use crate::config::{MotorConfig, StepHandling, COLLISION_OFFSET};
use crate::math::{direction_tangent_to_surface, look_rotation, normalized, project_on_plane, sanitize, Pose};
use crate::policy::CharacterController;
use crate::report::{
    CharacterPush, GroundingReport, HitStabilityReport, OverlapResult, RigidbodyProjectionHit,
    TransientGroundingReport,
};
use crate::Result;

pub use rigidbody::compute_collision_resolution;
pub use solver::evaluate_crease;

/* -------------------------------------------------------------------------- */
/*                                 Constants                                  */
/* -------------------------------------------------------------------------- */

pub const MAX_HITS_BUDGET: usize = 16;
pub const MAX_COLLISION_BUDGET: usize = 16;
pub const MAX_GROUNDING_SWEEP_ITERATIONS: u32 = 2;
pub const MAX_RIGIDBODY_OVERLAPS: usize = 16;
pub const GROUND_PROBE_REBOUND_DISTANCE: f32 = 0.02;
pub const MINIMUM_GROUND_PROBING_DISTANCE: f32 = 0.005;
pub const GROUND_PROBING_BACKSTEP_DISTANCE: f32 = 0.1;
pub const SWEEP_PROBING_BACKSTEP_DISTANCE: f32 = 0.002;
pub const SECONDARY_PROBES_VERTICAL: f32 = 0.02;
pub const SECONDARY_PROBES_HORIZONTAL: f32 = 0.001;
pub const MIN_VELOCITY_MAGNITUDE: f32 = 0.01;
pub const STEPPING_FORWARD_DISTANCE: f32 = 0.03;
pub const MIN_DISTANCE_FOR_LEDGE: f32 = 0.05;
pub const CORRELATION_FOR_VERTICAL_OBSTRUCTION: f32 = 0.01;

/* -------------------------------------------------------------------------- */
/*                                  State                                     */
/* -------------------------------------------------------------------------- */

/// Everything needed to rewind a motor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub position: Vec3,
    pub rotation: Quat,
    pub base_velocity: Vec3,
    pub must_unground: bool,
    pub must_unground_time: f32,
    pub last_movement_iteration_found_any_ground: bool,
    pub attached_body: Option<BodyId>,
    pub attached_rigidbody_velocity: Vec3,
    pub grounding_status: TransientGroundingReport,
}

/* -------------------------------------------------------------------------- */
/*                                Motor Core                                  */
/* -------------------------------------------------------------------------- */

/// Motor data and solver, without the controller.
///
/// Controllers get `&mut MotorCore` in their update hooks.
pub struct MotorCore {
    config: MotorConfig,
    capsule: CapsuleGeometry,
    body: Option<BodyId>,
    collider: Option<ColliderId>,
    collidable_layers: LayerMask,

    // pose
    transient_position: Vec3,
    transient_rotation: Quat,
    character_up: Vec3,
    character_forward: Vec3,
    character_right: Vec3,
    initial_simulation_position: Vec3,
    initial_simulation_rotation: Quat,
    initial_tick_position: Vec3,
    initial_tick_rotation: Quat,

    // velocities
    base_velocity: Vec3,
    attached_rigidbody_velocity: Vec3,

    // grounding
    grounding_status: GroundingReport,
    last_grounding_status: TransientGroundingReport,
    last_movement_iteration_found_any_ground: bool,
    must_unground: bool,
    must_unground_time_counter: f32,

    // attached body
    attached_body: Option<BodyId>,
    last_attached_body: Option<BodyId>,
    attached_body_override: Option<BodyId>,
    is_moving_from_attached_body: bool,

    // switches and pending requests
    solve_movement_collisions: bool,
    solve_grounding: bool,
    move_position_target: Option<Vec3>,
    move_rotation_target: Option<Quat>,

    // tick-scoped buffers, cleared not reallocated
    overlaps: SmallVec<[OverlapResult; MAX_RIGIDBODY_OVERLAPS]>,
    rigidbody_hits: SmallVec<[RigidbodyProjectionHit; MAX_RIGIDBODY_OVERLAPS]>,
    bodies_pushed: SmallVec<[BodyId; MAX_RIGIDBODY_OVERLAPS]>,
    character_pushes: SmallVec<[CharacterPush; 4]>,
    hits: Vec<SweepHit>,
    ray_hits: Vec<RayHit>,
    probed: Vec<ColliderId>,
    pending_wakes: SmallVec<[BodyId; MAX_RIGIDBODY_OVERLAPS]>,
}

impl MotorCore {
    fn new(config: MotorConfig) -> Self {
        let capsule = CapsuleGeometry::new(config.capsule_radius, config.capsule_height, config.capsule_y_offset);
        let mut core = Self {
            config,
            capsule,
            body: None,
            collider: None,
            collidable_layers: LayerMask::ALL,

            transient_position: Vec3::ZERO,
            transient_rotation: Quat::IDENTITY,
            character_up: Vec3::Y,
            character_forward: Vec3::Z,
            character_right: Vec3::X,
            initial_simulation_position: Vec3::ZERO,
            initial_simulation_rotation: Quat::IDENTITY,
            initial_tick_position: Vec3::ZERO,
            initial_tick_rotation: Quat::IDENTITY,

            base_velocity: Vec3::ZERO,
            attached_rigidbody_velocity: Vec3::ZERO,

            grounding_status: GroundingReport::facing(Vec3::Y),
            last_grounding_status: TransientGroundingReport::default(),
            last_movement_iteration_found_any_ground: false,
            must_unground: false,
            must_unground_time_counter: 0.0,

            attached_body: None,
            last_attached_body: None,
            attached_body_override: None,
            is_moving_from_attached_body: false,

            solve_movement_collisions: true,
            solve_grounding: true,
            move_position_target: None,
            move_rotation_target: None,

            overlaps: SmallVec::new(),
            rigidbody_hits: SmallVec::new(),
            bodies_pushed: SmallVec::new(),
            character_pushes: SmallVec::new(),
            hits: Vec::with_capacity(MAX_HITS_BUDGET),
            ray_hits: Vec::with_capacity(MAX_HITS_BUDGET),
            probed: Vec::with_capacity(MAX_COLLISION_BUDGET),
            pending_wakes: SmallVec::new(),
        };
        core.set_transient_rotation(Quat::IDENTITY);
        core
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    #[inline]
    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    /// Replace the whole config; the capsule is rebuilt from it.
    pub fn set_config(&mut self, config: MotorConfig) -> Result<()> {
        config.validate()?;
        let config = config.sanitized();
        self.capsule.set_dimensions(config.capsule_radius, config.capsule_height, config.capsule_y_offset);
        self.config = config;
        Ok(())
    }

    #[inline]
    pub fn capsule(&self) -> &CapsuleGeometry {
        &self.capsule
    }

    /// Resize the capsule, height is clamped to fit both hemispheres.
    pub fn set_capsule_dimensions(&mut self, radius: f32, height: f32, y_offset: f32) {
        self.capsule.set_dimensions(radius, height, y_offset);
        self.config.capsule_radius = self.capsule.radius();
        self.config.capsule_height = self.capsule.height();
        self.config.capsule_y_offset = self.capsule.y_offset();
    }

    #[inline]
    pub fn collidable_layers(&self) -> LayerMask {
        self.collidable_layers
    }

    pub fn set_collidable_layers(&mut self, layers: LayerMask) {
        self.collidable_layers = layers;
    }

    pub fn set_movement_collisions_solving(&mut self, active: bool) {
        self.solve_movement_collisions = active;
    }

    pub fn set_ground_solving(&mut self, active: bool) {
        self.solve_grounding = active;
    }

    /// Forces the attached body regardless of grounding. `None` restores detection.
    pub fn set_attached_body_override(&mut self, body: Option<BodyId>) {
        self.attached_body_override = body;
    }

    #[inline]
    pub fn body(&self) -> Option<BodyId> {
        self.body
    }

    #[inline]
    pub fn collider(&self) -> Option<ColliderId> {
        self.collider
    }

    // =========================================================================
    // Pose
    // =========================================================================

    #[inline]
    pub fn transient_position(&self) -> Vec3 {
        self.transient_position
    }

    #[inline]
    pub fn transient_rotation(&self) -> Quat {
        self.transient_rotation
    }

    #[inline]
    pub fn transient_pose(&self) -> Pose {
        Pose::new(self.transient_position, self.transient_rotation)
    }

    /// Overwrites the goal position mid-tick without any collision handling.
    pub fn set_transient_position(&mut self, position: Vec3) {
        self.transient_position = position;
    }

    fn set_transient_rotation(&mut self, rotation: Quat) {
        let rotation = rotation.normalize();
        self.transient_rotation = rotation;
        self.character_up = rotation * Vec3::Y;
        self.character_forward = rotation * Vec3::Z;
        self.character_right = rotation * Vec3::X;
    }

    #[inline] pub fn character_up(&self) -> Vec3 { self.character_up }
    #[inline] pub fn character_forward(&self) -> Vec3 { self.character_forward }
    #[inline] pub fn character_right(&self) -> Vec3 { self.character_right }

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

    /// Teleport. With `bypass_interpolation` the rendered pose snaps too.
    pub fn set_position(&mut self, position: Vec3, bypass_interpolation: bool) {
        self.initial_simulation_position = position;
        self.transient_position = position;
        if bypass_interpolation {
            self.initial_tick_position = position;
        }
    }

    pub fn set_rotation(&mut self, rotation: Quat, bypass_interpolation: bool) {
        self.set_transient_rotation(rotation);
        self.initial_simulation_rotation = self.transient_rotation;
        if bypass_interpolation {
            self.initial_tick_rotation = self.transient_rotation;
        }
    }

    pub fn set_position_and_rotation(&mut self, position: Vec3, rotation: Quat, bypass_interpolation: bool) {
        self.set_position(position, bypass_interpolation);
        self.set_rotation(rotation, bypass_interpolation);
    }

    /// Collision-aware move to `target`, performed during the next phase 1.
    pub fn move_character(&mut self, target: Vec3) {
        self.move_position_target = Some(target);
    }

    /// Rotation override applied during the next phase 2.
    pub fn rotate_character(&mut self, target: Quat) {
        self.move_rotation_target = Some(target);
    }

    // =========================================================================
    // Velocity & grounding
    // =========================================================================

    #[inline]
    pub fn base_velocity(&self) -> Vec3 {
        self.base_velocity
    }

    pub fn set_base_velocity(&mut self, velocity: Vec3) {
        self.base_velocity = velocity;
    }

    #[inline]
    pub fn attached_rigidbody_velocity(&self) -> Vec3 {
        self.attached_rigidbody_velocity
    }

    /// Base velocity plus whatever the attached body contributes.
    #[inline]
    pub fn velocity(&self) -> Vec3 {
        self.base_velocity + self.attached_rigidbody_velocity
    }

    #[inline]
    pub fn grounding_status(&self) -> &GroundingReport {
        &self.grounding_status
    }

    #[inline]
    pub fn last_grounding_status(&self) -> &TransientGroundingReport {
        &self.last_grounding_status
    }

    #[inline]
    pub fn attached_body(&self) -> Option<BodyId> {
        self.attached_body
    }

    #[inline]
    pub fn overlaps(&self) -> &[OverlapResult] {
        &self.overlaps
    }

    /// Leave the ground for at least `time` seconds.
    pub fn force_unground(&mut self, time: f32) {
        self.must_unground = true;
        self.must_unground_time_counter = time;
    }

    #[inline]
    pub fn must_unground(&self) -> bool {
        self.must_unground || self.must_unground_time_counter > 0.0
    }

    /// Velocity that covers `from -> to` in `dt`, zero for a non-positive `dt`.
    pub fn get_velocity_for_move_position(&self, from: Vec3, to: Vec3, dt: f32) -> Vec3 {
        if dt <= 0.0 {
            return Vec3::ZERO;
        }
        (to - from) / dt
    }

    /// Pushes owed to other characters since the last call.
    pub fn take_character_pushes(&mut self) -> SmallVec<[CharacterPush; 4]> {
        std::mem::take(&mut self.character_pushes)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn state(&self) -> MotorState {
        MotorState {
            position: self.transient_position,
            rotation: self.transient_rotation,
            base_velocity: self.base_velocity,
            must_unground: self.must_unground,
            must_unground_time: self.must_unground_time_counter,
            last_movement_iteration_found_any_ground: self.last_movement_iteration_found_any_ground,
            attached_body: self.attached_body,
            attached_rigidbody_velocity: self.attached_rigidbody_velocity,
            grounding_status: TransientGroundingReport::from(&self.grounding_status),
        }
    }

    pub fn apply_state(&mut self, state: &MotorState, bypass_interpolation: bool) {
        self.set_position_and_rotation(state.position, state.rotation, bypass_interpolation);
        self.base_velocity = state.base_velocity;
        self.attached_rigidbody_velocity = state.attached_rigidbody_velocity;
        self.must_unground = state.must_unground;
        self.must_unground_time_counter = state.must_unground_time;
        self.last_movement_iteration_found_any_ground = state.last_movement_iteration_found_any_ground;
        self.grounding_status.copy_from(&state.grounding_status);
        self.attached_body = state.attached_body;
    }

    // =========================================================================
    // Phase 1
    // =========================================================================

    fn update_phase1(
        &mut self,
        world: &mut dyn CollisionWorld,
        bodies: &BodyDirectory,
        ctrl: &mut dyn CharacterController,
        dt: f32,
    ) {
        self.base_velocity = sanitize(self.base_velocity);
        self.attached_rigidbody_velocity = sanitize(self.attached_rigidbody_velocity);

        self.bodies_pushed.clear();

        ctrl.before_update(self, dt);

        self.initial_simulation_position = self.transient_position;
        self.initial_simulation_rotation = self.transient_rotation;
        self.rigidbody_hits.clear();
        self.overlaps.clear();

        if let Some(target) = self.move_position_target.take() {
            if self.solve_movement_collisions {
                let velocity = self.get_velocity_for_move_position(self.transient_position, target, dt);
                let result = self.internal_character_move(&*world, ctrl, velocity, dt);
                if result.completed && self.config.interactive_rigidbody_handling {
                    self.process_velocity_for_rigidbody_hits(world, bodies, ctrl, result.velocity, dt);
                }
            } else {
                self.transient_position = target;
            }
        }

        self.last_grounding_status = TransientGroundingReport::from(&self.grounding_status);
        self.grounding_status = GroundingReport::facing(self.character_up);

        if self.solve_movement_collisions {
            self.resolve_overlaps(&*world, bodies, ctrl, false);
        }

        if self.solve_grounding {
            if self.must_unground() {
                self.transient_position += self.character_up * (MINIMUM_GROUND_PROBING_DISTANCE * 1.5);
            } else {
                let distance = self.selected_ground_probing_distance();
                let mut report = self.grounding_status;
                self.transient_position =
                    self.probe_ground_internal(&*world, ctrl, self.transient_position, self.transient_rotation, distance, &mut report);
                self.grounding_status = report;

                if !self.last_grounding_status.is_stable_on_ground && report.is_stable_on_ground {
                    let flat = project_on_plane(self.base_velocity, self.character_up);
                    self.base_velocity =
                        direction_tangent_to_surface(flat, report.ground_normal, self.character_up) * flat.length();
                    debug!("landed on {:?}", report.ground_collider);
                }
            }
        }

        self.last_movement_iteration_found_any_ground = false;
        if self.must_unground_time_counter > 0.0 {
            self.must_unground_time_counter -= dt;
        }
        self.must_unground = false;

        if self.solve_grounding {
            ctrl.post_grounding_update(self, dt);
        }

        if self.config.interactive_rigidbody_handling {
            self.update_attached_body(&*world, bodies, ctrl, dt);
        }
        self.flush_wakes(world);
    }

    /// Probe distance for this tick: long while we were grounded last tick,
    /// the bare minimum otherwise.
    fn selected_ground_probing_distance(&self) -> f32 {
        let last = &self.last_grounding_status;
        if last.snapping_prevented
            || !(last.is_stable_on_ground || self.last_movement_iteration_found_any_ground)
        {
            return MINIMUM_GROUND_PROBING_DISTANCE;
        }
        let distance = if self.config.step_handling != StepHandling::None {
            self.capsule.radius().max(self.config.max_step_height)
        } else {
            self.capsule.radius()
        };
        distance + self.config.ground_detection_extra_distance
    }

    /// Bounded decollision pass. The phase 1 pass leaves interactive bodies
    /// alone, the phase 2 pass also pushes out of them and records them for
    /// momentum exchange.
    fn resolve_overlaps(
        &mut self,
        world: &dyn CollisionWorld,
        bodies: &BodyDirectory,
        ctrl: &mut dyn CharacterController,
        record_rigidbody_hits: bool,
    ) {
        let mut iterations = 0;
        let mut solved = false;

        while iterations < self.config.max_decollision_iterations && !solved {
            let count = self.collisions_overlap(world, &*ctrl, self.transient_position, self.transient_rotation, 0.0, false);

            if count > 0 {
                let probed: SmallVec<[ColliderId; MAX_COLLISION_BUDGET]> = self.probed.iter().copied().collect();
                for collider in probed {
                    let interactive = rigidbody::interactive_body(world, bodies, collider);
                    if !record_rigidbody_hits && interactive.is_some() {
                        continue;
                    }

                    let cast = self.capsule.cast_at(self.transient_position, self.transient_rotation);
                    let Some(penetration) = world.compute_penetration(&cast, collider) else { continue };

                    let stable = self.is_stable_on_normal(penetration.direction);
                    let direction = self.obstruction_normal(penetration.direction, stable);
                    self.transient_position += direction * (penetration.distance + COLLISION_OFFSET);
                    trace!("decollided from {:?} by {:.4}", collider, penetration.distance);

                    if record_rigidbody_hits {
                        if let Some(body) = interactive {
                            let stable = self.is_stable_on_normal(direction);
                            if stable {
                                self.last_movement_iteration_found_any_ground = true;
                            }
                            if Some(body) != self.attached_body {
                                self.store_rigidbody_hit(body, self.velocity(), self.transient_position, direction, stable);
                            }
                        }
                    }

                    if self.overlaps.len() < MAX_RIGIDBODY_OVERLAPS {
                        self.overlaps.push(OverlapResult { normal: direction, collider });
                    }
                    break;
                }
            } else {
                solved = true;
            }

            iterations += 1;
        }
    }

    /// Attached body detection, momentum bookkeeping and the move carried by
    /// the body. At most one attach/detach transition happens per tick.
    fn update_attached_body(
        &mut self,
        world: &dyn CollisionWorld,
        bodies: &BodyDirectory,
        ctrl: &mut dyn CharacterController,
        dt: f32,
    ) {
        self.last_attached_body = self.attached_body;

        let ground_body = self.grounding_status.ground_collider.and_then(|c| world.collider_body(c));
        let mut attached = if let Some(forced) = self.attached_body_override {
            Some(forced)
        } else if self.grounding_status.is_stable_on_ground {
            self.grounding_status
                .ground_collider
                .and_then(|c| rigidbody::interactive_body(world, bodies, c))
        } else {
            None
        };
        if attached.is_some_and(|b| world.body_info(b).is_none()) {
            attached = None;
        }
        self.attached_body = attached;

        if attached != self.last_attached_body {
            debug!("attached body {:?} -> {:?}", self.last_attached_body, attached);
        }

        let (linear, angular) = match attached {
            Some(body) => rigidbody::velocity_from_rigidbody_movement(world, bodies, body, self.transient_position, dt),
            None => (Vec3::ZERO, Vec3::ZERO),
        };

        if self.config.preserve_attached_rigidbody_momentum
            && self.last_attached_body.is_some()
            && attached != self.last_attached_body
        {
            self.base_velocity += self.attached_rigidbody_velocity;
            self.base_velocity -= linear;
        }

        self.attached_rigidbody_velocity = Vec3::ZERO;
        if attached.is_some() {
            self.attached_rigidbody_velocity = linear;

            let carried = Quat::from_scaled_axis(angular * dt) * self.character_forward;
            let new_forward = normalized(project_on_plane(carried, self.character_up));
            if new_forward != Vec3::ZERO {
                self.set_transient_rotation(look_rotation(new_forward, self.character_up));
            }
        }

        // landing on a moving body: its horizontal motion replaces ours
        if attached.is_some() && ground_body == attached && self.last_attached_body.is_none() {
            self.base_velocity -= project_on_plane(self.attached_rigidbody_velocity, self.character_up);
        }

        if self.attached_rigidbody_velocity.length_squared() > 0.0 {
            self.is_moving_from_attached_body = true;
            if self.solve_movement_collisions {
                let result = self.internal_character_move(world, ctrl, self.attached_rigidbody_velocity, dt);
                self.attached_rigidbody_velocity = result.velocity;
            } else {
                self.transient_position += self.attached_rigidbody_velocity * dt;
            }
            self.is_moving_from_attached_body = false;
        }
    }

    // =========================================================================
    // Phase 2
    // =========================================================================

    fn update_phase2(
        &mut self,
        world: &mut dyn CollisionWorld,
        bodies: &BodyDirectory,
        ctrl: &mut dyn CharacterController,
        dt: f32,
    ) {
        let mut rotation = self.transient_rotation;
        ctrl.update_rotation(self, &mut rotation, dt);
        self.set_transient_rotation(rotation);

        if let Some(target) = self.move_rotation_target.take() {
            self.set_transient_rotation(target);
        }

        if self.solve_movement_collisions && self.config.interactive_rigidbody_handling {
            if let Some(attached) = self.attached_body {
                self.fix_attached_body_separation(&*world, ctrl, attached);
            }
            self.resolve_overlaps(&*world, bodies, ctrl, true);
        }

        let mut velocity = self.base_velocity;
        ctrl.update_velocity(self, &mut velocity, dt);
        self.base_velocity = velocity;

        if self.base_velocity.length() < MIN_VELOCITY_MAGNITUDE {
            self.base_velocity = Vec3::ZERO;
        }

        if self.base_velocity.length_squared() > 0.0 {
            if self.solve_movement_collisions {
                let result = self.internal_character_move(&*world, ctrl, self.base_velocity, dt);
                self.base_velocity = result.velocity;
            } else {
                self.transient_position += self.base_velocity * dt;
            }
        }

        if self.config.interactive_rigidbody_handling {
            self.base_velocity = self.process_velocity_for_rigidbody_hits(world, bodies, ctrl, self.base_velocity, dt);
        }

        if self.config.has_planar_constraint {
            let offset = self.transient_position - self.initial_simulation_position;
            self.transient_position = self.initial_simulation_position + project_on_plane(offset, self.config.planar_axis());
        }

        if self.config.discrete_collision_events {
            let count = self.collisions_overlap(
                &*world,
                &*ctrl,
                self.transient_position,
                self.transient_rotation,
                COLLISION_OFFSET * 2.0,
                false,
            );
            for i in 0..count {
                ctrl.on_discrete_collision_detected(self.probed[i]);
            }
        }

        ctrl.after_update(self, dt);
        self.flush_wakes(world);
    }

    /// Platforms that moved up into the character leave a small overlap; sweep
    /// down from a radius above and lift the character back on top.
    fn fix_attached_body_separation(&mut self, world: &dyn CollisionWorld, ctrl: &dyn CharacterController, attached: BodyId) {
        let upwards_offset = self.capsule.radius();
        let up = self.character_up;
        let Some(hit) = self.ground_sweep(
            world,
            ctrl,
            self.transient_position + up * upwards_offset,
            self.transient_rotation,
            -up,
            upwards_offset,
        ) else {
            return;
        };

        if world.collider_body(hit.collider) == Some(attached) && self.is_stable_on_normal(hit.normal) {
            let moved_up = upwards_offset - hit.distance;
            self.transient_position += up * moved_up + up * COLLISION_OFFSET;
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                             Character Motor                                */
/* -------------------------------------------------------------------------- */

/// A motor bound to its controller.
pub struct CharacterMotor {
    core: MotorCore,
    controller: Box<dyn CharacterController>,
}

impl CharacterMotor {
    /// Validates and clamps `config`, then builds the capsule from it.
    pub fn new(config: MotorConfig, controller: Box<dyn CharacterController>) -> Result<Self> {
        config.validate()?;
        Ok(Self { core: MotorCore::new(config.sanitized()), controller })
    }

    /// Bind the motor to its kinematic body and its own collider, which every
    /// query then ignores.
    pub fn with_body(mut self, body: BodyId, collider: ColliderId) -> Self {
        self.core.body = Some(body);
        self.core.collider = Some(collider);
        self
    }

    /// Initial pose, interpolation included.
    pub fn with_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.core.set_position_and_rotation(position, rotation, true);
        self
    }

    #[inline]
    pub fn core(&self) -> &MotorCore {
        &self.core
    }

    #[inline]
    pub fn core_mut(&mut self) -> &mut MotorCore {
        &mut self.core
    }

    #[inline]
    pub fn controller(&self) -> &dyn CharacterController {
        self.controller.as_ref()
    }

    #[inline]
    pub fn controller_mut(&mut self) -> &mut dyn CharacterController {
        self.controller.as_mut()
    }

    /// First half of a tick, before movers are moved.
    pub fn update_phase1(&mut self, world: &mut dyn CollisionWorld, bodies: &BodyDirectory, dt: f32) {
        self.core.update_phase1(world, bodies, self.controller.as_mut(), dt);
    }

    /// Second half of a tick, after movers are moved.
    pub fn update_phase2(&mut self, world: &mut dyn CollisionWorld, bodies: &BodyDirectory, dt: f32) {
        self.core.update_phase2(world, bodies, self.controller.as_mut(), dt);
    }

    /// Ground probe from `position`; returns the (possibly snapped) position.
    pub fn probe_ground(
        &mut self,
        world: &dyn CollisionWorld,
        position: Vec3,
        rotation: Quat,
        distance: f32,
        report: &mut GroundingReport,
    ) -> Vec3 {
        self.core.probe_ground_internal(world, self.controller.as_mut(), position, rotation, distance, report)
    }

    /// Stability of a contact as the solver would judge it.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_hit_stability(
        &mut self,
        world: &dyn CollisionWorld,
        collider: ColliderId,
        hit_normal: Vec3,
        hit_point: Vec3,
        at_position: Vec3,
        at_rotation: Quat,
        velocity: Vec3,
    ) -> HitStabilityReport {
        self.core.evaluate_hit_stability_internal(
            world,
            self.controller.as_mut(),
            collider,
            hit_normal,
            hit_point,
            at_position,
            at_rotation,
            velocity,
        )
    }
}

/* -------------------------------------------------------------------------- */
/*                            Shared Test Scenes                              */
/* -------------------------------------------------------------------------- */
