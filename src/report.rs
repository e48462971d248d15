// src/report.rs
//! Plain-data reports produced while a motor ticks.
//!
//! Everything here is `Copy` and tick-scoped, except
//! [`TransientGroundingReport`] which is what survives between ticks and
//! what gets snapshotted with the motor state.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::collision::{BodyId, ColliderId};

/* -------------------------------------------------------------------------- */
/*                                 Grounding                                  */
/* -------------------------------------------------------------------------- */

/// Full grounding result of the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GroundingReport {
    pub found_any_ground: bool,
    /// Implies `found_any_ground`.
    pub is_stable_on_ground: bool,
    pub snapping_prevented: bool,
    pub ground_normal: Vec3,
    pub inner_ground_normal: Vec3,
    pub outer_ground_normal: Vec3,
    pub ground_collider: Option<ColliderId>,
    pub ground_point: Vec3,
}

impl GroundingReport {
    /// Ungrounded report whose ground normal points along `up`.
    pub fn facing(up: Vec3) -> Self {
        Self { ground_normal: up, ..Self::default() }
    }

    /// Restores the transient subset, dropping collider and point.
    pub fn copy_from(&mut self, transient: &TransientGroundingReport) {
        self.found_any_ground = transient.found_any_ground;
        self.is_stable_on_ground = transient.is_stable_on_ground;
        self.snapping_prevented = transient.snapping_prevented;
        self.ground_normal = transient.ground_normal;
        self.inner_ground_normal = transient.inner_ground_normal;
        self.outer_ground_normal = transient.outer_ground_normal;
        self.ground_collider = None;
        self.ground_point = Vec3::ZERO;
    }
}

/// The part of a [`GroundingReport`] that can outlive the tick it was made in.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransientGroundingReport {
    pub found_any_ground: bool,
    pub is_stable_on_ground: bool,
    pub snapping_prevented: bool,
    pub ground_normal: Vec3,
    pub inner_ground_normal: Vec3,
    pub outer_ground_normal: Vec3,
}

impl From<&GroundingReport> for TransientGroundingReport {
    fn from(report: &GroundingReport) -> Self {
        Self {
            found_any_ground: report.found_any_ground,
            is_stable_on_ground: report.is_stable_on_ground,
            snapping_prevented: report.snapping_prevented,
            ground_normal: report.ground_normal,
            inner_ground_normal: report.inner_ground_normal,
            outer_ground_normal: report.outer_ground_normal,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                              Hit Stability                                 */
/* -------------------------------------------------------------------------- */

/// Everything learned about a single contact.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HitStabilityReport {
    pub is_stable: bool,

    pub found_inner_normal: bool,
    pub inner_normal: Vec3,
    pub found_outer_normal: bool,
    pub outer_normal: Vec3,

    pub valid_step_detected: bool,
    pub stepped_collider: Option<ColliderId>,

    pub ledge_detected: bool,
    pub is_on_empty_side_of_ledge: bool,
    pub distance_from_ledge: f32,
    pub is_moving_towards_empty_side_of_ledge: bool,
    pub ledge_ground_normal: Vec3,
    pub ledge_right_direction: Vec3,
    pub ledge_facing_direction: Vec3,
}

/// An overlap that was resolved during decollision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapResult {
    /// Direction the character was pushed out along.
    pub normal: Vec3,
    pub collider: ColliderId,
}

/* -------------------------------------------------------------------------- */
/*                               Rigidbodies                                  */
/* -------------------------------------------------------------------------- */

/// A contact against a body, recorded during the sweep and consumed by the
/// rigidbody interaction pass of the same tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidbodyProjectionHit {
    pub body: BodyId,
    pub hit_point: Vec3,
    pub effective_normal: Vec3,
    /// Character velocity before it was projected on this hit.
    pub hit_velocity: Vec3,
    pub stable_on_hit: bool,
}

/// Velocity change owed to another character, applied by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterPush {
    pub body: BodyId,
    pub velocity_change: Vec3,
}

/* -------------------------------------------------------------------------- */
/*                                Movement                                    */
/* -------------------------------------------------------------------------- */

/// Crease/corner tracking across the sweeps of one move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovementSweepState {
    #[default]
    Initial,
    AfterFirstHit,
    FoundBlockingCrease,
    FoundBlockingCorner,
}

/// Outcome of one solver move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveResult {
    /// Velocity after every projection the move went through.
    pub velocity: Vec3,
    /// False when the iteration cap was hit.
    pub completed: bool,
}
