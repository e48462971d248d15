// src/config.rs
//! Per-character motor configuration and scheduler settings.
//!
//! Both structs are plain data with `#[serde(default)]`, so a JSON file only
//! needs to name the fields it overrides.

use glam::Vec3;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::collision::LayerMask;
use crate::{Error, Result};

/// Capsule contact offset kept between the character and everything it touches.
pub const COLLISION_OFFSET: f32 = 0.01;
/// Distance added on top of `2 * radius` when clamping capsule height.
pub const CAPSULE_HEIGHT_EPSILON: f32 = 0.01;

/* -------------------------------------------------------------------------- */
/*                                   Enums                                    */
/* -------------------------------------------------------------------------- */

/// How the character climbs obstructions lower than `max_step_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepHandling {
    None,
    #[default]
    Standard,
    /// Standard plus a second probe at `min_required_step_depth` in front of the character.
    Extra,
}

/// How the character treats dynamic rigidbodies it runs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RigidbodyInteraction {
    /// Mass-ratio push using `simulated_character_mass`.
    #[default]
    None,
    /// Infinite-force push: dynamic bodies never slow the character down and
    /// are ignored by collision queries.
    Kinematic,
    /// Mass-ratio push followed by the controller's custom interaction hook.
    SimulatedDynamic,
}

/* -------------------------------------------------------------------------- */
/*                               Motor Config                                 */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    // capsule
    pub capsule_radius: f32,
    pub capsule_height: f32,
    pub capsule_y_offset: f32,

    // grounding
    /// Extra probing distance used while the character is grounded.
    pub ground_detection_extra_distance: f32,
    /// Degrees from the character's up direction that still count as walkable.
    pub max_stable_slope_angle: f32,
    pub stable_ground_layers: LayerMask,

    // steps
    pub step_handling: StepHandling,
    pub max_step_height: f32,
    pub allow_stepping_without_stable_grounding: bool,
    pub min_required_step_depth: f32,
    /// Vertical lift of the secondary rays used while validating a step.
    pub step_probe_vertical: f32,
    /// Horizontal nudge of the secondary rays used while validating a step.
    pub step_probe_horizontal: f32,

    // ledges
    pub ledge_and_denivelation_handling: bool,
    pub max_stable_distance_from_ledge: f32,
    pub max_velocity_for_ledge_snap: f32,
    pub max_stable_denivelation_angle: f32,

    // rigidbodies
    pub interactive_rigidbody_handling: bool,
    pub rigidbody_interaction: RigidbodyInteraction,
    pub simulated_character_mass: f32,
    pub preserve_attached_rigidbody_momentum: bool,

    // planar constraint
    pub has_planar_constraint: bool,
    pub planar_constraint_axis: Vec3,

    // solver
    pub max_movement_iterations: u32,
    pub max_decollision_iterations: u32,
    pub check_movement_initial_overlaps: bool,
    pub kill_velocity_when_exceed_max_movement_iterations: bool,
    pub kill_remaining_movement_when_exceed_max_movement_iterations: bool,
    pub discrete_collision_events: bool,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            capsule_radius: 0.5,
            capsule_height: 2.0,
            capsule_y_offset: 1.0,

            ground_detection_extra_distance: 0.0,
            max_stable_slope_angle: 60.0,
            stable_ground_layers: LayerMask::ALL,

            step_handling: StepHandling::Standard,
            max_step_height: 0.5,
            allow_stepping_without_stable_grounding: false,
            min_required_step_depth: 0.1,
            step_probe_vertical: 0.02,
            step_probe_horizontal: 0.001,

            ledge_and_denivelation_handling: true,
            max_stable_distance_from_ledge: 0.5,
            max_velocity_for_ledge_snap: 0.0,
            max_stable_denivelation_angle: 180.0,

            interactive_rigidbody_handling: true,
            rigidbody_interaction: RigidbodyInteraction::None,
            simulated_character_mass: 1.0,
            preserve_attached_rigidbody_momentum: true,

            has_planar_constraint: false,
            planar_constraint_axis: Vec3::Z,

            max_movement_iterations: 5,
            max_decollision_iterations: 1,
            check_movement_initial_overlaps: true,
            kill_velocity_when_exceed_max_movement_iterations: true,
            kill_remaining_movement_when_exceed_max_movement_iterations: true,
            discrete_collision_events: false,
        }
    }
}

impl MotorConfig {
    /// Parse a JSON document, reject impossible values and clamp the rest.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MotorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config.sanitized())
    }

    /// Hard errors only: values no amount of clamping can make sense of.
    pub fn validate(&self) -> Result<()> {
        if !self.capsule_radius.is_finite() || self.capsule_radius <= 0.0 {
            return Err(Error::InvalidCapsule { radius: self.capsule_radius, height: self.capsule_height });
        }
        if !self.capsule_height.is_finite() || self.capsule_height <= 0.0 {
            return Err(Error::InvalidCapsule { radius: self.capsule_radius, height: self.capsule_height });
        }
        if !(0.0..=180.0).contains(&self.max_stable_slope_angle) {
            return Err(Error::invalid_config("max_stable_slope_angle", "must be within [0, 180] degrees"));
        }
        if !(self.simulated_character_mass >= 0.0) {
            return Err(Error::invalid_config("simulated_character_mass", "must be >= 0"));
        }
        if self.has_planar_constraint && self.planar_constraint_axis.length_squared() < f32::EPSILON {
            return Err(Error::invalid_config("planar_constraint_axis", "must be non-zero when the constraint is active"));
        }
        Ok(())
    }

    /// Clamp soft ranges the same way the motor would at runtime.
    pub fn sanitized(mut self) -> Self {
        let max_radius = self.capsule_height * 0.5;
        if self.capsule_radius > max_radius {
            warn!("capsule radius {} clamped to half height {}", self.capsule_radius, max_radius);
            self.capsule_radius = max_radius;
        }
        if self.max_step_height < 0.0 {
            warn!("max_step_height {} clamped to 0", self.max_step_height);
            self.max_step_height = 0.0;
        }
        let clamped = self.min_required_step_depth.clamp(0.0, self.capsule_radius);
        if clamped != self.min_required_step_depth {
            warn!("min_required_step_depth {} clamped to {}", self.min_required_step_depth, clamped);
            self.min_required_step_depth = clamped;
        }
        let clamped = self.max_stable_distance_from_ledge.clamp(0.0, self.capsule_radius);
        if clamped != self.max_stable_distance_from_ledge {
            warn!("max_stable_distance_from_ledge {} clamped to {}", self.max_stable_distance_from_ledge, clamped);
            self.max_stable_distance_from_ledge = clamped;
        }
        if self.max_movement_iterations == 0 {
            warn!("max_movement_iterations raised to 1");
            self.max_movement_iterations = 1;
        }
        self
    }

    /// Unit planar constraint axis (Z when the authored axis is degenerate).
    pub fn planar_axis(&self) -> Vec3 {
        self.planar_constraint_axis.try_normalize().unwrap_or(Vec3::Z)
    }
}

/* -------------------------------------------------------------------------- */
/*                              System Settings                               */
/* -------------------------------------------------------------------------- */

/// Settings owned by the tick scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    /// Run the simulation from `fixed_update`. When false the host calls `simulate` itself.
    pub auto_simulation: bool,
    /// Keep pre/post tick poses around for render interpolation.
    pub interpolate: bool,
    pub motors_capacity: usize,
    pub movers_capacity: usize,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            auto_simulation: true,
            interpolate: true,
            motors_capacity: 100,
            movers_capacity: 100,
        }
    }
}

impl SystemSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = MotorConfig::default();
        assert_eq!(c.capsule_radius, 0.5);
        assert_eq!(c.capsule_height, 2.0);
        assert_eq!(c.max_stable_slope_angle, 60.0);
        assert_eq!(c.step_handling, StepHandling::Standard);
        assert_eq!(c.rigidbody_interaction, RigidbodyInteraction::None);
        assert_eq!(c.max_movement_iterations, 5);
        assert_eq!(c.max_decollision_iterations, 1);
        assert!(c.kill_velocity_when_exceed_max_movement_iterations);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c = MotorConfig::from_json(r#"{ "max_step_height": 0.3, "step_handling": "Extra" }"#).unwrap();
        assert_eq!(c.max_step_height, 0.3);
        assert_eq!(c.step_handling, StepHandling::Extra);
        assert_eq!(c.capsule_radius, 0.5);
    }

    #[test]
    fn rejects_impossible_values() {
        let mut c = MotorConfig::default();
        c.capsule_radius = -1.0;
        assert!(matches!(c.validate(), Err(Error::InvalidCapsule { .. })));

        let mut c = MotorConfig::default();
        c.has_planar_constraint = true;
        c.planar_constraint_axis = Vec3::ZERO;
        assert!(c.validate().unwrap_err().is_config());

        assert!(MotorConfig::from_json(r#"{ "max_stable_slope_angle": 200.0 }"#).is_err());
    }

    #[test]
    fn sanitize_clamps_soft_ranges() {
        let mut c = MotorConfig::default();
        c.max_step_height = -2.0;
        c.min_required_step_depth = 3.0;
        c.max_stable_distance_from_ledge = 3.0;
        c.max_movement_iterations = 0;
        let c = c.sanitized();
        assert_eq!(c.max_movement_iterations, 1);
        assert_eq!(c.max_step_height, 0.0);
        assert_eq!(c.min_required_step_depth, c.capsule_radius);
        assert_eq!(c.max_stable_distance_from_ledge, c.capsule_radius);
    }

    #[test]
    fn system_settings_from_json() {
        let s = SystemSettings::from_json(r#"{ "interpolate": false }"#).unwrap();
        assert!(s.auto_simulation);
        assert!(!s.interpolate);
        assert_eq!(s.motors_capacity, 100);
    }
}
