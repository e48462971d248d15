// src/lib.rs
//! Kinematic character movement.
//!
//! [`CharacterMotor`] resolves a capsule's trajectory through a collision
//! world one fixed tick at a time: ground probing and snapping, slope, ledge
//! and step rules, iterative sweep/project movement with crease handling, and
//! momentum exchange with dynamic bodies and other characters.
//! [`PhysicsMover`] drives kinematic platforms, and
//! [`KinematicCharacterSystem`] ticks all of them in the required order.
//!
//! The world is reached only through the [`CollisionWorld`] trait;
//! [`RapierWorld`] implements it on top of rapier3d.

pub mod capsule;
pub mod collision;
pub mod config;
pub mod error;
pub mod math;
pub mod motor;
pub mod mover;
pub mod policy;
pub mod rapier_world;
pub mod report;
pub mod system;
pub mod time;

pub use capsule::CapsuleGeometry;
pub use collision::{BodyDirectory, BodyId, BodyInfo, BodyKind, ColliderId, CollisionWorld, LayerMask};
pub use config::{MotorConfig, RigidbodyInteraction, StepHandling, SystemSettings, COLLISION_OFFSET};
pub use error::{Error, Result};
pub use math::Pose;
pub use motor::{CharacterMotor, MotorCore, MotorState};
pub use mover::{MoverState, PhysicsMover};
pub use policy::{CharacterController, MoverController, PassiveController, ProjectionContext};
pub use rapier_world::RapierWorld;
pub use report::{GroundingReport, HitStabilityReport, TransientGroundingReport};
pub use system::{KinematicCharacterSystem, MotorHandle, MoverHandle};
pub use time::FixedStepClock;

/// Installs `env_logger` honouring `RUST_LOG`, defaulting to `warn`.
/// Safe to call more than once.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .is_test(cfg!(test))
        .try_init();
}
