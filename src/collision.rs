// src/collision.rs
//! Contract between the motor and whatever spatial world answers its queries.
//!
//! The motor only ever talks to a [`CollisionWorld`]. Colliders and bodies are
//! referred to by plain ids so a stale id simply resolves to "nothing" on the
//! next lookup.

use std::collections::HashMap;
use std::ops::{BitAnd, BitOr};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Collider id issued by the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColliderId(pub u32);

/// Rigid body id issued by the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

/* -------------------------------------------------------------------------- */
/*                                Layer Masks                                 */
/* -------------------------------------------------------------------------- */

/// 32 collision layers as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const ALL: LayerMask = LayerMask(u32::MAX);
    pub const NONE: LayerMask = LayerMask(0);
    pub const DEFAULT: LayerMask = LayerMask(1);

    /// Mask containing only `layer` (0..32).
    #[inline]
    pub const fn layer(layer: u32) -> Self {
        LayerMask(1 << (layer & 31))
    }

    #[inline]
    pub const fn intersects(self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn without(self, other: LayerMask) -> Self {
        LayerMask(self.0 & !other.0)
    }
}

impl Default for LayerMask {
    fn default() -> Self {
        LayerMask::ALL
    }
}

impl BitAnd for LayerMask {
    type Output = LayerMask;
    fn bitand(self, rhs: Self) -> Self {
        LayerMask(self.0 & rhs.0)
    }
}

impl BitOr for LayerMask {
    type Output = LayerMask;
    fn bitor(self, rhs: Self) -> Self {
        LayerMask(self.0 | rhs.0)
    }
}

/* -------------------------------------------------------------------------- */
/*                               Query Results                                */
/* -------------------------------------------------------------------------- */

/// World-space capsule given by its two hemisphere centers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapsuleCast {
    pub bottom: Vec3,
    pub top: Vec3,
    pub radius: f32,
}

impl CapsuleCast {
    #[inline]
    pub fn translated(&self, offset: Vec3) -> Self {
        Self { bottom: self.bottom + offset, top: self.top + offset, radius: self.radius }
    }
}

/// A capsule sweep contact. `distance` is measured along the unit sweep direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    pub collider: ColliderId,
    pub distance: f32,
    pub point: Vec3,
    /// Surface normal facing the swept capsule.
    pub normal: Vec3,
}

/// A ray contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub collider: ColliderId,
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Minimum translation that separates an overlapping capsule: move by `direction * distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penetration {
    pub direction: Vec3,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyKind {
    Static,
    Kinematic,
    Dynamic,
}

/// Snapshot of a rigid body as the motor needs to see it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyInfo {
    pub kind: BodyKind,
    pub mass: f32,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// World-space center of mass, used as the center of rotation.
    pub center_of_mass: Vec3,
}

impl BodyInfo {
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.kind == BodyKind::Dynamic
    }
}

/* -------------------------------------------------------------------------- */
/*                              Collision World                               */
/* -------------------------------------------------------------------------- */

/// Spatial queries and body access consumed by the motor.
///
/// Every query clears `out` before filling it, skips sensor colliders, only
/// reports colliders whose layer intersects `layers`, and only reports
/// colliders for which `filter` returns true. Sweeps and ray casts report at
/// most one hit per collider, sorted by ascending distance.
pub trait CollisionWorld {
    fn overlap_capsule(
        &self,
        capsule: &CapsuleCast,
        layers: LayerMask,
        filter: &dyn Fn(ColliderId) -> bool,
        out: &mut Vec<ColliderId>,
    );

    fn sweep_capsule(
        &self,
        capsule: &CapsuleCast,
        direction: Vec3,
        distance: f32,
        layers: LayerMask,
        filter: &dyn Fn(ColliderId) -> bool,
        out: &mut Vec<SweepHit>,
    );

    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        distance: f32,
        layers: LayerMask,
        filter: &dyn Fn(ColliderId) -> bool,
        out: &mut Vec<RayHit>,
    );

    /// Separation of `capsule` from `collider`, `None` when they don't overlap.
    fn compute_penetration(&self, capsule: &CapsuleCast, collider: ColliderId) -> Option<Penetration>;

    /// Body the collider is attached to, if any.
    fn collider_body(&self, collider: ColliderId) -> Option<BodyId>;

    /// `None` once the body no longer exists.
    fn body_info(&self, body: BodyId) -> Option<BodyInfo>;

    /// Instantaneous velocity change applied at a world point (linear and angular).
    fn apply_velocity_change_at_point(&mut self, body: BodyId, delta_velocity: Vec3, point: Vec3);

    fn wake_body(&mut self, body: BodyId);

    /// Teleport a (kinematic) body and its colliders.
    fn set_body_pose(&mut self, body: BodyId, position: Vec3, rotation: Quat);

    /// Refresh acceleration structures after pose changes.
    fn update_queries(&mut self);
}

/* -------------------------------------------------------------------------- */
/*                              Body Directory                                */
/* -------------------------------------------------------------------------- */

/// Velocity a platform mover derived for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoverVelocity {
    pub linear: Vec3,
    pub angular: Vec3,
    /// Pivot of `angular`, the mover's position at the start of the tick.
    pub center: Vec3,
}

/// What other motors need to know about a character's backing body.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CharacterBody {
    pub mass: f32,
    pub base_velocity: Vec3,
}

/// Tick-scoped lookup of which bodies are driven by movers or by characters.
#[derive(Debug, Clone, Default)]
pub struct BodyDirectory {
    movers: HashMap<BodyId, MoverVelocity>,
    characters: HashMap<BodyId, CharacterBody>,
}

impl BodyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(movers: usize, characters: usize) -> Self {
        Self {
            movers: HashMap::with_capacity(movers),
            characters: HashMap::with_capacity(characters),
        }
    }

    pub fn clear(&mut self) {
        self.movers.clear();
        self.characters.clear();
    }

    pub fn set_mover(&mut self, body: BodyId, velocity: MoverVelocity) {
        self.movers.insert(body, velocity);
    }

    pub fn set_character(&mut self, body: BodyId, character: CharacterBody) {
        self.characters.insert(body, character);
    }

    #[inline]
    pub fn mover(&self, body: BodyId) -> Option<&MoverVelocity> {
        self.movers.get(&body)
    }

    #[inline]
    pub fn character(&self, body: BodyId) -> Option<&CharacterBody> {
        self.characters.get(&body)
    }

    #[inline]
    pub fn is_mover(&self, body: BodyId) -> bool {
        self.movers.contains_key(&body)
    }

    #[inline]
    pub fn is_character(&self, body: BodyId) -> bool {
        self.characters.contains_key(&body)
    }
}
