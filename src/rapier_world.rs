// src/rapier_world.rs
//!
//! Rapier 3D backed implementation of [`CollisionWorld`].
//!
//! ## Features
//! - Capsule sweep / ray queries through Rapier's `QueryPipeline`
//! - Capsule overlap and penetration from point projections along the
//!   capsule's inner segment
//! - Stable `BodyId` / `ColliderId` mapping guarded by `parking_lot::RwLock`
//! - Collision layers stored in collider user data
//! - Kinematic pose pushing with immediate collider sync for queries
//! - Scene construction helpers for tests and demos
//!
//! ## Usage
//! ```rust,ignore
//! let mut world = RapierWorld::new(glam::Vec3::new(0.0, -9.81, 0.0));
//! world.spawn_static_box(Vec3::new(0.0, -0.5, 0.0), Vec3::new(50.0, 0.5, 50.0), Quat::IDENTITY);
//! world.update_queries();
//! ```

use std::collections::HashMap;

use glam::{Quat, Vec3};
use log::{trace, warn};
use nalgebra::{Quaternion, Translation3, UnitQuaternion};
use parking_lot::RwLock;
use rapier3d::parry::query::PointQuery;
use rapier3d::parry::shape::{Capsule, Shape};
use rapier3d::prelude::*;
use smallvec::SmallVec;

use crate::capsule::CapsuleGeometry;
use crate::collision::{
    BodyId, BodyInfo, BodyKind, CapsuleCast, ColliderId, CollisionWorld, LayerMask, Penetration, RayHit,
    SweepHit,
};
use crate::math::{normalized, Pose};

/// Upper bound on distinct colliders reported by one sweep.
const MAX_SWEEP_HITS: usize = 16;
/// Ternary search steps along a capsule segment, (2/3)^40 of its length.
const SEGMENT_SEARCH_STEPS: usize = 40;
/// Below this a segment point is considered on the surface.
const SURFACE_EPSILON: f32 = 1e-6;
const DEFAULT_MAPPING_CAPACITY: usize = 256;

/* -------------------------------------------------------------------------- */
/*                               Conversions                                  */
/* -------------------------------------------------------------------------- */

#[inline]
fn to_na(v: Vec3) -> Vector<Real> {
    vector![v.x as Real, v.y as Real, v.z as Real]
}

#[inline]
fn to_point(v: Vec3) -> Point<Real> {
    point![v.x as Real, v.y as Real, v.z as Real]
}

#[inline]
fn from_na(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x as f32, v.y as f32, v.z as f32)
}

#[inline]
fn from_point(p: &Point<Real>) -> Vec3 {
    Vec3::new(p.x as f32, p.y as f32, p.z as f32)
}

fn to_isometry(position: Vec3, rotation: Quat) -> Isometry<Real> {
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
        rotation.w as Real,
        rotation.x as Real,
        rotation.y as Real,
        rotation.z as Real,
    ));
    Isometry::from_parts(Translation3::new(position.x as Real, position.y as Real, position.z as Real), rotation)
}

fn from_isometry(iso: &Isometry<Real>) -> Pose {
    let q = iso.rotation;
    Pose {
        position: from_na(&iso.translation.vector),
        rotation: Quat::from_xyzw(q.i as f32, q.j as f32, q.k as f32, q.w as f32),
    }
}

#[inline]
fn capsule_shape(capsule: &CapsuleCast) -> Capsule {
    Capsule::new(to_point(capsule.bottom), to_point(capsule.top), capsule.radius as Real)
}

#[inline]
fn collider_layers(collider: &Collider) -> LayerMask {
    LayerMask(collider.user_data as u32)
}

#[inline]
fn accepts(collider: &Collider, layers: LayerMask) -> bool {
    !collider.is_sensor() && collider_layers(collider).intersects(layers)
}

/// Deepest point of a capsule's inner segment against a collider shape.
#[derive(Debug, Clone, Copy)]
struct SegmentProximity {
    /// Point on the segment.
    point: Vec3,
    /// Closest point on the collider surface.
    surface: Vec3,
    /// Distance from `point` to the surface, negative inside the collider.
    signed_distance: f32,
}

impl SegmentProximity {
    fn at(shape: &dyn Shape, pos: &Isometry<Real>, point: Vec3) -> Self {
        let projection = shape.project_point(pos, &to_point(point), false);
        let surface = from_point(&projection.point);
        let distance = (point - surface).length();
        Self {
            point,
            surface,
            signed_distance: if projection.is_inside { -distance } else { distance },
        }
    }

    /// Minimizes the signed distance along `capsule`'s segment. The signed
    /// distance to a convex shape is convex along a line, so a ternary search
    /// finds the minimum; the endpoints are checked as well.
    fn deepest(shape: &dyn Shape, pos: &Isometry<Real>, capsule: &CapsuleCast) -> Self {
        let (a, b) = (capsule.bottom, capsule.top);
        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        for _ in 0..SEGMENT_SEARCH_STEPS {
            let m1 = lo + (hi - lo) / 3.0;
            let m2 = hi - (hi - lo) / 3.0;
            let d1 = Self::at(shape, pos, a.lerp(b, m1)).signed_distance;
            let d2 = Self::at(shape, pos, a.lerp(b, m2)).signed_distance;
            if d1 <= d2 {
                hi = m2;
            } else {
                lo = m1;
            }
        }

        [Self::at(shape, pos, a.lerp(b, (lo + hi) * 0.5)), Self::at(shape, pos, a), Self::at(shape, pos, b)]
            .into_iter()
            .min_by(|x, y| x.signed_distance.total_cmp(&y.signed_distance))
            .unwrap_or_else(|| Self::at(shape, pos, a))
    }

    /// Direction that moves the segment point away from the collider.
    fn separation_direction(&self) -> Vec3 {
        if self.signed_distance.abs() <= SURFACE_EPSILON {
            return Vec3::ZERO;
        }
        let outward = normalized(self.point - self.surface);
        if self.signed_distance < 0.0 {
            -outward
        } else {
            outward
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Id Maps                                    */
/* -------------------------------------------------------------------------- */

#[derive(Default)]
struct IdMaps {
    next_body: u32,
    next_collider: u32,
    bodies: HashMap<BodyId, RigidBodyHandle>,
    body_ids: HashMap<RigidBodyHandle, BodyId>,
    colliders: HashMap<ColliderId, ColliderHandle>,
    collider_ids: HashMap<ColliderHandle, ColliderId>,
}

impl IdMaps {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            next_body: 0,
            next_collider: 0,
            bodies: HashMap::with_capacity(capacity),
            body_ids: HashMap::with_capacity(capacity),
            colliders: HashMap::with_capacity(capacity),
            collider_ids: HashMap::with_capacity(capacity),
        }
    }

    fn register_body(&mut self, handle: RigidBodyHandle) -> BodyId {
        let id = BodyId(self.next_body);
        self.next_body += 1;
        self.bodies.insert(id, handle);
        self.body_ids.insert(handle, id);
        id
    }

    fn register_collider(&mut self, handle: ColliderHandle) -> ColliderId {
        let id = ColliderId(self.next_collider);
        self.next_collider += 1;
        self.colliders.insert(id, handle);
        self.collider_ids.insert(handle, id);
        id
    }

    fn forget_collider(&mut self, handle: ColliderHandle) {
        if let Some(id) = self.collider_ids.remove(&handle) {
            self.colliders.remove(&id);
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                               Rapier World                                 */
/* -------------------------------------------------------------------------- */

pub struct RapierWorld {
    pub gravity: Vector<Real>,
    pub integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    ids: RwLock<IdMaps>,
}

impl RapierWorld {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity: to_na(gravity),
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            ids: RwLock::new(IdMaps::with_capacity(DEFAULT_MAPPING_CAPACITY)),
        }
    }

    /// Advance dynamic bodies. Character motors are not stepped here, the
    /// scheduler moves them kinematically.
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt.max(0.0) as Real;
        let physics_hooks = ();
        let event_handler = ();

        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &physics_hooks,
            &event_handler,
        );
    }

    // =========================================================================
    // Scene construction
    // =========================================================================

    /// Insert a collider with no parent body.
    pub fn insert_static(&mut self, mut collider: Collider, layers: LayerMask) -> ColliderId {
        collider.user_data = layers.0 as u128;
        let handle = self.colliders.insert(collider);
        self.ids.write().register_collider(handle)
    }

    /// Insert a body with a single collider attached.
    pub fn insert_body(&mut self, body: RigidBody, mut collider: Collider, layers: LayerMask) -> (BodyId, ColliderId) {
        collider.user_data = layers.0 as u128;
        let body_handle = self.bodies.insert(body);
        let collider_handle = self.colliders.insert_with_parent(collider, body_handle, &mut self.bodies);
        let mut ids = self.ids.write();
        (ids.register_body(body_handle), ids.register_collider(collider_handle))
    }

    pub fn spawn_static_box(&mut self, center: Vec3, half_extents: Vec3, rotation: Quat) -> ColliderId {
        let collider = ColliderBuilder::cuboid(half_extents.x as Real, half_extents.y as Real, half_extents.z as Real)
            .position(to_isometry(center, rotation))
            .build();
        self.insert_static(collider, LayerMask::DEFAULT)
    }

    pub fn spawn_kinematic_box(&mut self, center: Vec3, half_extents: Vec3, rotation: Quat) -> (BodyId, ColliderId) {
        let body = RigidBodyBuilder::kinematic_position_based()
            .position(to_isometry(center, rotation))
            .build();
        let collider = ColliderBuilder::cuboid(half_extents.x as Real, half_extents.y as Real, half_extents.z as Real).build();
        self.insert_body(body, collider, LayerMask::DEFAULT)
    }

    pub fn spawn_dynamic_box(&mut self, center: Vec3, half_extents: Vec3, density: f32) -> (BodyId, ColliderId) {
        let body = RigidBodyBuilder::dynamic()
            .position(to_isometry(center, Quat::IDENTITY))
            .build();
        let collider = ColliderBuilder::cuboid(half_extents.x as Real, half_extents.y as Real, half_extents.z as Real)
            .density(density as Real)
            .build();
        self.insert_body(body, collider, LayerMask::DEFAULT)
    }

    /// Kinematic body carrying the character capsule, origin at the character's feet.
    pub fn spawn_character_capsule(
        &mut self,
        geometry: &CapsuleGeometry,
        position: Vec3,
        rotation: Quat,
        layers: LayerMask,
    ) -> (BodyId, ColliderId) {
        let body = RigidBodyBuilder::kinematic_position_based()
            .position(to_isometry(position, rotation))
            .build();
        let collider = ColliderBuilder::capsule_y(geometry.half_segment() as Real, geometry.radius() as Real)
            .translation(vector![0.0, geometry.y_offset() as Real, 0.0])
            .build();
        self.insert_body(body, collider, layers)
    }

    /// Remove a body and every collider attached to it.
    pub fn remove_body(&mut self, body: BodyId) {
        let Some(handle) = self.ids.write().bodies.remove(&body) else {
            warn!("remove_body: unknown body {:?}", body);
            return;
        };
        let attached: Vec<ColliderHandle> = self
            .bodies
            .get(handle)
            .map(|rb| rb.colliders().to_vec())
            .unwrap_or_default();
        self.bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        let mut ids = self.ids.write();
        ids.body_ids.remove(&handle);
        for collider in attached {
            ids.forget_collider(collider);
        }
    }

    pub fn remove_collider(&mut self, collider: ColliderId) {
        let Some(handle) = self.ids.write().colliders.remove(&collider) else { return };
        self.colliders.remove(handle, &mut self.island_manager, &mut self.bodies, true);
        self.ids.write().collider_ids.remove(&handle);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    fn body_handle(&self, body: BodyId) -> Option<RigidBodyHandle> {
        self.ids.read().bodies.get(&body).copied()
    }

    #[inline]
    fn collider_handle(&self, collider: ColliderId) -> Option<ColliderHandle> {
        self.ids.read().colliders.get(&collider).copied()
    }

    pub fn body_pose(&self, body: BodyId) -> Option<Pose> {
        let rb = self.bodies.get(self.body_handle(body)?)?;
        Some(from_isometry(rb.position()))
    }

    pub fn collider_pose(&self, collider: ColliderId) -> Option<Pose> {
        let co = self.colliders.get(self.collider_handle(collider)?)?;
        Some(from_isometry(co.position()))
    }

    pub fn set_body_linear_velocity(&mut self, body: BodyId, velocity: Vec3) {
        if let Some(rb) = self.body_handle(body).and_then(|h| self.bodies.get_mut(h)) {
            rb.set_linvel(to_na(velocity), true);
        }
    }

    pub fn set_body_angular_velocity(&mut self, body: BodyId, velocity: Vec3) {
        if let Some(rb) = self.body_handle(body).and_then(|h| self.bodies.get_mut(h)) {
            rb.set_angvel(to_na(velocity), true);
        }
    }

    pub fn sleep_body(&mut self, body: BodyId) {
        if let Some(rb) = self.body_handle(body).and_then(|h| self.bodies.get_mut(h)) {
            rb.sleep();
        }
    }

    pub fn is_body_sleeping(&self, body: BodyId) -> bool {
        self.body_handle(body).and_then(|h| self.bodies.get(h)).map_or(false, |rb| rb.is_sleeping())
    }

    pub fn set_collider_layers(&mut self, collider: ColliderId, layers: LayerMask) {
        if let Some(co) = self.collider_handle(collider).and_then(|h| self.colliders.get_mut(h)) {
            co.user_data = layers.0 as u128;
        }
    }

    /// Turns a collider into a sensor (ignored by every query) or back.
    pub fn set_collider_sensor(&mut self, collider: ColliderId, sensor: bool) {
        if let Some(co) = self.collider_handle(collider).and_then(|h| self.colliders.get_mut(h)) {
            co.set_sensor(sensor);
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }
}

impl Default for RapierWorld {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

/* -------------------------------------------------------------------------- */
/*                         CollisionWorld for Rapier                          */
/* -------------------------------------------------------------------------- */

impl CollisionWorld for RapierWorld {
    fn overlap_capsule(
        &self,
        capsule: &CapsuleCast,
        layers: LayerMask,
        filter: &dyn Fn(ColliderId) -> bool,
        out: &mut Vec<ColliderId>,
    ) {
        out.clear();
        let aabb = capsule_shape(capsule).compute_aabb(&Isometry::identity());
        let ids = self.ids.read();

        self.query_pipeline.colliders_with_aabb_intersecting_aabb(&aabb, |handle| {
            let Some(co) = self.colliders.get(*handle) else { return true };
            let Some(id) = ids.collider_ids.get(handle).copied() else { return true };
            if !accepts(co, layers) || !filter(id) {
                return true;
            }
            if SegmentProximity::deepest(co.shape(), co.position(), capsule).signed_distance < capsule.radius {
                out.push(id);
            }
            true
        });

        out.sort_unstable();
    }

    fn sweep_capsule(
        &self,
        capsule: &CapsuleCast,
        direction: Vec3,
        distance: f32,
        layers: LayerMask,
        filter: &dyn Fn(ColliderId) -> bool,
        out: &mut Vec<SweepHit>,
    ) {
        out.clear();
        let dir = normalized(direction);
        if dir == Vec3::ZERO || !(distance > 0.0) {
            return;
        }

        let shape = capsule_shape(capsule);
        let shape_pos = Isometry::identity();
        let shape_vel = to_na(dir);
        let ids = self.ids.read();

        // cast_shape only reports the first impact, so keep casting with the
        // colliders already found excluded until nothing else is hit
        let mut found: SmallVec<[ColliderHandle; MAX_SWEEP_HITS]> = SmallVec::new();
        while found.len() < MAX_SWEEP_HITS {
            let hit = {
                let predicate = |handle: ColliderHandle, collider: &Collider| {
                    !found.contains(&handle)
                        && accepts(collider, layers)
                        && ids.collider_ids.get(&handle).map_or(false, |id| filter(*id))
                };
                self.query_pipeline.cast_shape(
                    &self.bodies,
                    &self.colliders,
                    &shape_pos,
                    &shape_vel,
                    &shape,
                    distance as Real,
                    false,
                    QueryFilter::new().predicate(&predicate),
                )
            };

            let Some((handle, toi)) = hit else { break };
            found.push(handle);

            let Some(id) = ids.collider_ids.get(&handle).copied() else { continue };
            // witness1 and normal1 belong to the collider and are in world space
            let normal = normalized(from_na(&toi.normal1));
            let point = from_point(&toi.witness1);
            out.push(SweepHit { collider: id, distance: toi.toi as f32, point, normal });
        }

        out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }

    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        distance: f32,
        layers: LayerMask,
        filter: &dyn Fn(ColliderId) -> bool,
        out: &mut Vec<RayHit>,
    ) {
        out.clear();
        let dir = normalized(direction);
        if dir == Vec3::ZERO || !(distance > 0.0) {
            return;
        }

        let ray = Ray::new(to_point(origin), to_na(dir));
        let ids = self.ids.read();
        let predicate = |handle: ColliderHandle, collider: &Collider| {
            accepts(collider, layers) && ids.collider_ids.get(&handle).map_or(false, |id| filter(*id))
        };

        self.query_pipeline.intersections_with_ray(
            &self.bodies,
            &self.colliders,
            &ray,
            distance as Real,
            true,
            QueryFilter::new().predicate(&predicate),
            |handle, intersection| {
                if let Some(id) = ids.collider_ids.get(&handle) {
                    out.push(RayHit {
                        collider: *id,
                        distance: intersection.toi as f32,
                        point: from_point(&ray.point_at(intersection.toi)),
                        normal: normalized(from_na(&intersection.normal)),
                    });
                }
                true
            },
        );

        out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }

    fn compute_penetration(&self, capsule: &CapsuleCast, collider: ColliderId) -> Option<Penetration> {
        let co = self.colliders.get(self.collider_handle(collider)?)?;
        if co.is_sensor() {
            return None;
        }

        let deepest = SegmentProximity::deepest(co.shape(), co.position(), capsule);
        let distance = capsule.radius - deepest.signed_distance;
        if distance <= 0.0 {
            return None;
        }

        let mut direction = deepest.separation_direction();
        if direction == Vec3::ZERO {
            // segment right on the surface: push along the surface normal
            let nudged = deepest.point + Vec3::Y * SURFACE_EPSILON.sqrt();
            direction = SegmentProximity::at(co.shape(), co.position(), nudged).separation_direction();
        }
        if direction == Vec3::ZERO {
            trace!("no separation direction against collider {:?}", collider);
            return None;
        }
        Some(Penetration { direction, distance })
    }

    fn collider_body(&self, collider: ColliderId) -> Option<BodyId> {
        let ids = self.ids.read();
        let handle = ids.colliders.get(&collider)?;
        let parent = self.colliders.get(*handle)?.parent()?;
        ids.body_ids.get(&parent).copied()
    }

    fn body_info(&self, body: BodyId) -> Option<BodyInfo> {
        let rb = self.bodies.get(self.body_handle(body)?)?;
        let kind = if rb.is_dynamic() {
            BodyKind::Dynamic
        } else if rb.is_kinematic() {
            BodyKind::Kinematic
        } else {
            BodyKind::Static
        };
        Some(BodyInfo {
            kind,
            mass: rb.mass() as f32,
            linear_velocity: from_na(rb.linvel()),
            angular_velocity: from_na(rb.angvel()),
            center_of_mass: from_point(rb.center_of_mass()),
        })
    }

    fn apply_velocity_change_at_point(&mut self, body: BodyId, delta_velocity: Vec3, point: Vec3) {
        let Some(rb) = self.body_handle(body).and_then(|h| self.bodies.get_mut(h)) else { return };
        if !rb.is_dynamic() {
            return;
        }
        let mass = rb.mass() as f32;
        if mass > 0.0 {
            rb.apply_impulse_at_point(to_na(delta_velocity * mass), to_point(point), true);
        } else {
            let linvel = from_na(rb.linvel()) + delta_velocity;
            rb.set_linvel(to_na(linvel), true);
        }
    }

    fn wake_body(&mut self, body: BodyId) {
        if let Some(rb) = self.body_handle(body).and_then(|h| self.bodies.get_mut(h)) {
            rb.wake_up(true);
        }
    }

    fn set_body_pose(&mut self, body: BodyId, position: Vec3, rotation: Quat) {
        let Some(handle) = self.body_handle(body) else { return };
        let Some(rb) = self.bodies.get_mut(handle) else { return };
        let iso = to_isometry(position, rotation);

        if rb.is_kinematic() {
            rb.set_next_kinematic_position(iso);
        } else {
            rb.set_position(iso, true);
        }

        // queries run before the next step, so move the colliders right away
        let attached: SmallVec<[ColliderHandle; 4]> = rb.colliders().iter().copied().collect();
        for collider in attached {
            if let Some(co) = self.colliders.get_mut(collider) {
                let local = co.position_wrt_parent().copied().unwrap_or_else(Isometry::identity);
                co.set_position(iso * local);
            }
        }
    }

    fn update_queries(&mut self) {
        self.query_pipeline.update(&self.bodies, &self.colliders);
    }
}
