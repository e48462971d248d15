// src/capsule.rs
//! Character capsule geometry and its cached local offsets.

use glam::{Quat, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::collision::CapsuleCast;
use crate::config::CAPSULE_HEIGHT_EPSILON;

/// Upright capsule described relative to the character's feet (its transform origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapsuleGeometry {
    radius: f32,
    height: f32,
    y_offset: f32,
    // local offsets from the transform origin
    center: Vec3,
    bottom: Vec3,
    top: Vec3,
    bottom_hemi: Vec3,
    top_hemi: Vec3,
}

impl CapsuleGeometry {
    pub fn new(radius: f32, height: f32, y_offset: f32) -> Self {
        let mut geometry = Self {
            radius: 0.0,
            height: 0.0,
            y_offset: 0.0,
            center: Vec3::ZERO,
            bottom: Vec3::ZERO,
            top: Vec3::ZERO,
            bottom_hemi: Vec3::ZERO,
            top_hemi: Vec3::ZERO,
        };
        geometry.set_dimensions(radius, height, y_offset);
        geometry
    }

    /// Height is raised to at least `2 * radius + CAPSULE_HEIGHT_EPSILON`.
    pub fn set_dimensions(&mut self, radius: f32, height: f32, y_offset: f32) {
        let radius = radius.max(0.0);
        let min_height = radius * 2.0 + CAPSULE_HEIGHT_EPSILON;
        let clamped = height.max(min_height);
        if clamped != height {
            debug!("capsule height {height} raised to {clamped} for radius {radius}");
        }

        self.radius = radius;
        self.height = clamped;
        self.y_offset = y_offset;

        let half = clamped * 0.5;
        self.center = Vec3::new(0.0, y_offset, 0.0);
        self.bottom = self.center - Vec3::Y * half;
        self.top = self.center + Vec3::Y * half;
        self.bottom_hemi = self.bottom + Vec3::Y * radius;
        self.top_hemi = self.top - Vec3::Y * radius;
    }

    #[inline] pub fn radius(&self) -> f32 { self.radius }
    #[inline] pub fn height(&self) -> f32 { self.height }
    #[inline] pub fn y_offset(&self) -> f32 { self.y_offset }
    #[inline] pub fn center_offset(&self) -> Vec3 { self.center }
    #[inline] pub fn bottom_offset(&self) -> Vec3 { self.bottom }
    #[inline] pub fn top_offset(&self) -> Vec3 { self.top }
    #[inline] pub fn bottom_hemi_offset(&self) -> Vec3 { self.bottom_hemi }
    #[inline] pub fn top_hemi_offset(&self) -> Vec3 { self.top_hemi }

    /// Half length of the inner segment, as rapier's `capsule_y` wants it.
    #[inline]
    pub fn half_segment(&self) -> f32 {
        (self.height * 0.5 - self.radius).max(0.0)
    }

    /// World-space capsule for a character standing at `position` with `rotation`.
    pub fn cast_at(&self, position: Vec3, rotation: Quat) -> CapsuleCast {
        CapsuleCast {
            bottom: position + rotation * self.bottom_hemi,
            top: position + rotation * self.top_hemi,
            radius: self.radius,
        }
    }

    /// Same as [`cast_at`](Self::cast_at) but grown by `inflate` in every direction.
    pub fn cast_inflated(&self, position: Vec3, rotation: Quat, inflate: f32) -> CapsuleCast {
        // the radius alone grows the hemispheres along the axis too
        let mut cast = self.cast_at(position, rotation);
        cast.radius += inflate;
        cast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_is_clamped_above_diameter() {
        for &(r, h) in &[(0.5, 0.2), (1.0, 2.0), (0.3, 5.0), (2.0, 0.0)] {
            let c = CapsuleGeometry::new(r, h, 1.0);
            assert!(c.height() >= 2.0 * c.radius() + CAPSULE_HEIGHT_EPSILON - 1e-6);
        }
        let mut c = CapsuleGeometry::new(0.5, 2.0, 1.0);
        c.set_dimensions(1.5, 1.0, 1.5);
        assert!((c.height() - 3.01).abs() < 1e-5);
    }

    #[test]
    fn offsets_follow_dimensions() {
        let c = CapsuleGeometry::new(0.5, 2.0, 1.0);
        assert_eq!(c.center_offset(), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(c.bottom_offset(), Vec3::ZERO);
        assert_eq!(c.top_offset(), Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(c.bottom_hemi_offset(), Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(c.top_hemi_offset(), Vec3::new(0.0, 1.5, 0.0));
        assert!((c.half_segment() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn world_cast_is_rotated_and_inflated() {
        let c = CapsuleGeometry::new(0.5, 2.0, 1.0);
        let cast = c.cast_at(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        assert_eq!(cast.bottom, Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(cast.top, Vec3::new(1.0, 1.5, 0.0));

        let fat = c.cast_inflated(Vec3::ZERO, Quat::IDENTITY, 0.1);
        assert!((fat.radius - 0.6).abs() < 1e-6);
        assert_eq!(fat.bottom, Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(fat.top, Vec3::new(0.0, 1.5, 0.0));
    }
}
