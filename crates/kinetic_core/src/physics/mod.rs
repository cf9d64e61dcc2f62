//! # Collision Primitives
//!
//! Pure geometry used by the spatial system:
//! - `math`: closest points on segments, ray vs sphere/cylinder
//! - `collision`: overlap, contact, raycast and sweep tests plus
//!   collider-type dispatch
//!
//! Nothing in here owns state.

pub mod collision;
pub mod math;

use kinetic_shared::{EntityId, Vec3};

pub use collision::{
    capsule_endpoints, overlap_capsule_capsule, overlap_colliders, overlap_sphere_capsule,
    overlap_sphere_sphere, raycast_capsule, raycast_sphere, sweep_sphere_capsule,
    sweep_sphere_sphere, test_capsule_capsule, test_capsule_sphere, test_colliders,
    test_sphere_capsule, test_sphere_sphere, ColliderShape, Contact, RayHit, SweepHit,
};
pub use math::{
    closest_point_on_segment, closest_point_on_segment_with_t, closest_points_on_segments,
    ray_cylinder_intersection, ray_sphere_intersection, segment_segment_distance_sq,
    segment_segment_distance_sq_with_points,
};

/// Upper bound on results from a single overlap query.
pub const MAX_OVERLAP_RESULTS: usize = 64;

/// Axis subdivisions used by the sphere-vs-capsule sweep.
pub const CAPSULE_SWEEP_SAMPLES: u32 = 8;

/// Two entities whose colliders overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollisionPair {
    /// First entity (the watched one for watched detection).
    pub a: EntityId,
    /// Second entity.
    pub b: EntityId,
}

/// Resolved contact between two entities.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionResult {
    /// First entity.
    pub a: EntityId,
    /// Second entity.
    pub b: EntityId,
    /// Contact point on `a`'s surface.
    pub contact: Vec3,
    /// Unit normal from `a` towards `b`.
    pub normal: Vec3,
    /// Penetration depth.
    pub depth: f32,
}

/// Closest raycast hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastResult {
    /// Entity hit.
    pub hit_entity: EntityId,
    /// Hit location.
    pub point: Vec3,
    /// Surface normal.
    pub normal: Vec3,
    /// Distance along the ray.
    pub distance: f32,
}

impl Default for RaycastResult {
    fn default() -> Self {
        Self {
            hit_entity: EntityId::INVALID,
            point: Vec3::ZERO,
            normal: Vec3::ZERO,
            distance: f32::MAX,
        }
    }
}

/// Earliest sweep hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepResult {
    /// Entity hit.
    pub hit_entity: EntityId,
    /// Contact on the hit collider.
    pub contact: Vec3,
    /// Normal from the hit collider towards the moving sphere.
    pub normal: Vec3,
    /// Fraction of the movement at first contact (1 = no hit).
    pub hit_time: f32,
    /// Distance travelled before contact.
    pub distance: f32,
}

impl Default for SweepResult {
    fn default() -> Self {
        Self {
            hit_entity: EntityId::INVALID,
            contact: Vec3::ZERO,
            normal: Vec3::ZERO,
            hit_time: 1.0,
            distance: 0.0,
        }
    }
}
