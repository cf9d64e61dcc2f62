//! Stateless sphere/capsule overlap, contact, raycast and sweep tests.
//!
//! Capsules are given by the two centres of their end hemispheres. Contact
//! normals always point from the first shape towards the second.

use kinetic_shared::{ColliderType, Vec3, SMALL_NUMBER};

use super::math::{
    closest_point_on_segment, ray_cylinder_intersection, ray_sphere_intersection,
    segment_segment_distance_sq, segment_segment_distance_sq_with_points,
};
use super::CAPSULE_SWEEP_SAMPLES;

/// Contact between two overlapping shapes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    /// Point on the surface of the first shape.
    pub point: Vec3,
    /// Unit normal from the first shape towards the second.
    pub normal: Vec3,
    /// Penetration depth (positive).
    pub depth: f32,
}

/// Ray hit against a single shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Distance along the normalised ray.
    pub distance: f32,
    /// Hit location.
    pub point: Vec3,
    /// Surface normal at the hit.
    pub normal: Vec3,
}

/// Sweep hit against a single static shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepHit {
    /// Fraction of the movement at first contact, in `[0, 1]`.
    pub time: f32,
    /// Contact on the static shape's surface.
    pub contact: Vec3,
    /// Normal from the static shape towards the moving sphere.
    pub normal: Vec3,
}

/// A collider placed in the world, read from entity properties.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColliderShape {
    /// Shape kind.
    pub kind: ColliderType,
    /// Centre.
    pub position: Vec3,
    /// Sphere or capsule radius.
    pub radius: f32,
    /// Capsule segment half length.
    pub half_height: f32,
}

impl ColliderShape {
    /// Top and bottom hemisphere centres of a vertical capsule.
    #[must_use]
    pub fn capsule_endpoints(&self) -> (Vec3, Vec3) {
        capsule_endpoints(self.position, self.half_height)
    }
}

/// Hemisphere centres of a vertical capsule around `center`.
#[inline]
#[must_use]
pub fn capsule_endpoints(center: Vec3, half_height: f32) -> (Vec3, Vec3) {
    let offset = Vec3::new(0.0, 0.0, half_height);
    (center + offset, center - offset)
}

// ============================================================================
// Overlap (boolean)
// ============================================================================

/// Sphere vs sphere; touching counts as overlap.
#[inline]
#[must_use]
pub fn overlap_sphere_sphere(center_a: Vec3, radius_a: f32, center_b: Vec3, radius_b: f32) -> bool {
    let sum = radius_a + radius_b;
    center_a.distance_squared(center_b) <= sum * sum
}

/// Sphere vs capsule `cap_a..cap_b`.
#[inline]
#[must_use]
pub fn overlap_sphere_capsule(
    center: Vec3,
    radius: f32,
    cap_a: Vec3,
    cap_b: Vec3,
    cap_radius: f32,
) -> bool {
    let closest = closest_point_on_segment(center, cap_a, cap_b);
    overlap_sphere_sphere(center, radius, closest, cap_radius)
}

/// Capsule vs capsule via segment distance.
#[inline]
#[must_use]
pub fn overlap_capsule_capsule(
    a1: Vec3,
    a2: Vec3,
    radius_a: f32,
    b1: Vec3,
    b2: Vec3,
    radius_b: f32,
) -> bool {
    let sum = radius_a + radius_b;
    segment_segment_distance_sq(a1, a2, b1, b2) <= sum * sum
}

// ============================================================================
// Contact tests
// ============================================================================

/// Sphere vs sphere contact.
///
/// Coincident centres resolve along +Z with depth equal to the radius sum.
#[must_use]
pub fn test_sphere_sphere(center_a: Vec3, radius_a: f32, center_b: Vec3, radius_b: f32) -> Option<Contact> {
    let delta = center_b - center_a;
    let dist_sq = delta.length_squared();
    let sum = radius_a + radius_b;
    if dist_sq > sum * sum {
        return None;
    }

    let dist = dist_sq.sqrt();
    if dist < SMALL_NUMBER {
        return Some(Contact {
            point: center_a,
            normal: Vec3::Z,
            depth: sum,
        });
    }

    let normal = delta * (1.0 / dist);
    Some(Contact {
        point: center_a + normal * radius_a,
        normal,
        depth: sum - dist,
    })
}

/// Sphere (first) vs capsule (second).
#[must_use]
pub fn test_sphere_capsule(
    center: Vec3,
    radius: f32,
    cap_a: Vec3,
    cap_b: Vec3,
    cap_radius: f32,
) -> Option<Contact> {
    let closest = closest_point_on_segment(center, cap_a, cap_b);
    test_sphere_sphere(center, radius, closest, cap_radius)
}

/// Capsule (first) vs sphere (second).
#[must_use]
pub fn test_capsule_sphere(
    cap_a: Vec3,
    cap_b: Vec3,
    cap_radius: f32,
    center: Vec3,
    radius: f32,
) -> Option<Contact> {
    let closest = closest_point_on_segment(center, cap_a, cap_b);
    test_sphere_sphere(closest, cap_radius, center, radius)
}

/// Capsule vs capsule contact at the closest pair of axis points.
#[must_use]
pub fn test_capsule_capsule(
    a1: Vec3,
    a2: Vec3,
    radius_a: f32,
    b1: Vec3,
    b2: Vec3,
    radius_b: f32,
) -> Option<Contact> {
    let (dist_sq, on_a, on_b) = segment_segment_distance_sq_with_points(a1, a2, b1, b2);
    let sum = radius_a + radius_b;
    if dist_sq > sum * sum {
        return None;
    }
    test_sphere_sphere(on_a, radius_a, on_b, radius_b)
}

// ============================================================================
// Raycasts
// ============================================================================

/// Ray vs sphere. `direction` need not be normalised.
///
/// A ray starting inside the sphere reports the exit point with an inward
/// normal.
#[must_use]
pub fn raycast_sphere(
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
    center: Vec3,
    radius: f32,
) -> Option<RayHit> {
    let dir = direction.safe_normalize();
    if dir == Vec3::ZERO {
        return None;
    }
    let t = ray_sphere_intersection(origin, dir, center, radius)?;
    if t > max_distance {
        return None;
    }

    let point = origin + dir * t;
    let mut normal = (point - center).safe_normalize();
    if origin.distance_squared(center) < radius * radius {
        normal = -normal;
    }
    Some(RayHit {
        distance: t,
        point,
        normal,
    })
}

/// Ray vs capsule: two outward hemispheres plus the cylinder side.
#[must_use]
pub fn raycast_capsule(
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
    cap_a: Vec3,
    cap_b: Vec3,
    radius: f32,
) -> Option<RayHit> {
    let dir = direction.safe_normalize();
    if dir == Vec3::ZERO {
        return None;
    }

    let mut best: Option<RayHit> = None;
    let mut consider = |hit: RayHit| {
        if best.map_or(true, |b| hit.distance < b.distance) {
            best = Some(hit);
        }
    };

    // Each hemisphere only counts on its outward half.
    for (cap, other) in [(cap_a, cap_b), (cap_b, cap_a)] {
        if let Some(hit) = raycast_sphere(origin, dir, max_distance, cap, radius) {
            let inward = (other - cap).safe_normalize();
            if (hit.point - cap).dot(inward) <= 0.0 {
                consider(hit);
            }
        }
    }

    if let Some((t, axis_t)) = ray_cylinder_intersection(origin, dir, cap_a, cap_b, radius) {
        if (0.0..=1.0).contains(&axis_t) && t <= max_distance {
            let point = origin + dir * t;
            let axis_point = cap_a + (cap_b - cap_a) * axis_t;
            consider(RayHit {
                distance: t,
                point,
                normal: (point - axis_point).safe_normalize(),
            });
        }
    }

    best
}

// ============================================================================
// Sweeps
// ============================================================================

/// Moving sphere `start..end` vs static sphere (Minkowski-expanded raycast).
#[must_use]
pub fn sweep_sphere_sphere(
    start: Vec3,
    end: Vec3,
    moving_radius: f32,
    center: Vec3,
    radius: f32,
) -> Option<SweepHit> {
    let combined = moving_radius + radius;
    let movement = end - start;
    let length = movement.length();

    if length < SMALL_NUMBER {
        if start.distance_squared(center) > combined * combined {
            return None;
        }
        let normal = non_zero_or((start - center).safe_normalize(), Vec3::Z);
        return Some(SweepHit {
            time: 0.0,
            contact: center + normal * radius,
            normal,
        });
    }

    let dir = movement * (1.0 / length);
    let t = ray_sphere_intersection(start, dir, center, combined)?;
    if t > length {
        return None;
    }

    let hit_center = start + dir * t;
    let normal = non_zero_or((hit_center - center).safe_normalize(), -dir);
    Some(SweepHit {
        time: t / length,
        contact: center + normal * radius,
        normal,
    })
}

/// Moving sphere vs static capsule.
///
/// Approximate: sweeps against `CAPSULE_SWEEP_SAMPLES + 1` spheres spaced
/// along the capsule axis and keeps the earliest hit. Thin capsules with a
/// long axis can be tunnelled between samples.
#[must_use]
pub fn sweep_sphere_capsule(
    start: Vec3,
    end: Vec3,
    moving_radius: f32,
    cap_a: Vec3,
    cap_b: Vec3,
    cap_radius: f32,
) -> Option<SweepHit> {
    let combined = moving_radius + cap_radius;
    let movement = end - start;

    if movement.length() < SMALL_NUMBER {
        let closest = closest_point_on_segment(start, cap_a, cap_b);
        if start.distance_squared(closest) > combined * combined {
            return None;
        }
        let normal = non_zero_or((start - closest).safe_normalize(), Vec3::Z);
        return Some(SweepHit {
            time: 0.0,
            contact: closest + normal * cap_radius,
            normal,
        });
    }

    let axis = cap_b - cap_a;
    #[allow(clippy::cast_precision_loss)]
    let samples = CAPSULE_SWEEP_SAMPLES as f32;
    (0..=CAPSULE_SWEEP_SAMPLES)
        .filter_map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let alpha = i as f32 / samples;
            sweep_sphere_sphere(start, end, moving_radius, cap_a + axis * alpha, cap_radius)
        })
        .fold(None, |best: Option<SweepHit>, hit| match best {
            Some(b) if b.time <= hit.time => Some(b),
            _ => Some(hit),
        })
}

fn non_zero_or(v: Vec3, fallback: Vec3) -> Vec3 {
    if v == Vec3::ZERO {
        fallback
    } else {
        v
    }
}

// ============================================================================
// Collider dispatch
// ============================================================================

/// Boolean overlap of two placed colliders. `None` never overlaps.
#[must_use]
pub fn overlap_colliders(a: &ColliderShape, b: &ColliderShape) -> bool {
    match (a.kind, b.kind) {
        (ColliderType::Sphere, ColliderType::Sphere) => {
            overlap_sphere_sphere(a.position, a.radius, b.position, b.radius)
        }
        (ColliderType::Sphere, ColliderType::Capsule) => {
            let (top, bottom) = b.capsule_endpoints();
            overlap_sphere_capsule(a.position, a.radius, top, bottom, b.radius)
        }
        (ColliderType::Capsule, ColliderType::Sphere) => {
            let (top, bottom) = a.capsule_endpoints();
            overlap_sphere_capsule(b.position, b.radius, top, bottom, a.radius)
        }
        (ColliderType::Capsule, ColliderType::Capsule) => {
            let (a1, a2) = a.capsule_endpoints();
            let (b1, b2) = b.capsule_endpoints();
            overlap_capsule_capsule(a1, a2, a.radius, b1, b2, b.radius)
        }
        _ => false,
    }
}

/// Contact between two placed colliders, normal from `a` towards `b`.
#[must_use]
pub fn test_colliders(a: &ColliderShape, b: &ColliderShape) -> Option<Contact> {
    match (a.kind, b.kind) {
        (ColliderType::Sphere, ColliderType::Sphere) => {
            test_sphere_sphere(a.position, a.radius, b.position, b.radius)
        }
        (ColliderType::Sphere, ColliderType::Capsule) => {
            let (top, bottom) = b.capsule_endpoints();
            test_sphere_capsule(a.position, a.radius, top, bottom, b.radius)
        }
        (ColliderType::Capsule, ColliderType::Sphere) => {
            let (top, bottom) = a.capsule_endpoints();
            test_capsule_sphere(top, bottom, a.radius, b.position, b.radius)
        }
        (ColliderType::Capsule, ColliderType::Capsule) => {
            let (a1, a2) = a.capsule_endpoints();
            let (b1, b2) = b.capsule_endpoints();
            test_capsule_capsule(a1, a2, a.radius, b1, b2, b.radius)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    fn sphere(x: f32, r: f32) -> ColliderShape {
        ColliderShape { kind: ColliderType::Sphere, position: Vec3::new(x, 0.0, 0.0), radius: r, half_height: 0.0 }
    }

    fn capsule(x: f32, r: f32, half: f32) -> ColliderShape {
        ColliderShape { kind: ColliderType::Capsule, position: Vec3::new(x, 0.0, 0.0), radius: r, half_height: half }
    }

    #[test]
    fn test_sphere_sphere_contact() {
        let c = test_sphere_sphere(Vec3::ZERO, 50.0, Vec3::new(80.0, 0.0, 0.0), 50.0).unwrap();
        assert!(approx(c.depth, 20.0));
        assert_eq!(c.normal, Vec3::X);
        assert_eq!(c.point, Vec3::new(50.0, 0.0, 0.0));
        assert!(test_sphere_sphere(Vec3::ZERO, 1.0, Vec3::new(3.0, 0.0, 0.0), 1.0).is_none());
    }

    #[test]
    fn test_coincident_spheres_push_up() {
        let c = test_sphere_sphere(Vec3::ZERO, 2.0, Vec3::ZERO, 3.0).unwrap();
        assert_eq!(c.normal, Vec3::Z);
        assert!(approx(c.depth, 5.0));
    }

    #[test]
    fn test_normals_point_from_first_to_second() {
        let s = sphere(0.0, 10.0);
        let c = capsule(15.0, 10.0, 40.0);
        let sc = test_colliders(&s, &c).unwrap();
        let cs = test_colliders(&c, &s).unwrap();
        assert!(sc.normal.x > 0.99);
        assert!(cs.normal.x < -0.99);
        assert!(approx(sc.depth, 5.0) && approx(cs.depth, 5.0));
    }

    #[test]
    fn test_capsule_capsule_overlap() {
        let a = capsule(0.0, 5.0, 50.0);
        let b = capsule(9.0, 5.0, 50.0);
        assert!(overlap_colliders(&a, &b));
        let c = test_colliders(&a, &b).unwrap();
        assert!(approx(c.depth, 1.0));
        assert!(!overlap_colliders(&a, &capsule(11.0, 5.0, 50.0)));
    }

    #[test]
    fn test_none_collider_never_overlaps() {
        let none = ColliderShape { kind: ColliderType::None, ..sphere(0.0, 100.0) };
        assert!(!overlap_colliders(&none, &sphere(0.0, 100.0)));
        assert!(test_colliders(&sphere(0.0, 100.0), &none).is_none());
    }

    #[test]
    fn test_raycast_sphere_and_inside() {
        let hit = raycast_sphere(Vec3::new(-10.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0), 100.0, Vec3::ZERO, 2.0).unwrap();
        assert!(approx(hit.distance, 8.0));
        assert_eq!(hit.normal, -Vec3::X);

        let inside = raycast_sphere(Vec3::ZERO, Vec3::X, 100.0, Vec3::ZERO, 2.0).unwrap();
        assert!(approx(inside.distance, 2.0));
        assert!(inside.normal.x < -0.99);

        assert!(raycast_sphere(Vec3::new(-10.0, 0.0, 0.0), Vec3::X, 5.0, Vec3::ZERO, 2.0).is_none());
        assert!(raycast_sphere(Vec3::ZERO, Vec3::ZERO, 5.0, Vec3::ZERO, 2.0).is_none());
    }

    #[test]
    fn test_raycast_capsule_side_and_cap() {
        let (top, bottom) = capsule_endpoints(Vec3::ZERO, 50.0);
        let side = raycast_capsule(Vec3::new(-100.0, 0.0, 10.0), Vec3::X, 500.0, top, bottom, 10.0).unwrap();
        assert!(approx(side.distance, 90.0));
        assert!(side.normal.x < -0.99);

        let cap = raycast_capsule(Vec3::new(0.0, 0.0, 200.0), -Vec3::Z, 500.0, top, bottom, 10.0).unwrap();
        assert!(approx(cap.distance, 140.0));
        assert!(cap.normal.z > 0.99);
    }

    #[test]
    fn test_sweep_sphere_sphere_time() {
        let hit = sweep_sphere_sphere(Vec3::new(-100.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 0.0), 5.0, Vec3::ZERO, 5.0).unwrap();
        assert!(approx(hit.time, 0.45));
        assert!(hit.normal.x < -0.99);
        assert!(approx(hit.contact.x, -5.0));

        assert!(sweep_sphere_sphere(Vec3::new(-100.0, 50.0, 0.0), Vec3::new(100.0, 50.0, 0.0), 5.0, Vec3::ZERO, 5.0).is_none());

        let stationary = sweep_sphere_sphere(Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0), 1.0, Vec3::ZERO, 5.0).unwrap();
        assert_eq!(stationary.time, 0.0);
    }

    #[test]
    fn test_sweep_sphere_capsule_sampled() {
        let (top, bottom) = capsule_endpoints(Vec3::ZERO, 80.0);
        let hit = sweep_sphere_capsule(Vec3::new(-100.0, 0.0, 20.0), Vec3::new(100.0, 0.0, 20.0), 5.0, top, bottom, 5.0).unwrap();
        assert!(approx(hit.time, 0.45));
        assert!(sweep_sphere_capsule(Vec3::new(-100.0, 50.0, 20.0), Vec3::new(100.0, 50.0, 20.0), 5.0, top, bottom, 5.0).is_none());
    }
}
