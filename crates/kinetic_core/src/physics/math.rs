//! Segment and ray math used by the collision tests.

use kinetic_shared::{Vec3, SMALL_NUMBER};

/// Closest point on segment `a..b` to `point`, with its parameter in `[0, 1]`.
#[must_use]
pub fn closest_point_on_segment_with_t(point: Vec3, a: Vec3, b: Vec3) -> (Vec3, f32) {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < SMALL_NUMBER {
        return (a, 0.0);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (a + ab * t, t)
}

/// Closest point on segment `a..b` to `point`.
#[inline]
#[must_use]
pub fn closest_point_on_segment(point: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    closest_point_on_segment_with_t(point, a, b).0
}

/// Parameters `(s, t)` of the closest points between segments `a1..a2`
/// and `b1..b2`.
///
/// Degenerate segments collapse to their first endpoint. Parallel segments
/// pick whichever endpoint of `a` lies closer to `b`.
#[must_use]
pub fn closest_points_on_segments(a1: Vec3, a2: Vec3, b1: Vec3, b2: Vec3) -> (f32, f32) {
    let d1 = a2 - a1;
    let d2 = b2 - b1;
    let r = a1 - b1;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a < SMALL_NUMBER && e < SMALL_NUMBER {
        return (0.0, 0.0);
    }
    if a < SMALL_NUMBER {
        return (0.0, (f / e).clamp(0.0, 1.0));
    }

    let c = d1.dot(r);
    if e < SMALL_NUMBER {
        return ((-c / a).clamp(0.0, 1.0), 0.0);
    }

    let b = d1.dot(d2);
    let denom = a * e - b * b;

    if denom.abs() < SMALL_NUMBER {
        let t_start = (f / e).clamp(0.0, 1.0);
        let on_b = b1 + d2 * t_start;
        if a2.distance_squared(on_b) < a1.distance_squared(on_b) {
            return (1.0, (d2.dot(a2 - b1) / e).clamp(0.0, 1.0));
        }
        return (0.0, t_start);
    }

    let mut s = (b * f - c * e) / denom;
    let mut t = (b * s + f) / e;

    if s < 0.0 {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else if s > 1.0 {
        s = 1.0;
        t = ((b + f) / e).clamp(0.0, 1.0);
    }

    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }

    (s, t)
}

/// Squared distance between two segments plus the closest point on each.
#[must_use]
pub fn segment_segment_distance_sq_with_points(
    a1: Vec3,
    a2: Vec3,
    b1: Vec3,
    b2: Vec3,
) -> (f32, Vec3, Vec3) {
    let (s, t) = closest_points_on_segments(a1, a2, b1, b2);
    let on_a = a1 + (a2 - a1) * s;
    let on_b = b1 + (b2 - b1) * t;
    (on_a.distance_squared(on_b), on_a, on_b)
}

/// Squared distance between two segments.
#[inline]
#[must_use]
pub fn segment_segment_distance_sq(a1: Vec3, a2: Vec3, b1: Vec3, b2: Vec3) -> f32 {
    segment_segment_distance_sq_with_points(a1, a2, b1, b2).0
}

/// Distance along a unit-length ray to a sphere.
///
/// # Returns
///
/// The nearest non-negative hit distance; the far root when the origin is
/// inside the sphere; `None` on a miss.
#[must_use]
pub fn ray_sphere_intersection(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let root = discriminant.sqrt();
    let mut t = -b - root;
    if t < 0.0 {
        t = -b + root;
    }
    (t >= 0.0).then_some(t)
}

/// Ray against the finite cylinder around axis `a..b`.
///
/// # Returns
///
/// `(t, axis_t)`: hit distance along the unit ray and the hit's parameter
/// along the axis. `axis_t` may fall outside `[0, 1]`; callers that need the
/// finite side check it.
#[must_use]
pub fn ray_cylinder_intersection(
    origin: Vec3,
    dir: Vec3,
    a: Vec3,
    b: Vec3,
    radius: f32,
) -> Option<(f32, f32)> {
    let axis = b - a;
    if axis.length_squared() < SMALL_NUMBER {
        return ray_sphere_intersection(origin, dir, a, radius).map(|t| (t, 0.0));
    }

    let len = axis.length();
    let axis_dir = axis * (1.0 / len);
    let delta = origin - a;

    let ray_dot_axis = dir.dot(axis_dir);
    let delta_dot_axis = delta.dot(axis_dir);
    let ray_perp = dir - axis_dir * ray_dot_axis;
    let delta_perp = delta - axis_dir * delta_dot_axis;

    // Ray parallel to the axis: only the caps can be hit.
    if ray_perp.length_squared() < SMALL_NUMBER {
        if delta_perp.length_squared() > radius * radius || ray_dot_axis.abs() <= SMALL_NUMBER {
            return None;
        }
        let t1 = -delta_dot_axis / ray_dot_axis;
        let t2 = (len - delta_dot_axis) / ray_dot_axis;
        let mut t = t1.min(t2);
        if t < 0.0 {
            t = t1.max(t2);
        }
        if t < 0.0 {
            return None;
        }
        return Some((t, (delta_dot_axis + ray_dot_axis * t) / len));
    }

    let qa = ray_perp.length_squared();
    let qb = ray_perp.dot(delta_perp);
    let qc = delta_perp.length_squared() - radius * radius;
    let discriminant = qb * qb - qa * qc;
    if discriminant < 0.0 {
        return None;
    }
    let root = discriminant.sqrt();
    let mut t = (-qb - root) / qa;
    if t < 0.0 {
        t = (-qb + root) / qa;
    }
    if t < 0.0 {
        return None;
    }
    Some((t, (delta_dot_axis + ray_dot_axis * t) / len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_point_on_segment_clamps() {
        let a = Vec3::ZERO;
        let b = Vec3::new(10.0, 0.0, 0.0);
        assert_eq!(closest_point_on_segment(Vec3::new(5.0, 3.0, 0.0), a, b), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(closest_point_on_segment(Vec3::new(-5.0, 3.0, 0.0), a, b), a);
        assert_eq!(closest_point_on_segment_with_t(Vec3::new(20.0, 0.0, 0.0), a, b).1, 1.0);
        assert_eq!(closest_point_on_segment(Vec3::new(1.0, 1.0, 1.0), a, a), a);
    }

    #[test]
    fn test_crossing_segments() {
        let (d, pa, pb) = segment_segment_distance_sq_with_points(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, -1.0, 2.0),
            Vec3::new(0.0, 1.0, 2.0),
        );
        assert!(approx(d, 4.0));
        assert!(approx(pa.x, 0.0) && approx(pb.y, 0.0));
    }

    #[test]
    fn test_parallel_segments() {
        let d = segment_segment_distance_sq(
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::new(3.0, 0.0, 20.0),
            Vec3::new(3.0, 0.0, 30.0),
        );
        assert!(approx(d, 9.0 + 100.0));
    }

    #[test]
    fn test_degenerate_segments() {
        let (s, t) = closest_points_on_segments(Vec3::ZERO, Vec3::ZERO, Vec3::X, Vec3::X);
        assert_eq!((s, t), (0.0, 0.0));
        let d = segment_segment_distance_sq(
            Vec3::new(5.0, 2.0, 0.0),
            Vec3::new(5.0, 2.0, 0.0),
            Vec3::ZERO,
            Vec3::new(10.0, 0.0, 0.0),
        );
        assert!(approx(d, 4.0));
    }

    #[test]
    fn test_ray_sphere_roots() {
        let hit = ray_sphere_intersection(Vec3::new(-10.0, 0.0, 0.0), Vec3::X, Vec3::ZERO, 2.0);
        assert!(approx(hit.unwrap_or(-1.0), 8.0));
        let inside = ray_sphere_intersection(Vec3::ZERO, Vec3::X, Vec3::ZERO, 2.0);
        assert!(approx(inside.unwrap_or(-1.0), 2.0));
        assert_eq!(ray_sphere_intersection(Vec3::new(-10.0, 5.0, 0.0), Vec3::X, Vec3::ZERO, 2.0), None);
        assert_eq!(ray_sphere_intersection(Vec3::new(10.0, 0.0, 0.0), Vec3::X, Vec3::ZERO, 2.0), None);
    }

    #[test]
    fn test_ray_cylinder_side_and_parallel() {
        let a = Vec3::new(0.0, 0.0, 10.0);
        let b = Vec3::new(0.0, 0.0, -10.0);
        let (t, axis_t) =
            ray_cylinder_intersection(Vec3::new(-10.0, 0.0, 5.0), Vec3::X, a, b, 2.0).unwrap_or_default();
        assert!(approx(t, 8.0));
        assert!(approx(axis_t, 0.25));

        let (t, axis_t) =
            ray_cylinder_intersection(Vec3::new(0.0, 1.0, 20.0), -Vec3::Z, a, b, 2.0).unwrap_or_default();
        assert!(approx(t, 10.0));
        assert!(approx(axis_t, 0.0));

        assert!(ray_cylinder_intersection(Vec3::new(5.0, 0.0, 20.0), -Vec3::Z, a, b, 2.0).is_none());
    }
}
