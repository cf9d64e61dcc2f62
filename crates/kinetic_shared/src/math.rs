//! Mathematical types shared by the store, physics and VM.
//!
//! Geometry runs in `f32`; anything that is stored or hashed goes through
//! the integer helpers at the bottom of this file.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Tolerance used by normalisation and degenerate-geometry guards.
pub const SMALL_NUMBER: f32 = 1.0e-4;

/// Fixed-point scale of [`yaw_direction`] results (1.0 == 1024).
pub const DIRECTION_SCALE: i32 = 1024;

/// World-space vector in engine units (1 unit = 1 stored integer step).
///
/// Used for positions read back from the store, intent target locations,
/// collision normals and sweep paths. Never stored directly: positions are
/// rounded through [`round_to_i32`] before they reach a property.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// East-west, `PosX` when stored.
    pub x: f32,
    /// North-south, `PosY` when stored.
    pub y: f32,
    /// Height, `PosZ` when stored.
    pub z: f32,
}

impl Vec3 {
    /// Vector from its three components.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Origin; also the "no direction" result of [`Self::safe_normalize`].
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Yaw 0 facing.
    pub const X: Self = Self::new(1.0, 0.0, 0.0);

    /// Capsule axis and up.
    pub const Z: Self = Self::new(0.0, 0.0, 1.0);

    /// Builds a vector from integer world coordinates.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_ints(x: i32, y: i32, z: i32) -> Self {
        Self::new(x as f32, y as f32, z as f32)
    }

    /// Projection helper for segment and sweep math.
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Squared length, compared against squared radii.
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Straight-line distance between two points.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Squared distance; observer movement and overlap checks use this.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    /// Unit vector in the same direction, or zero when shorter than `SMALL_NUMBER`.
    #[must_use]
    pub fn safe_normalize(self) -> Self {
        let len_sq = self.length_squared();
        if len_sq > SMALL_NUMBER * SMALL_NUMBER {
            self * (1.0 / len_sq.sqrt())
        } else {
            Self::ZERO
        }
    }

    /// Rounds every component to integer world units.
    #[must_use]
    pub fn to_ints(self) -> [i32; 3] {
        [round_to_i32(self.x), round_to_i32(self.y), round_to_i32(self.z)]
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl std::ops::Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl std::ops::AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// 2D integer grid coordinate of a spatial cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    /// Cell column.
    pub x: i32,
    /// Cell row.
    pub y: i32,
}

impl CellCoord {
    /// "No position yet" sentinel.
    pub const INVALID: Self = Self::new(i32::MAX, i32::MAX);

    /// Creates a cell coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// True unless this is the sentinel.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !(self.x == i32::MAX && self.y == i32::MAX)
    }

    /// Floor-divides a world position by the cell size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_position(position: Vec3, cell_size: f32) -> Self {
        Self::new(
            (position.x / cell_size).floor() as i32,
            (position.y / cell_size).floor() as i32,
        )
    }
}

impl Default for CellCoord {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Rounds to the nearest integer, halves away from zero, saturating.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn round_to_i32(value: f32) -> i32 {
    value.round() as i32
}

/// Planar facing direction for a yaw in whole degrees, scaled by
/// [`DIRECTION_SCALE`].
///
/// Uses Bhaskara's rational sine approximation in integer arithmetic so the
/// result is identical on every platform.
#[must_use]
pub fn yaw_direction(yaw_degrees: i32) -> (i32, i32) {
    let cos = int_sin(yaw_degrees.wrapping_add(90));
    let sin = int_sin(yaw_degrees);
    (cos, sin)
}

#[allow(clippy::cast_possible_truncation)]
fn int_sin(degrees: i32) -> i32 {
    let d = i64::from(degrees.rem_euclid(360));
    let (x, sign) = if d < 180 { (d, 1) } else { (d - 180, -1) };
    let p = x * (180 - x);
    let value = (4 * p * i64::from(DIRECTION_SCALE)) / (40_500 - p);
    (sign * value) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to_i32(2.5), 3);
        assert_eq!(round_to_i32(-2.5), -3);
        assert_eq!(round_to_i32(2.49), 2);
        assert_eq!(round_to_i32(f32::MAX), i32::MAX);
    }

    #[test]
    fn test_cell_floor_division() {
        assert_eq!(CellCoord::from_position(Vec3::new(2000.0, 2000.0, 0.0), 5000.0), CellCoord::new(0, 0));
        assert_eq!(CellCoord::from_position(Vec3::new(5200.0, 2000.0, 0.0), 5000.0), CellCoord::new(1, 0));
        assert_eq!(CellCoord::from_position(Vec3::new(-1.0, -5001.0, 0.0), 5000.0), CellCoord::new(-1, -2));
        assert!(!CellCoord::INVALID.is_valid());
    }

    #[test]
    fn test_yaw_direction_cardinals() {
        assert_eq!(yaw_direction(0), (1024, 0));
        assert_eq!(yaw_direction(90), (0, 1024));
        assert_eq!(yaw_direction(180), (-1024, 0));
        assert_eq!(yaw_direction(270), (0, -1024));
        assert_eq!(yaw_direction(-90), yaw_direction(270));
    }

    #[test]
    fn test_safe_normalize() {
        let n = Vec3::new(3.0, 0.0, 4.0).safe_normalize();
        assert!((n.length() - 1.0).abs() < 1e-6);
        assert_eq!(Vec3::new(1e-6, 0.0, 0.0).safe_normalize(), Vec3::ZERO);
    }
}
