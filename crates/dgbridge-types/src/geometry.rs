//! Geometry primitives shared by the wire schemas and the transform buffer.
//!
//! [`Vector3`], [`Quaternion`] and [`Transform`] double as the
//! `geometry_msgs` wire shapes (same field names, same order) and carry the
//! small amount of rigid-body algebra the bridge needs: Hamilton products,
//! vector rotation, transform composition and the quaternion/rotation-matrix
//! conversions used by the homogeneous-transform converter.

use serde::{Deserialize, Serialize};

/// A 3x3 rotation block, row-major (`m[row][col]`).
pub type Rotation = [[f64; 3]; 3];

// ────────────────────────────────────────────────────────────────────────────
// Vector3
// ────────────────────────────────────────────────────────────────────────────

/// `geometry_msgs/Vector3`: three named components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// `geometry_msgs/Quaternion` in wire order (x, y, z, w).
///
/// Nothing here forces unit length; [`Quaternion::to_rotation`] scales by the
/// squared norm so that a slightly denormalised quaternion still yields an
/// orthonormal block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    pub fn norm_squared(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vector3) -> Vector3 {
        let p = Self::new(v.x, v.y, v.z, 0.0);
        let rotated = self.mul(p).mul(self.conjugate());
        Vector3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Extract a quaternion from a rotation block using Shepperd's method.
    ///
    /// When the trace is positive `w` is recovered first; otherwise the
    /// largest diagonal element picks the pivot component.  The sign is not
    /// canonicalised, so `q` and `-q` may both come out of equivalent inputs.
    pub fn from_rotation(m: &Rotation) -> Self {
        let trace = m[0][0] + m[1][1] + m[2][2];
        if trace > 0.0 {
            let s = (trace + 1.0).sqrt();
            let w = s * 0.5;
            let s = 0.5 / s;
            return Self::new(
                (m[2][1] - m[1][2]) * s,
                (m[0][2] - m[2][0]) * s,
                (m[1][0] - m[0][1]) * s,
                w,
            );
        }

        let i = if m[0][0] < m[1][1] {
            if m[1][1] < m[2][2] { 2 } else { 1 }
        } else if m[0][0] < m[2][2] {
            2
        } else {
            0
        };
        let j = (i + 1) % 3;
        let k = (i + 2) % 3;

        let mut s = (m[i][i] - m[j][j] - m[k][k] + 1.0).sqrt();
        let mut xyz = [0.0; 3];
        xyz[i] = s * 0.5;
        s = 0.5 / s;
        let w = (m[k][j] - m[j][k]) * s;
        xyz[j] = (m[j][i] + m[i][j]) * s;
        xyz[k] = (m[k][i] + m[i][k]) * s;
        Self::new(xyz[0], xyz[1], xyz[2], w)
    }

    /// Build the rotation block for this quaternion.
    ///
    /// Returns `None` for the zero quaternion, which encodes no rotation.
    pub fn to_rotation(self) -> Option<Rotation> {
        let d = self.norm_squared();
        if d == 0.0 || !d.is_finite() {
            return None;
        }
        let s = 2.0 / d;
        let (xs, ys, zs) = (self.x * s, self.y * s, self.z * s);
        let (wx, wy, wz) = (self.w * xs, self.w * ys, self.w * zs);
        let (xx, xy, xz) = (self.x * xs, self.x * ys, self.x * zs);
        let (yy, yz, zz) = (self.y * ys, self.y * zs, self.z * zs);
        Some([
            [1.0 - (yy + zz), xy - wz, xz + wy],
            [xy + wz, 1.0 - (xx + zz), yz - wx],
            [xz - wy, yz + wx, 1.0 - (xx + yy)],
        ])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform
// ────────────────────────────────────────────────────────────────────────────

/// `geometry_msgs/Transform`: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to express a point of
/// frame B in frame A, rotate it by `rotation` then add `translation`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vector3,
    pub rotation: Quaternion,
}

impl Transform {
    pub fn new(translation: Vector3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Compose two transforms: if `self` = T_A_B and `other` = T_B_C, the
    /// result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translation = self
            .translation
            .add(self.rotation.rotate(other.translation));
        Self::new(translation, self.rotation.mul(other.rotation))
    }

    /// T_B_A from T_A_B.  Assumes a unit rotation.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        let t = rotation.rotate(self.translation);
        Self::new(Vector3::new(-t.x, -t.y, -t.z), rotation)
    }
}
