use crate::linalg::{det_mat33, mat33_mul_vec3, matmul33, norm3, transpose33};

/// A rigid body transform: rotation followed by translation.
///
/// Applied to a point as `p' = R * p + t`. No scale or shear.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidTransform {
    /// Rotation matrix, row major.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation: [0.0, 0.0, 0.0],
    };

    /// Create a transform from a rotation and a translation.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a homogeneous 4x4 matrix, ignoring the last row.
    pub fn from_matrix(m: &[[f64; 4]; 4]) -> Self {
        Self {
            rotation: [
                [m[0][0], m[0][1], m[0][2]],
                [m[1][0], m[1][1], m[1][2]],
                [m[2][0], m[2][1], m[2][2]],
            ],
            translation: [m[0][3], m[1][3], m[2][3]],
        }
    }

    /// The homogeneous 4x4 matrix of this transform.
    pub fn to_matrix(&self) -> [[f64; 4]; 4] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            [r[0][0], r[0][1], r[0][2], t[0]],
            [r[1][0], r[1][1], r[1][2], t[1]],
            [r[2][0], r[2][1], r[2][2], t[2]],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Compose two transforms, `self * other`: `other` is applied first.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        let mut rotation = [[0.0; 3]; 3];
        matmul33(&self.rotation, &other.rotation, &mut rotation);
        let rt = mat33_mul_vec3(&self.rotation, &other.translation);
        RigidTransform {
            rotation,
            translation: [
                rt[0] + self.translation[0],
                rt[1] + self.translation[1],
                rt[2] + self.translation[2],
            ],
        }
    }

    /// The inverse transform, `R^T, -R^T t`.
    pub fn inverse(&self) -> RigidTransform {
        let rotation = transpose33(&self.rotation);
        let t = mat33_mul_vec3(&rotation, &self.translation);
        RigidTransform {
            rotation,
            translation: [-t[0], -t[1], -t[2]],
        }
    }

    /// Apply the transform to a single point.
    #[inline]
    pub fn transform_point(&self, p: &[f64; 3]) -> [f64; 3] {
        let q = mat33_mul_vec3(&self.rotation, p);
        [
            q[0] + self.translation[0],
            q[1] + self.translation[1],
            q[2] + self.translation[2],
        ]
    }

    /// Rotation magnitude in radians, in `[0, pi]`.
    pub fn rotation_angle(&self) -> f64 {
        let r = &self.rotation;
        let axis = [r[2][1] - r[1][2], r[0][2] - r[2][0], r[1][0] - r[0][1]];
        // atan2 keeps precision for tiny angles where acos does not
        (0.5 * norm3(&axis)).atan2(0.5 * (r[0][0] + r[1][1] + r[2][2] - 1.0))
    }

    /// Translation magnitude.
    pub fn translation_norm(&self) -> f64 {
        norm3(&self.translation)
    }

    /// Whether every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.rotation.iter().flatten().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }

    /// Check that the rotation is orthonormal with determinant +1, within `tol`.
    pub fn is_rigid(&self, tol: f64) -> bool {
        if !self.is_finite() {
            return false;
        }

        let mut rrt = [[0.0; 3]; 3];
        matmul33(&self.rotation, &transpose33(&self.rotation), &mut rrt);
        for (i, row) in rrt.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                if (v - expected).abs() > tol {
                    return false;
                }
            }
        }

        (det_mat33(&self.rotation) - 1.0).abs() <= tol
    }
}
