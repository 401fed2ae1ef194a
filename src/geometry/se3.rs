//! SE3: rigid body transform (rotation + translation).
//!
//! Poses stored on frames and keyframes are camera-to-world (`T_wc`). Search
//! priors handed to the matcher are world-to-camera (`T_cw`); call
//! [`SE3::inverse`] to switch between the two.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// 6-DOF rigid transform. Transforms points as `p' = R * p + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Construct from a rotation matrix and translation.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Construct from quaternion (w, x, y, z) and translation.
    pub fn from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64, translation: Vector3<f64>) -> Self {
        let rotation =
            UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(qw, qx, qy, qz));
        Self {
            rotation,
            translation,
        }
    }

    /// Construct from a homogeneous 4x4 matrix `[R | t; 0 | 1]`.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let rotation = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        Self::from_rt(rotation, translation)
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose: `self ∘ other` (apply `other` first).
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse_roundtrip_point() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.1, -0.3, 0.7),
            translation: Vector3::new(1.0, -2.0, 0.5),
        };
        let p = Vector3::new(0.3, 0.2, 4.0);
        let back = pose.inverse().transform_point(&pose.transform_point(&p));
        assert_relative_eq!(back, p, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_applies_right_first() {
        let a = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(1.0, 0.0, 0.0),
        };
        let b = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            translation: Vector3::zeros(),
        };
        let p = Vector3::new(1.0, 0.0, 0.0);
        // b rotates x onto y, then a shifts along x.
        assert_relative_eq!(
            a.compose(&b).transform_point(&p),
            Vector3::new(1.0, 1.0, 0.0),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_matrix_roundtrip() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.4, 0.2, -0.1),
            translation: Vector3::new(0.5, 0.6, 0.7),
        };
        let back = SE3::from_matrix(pose.to_matrix());
        assert_relative_eq!(back.translation, pose.translation, epsilon = 1e-10);
        assert_relative_eq!(back.rotation.angle_to(&pose.rotation), 0.0, epsilon = 1e-10);
    }
}
