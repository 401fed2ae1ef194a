//! Sim3: 7-DOF similarity transformation (rotation + translation + scale).
//!
//! Used as the geometric prior when two independently built map segments are
//! aligned during loop-closure verification and correction.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use super::SE3;

/// Transforms points as: p' = s * R * p + t
#[derive(Debug, Clone, PartialEq)]
pub struct Sim3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Sim3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Construct from rotation matrix, translation, and scale.
    pub fn from_rts(rotation: Matrix3<f64>, translation: Vector3<f64>, scale: f64) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
            scale,
        }
    }

    /// Construct from SE3 with scale = 1.0.
    pub fn from_se3(se3: &SE3) -> Self {
        Self {
            rotation: se3.rotation,
            translation: se3.translation,
            scale: 1.0,
        }
    }

    /// Rigid part of a world-to-camera similarity `[sR | t]`.
    ///
    /// A point seen through `S_cw` lands at `s * (R p + t / s)`, so projection
    /// only needs `R` and `t / s`: the scale changes depth, not pixel position.
    pub fn to_rigid(&self) -> SE3 {
        SE3 {
            rotation: self.rotation,
            translation: self.translation / self.scale,
        }
    }

    /// Inverse: `[(1/s) R^T | -(1/s) R^T t]`.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        let scale_inv = 1.0 / self.scale;
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation) * scale_inv,
            scale: scale_inv,
        }
    }

    /// Compose two Sim3 transforms: self ∘ other.
    pub fn compose(&self, other: &Sim3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.scale * (self.rotation * other.translation) + self.translation,
            scale: self.scale * other.scale,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.scale * (self.rotation * p) + self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }
}

impl Default for Sim3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Sim3 {
        Sim3 {
            rotation: UnitQuaternion::from_axis_angle(
                &nalgebra::Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0)),
                std::f64::consts::FRAC_PI_2,
            ),
            translation: Vector3::new(1.0, 2.0, 3.0),
            scale: 2.0,
        }
    }

    #[test]
    fn test_inverse() {
        let sim3 = sample();
        let sim3_inv = sim3.inverse();
        let composed = sim3.compose(&sim3_inv);

        assert_relative_eq!(composed.scale, 1.0, epsilon = 1e-10);
        assert_relative_eq!(composed.translation.norm(), 0.0, epsilon = 1e-10);

        let p = Vector3::new(1.0, 2.0, 3.0);
        let p_back = sim3_inv.transform_point(&sim3.transform_point(&p));
        assert_relative_eq!(p_back, p, epsilon = 1e-10);
    }

    #[test]
    fn test_transform_point_with_scale() {
        let sim3 = Sim3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(1.0, 0.0, 0.0),
            scale: 2.0,
        };

        // p' = 2 * I * (1,1,1) + (1,0,0) = (3, 2, 2)
        let p_transformed = sim3.transform_point(&Vector3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(p_transformed, Vector3::new(3.0, 2.0, 2.0), epsilon = 1e-10);
    }

    #[test]
    fn test_rigid_part_preserves_projection() {
        let sim3 = sample();
        let p = Vector3::new(0.5, -0.2, 4.0);
        let scaled = sim3.transform_point(&p);
        let rigid = sim3.to_rigid().transform_point(&p);

        assert_relative_eq!(scaled.x / scaled.z, rigid.x / rigid.z, epsilon = 1e-10);
        assert_relative_eq!(scaled.y / scaled.z, rigid.y / rigid.z, epsilon = 1e-10);
        assert_relative_eq!(scaled, rigid * sim3.scale, epsilon = 1e-10);
    }

    #[test]
    fn test_from_se3_has_unit_scale() {
        let se3 = SE3::from_quaternion(1.0, 0.0, 0.0, 0.0, Vector3::new(1.0, 2.0, 3.0));
        let sim3 = Sim3::from_se3(&se3);
        assert_eq!(sim3.scale, 1.0);
        assert_eq!(sim3.to_rigid(), se3);
    }
}
