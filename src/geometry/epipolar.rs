//! Two-view epipolar geometry between calibrated pinhole cameras.

use nalgebra::{Matrix3, Point2, Vector3};

use super::SE3;

/// Chi-squared 95% bound with 1 DOF, used for point-to-line distances.
pub const CHI2_1DOF_95: f64 = 3.84;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Fundamental matrix `F12` between two views with camera-to-world poses.
///
/// Satisfies `x1^T * F12 * x2 = 0` for homogeneous pixel coordinates, so the
/// epipolar line of `x1` in image 2 is the row vector `x1^T * F12`.
pub fn fundamental_matrix(
    pose1_wc: &SE3,
    pose2_wc: &SE3,
    k1: &Matrix3<f64>,
    k2: &Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    // T12 = T1w * Tw2 maps camera-2 coordinates into camera 1.
    let t12 = pose1_wc.inverse().compose(pose2_wc);
    let e12 = skew(&t12.translation) * t12.rotation_matrix();

    let k1_inv_t = k1.try_inverse()?.transpose();
    let k2_inv = k2.try_inverse()?;
    Some(k1_inv_t * e12 * k2_inv)
}

/// Squared distance of `p2` to the epipolar line of `p1` under `f12`.
///
/// Returns `None` when the line is degenerate.
pub fn epipolar_distance_sq(f12: &Matrix3<f64>, p1: &Point2<f64>, p2: &Point2<f64>) -> Option<f64> {
    let x1 = Vector3::new(p1.x, p1.y, 1.0);
    let line = f12.transpose() * x1;

    let den = line.x * line.x + line.y * line.y;
    if den == 0.0 {
        return None;
    }
    let num = line.x * p2.x + line.y * p2.y + line.z;
    Some(num * num / den)
}
