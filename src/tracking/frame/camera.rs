//! Rectified pinhole camera model.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::MatcherError;

/// Rectified pinhole intrinsics plus stereo baseline.
///
/// Inputs are assumed undistorted; no distortion coefficients are kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Stereo baseline in meters (0 for monocular).
    #[serde(default)]
    pub baseline: f64,
    pub width: f64,
    pub height: f64,
}

impl CameraModel {
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        baseline: f64,
        width: f64,
        height: f64,
    ) -> Result<Self, MatcherError> {
        let camera = Self {
            fx,
            fy,
            cx,
            cy,
            baseline,
            width,
            height,
        };
        camera.validate()?;
        Ok(camera)
    }

    /// Build from a 3x3 intrinsics matrix.
    pub fn from_k(k: &Matrix3<f64>, baseline: f64, width: f64, height: f64) -> Result<Self, MatcherError> {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)], baseline, width, height)
    }

    pub fn validate(&self) -> Result<(), MatcherError> {
        let finite = [self.fx, self.fy, self.cx, self.cy, self.baseline, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(MatcherError::DegenerateCamera("non-finite parameter".into()));
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(MatcherError::DegenerateCamera(format!(
                "focal lengths must be positive (fx={}, fy={})",
                self.fx, self.fy
            )));
        }
        if self.width < 1.0 || self.height < 1.0 {
            return Err(MatcherError::DegenerateCamera(format!(
                "image size {}x{}",
                self.width, self.height
            )));
        }
        if self.baseline < 0.0 {
            return Err(MatcherError::DegenerateCamera("negative baseline".into()));
        }
        Ok(())
    }

    /// Stereo baseline times focal length (`bf`), in pixel·meters.
    pub fn bf(&self) -> f64 {
        self.fx * self.baseline
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Project a camera-frame point. `None` when the point is not in front of the camera.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= 0.0 || !p_cam.z.is_finite() {
            return None;
        }
        let inv_z = 1.0 / p_cam.z;
        Some(Point2::new(
            self.fx * p_cam.x * inv_z + self.cx,
            self.fy * p_cam.y * inv_z + self.cy,
        ))
    }

    /// Back-project a pixel to a camera-frame point at the given depth.
    pub fn unproject(&self, pt: &Point2<f64>, depth: f64) -> Vector3<f64> {
        Vector3::new(
            (pt.x - self.cx) * depth / self.fx,
            (pt.y - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Normalized bearing (z = 1) of a pixel.
    pub fn bearing(&self, pt: &Point2<f64>) -> Vector3<f64> {
        self.unproject(pt, 1.0)
    }

    pub fn is_in_image(&self, u: f64, v: f64) -> bool {
        u >= 0.0 && u < self.width && v >= 0.0 && v < self.height
    }
}
