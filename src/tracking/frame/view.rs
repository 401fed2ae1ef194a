//! Read access shared by Frames and KeyFrames.
//!
//! Every search strategy reads keypoints, descriptors, the spatial index and
//! the pose through this trait, so one implementation serves both view kinds.

use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::vocabulary::{FeatureVector, NodeId};

use super::camera::CameraModel;
use super::features::{Descriptor, FeatureSet, KeyPoint};
use super::grid::FeatureGrid;
use super::scale::ScalePyramid;

pub trait FeatureView {
    fn features(&self) -> &FeatureSet;
    fn camera(&self) -> &CameraModel;
    fn pyramid(&self) -> &ScalePyramid;
    fn grid(&self) -> &FeatureGrid;
    /// Camera-to-world pose (`T_wc`), `None` before initialization.
    fn pose(&self) -> Option<&SE3>;
    fn feature_vector(&self) -> Option<&FeatureVector>;
    /// Right-image x coordinate of a stereo-matched keypoint.
    fn u_right(&self, idx: usize) -> Option<f64>;

    fn num_features(&self) -> usize {
        self.features().len()
    }

    fn keypoint(&self, idx: usize) -> &KeyPoint {
        self.features().keypoint(idx)
    }

    fn descriptor(&self, idx: usize) -> &Descriptor {
        self.features().descriptor(idx)
    }

    /// Keypoints within half-width `r` of `(x, y)`, optionally restricted to an octave range.
    fn features_in_area(
        &self,
        x: f64,
        y: f64,
        r: f64,
        min_level: Option<usize>,
        max_level: Option<usize>,
    ) -> Vec<usize> {
        self.grid()
            .features_in_area(self.features().keypoints(), x, y, r, min_level, max_level)
    }

    fn vocabulary_node(&self, idx: usize) -> Option<NodeId> {
        self.feature_vector().and_then(|fv| fv.node_of(idx))
    }

    /// World-to-camera transform (`T_cw`).
    fn pose_cw(&self) -> Option<SE3> {
        self.pose().map(|p| p.inverse())
    }

    /// Camera center in world frame.
    fn camera_center(&self) -> Option<Vector3<f64>> {
        self.pose().map(|p| p.translation)
    }
}
