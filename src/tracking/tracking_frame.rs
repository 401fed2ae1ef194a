//! Tracking `Frame` representation.
//!
//! A `Frame` is one camera observation being tracked: its features, spatial
//! grid, optional pose estimate, optional stereo depth, optional vocabulary
//! grouping, and temporary associations to `MapPoint`s. A Frame becomes a
//! [`crate::atlas::KeyFrame`] when the map decides to keep it.

use crate::atlas::map::{MapPoint, MapPointId};
use crate::error::MatcherError;
use crate::geometry::SE3;
use crate::matcher::{project_landmark, LandmarkProjection, SearchPrior};
use crate::tracking::frame::{CameraModel, FeatureGrid, FeatureSet, FeatureView, ScalePyramid};
use crate::vocabulary::{FeatureVector, OrbVocabulary};

/// A frame being tracked (not yet a KeyFrame).
#[derive(Clone)]
pub struct Frame {
    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Visual features (left image in stereo).
    pub features: FeatureSet,
    pub camera: CameraModel,
    pub pyramid: ScalePyramid,
    /// Spatial grid for radius queries.
    pub grid: FeatureGrid,
    /// Camera-to-world pose (T_wc). None before the pose is estimated.
    pub pose: Option<SE3>,
    /// map_point_matches[i] = Some(mp_id) if feature i is associated.
    pub map_point_matches: Vec<Option<MapPointId>>,
    /// Outlier flags set by pose optimization.
    pub outliers: Vec<bool>,
    /// Vocabulary grouping, filled by [`Frame::compute_bow`].
    pub feature_vector: Option<FeatureVector>,
    /// Right-image x coordinate per keypoint (stereo only).
    pub u_right: Vec<Option<f64>>,
    /// Stereo depth per keypoint.
    pub depth: Vec<Option<f64>>,
}

impl Frame {
    /// Build a frame from extracted features.
    ///
    /// Fails if the camera is degenerate or a keypoint octave lies outside the pyramid.
    pub fn new(
        timestamp_ns: u64,
        features: FeatureSet,
        camera: CameraModel,
        pyramid: ScalePyramid,
    ) -> Result<Self, MatcherError> {
        camera.validate()?;
        if let Some(kp) = features
            .keypoints()
            .iter()
            .find(|kp| kp.octave >= pyramid.n_levels())
        {
            return Err(MatcherError::OctaveOutOfRange {
                octave: kp.octave,
                n_levels: pyramid.n_levels(),
            });
        }

        let n = features.len();
        let grid = FeatureGrid::new(features.keypoints(), camera.width, camera.height);
        Ok(Self {
            timestamp_ns,
            features,
            camera,
            pyramid,
            grid,
            pose: None,
            map_point_matches: vec![None; n],
            outliers: vec![false; n],
            feature_vector: None,
            u_right: vec![None; n],
            depth: vec![None; n],
        })
    }

    /// Set the camera-to-world pose estimate.
    pub fn set_pose(&mut self, pose_wc: SE3) {
        self.pose = Some(pose_wc);
    }

    /// Quantize descriptors with the vocabulary (grouped `levels_up` above the leaves).
    pub fn compute_bow(&mut self, vocabulary: &OrbVocabulary, levels_up: usize) {
        if self.feature_vector.is_none() {
            self.feature_vector =
                Some(vocabulary.transform(self.features.descriptors(), levels_up));
        }
    }

    /// Record a stereo measurement for keypoint `idx`.
    pub fn set_stereo(&mut self, idx: usize, u_right: f64, depth: f64) {
        self.u_right[idx] = Some(u_right);
        self.depth[idx] = Some(depth);
    }

    pub fn clear_stereo(&mut self, idx: usize) {
        self.u_right[idx] = None;
        self.depth[idx] = None;
    }

    /// Drop all landmark associations.
    pub fn clear_matches(&mut self) {
        self.map_point_matches.iter_mut().for_each(|m| *m = None);
        self.outliers.iter_mut().for_each(|o| *o = false);
    }

    /// Number of associated, non-outlier keypoints.
    pub fn num_matches(&self) -> usize {
        self.map_point_matches
            .iter()
            .zip(&self.outliers)
            .filter(|(m, &outlier)| m.is_some() && !outlier)
            .count()
    }

    /// Project a landmark with this frame's pose and check that it is visible:
    /// in front of the camera, inside the image, inside its distance range and
    /// viewed at an angle with cosine at least `view_cos_limit`.
    pub fn is_in_frustum(&self, mp: &MapPoint, view_cos_limit: f64) -> Option<LandmarkProjection> {
        project_landmark(self, mp, &SearchPrior::None)
            .filter(|proj| proj.view_cos >= view_cos_limit)
    }
}

impl FeatureView for Frame {
    fn features(&self) -> &FeatureSet {
        &self.features
    }

    fn camera(&self) -> &CameraModel {
        &self.camera
    }

    fn pyramid(&self) -> &ScalePyramid {
        &self.pyramid
    }

    fn grid(&self) -> &FeatureGrid {
        &self.grid
    }

    fn pose(&self) -> Option<&SE3> {
        self.pose.as_ref()
    }

    fn feature_vector(&self) -> Option<&FeatureVector> {
        self.feature_vector.as_ref()
    }

    fn u_right(&self, idx: usize) -> Option<f64> {
        self.u_right.get(idx).copied().flatten()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("timestamp_ns", &self.timestamp_ns)
            .field("features", &self.features.len())
            .field("has_pose", &self.pose.is_some())
            .field("matches", &self.num_matches())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::{Descriptor, KeyPoint};

    fn camera() -> CameraModel {
        CameraModel::new(400.0, 400.0, 320.0, 240.0, 0.1, 640.0, 480.0).unwrap()
    }

    #[test]
    fn test_new_rejects_octave_outside_pyramid() {
        let features =
            FeatureSet::new(vec![KeyPoint::new(10.0, 10.0, 8, 0.0)], vec![Descriptor::zeros()]).unwrap();
        let err = Frame::new(0, features, camera(), ScalePyramid::default()).unwrap_err();
        assert_eq!(err, MatcherError::OctaveOutOfRange { octave: 8, n_levels: 8 });
    }

    #[test]
    fn test_new_sizes_slots() {
        let features = FeatureSet::new(
            vec![KeyPoint::new(10.0, 10.0, 0, 0.0), KeyPoint::new(20.0, 10.0, 1, 0.0)],
            vec![Descriptor::zeros(); 2],
        )
        .unwrap();
        let mut frame = Frame::new(5, features, camera(), ScalePyramid::default()).unwrap();
        assert_eq!(frame.map_point_matches.len(), 2);
        assert_eq!(frame.num_matches(), 0);
        assert!(frame.pose.is_none());

        frame.set_stereo(1, 12.0, 5.0);
        assert_eq!(frame.u_right(1), Some(12.0));
        frame.clear_stereo(1);
        assert_eq!(frame.depth[1], None);
    }
}
