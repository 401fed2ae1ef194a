//! KeyFrame - a Frame promoted into the map.
//!
//! A KeyFrame keeps the visual data of the Frame it was created from (keypoints,
//! descriptors, spatial grid, stereo depth, vocabulary grouping) plus its
//! landmark association list. Associations are edited through [`super::Map`]
//! so that both sides of the KeyFrame↔MapPoint relation stay consistent.

use nalgebra::Vector3;

use crate::error::MatcherError;
use crate::geometry::SE3;
use crate::tracking::frame::{CameraModel, FeatureGrid, FeatureSet, FeatureView, ScalePyramid};
use crate::tracking::tracking_frame::Frame;
use crate::vocabulary::FeatureVector;

use super::types::{KeyFrameId, MapPointId};

/// A KeyFrame in the map arena.
#[derive(Clone)]
pub struct KeyFrame {
    pub id: KeyFrameId,

    pub timestamp_ns: u64,

    /// Pose: transform from camera to world (T_wc).
    pub pose: SE3,

    // ─────────────────────────────────────────────────────────────────────────
    // Visual Features
    // ─────────────────────────────────────────────────────────────────────────
    pub features: FeatureSet,
    pub camera: CameraModel,
    pub pyramid: ScalePyramid,
    pub grid: FeatureGrid,

    /// Vocabulary grouping of the descriptors, if computed.
    pub feature_vector: Option<FeatureVector>,

    /// Right-image x coordinate per keypoint (stereo only).
    pub u_right: Vec<Option<f64>>,

    /// Stereo depth per keypoint.
    pub depth: Vec<Option<f64>>,

    // ─────────────────────────────────────────────────────────────────────────
    // Map Associations
    // ─────────────────────────────────────────────────────────────────────────
    /// map_point_ids[i] = Some(mp_id) if feature i is associated with MapPoint mp_id.
    pub map_point_ids: Vec<Option<MapPointId>>,

    pub is_bad: bool,
}

impl KeyFrame {
    /// Promote a tracked Frame. The Frame must have a pose.
    ///
    /// Landmark associations are not copied; the map re-creates them through
    /// `Map::associate` so both directions of the relation are recorded.
    pub fn from_frame(id: KeyFrameId, frame: &Frame) -> Result<Self, MatcherError> {
        let pose = frame.pose.clone().ok_or(MatcherError::MissingPose)?;
        let n = frame.num_features();
        Ok(Self {
            id,
            timestamp_ns: frame.timestamp_ns,
            pose,
            features: frame.features.clone(),
            camera: frame.camera,
            pyramid: frame.pyramid.clone(),
            grid: frame.grid.clone(),
            feature_vector: frame.feature_vector.clone(),
            u_right: frame.u_right.clone(),
            depth: frame.depth.clone(),
            map_point_ids: vec![None; n],
            is_bad: false,
        })
    }

    pub fn get_map_point(&self, idx: usize) -> Option<MapPointId> {
        self.map_point_ids.get(idx).copied().flatten()
    }

    /// Set a slot. Callers outside the map should use `Map::associate`.
    pub(crate) fn set_map_point(&mut self, idx: usize, mp_id: Option<MapPointId>) {
        if let Some(slot) = self.map_point_ids.get_mut(idx) {
            *slot = mp_id;
        }
    }

    /// Number of slots holding a landmark.
    pub fn num_tracked(&self) -> usize {
        self.map_point_ids.iter().filter(|mp| mp.is_some()).count()
    }

    /// Whether keypoint `idx` has a stereo measurement.
    pub fn is_stereo(&self, idx: usize) -> bool {
        self.u_right.get(idx).copied().flatten().is_some()
    }

    /// Camera position in world frame.
    pub fn center(&self) -> Vector3<f64> {
        self.pose.translation
    }
}

impl FeatureView for KeyFrame {
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
        Some(&self.pose)
    }

    fn feature_vector(&self) -> Option<&FeatureVector> {
        self.feature_vector.as_ref()
    }

    fn u_right(&self, idx: usize) -> Option<f64> {
        self.u_right.get(idx).copied().flatten()
    }
}

impl std::fmt::Debug for KeyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFrame")
            .field("id", &self.id)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("features", &self.features.len())
            .field("tracked", &self.num_tracked())
            .field("is_bad", &self.is_bad)
            .finish()
    }
}
