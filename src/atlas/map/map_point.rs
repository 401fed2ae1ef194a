//! MapPoint - A 3D landmark observed by KeyFrames.
//!
//! MapPoints track which KeyFrames observe them (one slot per KeyFrame),
//! counters used for map-quality heuristics and duplicate resolution, and the
//! viewing geometry that projection-guided search relies on: the mean viewing
//! direction and the scale-invariance distance range.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::tracking::frame::{Descriptor, ScalePyramid};

use super::types::{KeyFrameId, MapPointId};

/// A 3D map point (landmark) observed by one or more KeyFrames.
#[derive(Clone)]
pub struct MapPoint {
    pub id: MapPointId,

    /// 3D position in world frame.
    pub position: Vector3<f64>,

    /// Representative ORB descriptor (median of all observations).
    pub descriptor: Descriptor,

    /// observations[kf_id] = feature_idx: keyframe `kf_id` sees this point at `feature_idx`.
    pub observations: HashMap<KeyFrameId, usize>,

    /// Mean viewing direction (unit vector, world frame).
    pub normal: Vector3<f64>,

    /// Distance bounds at which the point can be detected, derived from the
    /// reference observation's octave.
    pub min_distance: f64,
    pub max_distance: f64,

    /// Number of times this point was predicted visible in a frame.
    pub visible_count: u32,

    /// Number of times this point was successfully matched.
    pub found_count: u32,

    /// Reference KeyFrame (creator, or a surviving observer once it is gone).
    pub ref_kf_id: KeyFrameId,

    pub is_bad: bool,

    /// Surviving landmark after this one was fused away.
    pub replaced_by: Option<MapPointId>,
}

impl MapPoint {
    pub fn new(
        id: MapPointId,
        position: Vector3<f64>,
        descriptor: Descriptor,
        ref_kf_id: KeyFrameId,
    ) -> Self {
        Self {
            id,
            position,
            descriptor,
            observations: HashMap::new(),
            normal: Vector3::zeros(),
            min_distance: 0.0,
            max_distance: f64::INFINITY,
            visible_count: 1,
            found_count: 1,
            ref_kf_id,
            is_bad: false,
            replaced_by: None,
        }
    }

    /// Add an observation. Returns false if the KeyFrame already observes this point.
    pub fn add_observation(&mut self, kf_id: KeyFrameId, feature_idx: usize) -> bool {
        if self.observations.contains_key(&kf_id) {
            return false;
        }
        self.observations.insert(kf_id, feature_idx);
        true
    }

    /// Remove an observation. Returns true if it existed.
    ///
    /// If the reference KeyFrame is removed, the lowest remaining observer
    /// becomes the reference.
    pub fn erase_observation(&mut self, kf_id: KeyFrameId) -> bool {
        if self.observations.remove(&kf_id).is_none() {
            return false;
        }
        if self.ref_kf_id == kf_id {
            if let Some(&next) = self.observations.keys().min() {
                self.ref_kf_id = next;
            }
        }
        true
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn is_in_keyframe(&self, kf_id: KeyFrameId) -> bool {
        self.observations.contains_key(&kf_id)
    }

    /// Feature index of this point in a KeyFrame, if observed there.
    pub fn index_in_keyframe(&self, kf_id: KeyFrameId) -> Option<usize> {
        self.observations.get(&kf_id).copied()
    }

    /// found_count / visible_count (1.0 before the point was ever predicted visible).
    pub fn found_ratio(&self) -> f64 {
        if self.visible_count == 0 {
            1.0
        } else {
            self.found_count as f64 / self.visible_count as f64
        }
    }

    pub fn increase_visible(&mut self, n: u32) {
        self.visible_count += n;
    }

    pub fn increase_found(&mut self, n: u32) {
        self.found_count += n;
    }

    /// Alive and with a usable position.
    pub fn is_valid(&self) -> bool {
        !self.is_bad && self.has_valid_position()
    }

    pub fn has_valid_position(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
    }

    /// Recompute the mean viewing direction and the distance bounds.
    ///
    /// # Arguments
    /// * `observer_centers` - camera centers of all observing KeyFrames
    /// * `ref_center` - camera center of the reference KeyFrame
    /// * `ref_octave` - octave of the reference observation
    /// * `pyramid` - scale tables of the reference KeyFrame
    pub fn update_normal_and_depth(
        &mut self,
        observer_centers: impl Iterator<Item = Vector3<f64>>,
        ref_center: &Vector3<f64>,
        ref_octave: usize,
        pyramid: &ScalePyramid,
    ) {
        let mut normal_sum = Vector3::zeros();
        let mut n = 0usize;

        for center in observer_centers {
            let dir = self.position - center;
            let dist = dir.norm();
            if dist > 1e-10 {
                normal_sum += dir / dist;
                n += 1;
            }
        }
        if n == 0 {
            return;
        }

        let norm = normal_sum.norm();
        if norm > 1e-10 {
            self.normal = normal_sum / norm;
        }

        let dist = (self.position - ref_center).norm();
        self.max_distance = dist * pyramid.scale(ref_octave);
        self.min_distance = self.max_distance / pyramid.max_scale();
    }

    /// Lower distance bound with tolerance.
    pub fn min_distance_invariance(&self) -> f64 {
        0.8 * self.min_distance
    }

    /// Upper distance bound with tolerance.
    pub fn max_distance_invariance(&self) -> f64 {
        1.2 * self.max_distance
    }

    /// Check if a viewing distance is within the scale-invariance range.
    pub fn is_in_distance_range(&self, distance: f64) -> bool {
        distance >= self.min_distance_invariance() && distance <= self.max_distance_invariance()
    }

    /// Predicted pyramid level for a viewing distance.
    pub fn predict_scale(&self, distance: f64, pyramid: &ScalePyramid) -> usize {
        pyramid.predict_scale(distance, self.max_distance)
    }
}

impl std::fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapPoint")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("observations", &self.observations.len())
            .field("visible_count", &self.visible_count)
            .field("found_count", &self.found_count)
            .field("is_bad", &self.is_bad)
            .field("replaced_by", &self.replaced_by)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_mappoint() -> MapPoint {
        MapPoint::new(
            MapPointId::new(1),
            Vector3::new(0.0, 0.0, 5.0),
            Descriptor::zeros(),
            KeyFrameId::new(0),
        )
    }

    #[test]
    fn test_one_slot_per_keyframe() {
        let mut mp = create_test_mappoint();

        assert!(mp.add_observation(KeyFrameId::new(1), 5));
        assert!(!mp.add_observation(KeyFrameId::new(1), 9));
        assert_eq!(mp.index_in_keyframe(KeyFrameId::new(1)), Some(5));
        assert_eq!(mp.num_observations(), 1);

        assert!(mp.erase_observation(KeyFrameId::new(1)));
        assert!(!mp.erase_observation(KeyFrameId::new(1)));
    }

    #[test]
    fn test_reference_moves_when_erased() {
        let mut mp = create_test_mappoint();
        mp.add_observation(KeyFrameId::new(0), 0);
        mp.add_observation(KeyFrameId::new(4), 1);
        mp.add_observation(KeyFrameId::new(2), 2);

        mp.erase_observation(KeyFrameId::new(0));
        assert_eq!(mp.ref_kf_id, KeyFrameId::new(2));
    }

    #[test]
    fn test_found_ratio() {
        let mut mp = create_test_mappoint();
        mp.visible_count = 3;
        mp.found_count = 2;
        assert_relative_eq!(mp.found_ratio(), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normal_and_depth() {
        let mut mp = create_test_mappoint();
        let pyramid = ScalePyramid::default();
        let centers = vec![Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)];

        mp.update_normal_and_depth(centers.into_iter(), &Vector3::zeros(), 1, &pyramid);

        assert_relative_eq!(mp.normal, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(mp.max_distance, 5.0 * 1.2, epsilon = 1e-12);
        assert_relative_eq!(mp.min_distance, 6.0 / pyramid.max_scale(), epsilon = 1e-12);

        assert!(mp.is_in_distance_range(5.0));
        assert!(!mp.is_in_distance_range(100.0));
        assert!(!mp.is_in_distance_range(0.1));
        // Slightly farther than the reference observation: still the reference octave.
        assert_eq!(mp.predict_scale(5.5, &pyramid), 1);
        assert_eq!(mp.predict_scale(6.5, &pyramid), 0);
    }

    #[test]
    fn test_invalid_position() {
        let mut mp = create_test_mappoint();
        assert!(mp.is_valid());
        mp.position.x = f64::NAN;
        assert!(!mp.is_valid());
    }
}
