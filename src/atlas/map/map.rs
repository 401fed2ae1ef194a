//! Map - Arena for KeyFrames and MapPoints.
//!
//! The Map owns every KeyFrame and MapPoint and addresses them by stable ids
//! (the id is the arena slot). Entities are never removed: culling and fusion
//! flip `is_bad`, and fused-away landmarks forward to their survivor through
//! `replaced_by`.
//!
//! It provides methods for:
//! - Promoting Frames to KeyFrames and creating MapPoints
//! - Creating bidirectional associations (KF↔MP)
//! - Merging duplicate landmarks
//! - Recomputing landmark descriptors and viewing geometry
//! - Applying deferred [`MapEdit`]s

use nalgebra::Vector3;

use crate::error::MatcherError;
use crate::matcher::descriptor_distance;
use crate::tracking::frame::Descriptor;
use crate::tracking::tracking_frame::Frame;

use super::edits::{EditOutcome, MapEdit};
use super::keyframe::KeyFrame;
use super::map_point::MapPoint;
use super::types::{KeyFrameId, MapPointId};

/// The landmark map.
#[derive(Default)]
pub struct Map {
    keyframes: Vec<KeyFrame>,
    map_points: Vec<MapPoint>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // KeyFrame Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Promote a posed Frame into a KeyFrame.
    ///
    /// Every non-outlier landmark the Frame is matched to (and that is still
    /// alive) becomes an observation of the new KeyFrame.
    pub fn create_keyframe(&mut self, frame: &Frame) -> Result<KeyFrameId, MatcherError> {
        let id = KeyFrameId::new(self.keyframes.len() as u64);
        let kf = KeyFrame::from_frame(id, frame)?;
        self.keyframes.push(kf);

        let matched = frame
            .map_point_matches
            .iter()
            .zip(&frame.outliers)
            .enumerate()
            .filter_map(|(idx, (mp, &outlier))| mp.filter(|_| !outlier).map(|mp| (idx, mp)));
        for (idx, mp_id) in matched {
            if let Some(mp_id) = self.resolve(mp_id) {
                self.associate(id, idx, mp_id);
            }
        }
        Ok(id)
    }

    /// Get a live or dead KeyFrame by id.
    pub fn keyframe(&self, id: KeyFrameId) -> Option<&KeyFrame> {
        self.keyframes.get(id.index())
    }

    pub fn keyframe_mut(&mut self, id: KeyFrameId) -> Option<&mut KeyFrame> {
        self.keyframes.get_mut(id.index())
    }

    /// Iterate over live KeyFrames.
    pub fn keyframes(&self) -> impl Iterator<Item = &KeyFrame> {
        self.keyframes.iter().filter(|kf| !kf.is_bad)
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes().count()
    }

    /// Mark a KeyFrame bad and drop all its observations.
    pub fn set_keyframe_bad(&mut self, kf_id: KeyFrameId) {
        let n = match self.keyframe(kf_id) {
            Some(kf) if !kf.is_bad => kf.map_point_ids.len(),
            _ => return,
        };
        for idx in 0..n {
            self.disassociate(kf_id, idx);
        }
        if let Some(kf) = self.keyframe_mut(kf_id) {
            kf.is_bad = true;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // MapPoint Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a landmark. It has no observations until [`Map::associate`] is called.
    pub fn create_map_point(
        &mut self,
        position: Vector3<f64>,
        descriptor: Descriptor,
        ref_kf_id: KeyFrameId,
    ) -> MapPointId {
        let id = MapPointId::new(self.map_points.len() as u64);
        self.map_points
            .push(MapPoint::new(id, position, descriptor, ref_kf_id));
        id
    }

    /// Get a live or dead MapPoint by id.
    pub fn map_point(&self, id: MapPointId) -> Option<&MapPoint> {
        self.map_points.get(id.index())
    }

    pub fn map_point_mut(&mut self, id: MapPointId) -> Option<&mut MapPoint> {
        self.map_points.get_mut(id.index())
    }

    /// Iterate over live MapPoints.
    pub fn map_points(&self) -> impl Iterator<Item = &MapPoint> {
        self.map_points.iter().filter(|mp| !mp.is_bad)
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points().count()
    }

    /// Follow `replaced_by` forwarding to the surviving landmark.
    ///
    /// Returns None if the chain ends in a landmark that is bad without a successor.
    pub fn resolve(&self, mut id: MapPointId) -> Option<MapPointId> {
        // Each replacement retires one landmark, so a chain is shorter than the arena.
        for _ in 0..=self.map_points.len() {
            let mp = self.map_point(id)?;
            if !mp.is_bad {
                return Some(id);
            }
            id = mp.replaced_by?;
        }
        None
    }

    /// Mark a landmark bad and clear it from every observing KeyFrame.
    pub fn set_map_point_bad(&mut self, mp_id: MapPointId) {
        let observations: Vec<(KeyFrameId, usize)> = match self.map_point_mut(mp_id) {
            Some(mp) if !mp.is_bad => {
                mp.is_bad = true;
                mp.observations.drain().collect()
            }
            _ => return,
        };
        for (kf_id, idx) in observations {
            if let Some(kf) = self.keyframe_mut(kf_id) {
                kf.set_map_point(idx, None);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Association (KF ↔ MP)
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a bidirectional association between a KeyFrame feature and a MapPoint.
    ///
    /// Fails (returns false) if either side is dead, the feature index is out
    /// of range, the slot is occupied, or the landmark already has a slot in
    /// this KeyFrame.
    pub fn associate(&mut self, kf_id: KeyFrameId, feature_idx: usize, mp_id: MapPointId) -> bool {
        let slot_free = self
            .keyframe(kf_id)
            .filter(|kf| !kf.is_bad && feature_idx < kf.map_point_ids.len())
            .is_some_and(|kf| kf.get_map_point(feature_idx).is_none());
        if !slot_free {
            return false;
        }

        match self.map_point_mut(mp_id) {
            Some(mp) if !mp.is_bad => {
                if !mp.add_observation(kf_id, feature_idx) {
                    return false;
                }
            }
            _ => return false,
        }

        if let Some(kf) = self.keyframe_mut(kf_id) {
            kf.set_map_point(feature_idx, Some(mp_id));
        }
        true
    }

    /// Remove the association of a KeyFrame feature. Returns the landmark it held.
    pub fn disassociate(&mut self, kf_id: KeyFrameId, feature_idx: usize) -> Option<MapPointId> {
        let mp_id = self.keyframe(kf_id)?.get_map_point(feature_idx)?;
        if let Some(kf) = self.keyframe_mut(kf_id) {
            kf.set_map_point(feature_idx, None);
        }
        if let Some(mp) = self.map_point_mut(mp_id) {
            mp.erase_observation(kf_id);
        }
        Some(mp_id)
    }

    /// Merge `goner` into `keeper`.
    ///
    /// Every KeyFrame observing `goner` is re-pointed to `keeper`; where the
    /// KeyFrame already observes `keeper` the duplicate slot is cleared instead.
    /// Counters are summed, the keeper's descriptor and viewing geometry are
    /// recomputed, and `goner` is marked bad with `replaced_by = keeper`.
    pub fn replace_map_point(&mut self, goner: MapPointId, keeper: MapPointId) -> bool {
        if goner == keeper {
            return false;
        }
        let (observations, visible, found) = match (self.map_point(goner), self.map_point(keeper)) {
            (Some(g), Some(k)) if !g.is_bad && !k.is_bad => {
                let obs: Vec<(KeyFrameId, usize)> =
                    g.observations.iter().map(|(&kf, &idx)| (kf, idx)).collect();
                (obs, g.visible_count, g.found_count)
            }
            _ => return false,
        };

        if let Some(g) = self.map_point_mut(goner) {
            g.observations.clear();
            g.is_bad = true;
            g.replaced_by = Some(keeper);
        }

        for (kf_id, idx) in observations {
            let keeper_added = self
                .map_point_mut(keeper)
                .is_some_and(|k| k.add_observation(kf_id, idx));
            if let Some(kf) = self.keyframe_mut(kf_id) {
                kf.set_map_point(idx, keeper_added.then_some(keeper));
            }
        }

        if let Some(k) = self.map_point_mut(keeper) {
            k.increase_visible(visible);
            k.increase_found(found);
        }
        self.compute_distinctive_descriptors(keeper);
        self.update_map_point_normal_and_depth(keeper);
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Map Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Pick the observation descriptor with the least median distance to the
    /// others as the landmark's representative descriptor.
    ///
    /// Returns false if the landmark is dead or has no observations.
    pub fn compute_distinctive_descriptors(&mut self, mp_id: MapPointId) -> bool {
        let mut observations: Vec<(KeyFrameId, usize)> = match self.map_point(mp_id) {
            Some(mp) if !mp.is_bad => mp.observations.iter().map(|(&kf, &idx)| (kf, idx)).collect(),
            _ => return false,
        };
        observations.sort_unstable();
        let descriptors: Vec<Descriptor> = observations
            .into_iter()
            .filter_map(|(kf_id, idx)| {
                self.keyframe(kf_id)
                    .filter(|kf| !kf.is_bad && idx < kf.features.len())
                    .map(|kf| *kf.features.descriptor(idx))
            })
            .collect();
        if descriptors.is_empty() {
            return false;
        }

        let n = descriptors.len();
        let mut best_median = u32::MAX;
        let mut best_idx = 0;
        for (i, di) in descriptors.iter().enumerate() {
            let mut dists: Vec<u32> = descriptors
                .iter()
                .map(|dj| descriptor_distance(di, dj))
                .collect();
            dists.sort_unstable();
            let median = dists[(n - 1) / 2];
            if median < best_median {
                best_median = median;
                best_idx = i;
            }
        }

        if let Some(mp) = self.map_point_mut(mp_id) {
            mp.descriptor = descriptors[best_idx];
        }
        true
    }

    /// Recompute mean viewing direction and scale-invariance distances from
    /// the current observers. Should be called after observations change.
    pub fn update_map_point_normal_and_depth(&mut self, mp_id: MapPointId) {
        let Some(mp) = self.map_point(mp_id).filter(|mp| !mp.is_bad) else {
            return;
        };
        let centers: Vec<Vector3<f64>> = mp
            .observations
            .keys()
            .filter_map(|&kf_id| self.keyframe(kf_id))
            .map(|kf| kf.center())
            .collect();
        let reference = mp.index_in_keyframe(mp.ref_kf_id).and_then(|idx| {
            self.keyframe(mp.ref_kf_id)
                .filter(|kf| idx < kf.features.len())
                .map(|kf| (kf.center(), kf.features.keypoint(idx).octave, kf.pyramid.clone()))
        });
        let Some((ref_center, ref_octave, pyramid)) = reference else {
            return;
        };

        if let Some(mp) = self.map_point_mut(mp_id) {
            mp.update_normal_and_depth(centers.into_iter(), &ref_center, ref_octave, &pyramid);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deferred edits
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one edit, re-validating it against the current state.
    pub fn apply_edit(&mut self, edit: &MapEdit) -> EditOutcome {
        let mut outcome = EditOutcome::default();
        match *edit {
            MapEdit::Fuse {
                kf_id,
                feature_idx,
                map_point_id,
            } => {
                let Some(candidate) = self.resolve(map_point_id) else {
                    tracing::warn!("[ApplyEdits] {} no longer exists", map_point_id);
                    outcome.skipped += 1;
                    return outcome;
                };
                let usable = self
                    .keyframe(kf_id)
                    .filter(|kf| !kf.is_bad && feature_idx < kf.map_point_ids.len());
                let already_seen = self
                    .map_point(candidate)
                    .is_some_and(|mp| mp.is_in_keyframe(kf_id));
                let Some(kf) = usable.filter(|_| !already_seen) else {
                    outcome.skipped += 1;
                    return outcome;
                };

                let occupant = kf.get_map_point(feature_idx).and_then(|id| self.resolve(id));
                match occupant {
                    Some(existing) => {
                        let existing_obs = self.map_point(existing).map_or(0, |mp| mp.num_observations());
                        let candidate_obs = self.map_point(candidate).map_or(0, |mp| mp.num_observations());
                        let merged = if existing_obs > candidate_obs {
                            self.replace_map_point(candidate, existing)
                        } else {
                            self.replace_map_point(existing, candidate)
                        };
                        if merged {
                            outcome.fused += 1;
                        } else {
                            outcome.skipped += 1;
                        }
                    }
                    None => {
                        if self.associate(kf_id, feature_idx, candidate) {
                            self.compute_distinctive_descriptors(candidate);
                            self.update_map_point_normal_and_depth(candidate);
                            outcome.added += 1;
                        } else {
                            outcome.skipped += 1;
                        }
                    }
                }
            }
            MapEdit::Replace { goner, keeper } => {
                let resolved = self.resolve(goner).zip(self.resolve(keeper));
                match resolved {
                    Some((g, k)) if self.replace_map_point(g, k) => outcome.fused += 1,
                    _ => outcome.skipped += 1,
                }
            }
        }
        outcome
    }

    /// Apply a batch of edits in order.
    pub fn apply_edits(&mut self, edits: &[MapEdit]) -> EditOutcome {
        let mut outcome = EditOutcome::default();
        for edit in edits {
            outcome += self.apply_edit(edit);
        }
        tracing::debug!(
            "[ApplyEdits] {} edits: {} added, {} fused, {} skipped",
            edits.len(),
            outcome.added,
            outcome.fused,
            outcome.skipped
        );
        outcome
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("num_keyframes", &self.num_keyframes())
            .field("num_map_points", &self.num_map_points())
            .finish()
    }
}
