//! Landmark fusion.
//!
//! Candidate landmarks are projected into a KeyFrame; when one lands on a
//! keypoint with a matching descriptor it is either attached to that
//! keypoint or, if the keypoint already holds a landmark, the two are merged.
//! The search ([`OrbMatcher::plan_fusion`]) only reads the map and emits
//! [`MapEdit`]s; [`Map::apply_edits`] performs the merge.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::atlas::map::{KeyFrame, KeyFrameId, Map, MapEdit, MapPointId};
use crate::geometry::Sim3;
use crate::tracking::frame::FeatureView;

use super::projection::{project_landmark, MAX_VIEW_COS};
use super::{descriptor_distance, BestTwo, OrbMatcher, SearchPrior, TH_LOW};

/// Chi-squared 95% bound with 2 DOF (monocular reprojection error).
const CHI2_2DOF_95: f64 = 5.99;
/// Chi-squared 95% bound with 3 DOF (stereo reprojection error).
const CHI2_3DOF_95: f64 = 7.8;

/// Search radii used when fusing neighbor landmarks into a KeyFrame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Radius multiplier for [`OrbMatcher::fuse`].
    pub radius_threshold: f64,
    /// Radius multiplier for [`OrbMatcher::fuse_sim3`].
    pub sim3_radius_threshold: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            radius_threshold: 3.0,
            sim3_radius_threshold: 4.0,
        }
    }
}

/// A candidate landmark that found a keypoint in the target KeyFrame.
#[derive(Debug, Clone, Copy)]
struct FusionHit {
    candidate: usize,
    feature_idx: usize,
    map_point_id: MapPointId,
}

impl OrbMatcher {
    /// Search which candidates should be fused into `kf`, without touching the map.
    ///
    /// Candidates the KeyFrame already observes are skipped. A hit must pass
    /// the reprojection chi-squared test (`5.99` mono, `7.8` with a stereo
    /// measurement) and have descriptor distance `<= TH_LOW`.
    pub fn plan_fusion(&self, kf: &KeyFrame, map: &Map, candidates: &[MapPointId], th: f64) -> Vec<MapEdit> {
        let hits = self.fusion_hits(kf, map, candidates, &SearchPrior::None, th, true);
        hits.into_iter()
            .map(|hit| MapEdit::Fuse {
                kf_id: kf.id,
                feature_idx: hit.feature_idx,
                map_point_id: hit.map_point_id,
            })
            .collect()
    }

    /// Fuse candidates into KeyFrame `kf_id`. Returns the number of
    /// associations added or merged; repeating the call is a no-op.
    pub fn fuse(&self, map: &mut Map, kf_id: KeyFrameId, candidates: &[MapPointId], th: f64) -> usize {
        let Some(kf) = map.keyframe(kf_id) else {
            return 0;
        };
        let edits = self.plan_fusion(kf, map, candidates, th);
        let applied = map.apply_edits(&edits).applied();
        tracing::debug!("[Fuse] {} candidates into {}: {} fused", candidates.len(), kf_id, applied);
        applied
    }

    /// Fuse with a similarity prior `S_cw` during loop correction.
    ///
    /// Hits on empty keypoints are attached right away. Hits on occupied
    /// keypoints are not merged: the occupying landmark is reported in the
    /// returned list (one entry per candidate) and the caller decides.
    /// Returns the number of hits and the replacement list.
    pub fn fuse_sim3(
        &self,
        map: &mut Map,
        kf_id: KeyFrameId,
        s_cw: &Sim3,
        candidates: &[MapPointId],
        th: f64,
    ) -> (usize, Vec<Option<MapPointId>>) {
        let mut replace = vec![None; candidates.len()];
        let Some(kf) = map.keyframe(kf_id) else {
            return (0, replace);
        };
        let prior = SearchPrior::Similarity(s_cw.clone());
        let hits = self.fusion_hits(kf, map, candidates, &prior, th, false);
        let occupants: Vec<Option<MapPointId>> = hits
            .iter()
            .map(|hit| {
                kf.get_map_point(hit.feature_idx)
                    .and_then(|id| map.map_point(id))
                    .filter(|mp| mp.is_valid())
                    .map(|mp| mp.id)
            })
            .collect();

        let mut n_fused = 0;
        for (hit, occupant) in hits.iter().zip(occupants) {
            match occupant {
                Some(existing) => {
                    replace[hit.candidate] = Some(existing);
                    n_fused += 1;
                }
                None => {
                    if map.associate(kf_id, hit.feature_idx, hit.map_point_id) {
                        n_fused += 1;
                    }
                }
            }
        }

        tracing::debug!("[Fuse] Sim3 into {}: {} fused", kf_id, n_fused);
        (n_fused, replace)
    }

    fn fusion_hits(
        &self,
        kf: &KeyFrame,
        map: &Map,
        candidates: &[MapPointId],
        prior: &SearchPrior,
        th: f64,
        check_reprojection: bool,
    ) -> Vec<FusionHit> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();

        for (candidate, &mp_id) in candidates.iter().enumerate() {
            if !seen.insert(mp_id) {
                continue;
            }
            let Some(mp) = map.map_point(mp_id) else {
                continue;
            };
            if mp.is_in_keyframe(kf.id) {
                continue;
            }
            let Some(proj) = project_landmark(kf, mp, prior) else {
                continue;
            };
            if proj.view_cos < MAX_VIEW_COS {
                continue;
            }

            let level = proj.predicted_level;
            let r = th * kf.pyramid.scale(level);
            let indices = kf.features_in_area(proj.u, proj.v, r, None, None);

            let mut best = BestTwo::new();
            for idx in indices {
                let kp = kf.keypoint(idx);
                if kp.octave + 1 < level || kp.octave > level {
                    continue;
                }

                if check_reprojection {
                    let ex = proj.u - kp.pt.x;
                    let ey = proj.v - kp.pt.y;
                    let inv_sigma2 = kf.pyramid.inv_sigma2(kp.octave);
                    let within = match (kf.u_right(idx), proj.u_right) {
                        (Some(ur), Some(proj_ur)) => {
                            let er = proj_ur - ur;
                            (ex * ex + ey * ey + er * er) * inv_sigma2 < CHI2_3DOF_95
                        }
                        _ => (ex * ex + ey * ey) * inv_sigma2 < CHI2_2DOF_95,
                    };
                    if !within {
                        continue;
                    }
                }

                best.offer(idx, descriptor_distance(&mp.descriptor, kf.descriptor(idx)), kp.octave);
            }

            if let Some(feature_idx) = best.best_idx.filter(|_| best.best <= TH_LOW) {
                hits.push(FusionHit {
                    candidate,
                    feature_idx,
                    map_point_id: mp_id,
                });
            }
        }

        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::test_support::{lattice_points, observing_frame, random_descriptors, scene_with_keyframe};
    use nalgebra::{Matrix3, Vector3};

    fn shifted(x: f64) -> SE3 {
        SE3::from_rt(Matrix3::identity(), Vector3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_duplicate_keeps_landmark_with_more_observations() {
        let points = lattice_points(10);
        let descs = random_descriptors(10, 51);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());

        // A duplicate of point 0 observed by two other KeyFrames.
        let kf_b = scene.map.create_keyframe(&observing_frame(&points, &descs, &shifted(0.1))).unwrap();
        let kf_c = scene.map.create_keyframe(&observing_frame(&points, &descs, &shifted(0.2))).unwrap();
        let dup = scene.map.create_map_point(points[0], descs[0], kf_b);
        assert!(scene.map.associate(kf_b, 0, dup));
        assert!(scene.map.associate(kf_c, 0, dup));
        scene.map.update_map_point_normal_and_depth(dup);

        let matcher = OrbMatcher::default();
        let n = matcher.fuse(&mut scene.map, scene.kf, &[dup], 3.0);
        assert_eq!(n, 1);

        let original = scene.map.map_point(scene.landmarks[0]).unwrap();
        assert!(original.is_bad);
        assert_eq!(original.replaced_by, Some(dup));
        assert_eq!(scene.map.resolve(scene.landmarks[0]), Some(dup));

        let survivor = scene.map.map_point(dup).unwrap();
        assert_eq!(survivor.num_observations(), 3);
        assert_eq!(scene.map.keyframe(scene.kf).unwrap().get_map_point(0), Some(dup));
        let referencing = scene
            .map
            .map_points()
            .filter(|mp| mp.index_in_keyframe(scene.kf) == Some(0))
            .count();
        assert_eq!(referencing, 1);
    }

    #[test]
    fn test_fusion_is_idempotent() {
        let points = lattice_points(10);
        let descs = random_descriptors(10, 52);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        // Free slot 4 and offer a fresh landmark for it.
        scene.map.disassociate(scene.kf, 4);
        let fresh = scene.map.create_map_point(points[4], descs[4], scene.kf);

        let matcher = OrbMatcher::default();
        let mut candidates: Vec<MapPointId> = scene
            .landmarks
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != 4)
            .map(|(_, &id)| id)
            .collect();
        candidates.push(fresh);
        // Everything else is already observed by the KeyFrame.
        assert_eq!(matcher.fuse(&mut scene.map, scene.kf, &candidates, 3.0), 1);
        let slots = scene.map.keyframe(scene.kf).unwrap().map_point_ids.clone();

        assert_eq!(matcher.fuse(&mut scene.map, scene.kf, &candidates, 3.0), 0);
        assert_eq!(scene.map.keyframe(scene.kf).unwrap().map_point_ids, slots);
        assert!(scene.map.map_point(fresh).unwrap().is_in_keyframe(scene.kf));
    }

    #[test]
    fn test_reprojection_error_rejects_offset_candidate() {
        let points = lattice_points(10);
        let descs = random_descriptors(10, 53);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());

        // 3 px to the right of keypoint 2 at level 0: 9 > 5.99.
        let depth = points[2].z;
        let offset = points[2] + Vector3::new(3.0 * depth / 500.0, 0.0, 0.0);
        let candidate = scene.map.create_map_point(offset, descs[2], scene.kf);

        let kf = scene.map.keyframe(scene.kf).unwrap();
        assert!(OrbMatcher::default().plan_fusion(kf, &scene.map, &[candidate], 5.0).is_empty());

        // Without the reprojection test the same candidate hits keypoint 2.
        let (n, replace) = OrbMatcher::default().fuse_sim3(
            &mut scene.map,
            scene.kf,
            &Sim3::identity(),
            &[candidate],
            5.0,
        );
        assert_eq!(n, 1);
        assert_eq!(replace, vec![Some(scene.landmarks[2])]);
        assert!(!scene.map.map_point(scene.landmarks[2]).unwrap().is_bad);
    }

    #[test]
    fn test_sim3_fusion_attaches_to_empty_slots() {
        let points = lattice_points(10);
        let descs = random_descriptors(10, 54);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        scene.map.disassociate(scene.kf, 6);
        let fresh = scene.map.create_map_point(points[6], descs[6], scene.kf);

        let (n, replace) = OrbMatcher::default().fuse_sim3(
            &mut scene.map,
            scene.kf,
            &Sim3::from_rts(Matrix3::identity(), Vector3::zeros(), 1.5),
            &[fresh],
            4.0,
        );
        assert_eq!(n, 1);
        assert_eq!(replace, vec![None]);
        assert_eq!(scene.map.keyframe(scene.kf).unwrap().get_map_point(6), Some(fresh));
    }
}
