//! Mutual projection between two KeyFrames under a similarity transform.
//!
//! Used to register a loop candidate: landmarks of each KeyFrame are
//! projected into the other through `S12` / `S21` and only pairs found in
//! both directions are kept.

use nalgebra::Vector3;

use crate::atlas::map::{KeyFrame, Map, MapPointId};
use crate::geometry::{Sim3, SE3};
use crate::tracking::frame::FeatureView;

use super::{descriptor_distance, BestTwo, OrbMatcher, TH_HIGH};

impl OrbMatcher {
    /// Extend `matches12` (one slot per `kf1` keypoint, holding a `kf2`
    /// landmark) with mutual projection matches.
    ///
    /// `s12` maps camera-2 coordinates into camera 1. Slots already set in
    /// `matches12`, and the `kf2` keypoints holding those landmarks, are not
    /// searched. Returns the number of new matches.
    pub fn search_by_sim3(
        &self,
        kf1: &KeyFrame,
        kf2: &KeyFrame,
        map: &Map,
        matches12: &mut [Option<MapPointId>],
        s12: &Sim3,
        th: f64,
    ) -> usize {
        assert_eq!(matches12.len(), kf1.num_features(), "one slot per kf1 keypoint");

        let s21 = s12.inverse();
        let t1w = kf1.pose.inverse();
        let t2w = kf2.pose.inverse();

        let already1: Vec<bool> = matches12.iter().map(|m| m.is_some()).collect();
        let mut already2 = vec![false; kf2.num_features()];
        for mp in matches12.iter().flatten().filter_map(|&id| map.map_point(id)) {
            if let Some(idx2) = mp.index_in_keyframe(kf2.id) {
                if let Some(flag) = already2.get_mut(idx2) {
                    *flag = true;
                }
            }
        }

        let match1 = project_into(kf1, kf2, map, &t1w, &s21, &already1, th);
        let match2 = project_into(kf2, kf1, map, &t2w, s12, &already2, th);

        let mut n_found = 0;
        for (i1, m) in match1.iter().enumerate() {
            let Some(i2) = *m else {
                continue;
            };
            if match2[i2] == Some(i1) {
                matches12[i1] = kf2.get_map_point(i2);
                n_found += 1;
            }
        }

        tracing::debug!("[SearchBySim3] {} <-> {}: {} mutual matches", kf1.id, kf2.id, n_found);
        n_found
    }
}

/// Project the landmarks of `src` into `dst`: world -> src camera via `t_src_w`,
/// then src camera -> dst camera via `s_dst_src`. Returns the best `dst`
/// keypoint per `src` keypoint.
fn project_into(
    src: &KeyFrame,
    dst: &KeyFrame,
    map: &Map,
    t_src_w: &SE3,
    s_dst_src: &Sim3,
    skip: &[bool],
    th: f64,
) -> Vec<Option<usize>> {
    let mut out = vec![None; src.num_features()];

    for (i, slot) in src.map_point_ids.iter().enumerate() {
        if skip[i] {
            continue;
        }
        let Some(mp) = slot.and_then(|id| map.map_point(id)).filter(|mp| mp.is_valid()) else {
            continue;
        };

        let p_src: Vector3<f64> = t_src_w.transform_point(&mp.position);
        let p_dst = s_dst_src.transform_point(&p_src);
        let Some(px) = dst.camera.project(&p_dst) else {
            continue;
        };
        if !dst.camera.is_in_image(px.x, px.y) {
            continue;
        }
        let distance = p_dst.norm();
        if !mp.is_in_distance_range(distance) {
            continue;
        }

        let level = mp.predict_scale(distance, &dst.pyramid);
        let r = th * dst.pyramid.scale(level);
        let indices = dst.features_in_area(px.x, px.y, r, None, None);

        let mut best = BestTwo::new();
        for idx in indices {
            let kp_level = dst.keypoint(idx).octave;
            if kp_level + 1 < level || kp_level > level {
                continue;
            }
            best.offer(idx, descriptor_distance(&mp.descriptor, dst.descriptor(idx)), kp_level);
        }

        out[i] = best.best_idx.filter(|_| best.best <= TH_HIGH);
    }

    out
}
