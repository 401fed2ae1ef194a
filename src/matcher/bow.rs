//! Vocabulary-pruned search.
//!
//! Only descriptors quantized to the same vocabulary node are compared. The
//! two feature vectors are merge-joined over their sorted node ids.

use crate::atlas::map::{KeyFrame, Map, MapPointId};
use crate::tracking::frame::FeatureView;
use crate::tracking::tracking_frame::Frame;

use super::{descriptor_distance, Assignment, BestTwo, OrbMatcher, RotationHistogram, TH_LOW};

impl OrbMatcher {
    /// Match a KeyFrame's landmarks to a Frame's keypoints.
    ///
    /// Returns the match count and, per Frame keypoint, the KeyFrame landmark
    /// it was matched to. Both views need feature vectors; otherwise no
    /// matches are found.
    pub fn search_by_bow_frame(&self, kf: &KeyFrame, frame: &Frame, map: &Map) -> (usize, Vec<Option<MapPointId>>) {
        let mut matches = vec![None; frame.num_features()];
        let (Some(fv_kf), Some(fv_frame)) = (kf.feature_vector(), frame.feature_vector()) else {
            return (0, matches);
        };

        let mut assignment = Assignment::new(kf.num_features(), frame.num_features());
        for (_, kf_indices, frame_indices) in fv_kf.shared_nodes(fv_frame) {
            for &i_kf in kf_indices {
                let alive = kf
                    .get_map_point(i_kf)
                    .and_then(|id| map.map_point(id))
                    .is_some_and(|mp| mp.is_valid());
                if !alive {
                    continue;
                }
                let d_kf = kf.descriptor(i_kf);

                let mut best = BestTwo::new();
                for &i_f in frame_indices {
                    let dist = descriptor_distance(d_kf, frame.descriptor(i_f));
                    if assignment.held_distance(i_f).is_some_and(|held| held <= dist) {
                        continue;
                    }
                    best.offer(i_f, dist, frame.keypoint(i_f).octave);
                }

                if let Some(i_f) = best.best_idx {
                    if best.best <= TH_LOW && Self::passes_ratio(best.best, best.second, self.nn_ratio) {
                        assignment.claim(i_kf, i_f, best.best);
                    }
                }
            }
        }

        self.filter_orientation(&mut assignment, kf, frame);

        for (i_kf, i_f) in assignment.pairs() {
            matches[i_f] = kf.get_map_point(i_kf);
        }
        let n_matches = assignment.num_matches();
        tracing::debug!("[SearchByBoW] {} -> frame: {} matches", kf.id, n_matches);
        (n_matches, matches)
    }

    /// Match landmarks of two KeyFrames.
    ///
    /// Returns the match count and, per `kf1` keypoint, the `kf2` landmark it
    /// was matched to. Both keypoints need a live landmark. The distance bound
    /// is strict here (`< TH_LOW`), unlike the KeyFrame to Frame search.
    pub fn search_by_bow_keyframes(
        &self,
        kf1: &KeyFrame,
        kf2: &KeyFrame,
        map: &Map,
    ) -> (usize, Vec<Option<MapPointId>>) {
        let mut matches = vec![None; kf1.num_features()];
        let (Some(fv1), Some(fv2)) = (kf1.feature_vector(), kf2.feature_vector()) else {
            return (0, matches);
        };
        let alive = |kf: &KeyFrame, idx: usize| {
            kf.get_map_point(idx)
                .and_then(|id| map.map_point(id))
                .is_some_and(|mp| mp.is_valid())
        };

        let mut assignment = Assignment::new(kf1.num_features(), kf2.num_features());
        for (_, indices1, indices2) in fv1.shared_nodes(fv2) {
            for &i1 in indices1 {
                if !alive(kf1, i1) {
                    continue;
                }
                let d1 = kf1.descriptor(i1);

                let mut best = BestTwo::new();
                for &i2 in indices2 {
                    if !alive(kf2, i2) {
                        continue;
                    }
                    let dist = descriptor_distance(d1, kf2.descriptor(i2));
                    if assignment.held_distance(i2).is_some_and(|held| held <= dist) {
                        continue;
                    }
                    best.offer(i2, dist, kf2.keypoint(i2).octave);
                }

                if let Some(i2) = best.best_idx {
                    if best.best < TH_LOW && Self::passes_ratio(best.best, best.second, self.nn_ratio) {
                        assignment.claim(i1, i2, best.best);
                    }
                }
            }
        }

        self.filter_orientation(&mut assignment, kf1, kf2);

        for (i1, i2) in assignment.pairs() {
            matches[i1] = kf2.get_map_point(i2);
        }
        let n_matches = assignment.num_matches();
        tracing::debug!("[SearchByBoW] {} <-> {}: {} matches", kf1.id, kf2.id, n_matches);
        (n_matches, matches)
    }

    /// Drop assigned pairs whose keypoint rotation disagrees with the dominant ones.
    pub(crate) fn filter_orientation<A, B>(&self, assignment: &mut Assignment, src: &A, dst: &B)
    where
        A: FeatureView + ?Sized,
        B: FeatureView + ?Sized,
    {
        if !self.check_orientation {
            return;
        }
        let mut rot_hist = RotationHistogram::new();
        for (i_src, i_dst) in assignment.pairs() {
            rot_hist.add(src.keypoint(i_src).angle, dst.keypoint(i_dst).angle, i_src);
        }
        for i_src in rot_hist.outliers() {
            assignment.release(i_src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::test_support::{
        descriptor_with_flips, frame_from, lattice_points, observe, observing_frame, random_descriptors,
        scene_with_keyframe,
    };
    use crate::vocabulary::FeatureVector;

    fn single_node(n: usize) -> FeatureVector {
        FeatureVector::from_assignments(&vec![7; n])
    }

    #[test]
    fn test_recovers_permutation() {
        let n = 20;
        let points = lattice_points(n);
        let descs = random_descriptors(n, 11);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        // Two nodes, so some pairs are never compared.
        let nodes: Vec<u32> = (0..n as u32).map(|i| i % 2).collect();
        scene.map.keyframe_mut(scene.kf).unwrap().feature_vector = Some(FeatureVector::from_assignments(&nodes));

        let perm: Vec<usize> = (0..n).map(|i| (i * 7) % n).collect();
        let (keypoints, _) = observe(&points, &SE3::identity(), 0);
        let mut frame = frame_from(
            perm.iter().map(|&p| keypoints[p]).collect(),
            perm.iter().map(|&p| descs[p]).collect(),
            None,
        );
        let frame_nodes: Vec<u32> = perm.iter().map(|&p| nodes[p]).collect();
        frame.feature_vector = Some(FeatureVector::from_assignments(&frame_nodes));

        let kf = scene.map.keyframe(scene.kf).unwrap();
        let (count, matches) = OrbMatcher::default().search_by_bow_frame(kf, &frame, &scene.map);

        assert_eq!(count, n);
        for (i, &p) in perm.iter().enumerate() {
            assert_eq!(matches[i], Some(scene.landmarks[p]));
        }
    }

    #[test]
    fn test_lower_distance_reclaims_target() {
        let base = random_descriptors(1, 12)[0];
        let points = lattice_points(2);
        // Landmark 0 is 5 bits off, landmark 1 is exact.
        let descs = vec![descriptor_with_flips(&base, 5), base];
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        scene.map.keyframe_mut(scene.kf).unwrap().feature_vector = Some(single_node(2));

        let mut frame = frame_from(observe(&points[..1], &SE3::identity(), 0).0, vec![base], None);
        frame.feature_vector = Some(single_node(1));

        let kf = scene.map.keyframe(scene.kf).unwrap();
        let (count, matches) = OrbMatcher::default().search_by_bow_frame(kf, &frame, &scene.map);
        assert_eq!(count, 1);
        assert_eq!(matches, vec![Some(scene.landmarks[1])]);
    }

    #[test]
    fn test_orientation_outlier_removed() {
        let n = 12;
        let points = lattice_points(n);
        let descs = random_descriptors(n, 13);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        scene.map.keyframe_mut(scene.kf).unwrap().feature_vector = Some(single_node(n));

        let (mut keypoints, _) = observe(&points, &SE3::identity(), 0);
        keypoints[4].angle = 3.0;
        let mut frame = frame_from(keypoints, descs.clone(), None);
        frame.feature_vector = Some(single_node(n));

        let kf = scene.map.keyframe(scene.kf).unwrap();
        let (count, matches) = OrbMatcher::default().search_by_bow_frame(kf, &frame, &scene.map);
        assert_eq!(count, n - 1);
        assert_eq!(matches[4], None);

        let (count, _) = OrbMatcher::new(0.6, false).search_by_bow_frame(kf, &frame, &scene.map);
        assert_eq!(count, n);
    }

    #[test]
    fn test_keyframes_need_live_landmarks() {
        let n = 10;
        let points = lattice_points(n);
        let descs = random_descriptors(n, 14);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        scene.map.keyframe_mut(scene.kf).unwrap().feature_vector = Some(single_node(n));

        // Second KeyFrame at the same place with its own landmarks on slots 2..n.
        let frame = observing_frame(&points, &descs, &SE3::identity());
        let kf2_id = scene.map.create_keyframe(&frame).unwrap();
        for i in 2..n {
            let mp = scene.map.create_map_point(points[i], descs[i], kf2_id);
            scene.map.associate(kf2_id, i, mp);
        }
        scene.map.keyframe_mut(kf2_id).unwrap().feature_vector = Some(single_node(n));
        scene.map.set_map_point_bad(scene.landmarks[3]);

        let kf1 = scene.map.keyframe(scene.kf).unwrap();
        let kf2 = scene.map.keyframe(kf2_id).unwrap();
        let (count, matches) = OrbMatcher::default().search_by_bow_keyframes(kf1, kf2, &scene.map);

        // Slots 0 and 1 have no landmark in kf2, landmark 3 of kf1 is dead.
        assert_eq!(count, n - 3);
        assert_eq!(matches[0], None);
        assert_eq!(matches[3], None);
        assert_eq!(matches[5], kf2.get_map_point(5));
    }

    #[test]
    fn test_keyframe_pairs_need_distance_below_th_low() {
        let points = lattice_points(1);
        let base = random_descriptors(1, 15)[0];

        let count_with_flips = |flips: usize| {
            let mut scene = scene_with_keyframe(&points, &[base], &SE3::identity());
            scene.map.keyframe_mut(scene.kf).unwrap().feature_vector = Some(single_node(1));
            let other = descriptor_with_flips(&base, flips);
            let kf2_id = scene
                .map
                .create_keyframe(&observing_frame(&points, &[other], &SE3::identity()))
                .unwrap();
            let mp = scene.map.create_map_point(points[0], other, kf2_id);
            scene.map.associate(kf2_id, 0, mp);
            scene.map.keyframe_mut(kf2_id).unwrap().feature_vector = Some(single_node(1));

            let kf1 = scene.map.keyframe(scene.kf).unwrap();
            let kf2 = scene.map.keyframe(kf2_id).unwrap();
            let (count, _) = OrbMatcher::default().search_by_bow_keyframes(kf1, kf2, &scene.map);

            // The Frame search accepts the boundary distance.
            let mut frame = observing_frame(&points, &[other], &SE3::identity());
            frame.feature_vector = Some(single_node(1));
            let (frame_count, _) = OrbMatcher::default().search_by_bow_frame(kf1, &frame, &scene.map);
            (count, frame_count)
        };

        assert_eq!(count_with_flips(TH_LOW as usize - 1), (1, 1));
        assert_eq!(count_with_flips(TH_LOW as usize), (0, 1));
    }
}
