//! Epipolar-constrained search for new landmark candidates.

use nalgebra::Matrix3;

use crate::atlas::map::KeyFrame;
use crate::geometry::epipolar::CHI2_1DOF_95;
use crate::geometry::{epipolar_distance_sq, fundamental_matrix};
use crate::tracking::frame::FeatureView;

use super::{descriptor_distance, Assignment, BestTwo, OrbMatcher, TH_LOW};

/// Fundamental matrix `F12` between two KeyFrames (`x1^T F12 x2 = 0`).
pub fn compute_f12(kf1: &KeyFrame, kf2: &KeyFrame) -> Option<Matrix3<f64>> {
    fundamental_matrix(&kf1.pose, &kf2.pose, &kf1.camera.k_matrix(), &kf2.camera.k_matrix())
}

impl OrbMatcher {
    /// Pair keypoints of two KeyFrames that have no landmark yet.
    ///
    /// Candidates share a vocabulary node and lie near the epipolar line in
    /// `kf2`. Each `kf2` keypoint is claimed at most once; the first claim
    /// wins. With `only_stereo`, both keypoints need a stereo measurement.
    /// Returns `(kf1 index, kf2 index)` pairs ordered by `kf1` index.
    pub fn search_for_triangulation(
        &self,
        kf1: &KeyFrame,
        kf2: &KeyFrame,
        f12: &Matrix3<f64>,
        only_stereo: bool,
    ) -> Vec<(usize, usize)> {
        let (Some(fv1), Some(fv2)) = (kf1.feature_vector(), kf2.feature_vector()) else {
            return Vec::new();
        };

        // Epipole: camera 1 center seen from camera 2.
        let c1_in_2 = kf2.pose.inverse().transform_point(&kf1.center());
        let epipole = kf2.camera.project(&c1_in_2);

        let mut assignment = Assignment::new(kf1.num_features(), kf2.num_features());
        for (_, indices1, indices2) in fv1.shared_nodes(fv2) {
            for &i1 in indices1 {
                if kf1.get_map_point(i1).is_some() {
                    continue;
                }
                let stereo1 = kf1.is_stereo(i1);
                if only_stereo && !stereo1 {
                    continue;
                }
                let kp1 = kf1.keypoint(i1);
                let d1 = kf1.descriptor(i1);

                let mut best = BestTwo::new();
                for &i2 in indices2 {
                    if assignment.held_distance(i2).is_some() || kf2.get_map_point(i2).is_some() {
                        continue;
                    }
                    let stereo2 = kf2.is_stereo(i2);
                    if only_stereo && !stereo2 {
                        continue;
                    }

                    let dist = descriptor_distance(d1, kf2.descriptor(i2));
                    if dist > TH_LOW {
                        continue;
                    }

                    let kp2 = kf2.keypoint(i2);
                    let scale2 = kf2.pyramid.scale(kp2.octave);
                    if let (Some(ep), false, false) = (epipole, stereo1, stereo2) {
                        if (ep - kp2.pt).norm_squared() < 100.0 * scale2 {
                            continue;
                        }
                    }

                    let on_line = epipolar_distance_sq(f12, &kp1.pt, &kp2.pt)
                        .is_some_and(|d2| d2 < CHI2_1DOF_95 * kf2.pyramid.sigma2(kp2.octave));
                    if on_line {
                        best.offer(i2, dist, kp2.octave);
                    }
                }

                if let Some(i2) = best.best_idx {
                    if Self::passes_ratio(best.best, best.second, self.nn_ratio) {
                        assignment.claim(i1, i2, best.best);
                    }
                }
            }
        }

        self.filter_orientation(&mut assignment, kf1, kf2);

        let pairs: Vec<(usize, usize)> = assignment.pairs().collect();
        tracing::debug!("[SearchForTriangulation] {} <-> {}: {} pairs", kf1.id, kf2.id, pairs.len());
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::map::{KeyFrameId, Map};
    use crate::geometry::SE3;
    use crate::test_support::{lattice_points, observing_frame, random_descriptors};
    use crate::vocabulary::FeatureVector;
    use nalgebra::{Point2, Vector3};

    fn shifted(x: f64) -> SE3 {
        SE3::from_rt(Matrix3::identity(), Vector3::new(x, 0.0, 0.0))
    }

    fn two_keyframes(n: usize, seed: u64) -> (Map, KeyFrameId, KeyFrameId, Vec<Vector3<f64>>) {
        let points = lattice_points(n);
        let descs = random_descriptors(n, seed);
        let mut map = Map::new();
        let mut ids = Vec::new();
        for pose in [SE3::identity(), shifted(0.2)] {
            let mut frame = observing_frame(&points, &descs, &pose);
            assert_eq!(frame.num_features(), n);
            frame.feature_vector = Some(FeatureVector::from_assignments(&vec![1; n]));
            ids.push(map.create_keyframe(&frame).unwrap());
        }
        (map, ids[0], ids[1], points)
    }

    #[test]
    fn test_f12_satisfies_epipolar_constraint() {
        let (map, id1, id2, points) = two_keyframes(20, 31);
        let kf1 = map.keyframe(id1).unwrap();
        let kf2 = map.keyframe(id2).unwrap();
        let f12 = compute_f12(kf1, kf2).unwrap();

        for i in [0, 7, 19] {
            let p1 = kf1.camera.project(&kf1.pose.inverse().transform_point(&points[i])).unwrap();
            let p2 = kf2.camera.project(&kf2.pose.inverse().transform_point(&points[i])).unwrap();
            let d2 = epipolar_distance_sq(&f12, &p1, &p2).unwrap();
            assert!(d2 < 1e-9, "epipolar distance {d2}");
            assert!(epipolar_distance_sq(&f12, &p1, &Point2::new(p2.x, p2.y + 5.0)).unwrap() > 20.0);
        }
    }

    #[test]
    fn test_pairs_unmatched_keypoints_on_epipolar_lines() {
        let (mut map, id1, id2, points) = two_keyframes(20, 32);
        // Slot 3 of kf1 already has a landmark.
        let desc = *map.keyframe(id1).unwrap().descriptor(3);
        let mp = map.create_map_point(points[3], desc, id1);
        map.associate(id1, 3, mp);

        let kf1 = map.keyframe(id1).unwrap();
        let kf2 = map.keyframe(id2).unwrap();
        let f12 = compute_f12(kf1, kf2).unwrap();
        let pairs = OrbMatcher::default().search_for_triangulation(kf1, kf2, &f12, false);

        let expected: Vec<(usize, usize)> = (0..20).filter(|&i| i != 3).map(|i| (i, i)).collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_only_stereo_needs_stereo_keypoints() {
        let (map, id1, id2, _) = two_keyframes(10, 33);
        let kf1 = map.keyframe(id1).unwrap();
        let kf2 = map.keyframe(id2).unwrap();
        let f12 = compute_f12(kf1, kf2).unwrap();
        assert!(OrbMatcher::default().search_for_triangulation(kf1, kf2, &f12, true).is_empty());
    }

    #[test]
    fn test_wrong_geometry_finds_nothing() {
        let (map, id1, id2, _) = two_keyframes(10, 34);
        let kf1 = map.keyframe(id1).unwrap();
        let kf2 = map.keyframe(id2).unwrap();
        // Vertical baseline: epipolar lines become columns.
        let mut moved = kf2.clone();
        moved.pose = SE3::from_rt(Matrix3::identity(), Vector3::new(0.0, 0.2, 0.0));
        let f12 = compute_f12(kf1, &moved).unwrap();
        let pairs = OrbMatcher::default().search_for_triangulation(kf1, kf2, &f12, false);
        assert!(pairs.is_empty());
    }
}
