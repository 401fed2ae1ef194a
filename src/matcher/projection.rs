//! Projection-guided search.
//!
//! A landmark is transformed into the target camera with a [`SearchPrior`],
//! projected, and matched against keypoints found by a grid query around
//! the projection. The search radius grows with the predicted pyramid level.

use std::collections::HashSet;

use nalgebra::Vector3;

use crate::atlas::map::{KeyFrame, Map, MapPoint, MapPointId};
use crate::geometry::Sim3;
use crate::tracking::frame::FeatureView;
use crate::tracking::tracking_frame::Frame;

use super::{descriptor_distance, BestTwo, OrbMatcher, RotationHistogram, SearchPrior, TH_HIGH, TH_LOW};

/// Landmarks viewed more than 60° away from their mean direction are not searched.
pub const MAX_VIEW_COS: f64 = 0.5;

/// A landmark projected into a view.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkProjection {
    pub u: f64,
    pub v: f64,
    /// Projection into the right image (stereo cameras only).
    pub u_right: Option<f64>,
    /// Point in the target camera frame.
    pub p_cam: Vector3<f64>,
    /// Distance from the camera center to the landmark.
    pub distance: f64,
    /// Cosine between the viewing ray and the landmark's mean viewing direction.
    pub view_cos: f64,
    pub predicted_level: usize,
}

/// Base search radius (before threshold and level scaling) for a viewing cosine.
pub fn radius_by_viewing_cos(view_cos: f64) -> f64 {
    if view_cos > 0.998 {
        2.5
    } else {
        4.0
    }
}

/// Project a landmark into `view` using `prior`.
///
/// Returns None if the landmark is dead or has a non-finite position, the
/// prior cannot be resolved (view without pose), or the point falls behind
/// the camera, outside the image, or outside its scale-invariance range.
/// The viewing angle is reported, not checked.
pub fn project_landmark<V: FeatureView + ?Sized>(
    view: &V,
    mp: &MapPoint,
    prior: &SearchPrior,
) -> Option<LandmarkProjection> {
    if !mp.is_valid() {
        return None;
    }
    let t_cw = prior.pose_cw(view)?;
    let camera = view.camera();

    let p_cam = t_cw.transform_point(&mp.position);
    let px = camera.project(&p_cam)?;
    if !camera.is_in_image(px.x, px.y) {
        return None;
    }

    let center = -(t_cw.rotation.inverse() * t_cw.translation);
    let ray = mp.position - center;
    let distance = ray.norm();
    if !mp.is_in_distance_range(distance) {
        return None;
    }

    // A landmark whose direction was never computed counts as seen head-on.
    let view_cos = if mp.normal.norm_squared() > 0.0 {
        ray.dot(&mp.normal) / distance
    } else {
        1.0
    };

    let u_right = (camera.baseline > 0.0).then(|| px.x - camera.bf() / p_cam.z);

    Some(LandmarkProjection {
        u: px.x,
        v: px.y,
        u_right,
        p_cam,
        distance,
        view_cos,
        predicted_level: mp.predict_scale(distance, view.pyramid()),
    })
}

impl OrbMatcher {
    /// Match local-map landmarks into a Frame using the Frame's pose.
    ///
    /// Frame slots already holding an observed landmark are not overwritten.
    /// Candidates must be seen within 60° of their mean viewing direction.
    /// The ratio test applies only when best and second-best lie on the same
    /// octave. Returns the number of new matches.
    pub fn search_by_projection(
        &self,
        frame: &mut Frame,
        map: &Map,
        candidates: &[MapPointId],
        th: f64,
    ) -> usize {
        let n_matches = self.project_local_map(frame, map, candidates, th, false);
        tracing::debug!(
            "[SearchByProjection] {} candidates -> {} matches",
            candidates.len(),
            n_matches
        );
        n_matches
    }

    /// [`Self::search_by_projection`] restricted to keypoints with a stereo
    /// measurement: the landmark's predicted right-image coordinate must lie
    /// within the search radius of the measured one and the keypoint must
    /// carry a positive depth. Monocular frames yield no matches.
    pub fn search_by_projection_stereo(
        &self,
        frame: &mut Frame,
        map: &Map,
        candidates: &[MapPointId],
        th: f64,
    ) -> usize {
        if frame.camera.baseline <= 0.0 {
            return 0;
        }
        let n_matches = self.project_local_map(frame, map, candidates, th, true);
        tracing::debug!(
            "[SearchByProjection] stereo, {} candidates -> {} matches",
            candidates.len(),
            n_matches
        );
        n_matches
    }

    fn project_local_map(
        &self,
        frame: &mut Frame,
        map: &Map,
        candidates: &[MapPointId],
        th: f64,
        stereo_only: bool,
    ) -> usize {
        let already: HashSet<MapPointId> = frame.map_point_matches.iter().flatten().copied().collect();
        let mut seen = HashSet::new();
        let mut filled = vec![false; frame.num_features()];
        let mut n_matches = 0;

        for &mp_id in candidates {
            if already.contains(&mp_id) || !seen.insert(mp_id) {
                continue;
            }
            let Some(mp) = map.map_point(mp_id) else {
                continue;
            };
            let Some(proj) = frame.is_in_frustum(mp, MAX_VIEW_COS) else {
                continue;
            };
            if stereo_only && proj.u_right.is_none() {
                continue;
            }

            let level = proj.predicted_level;
            let r = radius_by_viewing_cos(proj.view_cos) * th * frame.pyramid.scale(level);
            let indices = frame.features_in_area(proj.u, proj.v, r, Some(level.saturating_sub(1)), Some(level));
            if indices.is_empty() {
                continue;
            }

            let mut best = BestTwo::new();
            for idx in indices {
                if filled[idx] {
                    continue;
                }
                let occupied = frame.map_point_matches[idx]
                    .and_then(|id| map.map_point(id))
                    .is_some_and(|other| other.num_observations() > 0);
                if occupied {
                    continue;
                }
                if stereo_only && !frame.depth[idx].is_some_and(|d| d > 0.0) {
                    continue;
                }
                match (frame.u_right(idx), proj.u_right) {
                    (Some(ur), Some(proj_ur)) if (proj_ur - ur).abs() > r => continue,
                    (None, _) if stereo_only => continue,
                    _ => {}
                }
                let dist = descriptor_distance(&mp.descriptor, frame.descriptor(idx));
                best.offer(idx, dist, frame.keypoint(idx).octave);
            }

            let Some(best_idx) = best.best_idx else {
                continue;
            };
            if best.best > TH_HIGH {
                continue;
            }
            if best.best_level == best.second_level
                && (best.best as f32) > self.nn_ratio * best.second as f32
            {
                continue;
            }
            frame.map_point_matches[best_idx] = Some(mp_id);
            filled[best_idx] = true;
            n_matches += 1;
        }

        n_matches
    }

    /// Track the previous frame's landmarks into the current frame.
    ///
    /// The current frame's pose must already hold a prediction (see
    /// [`crate::tracking::MotionModel::seed`]). For stereo cameras, motion
    /// along the optical axis larger than the baseline restricts the octave
    /// window: moving forward, landmarks appear at the same or finer octaves
    /// than before; moving backward, at the same or coarser ones.
    pub fn search_by_projection_from_last_frame(
        &self,
        current: &mut Frame,
        last: &Frame,
        map: &Map,
        th: f64,
    ) -> usize {
        let (Some(t_cw), Some(t_lw)) = (current.pose_cw(), last.pose_cw()) else {
            return 0;
        };
        let stereo = current.camera.baseline > 0.0;
        let current_center = current.camera_center().unwrap_or_else(Vector3::zeros);
        let t_lc = t_lw.transform_point(&current_center);
        let forward = stereo && t_lc.z > current.camera.baseline;
        let backward = stereo && -t_lc.z > current.camera.baseline;

        let mut rot_hist = RotationHistogram::new();
        let mut filled = vec![false; current.num_features()];
        let mut n_matches = 0;

        for (i, slot) in last.map_point_matches.iter().enumerate() {
            let Some(mp_id) = *slot else {
                continue;
            };
            if last.outliers[i] {
                continue;
            }
            let Some(mp) = map.map_point(mp_id).filter(|mp| mp.is_valid()) else {
                continue;
            };

            let p_cam = t_cw.transform_point(&mp.position);
            let Some(px) = current.camera.project(&p_cam) else {
                continue;
            };
            if !current.camera.is_in_image(px.x, px.y) {
                continue;
            }

            let last_octave = last.keypoint(i).octave;
            let r = th * current.pyramid.scale(last_octave);
            let indices = if forward {
                current.features_in_area(px.x, px.y, r, Some(last_octave), None)
            } else if backward {
                current.features_in_area(px.x, px.y, r, Some(0), Some(last_octave))
            } else {
                current.features_in_area(
                    px.x,
                    px.y,
                    r,
                    Some(last_octave.saturating_sub(1)),
                    Some(last_octave + 1),
                )
            };

            let mut best = BestTwo::new();
            for idx in indices {
                if filled[idx] {
                    continue;
                }
                let occupied = current.map_point_matches[idx]
                    .and_then(|id| map.map_point(id))
                    .is_some_and(|other| other.num_observations() > 0);
                if occupied {
                    continue;
                }
                if let Some(ur) = current.u_right(idx) {
                    let proj_ur = px.x - current.camera.bf() / p_cam.z;
                    if (proj_ur - ur).abs() > r {
                        continue;
                    }
                }
                let dist = descriptor_distance(&mp.descriptor, current.descriptor(idx));
                best.offer(idx, dist, current.keypoint(idx).octave);
            }

            if let Some(best_idx) = best.best_idx.filter(|_| best.best <= TH_HIGH) {
                current.map_point_matches[best_idx] = Some(mp_id);
                filled[best_idx] = true;
                n_matches += 1;
                if self.check_orientation {
                    rot_hist.add(last.keypoint(i).angle, current.keypoint(best_idx).angle, best_idx);
                }
            }
        }

        if self.check_orientation {
            for idx in rot_hist.outliers() {
                if current.map_point_matches[idx].take().is_some() {
                    n_matches -= 1;
                }
            }
        }

        tracing::debug!(
            "[SearchByProjection] last frame ({}): {} matches",
            if forward {
                "forward"
            } else if backward {
                "backward"
            } else {
                "lateral"
            },
            n_matches
        );
        n_matches
    }

    /// Relocalisation: project a KeyFrame's landmarks into a Frame using the
    /// Frame's pose, skipping `already_found`. Only empty Frame slots are
    /// filled; `orb_dist` bounds the accepted distance.
    pub fn search_by_projection_keyframe(
        &self,
        frame: &mut Frame,
        kf: &KeyFrame,
        map: &Map,
        already_found: &HashSet<MapPointId>,
        th: f64,
        orb_dist: u32,
    ) -> usize {
        if frame.pose.is_none() {
            return 0;
        }
        let mut rot_hist = RotationHistogram::new();
        let mut n_matches = 0;

        for (i, slot) in kf.map_point_ids.iter().enumerate() {
            let Some(mp_id) = *slot else {
                continue;
            };
            if already_found.contains(&mp_id) {
                continue;
            }
            let Some(mp) = map.map_point(mp_id) else {
                continue;
            };
            let Some(proj) = project_landmark(frame, mp, &SearchPrior::None) else {
                continue;
            };

            let level = proj.predicted_level;
            let r = th * frame.pyramid.scale(level);
            let indices = frame.features_in_area(
                proj.u,
                proj.v,
                r,
                Some(level.saturating_sub(1)),
                Some(level + 1),
            );

            let mut best = BestTwo::new();
            for idx in indices {
                if frame.map_point_matches[idx].is_some() {
                    continue;
                }
                let dist = descriptor_distance(&mp.descriptor, frame.descriptor(idx));
                best.offer(idx, dist, frame.keypoint(idx).octave);
            }

            if let Some(best_idx) = best.best_idx.filter(|_| best.best <= orb_dist) {
                frame.map_point_matches[best_idx] = Some(mp_id);
                n_matches += 1;
                if self.check_orientation {
                    rot_hist.add(kf.keypoint(i).angle, frame.keypoint(best_idx).angle, best_idx);
                }
            }
        }

        if self.check_orientation {
            for idx in rot_hist.outliers() {
                if frame.map_point_matches[idx].take().is_some() {
                    n_matches -= 1;
                }
            }
        }

        tracing::debug!("[SearchByProjection] relocalisation against {}: {} matches", kf.id, n_matches);
        n_matches
    }

    /// Project candidates into a KeyFrame with a similarity `S_cw` (loop
    /// detection). `matched` holds one slot per KeyFrame keypoint; landmarks
    /// already in it are not searched again and occupied slots are kept.
    pub fn search_by_projection_sim3(
        &self,
        kf: &KeyFrame,
        map: &Map,
        s_cw: &Sim3,
        candidates: &[MapPointId],
        matched: &mut [Option<MapPointId>],
        th: f64,
    ) -> usize {
        assert_eq!(matched.len(), kf.num_features(), "one slot per keypoint");

        let prior = SearchPrior::Similarity(s_cw.clone());
        let mut already: HashSet<MapPointId> = matched.iter().flatten().copied().collect();
        let mut n_matches = 0;

        for &mp_id in candidates {
            if already.contains(&mp_id) {
                continue;
            }
            let Some(mp) = map.map_point(mp_id) else {
                continue;
            };
            let Some(proj) = project_landmark(kf, mp, &prior) else {
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
                if matched[idx].is_some() {
                    continue;
                }
                let kp_level = kf.keypoint(idx).octave;
                if kp_level + 1 < level || kp_level > level {
                    continue;
                }
                let dist = descriptor_distance(&mp.descriptor, kf.descriptor(idx));
                best.offer(idx, dist, kp_level);
            }

            if let Some(best_idx) = best.best_idx.filter(|_| best.best <= TH_LOW) {
                matched[best_idx] = Some(mp_id);
                already.insert(mp_id);
                n_matches += 1;
            }
        }

        tracing::debug!("[SearchByProjection] Sim3 into {}: {} matches", kf.id, n_matches);
        n_matches
    }
}
