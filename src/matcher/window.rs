//! Window searches between two Frames.
//!
//! Used before a map exists (initialization) and for short-baseline tracking,
//! where keypoints barely move between frames and a fixed pixel window is a
//! good enough prior.

use nalgebra::Point2;

use crate::atlas::map::Map;
use crate::tracking::frame::FeatureView;
use crate::tracking::tracking_frame::Frame;

use super::{descriptor_distance, Assignment, BestTwo, OrbMatcher, TH_HIGH, TH_LOW};

impl OrbMatcher {
    /// Match keypoints of `f1` to `f2` for map initialization.
    ///
    /// `prev_matched[i1]` is where keypoint `i1` was last seen (its own
    /// position on the first call); the search looks `window` pixels around it
    /// on the keypoint's own octave. Only `f1` keypoints with an octave in
    /// `min_octave..=max_octave` take part; each bound defaults to octave 0.
    /// Matched entries are moved to the matched `f2` position.
    /// Construct the matcher with a permissive ratio (0.9) for this search.
    ///
    /// Returns the match count and, per `f1` keypoint, the matched `f2` index.
    pub fn search_for_initialization(
        &self,
        f1: &Frame,
        f2: &Frame,
        prev_matched: &mut [Point2<f64>],
        window: f64,
        min_octave: Option<usize>,
        max_octave: Option<usize>,
    ) -> (usize, Vec<Option<usize>>) {
        assert_eq!(prev_matched.len(), f1.num_features(), "one prior position per keypoint");
        let min_octave = min_octave.unwrap_or(0);
        let max_octave = max_octave.unwrap_or(0);

        let mut assignment = Assignment::new(f1.num_features(), f2.num_features());
        for (i1, kp1) in f1.features.keypoints().iter().enumerate() {
            let level = kp1.octave;
            if level < min_octave || level > max_octave {
                continue;
            }
            let prior = prev_matched[i1];
            let indices = f2.features_in_area(prior.x, prior.y, window, Some(level), Some(level));

            let d1 = f1.descriptor(i1);
            let mut best = BestTwo::new();
            for i2 in indices {
                let dist = descriptor_distance(d1, f2.descriptor(i2));
                if assignment.held_distance(i2).is_some_and(|held| held <= dist) {
                    continue;
                }
                best.offer(i2, dist, level);
            }

            if let Some(i2) = best.best_idx {
                if best.best <= TH_LOW && Self::passes_ratio(best.best, best.second, self.nn_ratio) {
                    assignment.claim(i1, i2, best.best);
                }
            }
        }

        self.filter_orientation(&mut assignment, f1, f2);

        for (i1, i2) in assignment.pairs() {
            prev_matched[i1] = f2.keypoint(i2).pt;
        }
        let n_matches = assignment.num_matches();
        tracing::debug!("[SearchForInitialization] {} matches", n_matches);
        (n_matches, assignment.into_matches())
    }

    /// Carry `f1`'s tracked landmarks over to `f2` by searching a fixed window
    /// around each `f1` keypoint position on the same octave.
    ///
    /// `min_octave` / `max_octave` restrict which `f1` keypoints take part.
    /// Matches are written into `f2.map_point_matches`; occupied slots are kept.
    pub fn window_search(
        &self,
        f1: &Frame,
        f2: &mut Frame,
        map: &Map,
        window: f64,
        min_octave: Option<usize>,
        max_octave: Option<usize>,
    ) -> usize {
        let mut assignment = Assignment::new(f1.num_features(), f2.num_features());

        for (i1, slot) in f1.map_point_matches.iter().enumerate() {
            let alive = slot
                .filter(|_| !f1.outliers[i1])
                .and_then(|id| map.map_point(id))
                .is_some_and(|mp| !mp.is_bad);
            if !alive {
                continue;
            }
            let kp1 = f1.keypoint(i1);
            let level = kp1.octave;
            if min_octave.is_some_and(|min| level < min) || max_octave.is_some_and(|max| level > max) {
                continue;
            }

            let indices = f2.features_in_area(kp1.pt.x, kp1.pt.y, window, Some(level), Some(level));
            let d1 = f1.descriptor(i1);
            let mut best = BestTwo::new();
            for i2 in indices {
                if f2.map_point_matches[i2].is_some() {
                    continue;
                }
                let dist = descriptor_distance(d1, f2.descriptor(i2));
                if assignment.held_distance(i2).is_some_and(|held| held <= dist) {
                    continue;
                }
                best.offer(i2, dist, level);
            }

            if let Some(i2) = best.best_idx {
                let ratio_ok = best.best as f32 <= best.second as f32 * self.nn_ratio;
                if ratio_ok && best.best <= TH_HIGH {
                    assignment.claim(i1, i2, best.best);
                }
            }
        }

        self.filter_orientation(&mut assignment, f1, &*f2);
        self.write_frame_matches(&assignment, f1, f2, "WindowSearch")
    }

    /// Project `f1`'s tracked landmarks into `f2` using `f2`'s pose and search
    /// `window` pixels (scaled by the `f1` octave) around each projection.
    pub fn search_by_projection_frames(&self, f1: &Frame, f2: &mut Frame, map: &Map, window: f64) -> usize {
        let Some(t_cw) = f2.pose_cw() else {
            return 0;
        };
        let mut assignment = Assignment::new(f1.num_features(), f2.num_features());

        for (i1, slot) in f1.map_point_matches.iter().enumerate() {
            let Some(mp) = slot
                .filter(|_| !f1.outliers[i1])
                .and_then(|id| map.map_point(id))
                .filter(|mp| mp.is_valid())
            else {
                continue;
            };

            let p_cam = t_cw.transform_point(&mp.position);
            let Some(px) = f2.camera.project(&p_cam) else {
                continue;
            };
            if !f2.camera.is_in_image(px.x, px.y) {
                continue;
            }

            let level = f1.keypoint(i1).octave;
            let r = window * f2.pyramid.scale(level);
            let indices = f2.features_in_area(px.x, px.y, r, Some(level.saturating_sub(1)), Some(level + 1));

            let d1 = f1.descriptor(i1);
            let mut best = BestTwo::new();
            for i2 in indices {
                if f2.map_point_matches[i2].is_some() {
                    continue;
                }
                let dist = descriptor_distance(d1, f2.descriptor(i2));
                if assignment.held_distance(i2).is_some_and(|held| held <= dist) {
                    continue;
                }
                best.offer(i2, dist, f2.keypoint(i2).octave);
            }

            if let Some(i2) = best.best_idx {
                let ratio_ok = best.best as f32 <= best.second as f32 * self.nn_ratio;
                if ratio_ok && best.best <= TH_HIGH {
                    assignment.claim(i1, i2, best.best);
                }
            }
        }

        self.filter_orientation(&mut assignment, f1, &*f2);
        self.write_frame_matches(&assignment, f1, f2, "SearchByProjection frames")
    }

    fn write_frame_matches(&self, assignment: &Assignment, f1: &Frame, f2: &mut Frame, label: &str) -> usize {
        for (i1, i2) in assignment.pairs() {
            f2.map_point_matches[i2] = f1.map_point_matches[i1];
        }
        let n_matches = assignment.num_matches();
        tracing::debug!("[{}] {} matches", label, n_matches);
        n_matches
    }
}
