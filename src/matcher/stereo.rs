//! Rectified stereo correspondence.
//!
//! Left keypoints are matched against right keypoints on the same image row
//! (within a band that grows with the octave). The best descriptor match is
//! refined to sub-pixel precision by patch correlation on the keypoint's
//! pyramid level, and matches with a large correlation error relative to the
//! median are dropped.

use image::GrayImage;

use crate::tracking::frame::{FeatureSet, FeatureView, ImagePyramid};
use crate::tracking::tracking_frame::Frame;

use super::{descriptor_distance, TH_HIGH, TH_LOW};

/// Half-width of the correlation patch.
const PATCH_HALF: i64 = 5;
/// Half-range of the horizontal correlation search.
const SEARCH_HALF: i64 = 5;

/// Match `frame`'s keypoints (left image) with `right` keypoints and fill
/// the frame's per-keypoint `u_right` and `depth`.
///
/// Previous stereo measurements are cleared. Returns the number of
/// keypoints that received a depth.
pub fn compute_stereo_matches(
    frame: &mut Frame,
    right: &FeatureSet,
    left_pyr: &ImagePyramid,
    right_pyr: &ImagePyramid,
) -> usize {
    for idx in 0..frame.num_features() {
        frame.clear_stereo(idx);
    }
    let camera = frame.camera;
    if camera.baseline <= 0.0 {
        return 0;
    }

    let th_orb_dist = (TH_HIGH + TH_LOW) / 2;
    let n_rows = camera.height.ceil().max(0.0) as usize;

    // Row index of right keypoints.
    let mut rows: Vec<Vec<usize>> = vec![Vec::new(); n_rows];
    for (i_r, kp) in right.keypoints().iter().enumerate() {
        let r = 2.0 * frame.pyramid.scale(kp.octave);
        let min_r = (kp.pt.y - r).floor().max(0.0) as usize;
        let max_r = (kp.pt.y + r).ceil();
        if max_r < 0.0 {
            continue;
        }
        let max_r = (max_r as usize).min(n_rows.saturating_sub(1));
        for row in rows.iter_mut().take(max_r + 1).skip(min_r) {
            row.push(i_r);
        }
    }

    let min_d = 0.0;
    let max_d = camera.bf() / camera.baseline;

    let mut accepted: Vec<(i64, usize)> = Vec::new();
    for i_l in 0..frame.num_features() {
        let kp_l = *frame.keypoint(i_l);
        let level = kp_l.octave;
        let (u_l, v_l) = (kp_l.pt.x, kp_l.pt.y);
        if v_l < 0.0 || v_l as usize >= n_rows {
            continue;
        }

        let min_u = u_l - max_d;
        let max_u = u_l - min_d;
        if max_u < 0.0 {
            continue;
        }

        let d_l = frame.descriptor(i_l);
        let mut best_dist = th_orb_dist;
        let mut best_r = None;
        for &i_r in &rows[v_l as usize] {
            let kp_r = right.keypoint(i_r);
            if kp_r.octave + 1 < level || kp_r.octave > level + 1 {
                continue;
            }
            let u_r = kp_r.pt.x;
            if u_r < min_u || u_r > max_u {
                continue;
            }
            let dist = descriptor_distance(d_l, right.descriptor(i_r));
            if dist < best_dist {
                best_dist = dist;
                best_r = Some(i_r);
            }
        }
        let Some(i_r) = best_r else {
            continue;
        };

        // Sub-pixel refinement on the keypoint's level.
        let inv_scale = frame.pyramid.inv_scale(level);
        let scaled_ul = (u_l * inv_scale).round() as i64;
        let scaled_vl = (v_l * inv_scale).round() as i64;
        let scaled_ur0 = (right.keypoint(i_r).pt.x * inv_scale).round() as i64;

        let left_img = left_pyr.level(level);
        let right_img = right_pyr.level(level);
        let Some((best_inc, sads)) = correlate(left_img, right_img, scaled_ul, scaled_vl, scaled_ur0) else {
            tracing::trace!("[StereoMatches] keypoint {} patch leaves the image", i_l);
            continue;
        };
        if best_inc == -SEARCH_HALF || best_inc == SEARCH_HALF {
            tracing::trace!("[StereoMatches] keypoint {} correlation minimum on the search border", i_l);
            continue;
        }

        let center = (SEARCH_HALF + best_inc) as usize;
        let d1 = sads[center - 1] as f64;
        let d2 = sads[center] as f64;
        let d3 = sads[center + 1] as f64;
        let delta = (d1 - d3) / (2.0 * (d1 + d3 - 2.0 * d2));
        if !(-1.0..=1.0).contains(&delta) {
            tracing::trace!("[StereoMatches] keypoint {} parabola fit out of range", i_l);
            continue;
        }

        let mut best_ur = frame.pyramid.scale(level) * (scaled_ur0 as f64 + best_inc as f64 + delta);
        let mut disparity = u_l - best_ur;
        if disparity >= min_d && disparity < max_d {
            if disparity <= 0.0 {
                disparity = 0.01;
                best_ur = u_l - 0.01;
            }
            frame.set_stereo(i_l, best_ur, camera.bf() / disparity);
            accepted.push((sads[center], i_l));
        }
    }

    if accepted.is_empty() {
        return 0;
    }
    accepted.sort_unstable();
    let median = accepted[accepted.len() / 2].0 as f64;
    let th_sad = 1.5 * 1.4 * median;

    let mut n_matches = accepted.len();
    for &(sad, i_l) in accepted.iter().rev() {
        if (sad as f64) <= th_sad {
            break;
        }
        tracing::trace!("[StereoMatches] keypoint {} SAD {} above {:.1}", i_l, sad, th_sad);
        frame.clear_stereo(i_l);
        n_matches -= 1;
    }

    tracing::debug!("[StereoMatches] {} of {} keypoints with depth", n_matches, frame.num_features());
    n_matches
}

/// Sum of absolute differences between the left patch at `(ul, v)` and right
/// patches at `(ur0 + inc, v)` for `inc` in `-SEARCH_HALF..=SEARCH_HALF`, after
/// removing each patch's center intensity. Returns the best increment and
/// all distances, or None if a patch leaves either image.
fn correlate(left: &GrayImage, right: &GrayImage, ul: i64, v: i64, ur0: i64) -> Option<(i64, Vec<i64>)> {
    let fits = |img: &GrayImage, u: i64, half: i64| {
        let (w, h) = img.dimensions();
        u - half >= 0 && u + half < w as i64 && v - PATCH_HALF >= 0 && v + PATCH_HALF < h as i64
    };
    if !fits(left, ul, PATCH_HALF) || !fits(right, ur0, PATCH_HALF + SEARCH_HALF) {
        return None;
    }

    let px = |img: &GrayImage, u: i64, v: i64| img.get_pixel(u as u32, v as u32).0[0] as i64;
    let left_center = px(left, ul, v);

    let mut best_inc = 0;
    let mut best_sad = i64::MAX;
    let mut sads = Vec::with_capacity((2 * SEARCH_HALF + 1) as usize);
    for inc in -SEARCH_HALF..=SEARCH_HALF {
        let ur = ur0 + inc;
        let right_center = px(right, ur, v);
        let mut sad = 0;
        for dy in -PATCH_HALF..=PATCH_HALF {
            for dx in -PATCH_HALF..=PATCH_HALF {
                let l = px(left, ul + dx, v + dy) - left_center;
                let r = px(right, ur + dx, v + dy) - right_center;
                sad += (l - r).abs();
            }
        }
        if sad < best_sad {
            best_sad = sad;
            best_inc = inc;
        }
        sads.push(sad);
    }
    Some((best_inc, sads))
}
