//! Stereo correspondence by patch tracking for cameras with a general
//! left-to-right extrinsic.
//!
//! Left keypoints are tracked into the right image with pyramidal
//! Lucas-Kanade, checked by tracking back, and triangulated along both rays.

use image::{GrayImage, Luma};
use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;
use crate::tracking::frame::FeatureView;
use crate::tracking::tracking_frame::Frame;

/// Lucas-Kanade tracking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KltConfig {
    /// Half-width of the tracking window (window is `2 * win_size + 1`).
    pub win_size: usize,
    /// Maximum Gauss-Newton iterations per pyramid level.
    pub max_iterations: usize,
    /// Stop iterating once the update is smaller than this (pixels).
    pub epsilon: f32,
    /// Number of pyramid levels (1 = no pyramid).
    pub num_levels: usize,
    /// Minimum eigenvalue of the structure tensor.
    pub min_eigenvalue: f32,
    /// Maximum forward-backward disagreement (pixels).
    pub max_fb_error: f64,
    /// Maximum reprojection error of the triangulated point in the right image (pixels).
    pub max_reprojection_error: f64,
}

impl Default for KltConfig {
    fn default() -> Self {
        Self {
            win_size: 10,
            max_iterations: 30,
            epsilon: 0.01,
            num_levels: 3,
            min_eigenvalue: 0.001,
            max_fb_error: 1.0,
            max_reprojection_error: 2.0,
        }
    }
}

/// Pyramidal Lucas-Kanade point tracker.
#[derive(Debug, Clone, Default)]
pub struct KltTracker {
    config: KltConfig,
}

impl KltTracker {
    pub fn new(config: KltConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KltConfig {
        &self.config
    }

    /// Track `points` from `prev` into `next`. A point that cannot be tracked
    /// (leaves the image, textureless window) yields `None`.
    pub fn track(&self, prev: &GrayImage, next: &GrayImage, points: &[Point2<f64>]) -> Vec<Option<Point2<f64>>> {
        let prev_pyr = self.build_pyramid(prev);
        let next_pyr = self.build_pyramid(next);
        points
            .iter()
            .map(|pt| self.track_point(&prev_pyr, &next_pyr, (pt.x as f32, pt.y as f32)))
            .map(|res| res.map(|(x, y)| Point2::new(x as f64, y as f64)))
            .collect()
    }

    fn build_pyramid(&self, image: &GrayImage) -> Vec<GrayImage> {
        let mut pyramid = vec![image.clone()];
        for level in 1..self.config.num_levels.max(1) {
            let half = downsample(&pyramid[level - 1]);
            pyramid.push(half);
        }
        pyramid
    }

    /// Coarse to fine; the flow found on one level seeds the next.
    fn track_point(&self, prev_pyr: &[GrayImage], next_pyr: &[GrayImage], point: (f32, f32)) -> Option<(f32, f32)> {
        let mut flow = (0.0f32, 0.0f32);
        for level in (0..prev_pyr.len()).rev() {
            let level_scale = (1u32 << level) as f32;
            let prev_pt = (point.0 / level_scale, point.1 / level_scale);
            let guess = (prev_pt.0 + flow.0, prev_pt.1 + flow.1);

            let found = self.track_at_level(&prev_pyr[level], &next_pyr[level], prev_pt, guess)?;
            flow = (found.0 - prev_pt.0, found.1 - prev_pt.1);
            if level > 0 {
                flow = (flow.0 * 2.0, flow.1 * 2.0);
            }
        }

        let pos = (point.0 + flow.0, point.1 + flow.1);
        let (width, height) = prev_pyr[0].dimensions();
        if pos.0 < 0.0 || pos.1 < 0.0 || pos.0 >= width as f32 || pos.1 >= height as f32 {
            return None;
        }
        Some(pos)
    }

    fn track_at_level(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        prev_pt: (f32, f32),
        guess: (f32, f32),
    ) -> Option<(f32, f32)> {
        let (width, height) = prev.dimensions();
        let win = self.config.win_size as f32;
        let inside = |p: (f32, f32)| {
            p.0 >= win && p.1 >= win && p.0 < width as f32 - win - 1.0 && p.1 < height as f32 - win - 1.0
        };
        if !inside(prev_pt) {
            return None;
        }

        // Structure tensor over the window.
        let win = self.config.win_size as i32;
        let mut grads = Vec::with_capacity(((2 * win + 1) * (2 * win + 1)) as usize);
        let (mut gxx, mut gyy, mut gxy) = (0.0f32, 0.0f32, 0.0f32);
        for dy in -win..=win {
            for dx in -win..=win {
                let x = prev_pt.0 + dx as f32;
                let y = prev_pt.1 + dy as f32;
                let ix = (sample(prev, x + 1.0, y) - sample(prev, x - 1.0, y)) / 2.0;
                let iy = (sample(prev, x, y + 1.0) - sample(prev, x, y - 1.0)) / 2.0;
                gxx += ix * ix;
                gyy += iy * iy;
                gxy += ix * iy;
                grads.push((ix, iy, sample(prev, x, y)));
            }
        }

        let trace = gxx + gyy;
        let det = gxx * gyy - gxy * gxy;
        let min_eig = (trace - (trace * trace - 4.0 * det).max(0.0).sqrt()) / 2.0;
        if min_eig < self.config.min_eigenvalue || det.abs() < 1e-10 {
            return None;
        }

        let mut pos = guess;
        for _ in 0..self.config.max_iterations {
            if !inside(pos) {
                return None;
            }
            let (mut bx, mut by) = (0.0f32, 0.0f32);
            let mut k = 0;
            for dy in -win..=win {
                for dx in -win..=win {
                    let (ix, iy, prev_val) = grads[k];
                    let dt = prev_val - sample(next, pos.0 + dx as f32, pos.1 + dy as f32);
                    bx += ix * dt;
                    by += iy * dt;
                    k += 1;
                }
            }

            let step_x = (gyy * bx - gxy * by) / det;
            let step_y = (gxx * by - gxy * bx) / det;
            pos = (pos.0 + step_x, pos.1 + step_y);
            if step_x * step_x + step_y * step_y < self.config.epsilon * self.config.epsilon {
                break;
            }
        }
        Some(pos)
    }
}

/// 2x downsampling with a 2x2 box filter.
fn downsample(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width / 2, height / 2);
    if w == 0 || h == 0 {
        return image.clone();
    }
    GrayImage::from_fn(w, h, |x, y| {
        let (sx, sy) = (x * 2, y * 2);
        let sum = image.get_pixel(sx, sy).0[0] as u32
            + image.get_pixel((sx + 1).min(width - 1), sy).0[0] as u32
            + image.get_pixel(sx, (sy + 1).min(height - 1)).0[0] as u32
            + image.get_pixel((sx + 1).min(width - 1), (sy + 1).min(height - 1)).0[0] as u32;
        Luma([((sum + 2) / 4) as u8])
    })
}

/// Bilinear sample, clamped to the image.
fn sample(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p = |px: u32, py: u32| image.get_pixel(px, py).0[0] as f32;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Depth along the left ray of the point seen at bearings `xl` (left) and
/// `xr` (right), with `p_r = R p_l + t`.
fn triangulate_depth(xl: &Vector3<f64>, xr: &Vector3<f64>, t_l2r: &SE3) -> Option<f64> {
    let a = xr.cross(&(t_l2r.rotation * xl));
    let b = xr.cross(&t_l2r.translation);
    let aa = a.dot(&a);
    if aa < 1e-12 {
        return None;
    }
    Some(-a.dot(&b) / aa)
}

/// Stereo matching for a camera pair with extrinsic `t_l2r` (left camera
/// coordinates to right camera coordinates); both images share the frame's
/// intrinsics.
///
/// Every left keypoint is tracked into the right image and back. Points that
/// come back to where they started, triangulate in front of both cameras and
/// reproject onto the tracked position get a depth and a virtual rectified
/// right coordinate `u - bf / depth` with `bf = fx * |t|`. Previous stereo
/// measurements are cleared. Returns the count and indices of tracked keypoints.
pub fn search_for_stereo_tracking(
    frame: &mut Frame,
    left: &GrayImage,
    right: &GrayImage,
    t_l2r: &SE3,
    config: &KltConfig,
) -> (usize, Vec<usize>) {
    for idx in 0..frame.num_features() {
        frame.clear_stereo(idx);
    }
    let camera = frame.camera;
    let bf = camera.fx * t_l2r.translation.norm();

    let tracker = KltTracker::new(*config);
    let left_pts: Vec<Point2<f64>> = frame.features.keypoints().iter().map(|kp| kp.pt).collect();
    let forward = tracker.track(left, right, &left_pts);

    let tracked: Vec<(usize, Point2<f64>)> = forward
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.map(|p| (i, p)))
        .collect();
    let right_pts: Vec<Point2<f64>> = tracked.iter().map(|(_, p)| *p).collect();
    let backward = tracker.track(right, left, &right_pts);

    let mut indices = Vec::new();
    for ((i, p_right), back) in tracked.into_iter().zip(backward) {
        let p_left = left_pts[i];
        let Some(back) = back else {
            continue;
        };
        if (back - p_left).norm() > config.max_fb_error {
            tracing::trace!("[StereoTracking] keypoint {} failed the forward-backward check", i);
            continue;
        }

        let xl = camera.bearing(&p_left);
        let xr = camera.bearing(&p_right);
        let Some(depth) = triangulate_depth(&xl, &xr, t_l2r).filter(|d| *d > 0.0) else {
            tracing::trace!("[StereoTracking] keypoint {} triangulates behind the camera", i);
            continue;
        };

        let p_r = t_l2r.transform_point(&(xl * depth));
        let reprojected = camera.project(&p_r);
        let consistent =
            reprojected.is_some_and(|px| (px - p_right).norm() <= config.max_reprojection_error);
        if !consistent {
            tracing::trace!("[StereoTracking] keypoint {} does not reproject onto its track", i);
            continue;
        }

        frame.set_stereo(i, p_left.x - bf / depth, depth);
        indices.push(i);
    }

    tracing::debug!(
        "[StereoTracking] {} of {} keypoints tracked into the right image",
        indices.len(),
        frame.num_features()
    );
    (indices.len(), indices)
}
